use std::fmt;

use crate::addr::{FromSockAddr, ToSockAddr};

/// IPv6 socket address (IP + port + scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV6 {
	ip: [u8; 16],
	port: u16,
	flowinfo: u32,
	/// Scope ID for link-local addresses (identifies network interface).
	scope_id: u32,
}

impl SocketAddrV6 {
	/// Creates a new IPv6 address.
	pub fn new(ip: [u8; 16], port: u16) -> Self {
		Self { ip, port, flowinfo: 0, scope_id: 0 }
	}

	/// Creates with explicit scope ID.
	///
	/// Use for link-local addresses (fe80::) where you need to specify the interface.
	pub fn with_scope(ip: [u8; 16], port: u16, scope_id: u32) -> Self {
		Self { ip, port, flowinfo: 0, scope_id }
	}

	/// Loopback address (`::1`) on `port`.
	pub fn localhost(port: u16) -> Self {
		let mut ip = [0; 16];
		ip[15] = 1;
		Self::new(ip, port)
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 16] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Returns the scope ID.
	pub fn scope_id(&self) -> u32 {
		self.scope_id
	}

	/// Converts to the raw sockaddr_in6 for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in6 {
		// SAFETY: all zeros is a valid `sockaddr_in6`.
		let mut raw: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
		raw.sin6_family = libc::AF_INET6 as libc::sa_family_t;
		raw.sin6_port = self.port.to_be();
		raw.sin6_flowinfo = self.flowinfo;
		raw.sin6_addr = libc::in6_addr { s6_addr: self.ip };
		raw.sin6_scope_id = self.scope_id;
		raw
	}

	/// Creates from raw sockaddr_in6.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in6) -> Self {
		Self {
			ip: raw.sin6_addr.s6_addr,
			port: u16::from_be(raw.sin6_port),
			flowinfo: raw.sin6_flowinfo,
			scope_id: raw.sin6_scope_id,
		}
	}
}

impl ToSockAddr for SocketAddrV6 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

impl FromSockAddr for SocketAddrV6 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { std::ptr::read_unaligned(addr as *const libc::sockaddr_in6) };
		if raw.sin6_family != libc::AF_INET6 as libc::sa_family_t {
			return None;
		}
		Some(Self::from_raw(&raw))
	}
}

impl fmt::Display for SocketAddrV6 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let ip = std::net::Ipv6Addr::from(self.ip);
		if self.scope_id == 0 {
			write!(f, "[{}]:{}", ip, self.port)
		} else {
			write!(f, "[{}%{}]:{}", ip, self.scope_id, self.port)
		}
	}
}

impl From<std::net::SocketAddrV6> for SocketAddrV6 {
	fn from(addr: std::net::SocketAddrV6) -> Self {
		Self {
			ip: addr.ip().octets(),
			port: addr.port(),
			flowinfo: addr.flowinfo(),
			scope_id: addr.scope_id(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_with_and_without_scope() {
		assert_eq!(SocketAddrV6::localhost(8080).to_string(), "[::1]:8080");
		let mut ip = [0; 16];
		ip[0] = 0xfe;
		ip[1] = 0x80;
		ip[15] = 1;
		assert_eq!(SocketAddrV6::with_scope(ip, 22, 3).to_string(), "[fe80::1%3]:22");
	}

	#[test]
	fn raw_round_trip() {
		let addr = SocketAddrV6::with_scope(SocketAddrV6::localhost(0).ip(), 1234, 2);
		assert_eq!(SocketAddrV6::from_raw(&addr.to_raw()), addr);
	}
}
