use std::fmt;

use crate::addr::{FromSockAddr, ToSockAddr};

/// IPv4 socket address (IP + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV4 {
	ip: [u8; 4],
	port: u16,
}

impl SocketAddrV4 {
	/// Creates a new IPv4 address.
	pub fn new(ip: [u8; 4], port: u16) -> Self {
		Self { ip, port }
	}

	/// Wildcard address (`0.0.0.0`) on `port`; port 0 lets the kernel pick.
	pub fn any(port: u16) -> Self {
		Self::new([0; 4], port)
	}

	/// Loopback address (`127.0.0.1`) on `port`.
	pub fn localhost(port: u16) -> Self {
		Self::new([127, 0, 0, 1], port)
	}

	/// Creates from raw sockaddr_in.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self {
			ip: raw.sin_addr.s_addr.to_ne_bytes(),
			port: u16::from_be(raw.sin_port),
		}
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 4] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn set_port(&mut self, port: u16) {
		self.port = port;
	}

	/// Converts to the raw sockaddr_in for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port.to_be(),
			// `s_addr` is stored in network order, which is the byte order of `ip`.
			sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(self.ip) },
			sin_zero: [0; 8],
		}
	}
}

impl ToSockAddr for SocketAddrV4 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

impl FromSockAddr for SocketAddrV4 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { std::ptr::read_unaligned(addr as *const libc::sockaddr_in) };
		if raw.sin_family != libc::AF_INET as libc::sa_family_t {
			return None;
		}
		Some(Self::from_raw(&raw))
	}
}

impl fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let [a, b, c, d] = self.ip;
		write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
	}
}

impl From<std::net::SocketAddrV4> for SocketAddrV4 {
	fn from(addr: std::net::SocketAddrV4) -> Self {
		Self::new(addr.ip().octets(), addr.port())
	}
}

impl From<SocketAddrV4> for std::net::SocketAddrV4 {
	fn from(addr: SocketAddrV4) -> Self {
		std::net::SocketAddrV4::new(addr.ip.into(), addr.port)
	}
}
