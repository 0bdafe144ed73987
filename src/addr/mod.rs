//! Address families and address values.
//!
//! A socket address is a closed set of variants:
//! - `V4`: Internet Protocol version 4
//! - `V6`: Internet Protocol version 6
//! - `Unix`: local-domain socket (filesystem path or abstract name)
//! - `Unknown`: a family this crate cannot decode, kept only for its tag

use std::fmt;

mod ipv4;
mod ipv6;
mod unix;
pub use self::ipv4::SocketAddrV4;
pub use self::ipv6::SocketAddrV6;
pub use self::unix::UnixAddr;

/// Address family of a socket or an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
	Ipv4,
	Ipv6,
	Unix,
	/// Any other `AF_*` value.
	Other(libc::c_int),
}

impl Family {
	/// Returns the libc constant for this address family.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			Family::Ipv4 => libc::AF_INET,
			Family::Ipv6 => libc::AF_INET6,
			Family::Unix => libc::AF_UNIX,
			Family::Other(raw) => raw,
		}
	}

	pub fn from_raw(raw: libc::c_int) -> Self {
		match raw {
			libc::AF_INET => Family::Ipv4,
			libc::AF_INET6 => Family::Ipv6,
			libc::AF_UNIX => Family::Unix,
			other => Family::Other(other),
		}
	}
}

impl fmt::Display for Family {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.raw())
	}
}

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub trait ToSockAddr {
	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	/// Returns None if the address cannot be encoded (e.g., path too long for Unix).
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}

/// Trait for address types that can be created from raw sockaddr.
pub trait FromSockAddr: Sized {
	/// Creates address from raw sockaddr storage.
	///
	/// # Safety
	/// `addr` must point to at least `len` initialised bytes.
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self>;
}

/// A socket address of any supported family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
	V4(SocketAddrV4),
	V6(SocketAddrV6),
	Unix(UnixAddr),
	Unknown(Family),
}

impl Address {
	/// Address placeholder for a family whose address could not be resolved.
	pub fn unknown(family: Family) -> Self {
		Address::Unknown(family)
	}

	pub fn family(&self) -> Family {
		match self {
			Address::V4(_) => Family::Ipv4,
			Address::V6(_) => Family::Ipv6,
			Address::Unix(_) => Family::Unix,
			Address::Unknown(family) => *family,
		}
	}

	pub fn is_unknown(&self) -> bool {
		matches!(self, Address::Unknown(_))
	}

	/// Length of the wire-format representation, zero if it cannot be encoded.
	pub fn addr_len(&self) -> libc::socklen_t {
		self.with_raw(|_, len| len).unwrap_or(0)
	}

	/// Copy of the wire-format `sockaddr` bytes.
	pub fn to_bytes(&self) -> Vec<u8> {
		self.with_raw(|ptr, len| {
			// SAFETY: `with_raw` hands out a pointer valid for `len` bytes.
			unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize) }.to_vec()
		})
		.unwrap_or_default()
	}

	/// Decodes a raw address reported by the OS, dispatching on `family`.
	///
	/// Anything that does not decode becomes `Address::Unknown(family)`.
	///
	/// # Safety
	/// `addr` must point to at least `len` initialised bytes.
	pub(crate) unsafe fn from_raw(
		family: Family,
		addr: *const libc::sockaddr,
		len: libc::socklen_t,
	) -> Self {
		let decoded = unsafe {
			match family {
				Family::Ipv4 => SocketAddrV4::from_sockaddr(addr, len).map(Address::V4),
				Family::Ipv6 => SocketAddrV6::from_sockaddr(addr, len).map(Address::V6),
				Family::Unix => UnixAddr::from_sockaddr(addr, len).map(Address::Unix),
				Family::Other(_) => None,
			}
		};
		decoded.unwrap_or(Address::Unknown(family))
	}
}

impl ToSockAddr for Address {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		match self {
			Address::V4(addr) => addr.with_raw(f),
			Address::V6(addr) => addr.with_raw(f),
			Address::Unix(addr) => addr.with_raw(f),
			Address::Unknown(_) => None,
		}
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Address::V4(addr) => addr.fmt(f),
			Address::V6(addr) => addr.fmt(f),
			Address::Unix(addr) => addr.fmt(f),
			Address::Unknown(family) => write!(f, "[UnknownAddress family={}]", family),
		}
	}
}

impl From<SocketAddrV4> for Address {
	fn from(addr: SocketAddrV4) -> Self {
		Address::V4(addr)
	}
}

impl From<SocketAddrV6> for Address {
	fn from(addr: SocketAddrV6) -> Self {
		Address::V6(addr)
	}
}

impl From<UnixAddr> for Address {
	fn from(addr: UnixAddr) -> Self {
		Address::Unix(addr)
	}
}

impl From<std::net::SocketAddr> for Address {
	fn from(addr: std::net::SocketAddr) -> Self {
		match addr {
			std::net::SocketAddr::V4(addr) => Address::V4(addr.into()),
			std::net::SocketAddr::V6(addr) => Address::V6(addr.into()),
		}
	}
}

/// Zeroed storage large enough for any address family.
pub(crate) fn empty_storage() -> (libc::sockaddr_storage, libc::socklen_t) {
	// SAFETY: all zeros is a valid `sockaddr_storage`.
	let storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	(storage, std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t)
}
