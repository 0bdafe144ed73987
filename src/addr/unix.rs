use std::fmt;
use std::mem::{offset_of, size_of};

use crate::addr::{FromSockAddr, ToSockAddr};

/// Offset of `sun_path` inside `sockaddr_un`, i.e. the length of an unnamed address.
const PATH_OFFSET: usize = offset_of!(libc::sockaddr_un, sun_path);

/// Unix domain socket address (file path or abstract).
///
/// Unlike IP addresses the wire length is variable: it depends on the
/// path, so decoding always uses the length reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnixAddr {
	path: Vec<u8>,
	/// True if this is an abstract socket (Linux-only, no filesystem entry).
	is_abstract: bool,
}

impl UnixAddr {
	/// Creates a new Unix address from a filesystem path.
	pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
		Self {
			path: path.as_ref().to_vec(),
			is_abstract: false,
		}
	}

	/// Creates from a filesystem path.
	pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
		use std::os::unix::ffi::OsStrExt;
		Self::new(path.as_ref().as_os_str().as_bytes())
	}

	/// Creates an abstract socket address (Linux-only).
	///
	/// Abstract sockets exist only in memory, there is no filesystem entry.
	pub fn abstract_socket<P: AsRef<[u8]>>(name: P) -> Self {
		Self {
			path: name.as_ref().to_vec(),
			is_abstract: true,
		}
	}

	/// Returns true if this is an abstract socket.
	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	/// Returns true for the address of an unbound socket.
	pub fn is_unnamed(&self) -> bool {
		!self.is_abstract && self.path.is_empty()
	}

	/// Returns the path bytes.
	pub fn path(&self) -> &[u8] {
		&self.path
	}

	/// Filesystem path, `None` for abstract and unnamed addresses.
	pub fn fs_path(&self) -> Option<&std::path::Path> {
		use std::os::unix::ffi::OsStrExt;
		if self.is_abstract || self.path.is_empty() {
			return None;
		}
		Some(std::path::Path::new(std::ffi::OsStr::from_bytes(&self.path)))
	}

	/// Converts to the raw sockaddr_un and its exact wire length.
	pub(crate) fn to_raw(&self) -> Option<(libc::sockaddr_un, libc::socklen_t)> {
		// SAFETY: all zeros is a valid `sockaddr_un`.
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

		// Abstract names start after a leading NUL; paths keep a trailing one.
		let start = usize::from(self.is_abstract);
		let max = if self.is_abstract { addr.sun_path.len() } else { addr.sun_path.len() - 1 };
		if start + self.path.len() > max {
			return None;
		}
		for (i, &byte) in self.path.iter().enumerate() {
			addr.sun_path[start + i] = byte as libc::c_char;
		}

		let len = if self.is_abstract {
			PATH_OFFSET + 1 + self.path.len()
		} else if self.path.is_empty() {
			PATH_OFFSET
		} else {
			PATH_OFFSET + self.path.len() + 1
		};
		Some((addr, len as libc::socklen_t))
	}

	/// Creates from raw sockaddr_un, trimming the path to the reported length.
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Self {
		let path_len = (len as usize)
			.saturating_sub(PATH_OFFSET)
			.min(raw.sun_path.len());
		let bytes = &raw.sun_path[..path_len];

		match bytes.first().copied() {
			None => Self { path: Vec::new(), is_abstract: false },
			Some(0) => Self {
				path: bytes[1..].iter().map(|&c| c as u8).collect(),
				is_abstract: true,
			},
			Some(_) => {
				let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
				Self {
					path: bytes[..end].iter().map(|&c| c as u8).collect(),
					is_abstract: false,
				}
			}
		}
	}
}

impl ToSockAddr for UnixAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let (raw, len) = self.to_raw()?;
		let ptr = &raw as *const _ as *const libc::sockaddr;
		Some(f(ptr, len))
	}
}

impl FromSockAddr for UnixAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if (len as usize) < size_of::<libc::sa_family_t>() {
			return None;
		}
		// SAFETY: zeroed storage, then copy only the bytes the caller vouches for.
		let mut raw: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		let len = (len as usize).min(size_of::<libc::sockaddr_un>());
		unsafe {
			std::ptr::copy_nonoverlapping(addr.cast::<u8>(), (&mut raw as *mut libc::sockaddr_un).cast::<u8>(), len);
		}
		if raw.sun_family != libc::AF_UNIX as libc::sa_family_t {
			return None;
		}
		Some(Self::from_raw(&raw, len as libc::socklen_t))
	}
}

impl fmt::Display for UnixAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let path = String::from_utf8_lossy(&self.path);
		if self.is_abstract {
			write!(f, "\\0{}", path)
		} else {
			f.write_str(&path)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn path_length_includes_terminator() {
		let addr = UnixAddr::new("/tmp/app.sock");
		let (_, len) = addr.to_raw().unwrap();
		assert_eq!(len as usize, PATH_OFFSET + "/tmp/app.sock".len() + 1);
	}

	#[test]
	fn decode_uses_reported_length() {
		let addr = UnixAddr::new("/run/x.sock");
		let (raw, len) = addr.to_raw().unwrap();
		assert_eq!(UnixAddr::from_raw(&raw, len), addr);

		// The kernel reports only the family for an unbound socket.
		let unnamed = UnixAddr::from_raw(&raw, PATH_OFFSET as libc::socklen_t);
		assert!(unnamed.is_unnamed());
		assert_eq!(unnamed.fs_path(), None);
	}

	#[test]
	fn abstract_round_trip() {
		let addr = UnixAddr::abstract_socket(b"fiberlane\0test");
		let (raw, len) = addr.to_raw().unwrap();
		assert_eq!(len as usize, PATH_OFFSET + 1 + 14);
		let decoded = UnixAddr::from_raw(&raw, len);
		assert_eq!(decoded, addr);
		assert!(decoded.is_abstract());
		assert_eq!(decoded.to_string(), "\\0fiberlane\u{0}test");
	}

	#[test]
	fn abstract_name_may_fill_sun_path() {
		let addr = UnixAddr::abstract_socket(vec![b'a'; 107]);
		let (raw, len) = addr.to_raw().unwrap();
		assert_eq!(len as usize, size_of::<libc::sockaddr_un>());
		assert_eq!(UnixAddr::from_raw(&raw, len), addr);

		assert!(UnixAddr::abstract_socket(vec![b'a'; 108]).to_raw().is_none());
		// Paths need room for the trailing NUL.
		assert!(UnixAddr::new(vec![b'a'; 108]).to_raw().is_none());
		assert!(UnixAddr::new(vec![b'a'; 107]).to_raw().is_some());
	}

	#[test]
	fn path_too_long() {
		let addr = UnixAddr::new(vec![b'a'; 200]);
		assert!(addr.to_raw().is_none());
		assert!(addr.with_raw(|_, len| len).is_none());
	}
}
