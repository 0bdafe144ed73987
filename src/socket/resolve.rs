use std::io;

use crate::addr::{Address, empty_storage};
use super::Socket;

#[derive(Clone, Copy)]
enum Side {
	Local,
	Remote,
}

impl Socket {
	/// Address of the connected peer.
	///
	/// Cached after the first successful lookup. A failed lookup returns
	/// `Address::Unknown` of this socket's family and is not cached.
	pub fn get_remote_address(&mut self) -> Address {
		if let Some(addr) = &self.remote_addr {
			return addr.clone();
		}
		match self.query_address(Side::Remote) {
			Ok(addr) => {
				self.remote_addr = Some(addr.clone());
				addr
			}
			Err(err) => {
				log::error!(fd = self.raw_fd().unwrap_or(-1); "getpeername error: {err}");
				Address::unknown(self.family)
			}
		}
	}

	/// Address this socket is bound to, cached like [`Socket::get_remote_address`].
	pub fn get_local_address(&mut self) -> Address {
		if let Some(addr) = &self.local_addr {
			return addr.clone();
		}
		match self.query_address(Side::Local) {
			Ok(addr) => {
				self.local_addr = Some(addr.clone());
				addr
			}
			Err(err) => {
				log::error!(fd = self.raw_fd().unwrap_or(-1); "getsockname error: {err}");
				Address::unknown(self.family)
			}
		}
	}

	/// Asks the OS and decodes the answer for this socket's family,
	/// using the reported length (variable for local-domain addresses).
	fn query_address(&self, side: Side) -> io::Result<Address> {
		let fd = self.raw_fd().ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
		let (mut storage, mut len) = empty_storage();
		let ptr = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr;
		match side {
			Side::Local => syscall!(getsockname(fd, ptr, &mut len))?,
			Side::Remote => syscall!(getpeername(fd, ptr, &mut len))?,
		};
		// SAFETY: the kernel initialised `len` bytes of `storage`.
		Ok(unsafe { Address::from_raw(self.family, ptr, len) })
	}
}
