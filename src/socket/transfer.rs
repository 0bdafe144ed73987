use std::io::{IoSlice, IoSliceMut};
use std::os::fd::RawFd;

use crate::addr::{Address, ToSockAddr, empty_storage};
use crate::error::IoError;
use crate::hook;
use crate::scheduler::Interest;
use super::Socket;

/// Collapses a transfer result into the byte count or `-1`.
fn to_count(res: Result<usize, IoError>) -> isize {
	match res {
		Ok(n) => n as isize,
		Err(err) => {
			log::debug!("{err}");
			-1
		}
	}
}

/// Message header over `iov` without a peer address.
fn msghdr(iov: *mut libc::iovec, iovlen: usize) -> libc::msghdr {
	// SAFETY: all zeros is a valid `msghdr`.
	let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
	msg.msg_iov = iov;
	msg.msg_iovlen = iovlen as _;
	msg
}

/// Data transfer.
///
/// Every call fails with `-1` (or [`IoError::NotConnected`]) without a
/// syscall while the socket is not connected. Datagram sockets count as
/// connected from creation.
impl Socket {
	fn connected_fd(&self) -> Result<RawFd, IoError> {
		match self.raw_fd() {
			Some(fd) if self.connected => Ok(fd),
			_ => Err(IoError::NotConnected),
		}
	}

	pub fn send(&self, buf: &[u8], flags: i32) -> isize {
		to_count(self.try_send(buf, flags))
	}

	pub fn try_send(&self, buf: &[u8], flags: i32) -> Result<usize, IoError> {
		let fd = self.connected_fd()?;
		hook::do_io(fd, self.scheduler.as_ref(), "send", Interest::Write, || {
			syscall!(send(fd, buf.as_ptr().cast(), buf.len(), flags))
		})
		.map(|n| n as usize)
		.map_err(IoError::write)
	}

	/// Gathers `bufs` into a single `sendmsg`.
	pub fn send_vectored(&self, bufs: &[IoSlice<'_>], flags: i32) -> isize {
		to_count(self.try_send_vectored(bufs, flags))
	}

	pub fn try_send_vectored(&self, bufs: &[IoSlice<'_>], flags: i32) -> Result<usize, IoError> {
		let fd = self.connected_fd()?;
		hook::do_io(fd, self.scheduler.as_ref(), "sendmsg", Interest::Write, || {
			// `IoSlice` is ABI compatible with `iovec`.
			let msg = msghdr(bufs.as_ptr() as *mut libc::iovec, bufs.len());
			syscall!(sendmsg(fd, &msg, flags))
		})
		.map(|n| n as usize)
		.map_err(IoError::write)
	}

	pub fn send_to(&self, buf: &[u8], to: &Address, flags: i32) -> isize {
		to_count(self.try_send_to(buf, to, flags))
	}

	pub fn try_send_to(&self, buf: &[u8], to: &Address, flags: i32) -> Result<usize, IoError> {
		let fd = self.connected_fd()?;
		to.with_raw(|addr, addr_len| {
			hook::do_io(fd, self.scheduler.as_ref(), "sendto", Interest::Write, || {
				syscall!(sendto(fd, buf.as_ptr().cast(), buf.len(), flags, addr, addr_len))
			})
		})
		.ok_or(IoError::InvalidAddress)?
		.map(|n| n as usize)
		.map_err(IoError::write)
	}

	/// Gathers `bufs` into a single `sendmsg` addressed to `to`.
	pub fn send_to_vectored(&self, bufs: &[IoSlice<'_>], to: &Address, flags: i32) -> isize {
		to_count(self.try_send_to_vectored(bufs, to, flags))
	}

	pub fn try_send_to_vectored(&self, bufs: &[IoSlice<'_>], to: &Address, flags: i32) -> Result<usize, IoError> {
		let fd = self.connected_fd()?;
		to.with_raw(|addr, addr_len| {
			hook::do_io(fd, self.scheduler.as_ref(), "sendmsg", Interest::Write, || {
				let mut msg = msghdr(bufs.as_ptr() as *mut libc::iovec, bufs.len());
				msg.msg_name = addr as *mut libc::c_void;
				msg.msg_namelen = addr_len;
				syscall!(sendmsg(fd, &msg, flags))
			})
		})
		.ok_or(IoError::InvalidAddress)?
		.map(|n| n as usize)
		.map_err(IoError::write)
	}

	pub fn recv(&self, buf: &mut [u8], flags: i32) -> isize {
		to_count(self.try_recv(buf, flags))
	}

	pub fn try_recv(&self, buf: &mut [u8], flags: i32) -> Result<usize, IoError> {
		let fd = self.connected_fd()?;
		hook::do_io(fd, self.scheduler.as_ref(), "recv", Interest::Read, || {
			syscall!(recv(fd, buf.as_mut_ptr().cast(), buf.len(), flags))
		})
		.map(|n| n as usize)
		.map_err(IoError::read)
	}

	/// Scatters a single `recvmsg` over `bufs`.
	pub fn recv_vectored(&self, bufs: &mut [IoSliceMut<'_>], flags: i32) -> isize {
		to_count(self.try_recv_vectored(bufs, flags))
	}

	pub fn try_recv_vectored(&self, bufs: &mut [IoSliceMut<'_>], flags: i32) -> Result<usize, IoError> {
		let fd = self.connected_fd()?;
		let iov = bufs.as_mut_ptr() as *mut libc::iovec;
		let iovlen = bufs.len();
		hook::do_io(fd, self.scheduler.as_ref(), "recvmsg", Interest::Read, || {
			let mut msg = msghdr(iov, iovlen);
			syscall!(recvmsg(fd, &mut msg, flags))
		})
		.map(|n| n as usize)
		.map_err(IoError::read)
	}

	/// Receives a datagram, overwriting `from` with the sender's address.
	pub fn recv_from(&self, buf: &mut [u8], from: &mut Address, flags: i32) -> isize {
		to_count(self.try_recv_from(buf, from, flags))
	}

	pub fn try_recv_from(&self, buf: &mut [u8], from: &mut Address, flags: i32) -> Result<usize, IoError> {
		let fd = self.connected_fd()?;
		let (mut storage, storage_len) = empty_storage();
		let addr = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr;
		let mut addr_len = storage_len;
		let n = hook::do_io(fd, self.scheduler.as_ref(), "recvfrom", Interest::Read, || {
			addr_len = storage_len;
			syscall!(recvfrom(fd, buf.as_mut_ptr().cast(), buf.len(), flags, addr, &mut addr_len))
		})
		.map_err(IoError::read)?;
		// SAFETY: the kernel initialised `addr_len` bytes of `storage`.
		*from = unsafe { Address::from_raw(self.family, addr, addr_len) };
		Ok(n as usize)
	}

	/// Scatters a single `recvmsg` over `bufs`, overwriting `from` with the
	/// sender's address.
	pub fn recv_from_vectored(&self, bufs: &mut [IoSliceMut<'_>], from: &mut Address, flags: i32) -> isize {
		to_count(self.try_recv_from_vectored(bufs, from, flags))
	}

	pub fn try_recv_from_vectored(
		&self,
		bufs: &mut [IoSliceMut<'_>],
		from: &mut Address,
		flags: i32,
	) -> Result<usize, IoError> {
		let fd = self.connected_fd()?;
		let (mut storage, storage_len) = empty_storage();
		let addr = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr;
		let iov = bufs.as_mut_ptr() as *mut libc::iovec;
		let iovlen = bufs.len();
		let mut addr_len = storage_len;
		let n = hook::do_io(fd, self.scheduler.as_ref(), "recvmsg", Interest::Read, || {
			let mut msg = msghdr(iov, iovlen);
			msg.msg_name = addr.cast();
			msg.msg_namelen = storage_len;
			let res = syscall!(recvmsg(fd, &mut msg, flags));
			addr_len = msg.msg_namelen;
			res
		})
		.map_err(IoError::read)?;
		// SAFETY: the kernel initialised `addr_len` bytes of `storage`.
		*from = unsafe { Address::from_raw(self.family, addr, addr_len) };
		Ok(n as usize)
	}
}
