use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::addr::{Address, Family, ToSockAddr, UnixAddr};
use crate::error::SocketError;
use crate::fd_registry::FdRegistry;
use crate::hook;
use super::{SockType, Socket};

/// Backlog used when the caller has no preference.
pub const DEFAULT_BACKLOG: i32 = libc::SOMAXCONN;

fn os_errno(err: &std::io::Error) -> i32 {
	err.raw_os_error().unwrap_or(libc::EIO)
}

impl Socket {
	/// Opens a descriptor for this socket's family, type and protocol.
	pub(crate) fn new_sock(&mut self) -> Result<RawFd, SocketError> {
		match hook::socket(self.family.raw(), self.sock_type.raw(), self.protocol) {
			Ok(fd) => {
				let raw = fd.as_raw_fd();
				self.fd = Some(fd);
				self.init_sock();
				Ok(raw)
			}
			Err(err) => {
				let err = SocketError::Create {
					errno: os_errno(&err),
					family: self.family.raw(),
					sock_type: self.sock_type.raw(),
					protocol: self.protocol,
				};
				log::error!("{err}");
				Err(err)
			}
		}
	}

	fn ensure_fd(&mut self) -> Result<RawFd, SocketError> {
		match self.raw_fd() {
			Some(fd) => Ok(fd),
			None => self.new_sock(),
		}
	}

	/// Options every fresh or accepted descriptor gets.
	fn init_sock(&self) {
		let one: libc::c_int = 1;
		if self.config.reuse_addr {
			self.set_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, &one);
		}
		if self.sock_type == SockType::Stream && self.family != Family::Unix && self.config.tcp_nodelay {
			self.set_option(libc::IPPROTO_TCP, libc::TCP_NODELAY, &one);
		}
		if let Some(size) = self.config.recv_buffer {
			self.set_buffer_size(libc::SO_RCVBUF, size);
		}
		if let Some(size) = self.config.send_buffer {
			self.set_buffer_size(libc::SO_SNDBUF, size);
		}
	}

	fn set_buffer_size(&self, option: libc::c_int, size: usize) {
		match libc::c_int::try_from(size) {
			Ok(size) => {
				self.set_option(libc::SOL_SOCKET, option, &size);
			}
			Err(_) => log::debug!(fd = self.raw_fd().unwrap_or(-1), option = option; "buffer size {size} out of range, skipped"),
		}
	}

	/// Adopts an accepted descriptor after checking the registry knows it
	/// as an open socket. The descriptor is closed if it doesn't qualify.
	pub(crate) fn init(&mut self, fd: OwnedFd) -> Result<(), SocketError> {
		let raw = fd.as_raw_fd();
		match FdRegistry::global().get(raw) {
			Some(ctx) if ctx.is_socket() && !ctx.is_closed() => {
				self.fd = Some(fd);
				self.connected = true;
				self.init_sock();
				self.get_local_address();
				self.get_remote_address();
				Ok(())
			}
			_ => {
				if let Err(err) = hook::close(fd, self.scheduler.as_ref()) {
					log::warn!(fd = raw; "closing rejected descriptor failed: {err}");
				}
				Err(SocketError::InvalidDescriptor { fd: raw })
			}
		}
	}

	fn check_family(&self, addr: &Address) -> Result<(), SocketError> {
		if addr.family() == self.family {
			return Ok(());
		}
		let err = SocketError::FamilyMismatch {
			socket: self.family,
			addr: addr.family(),
			display: addr.to_string(),
		};
		log::error!(fd = self.raw_fd().unwrap_or(-1); "{err}");
		Err(err)
	}

	/// Binds to `addr`; see [`Socket::try_bind`].
	pub fn bind(&mut self, addr: &Address) -> bool {
		self.try_bind(addr).is_ok()
	}

	/// Binds to `addr`, opening a descriptor first if needed.
	///
	/// A filesystem path of a local-domain address is probed first: if a
	/// listener answers the bind fails with [`SocketError::AddrInUse`],
	/// otherwise a leftover socket file is removed. The local address is
	/// re-read from the OS afterwards since the kernel may pick the port.
	pub fn try_bind(&mut self, addr: &Address) -> Result<(), SocketError> {
		self.check_family(addr)?;
		let fd = self.ensure_fd()?;

		if let Address::Unix(unix) = addr {
			self.release_stale_path(unix)?;
		}

		let res = addr
			.with_raw(|ptr, len| syscall!(bind(fd, ptr, len)))
			.unwrap_or_else(|| Err(std::io::Error::from_raw_os_error(libc::EINVAL)));
		if let Err(err) = res {
			let err = SocketError::Bind { errno: os_errno(&err), addr: addr.to_string() };
			log::error!(fd = fd; "{err}");
			return Err(err);
		}

		self.local_addr = None;
		self.get_local_address();
		Ok(())
	}

	/// Fails if a live listener owns `addr`'s path, removes the file otherwise.
	fn release_stale_path(&self, addr: &UnixAddr) -> Result<(), SocketError> {
		let Some(path) = addr.fs_path() else {
			return Ok(());
		};

		let probe = hook::socket(libc::AF_UNIX, self.sock_type.raw(), 0).and_then(|probe| {
			let res = hook::connect_with_timeout(probe.as_raw_fd(), &Address::Unix(addr.clone()), None, self.scheduler.as_ref());
			hook::close(probe, self.scheduler.as_ref())?;
			res
		});
		match probe {
			// A full backlog or a socket of the other type still means the
			// path is live. A stale file always refuses the connection.
			Ok(()) => self.addr_in_use(addr),
			Err(ref err) if matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EPROTOTYPE)) => {
				self.addr_in_use(addr)
			}
			Err(err) => {
				log::debug!("probe of {} failed ({err}), removing stale path", addr);
				match std::fs::remove_file(path) {
					Ok(()) => Ok(()),
					Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
					Err(err) => {
						log::warn!("failed to remove {}: {err}", path.display());
						Ok(())
					}
				}
			}
		}
	}

	fn addr_in_use(&self, addr: &UnixAddr) -> Result<(), SocketError> {
		let err = SocketError::AddrInUse { path: addr.to_string() };
		log::error!(fd = self.raw_fd().unwrap_or(-1); "{err}");
		Err(err)
	}

	/// Connects to `addr`; see [`Socket::try_connect`].
	pub fn connect(&mut self, addr: &Address, timeout: Option<Duration>) -> bool {
		self.try_connect(addr, timeout).is_ok()
	}

	/// Connects to `addr`, opening a descriptor first if needed.
	///
	/// Without `timeout` the configured connect timeout applies, if any.
	/// On failure the descriptor is closed; an expired timer is reported
	/// as [`SocketError::ConnectTimeout`].
	pub fn try_connect(&mut self, addr: &Address, timeout: Option<Duration>) -> Result<(), SocketError> {
		self.check_family(addr)?;
		self.remote_addr = Some(addr.clone());
		let fd = self.ensure_fd()?;

		let timeout = timeout.or(self.config.connect_timeout);
		if let Err(err) = hook::connect_with_timeout(fd, addr, timeout, self.scheduler.as_ref()) {
			let err = match (os_errno(&err), timeout) {
				(libc::ETIMEDOUT, Some(timeout)) => SocketError::ConnectTimeout {
					addr: addr.to_string(),
					timeout_ms: timeout.as_millis(),
				},
				(errno, _) => SocketError::Connect { errno, addr: addr.to_string() },
			};
			log::error!(fd = fd; "{err}");
			self.close();
			return Err(err);
		}

		self.connected = true;
		self.remote_addr = None;
		if self.get_remote_address().is_unknown() {
			self.remote_addr = Some(addr.clone());
		}
		self.local_addr = None;
		self.get_local_address();
		Ok(())
	}

	/// Connects again to the last requested remote address.
	pub fn reconnect(&mut self, timeout: Option<Duration>) -> bool {
		self.try_reconnect(timeout).is_ok()
	}

	/// Connects again to the last requested remote address, dropping the
	/// cached local address first.
	pub fn try_reconnect(&mut self, timeout: Option<Duration>) -> Result<(), SocketError> {
		let Some(addr) = self.remote_addr.clone() else {
			log::error!("{}", SocketError::NoRemoteAddress);
			return Err(SocketError::NoRemoteAddress);
		};
		self.local_addr = None;
		self.try_connect(&addr, timeout)
	}

	/// Starts listening; see [`Socket::try_listen`].
	pub fn listen(&self, backlog: i32) -> bool {
		self.try_listen(backlog).is_ok()
	}

	/// Starts listening with room for `backlog` pending connections.
	///
	/// Requires a descriptor, i.e. a prior `bind`.
	pub fn try_listen(&self, backlog: i32) -> Result<(), SocketError> {
		let Some(fd) = self.raw_fd() else {
			log::error!("listen error sock=-1");
			return Err(SocketError::NoDescriptor);
		};
		syscall!(listen(fd, backlog)).map(|_| ()).map_err(|err| {
			let err = SocketError::Listen { errno: os_errno(&err), backlog };
			log::error!(fd = fd; "{err}");
			err
		})
	}

	/// Accepts a connection; see [`Socket::try_accept`].
	pub fn accept(&self) -> Option<Socket> {
		self.try_accept().ok()
	}

	/// Accepts a connection, suspending until one is pending.
	///
	/// The returned socket shares this socket's family, type and protocol
	/// but nothing else; both of its addresses are resolved right away.
	pub fn try_accept(&self) -> Result<Socket, SocketError> {
		let Some(fd) = self.raw_fd() else {
			log::error!("accept error sock=-1");
			return Err(SocketError::NoDescriptor);
		};
		let new_fd = hook::accept(fd, self.scheduler.as_ref()).map_err(|err| {
			let err = SocketError::Accept { errno: os_errno(&err) };
			log::error!(fd = fd; "{err}");
			err
		})?;

		let mut sock = self.sibling();
		sock.init(new_fd)?;
		Ok(sock)
	}

	/// Closes the socket; see [`Socket::try_close`].
	pub fn close(&mut self) -> bool {
		self.try_close().is_ok()
	}

	/// Closes the descriptor. Closing an already closed socket succeeds.
	///
	/// Cached addresses are kept so that `reconnect` still works.
	pub fn try_close(&mut self) -> Result<(), SocketError> {
		self.connected = false;
		let Some(fd) = self.fd.take() else {
			return Ok(());
		};
		let raw = fd.as_raw_fd();
		hook::close(fd, self.scheduler.as_ref()).map_err(|err| {
			let err = SocketError::Close { errno: os_errno(&err) };
			log::error!(fd = raw; "{err}");
			err
		})
	}
}
