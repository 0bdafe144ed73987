//! Process-wide descriptor metadata.
//!
//! The hook layer records every descriptor it creates or accepts here:
//! whether it is a socket, whether it was closed, whether the user asked
//! for non-blocking behaviour, and the per-direction timeouts that bound
//! suspended operations. Sockets only ever read from it.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use crate::scheduler::Interest;

/// Stored timeout value meaning "no timeout".
const NO_TIMEOUT: u64 = u64::MAX;

/// Metadata of a single descriptor.
#[derive(Debug)]
pub struct FdCtx {
    fd: RawFd,
    is_socket: bool,
    is_closed: AtomicBool,
    sys_nonblock: AtomicBool,
    user_nonblock: AtomicBool,
    recv_timeout_ms: AtomicU64,
    send_timeout_ms: AtomicU64,
}

impl FdCtx {
    /// Inspects `fd` and, for sockets, switches it to non-blocking mode.
    fn new(fd: RawFd) -> FdCtx {
        // SAFETY: all zeros is a valid `stat`.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        let is_socket = match syscall!(fstat(fd, &mut stat)) {
            Ok(_) => (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK,
            Err(err) => {
                log::debug!(fd = fd; "fstat failed: {err}");
                false
            }
        };

        let ctx = FdCtx {
            fd,
            is_socket,
            is_closed: AtomicBool::new(false),
            sys_nonblock: AtomicBool::new(false),
            user_nonblock: AtomicBool::new(false),
            recv_timeout_ms: AtomicU64::new(NO_TIMEOUT),
            send_timeout_ms: AtomicU64::new(NO_TIMEOUT),
        };
        if is_socket {
            match set_os_nonblocking(fd) {
                Ok(()) => ctx.sys_nonblock.store(true, Ordering::Relaxed),
                Err(err) => log::warn!(fd = fd; "failed to set O_NONBLOCK: {err}"),
            }
        }
        ctx
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_socket(&self) -> bool {
        self.is_socket
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// True when the descriptor is `O_NONBLOCK` at the OS level.
    pub fn sys_nonblock(&self) -> bool {
        self.sys_nonblock.load(Ordering::Relaxed)
    }

    /// True when the user asked for non-blocking behaviour.
    pub fn user_nonblock(&self) -> bool {
        self.user_nonblock.load(Ordering::Relaxed)
    }

    pub(crate) fn set_user_nonblock(&self, nonblocking: bool) {
        self.user_nonblock.store(nonblocking, Ordering::Relaxed);
    }

    /// Timeout that bounds a wait for `interest`, `None` for no bound.
    pub fn timeout(&self, interest: Interest) -> Option<Duration> {
        let ms = match interest {
            Interest::Read => self.recv_timeout_ms.load(Ordering::Relaxed),
            Interest::Write => self.send_timeout_ms.load(Ordering::Relaxed),
        };
        (ms != NO_TIMEOUT).then(|| Duration::from_millis(ms))
    }

    pub(crate) fn set_timeout(&self, interest: Interest, timeout: Option<Duration>) {
        let ms = timeout.map_or(NO_TIMEOUT, |t| u64::try_from(t.as_millis()).unwrap_or(NO_TIMEOUT - 1));
        match interest {
            Interest::Read => self.recv_timeout_ms.store(ms, Ordering::Relaxed),
            Interest::Write => self.send_timeout_ms.store(ms, Ordering::Relaxed),
        }
    }

    fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}

fn set_os_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    if flags & libc::O_NONBLOCK == 0 {
        syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
    }
    Ok(())
}

/// Map from live descriptor to its [`FdCtx`].
#[derive(Debug, Default)]
pub struct FdRegistry {
    ctxs: RwLock<HashMap<RawFd, Arc<FdCtx>>>,
}

impl FdRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static FdRegistry {
        static REGISTRY: OnceLock<FdRegistry> = OnceLock::new();
        REGISTRY.get_or_init(FdRegistry::default)
    }

    /// Looks up `fd`, `None` if it was never registered or already removed.
    pub fn get(&self, fd: RawFd) -> Option<Arc<FdCtx>> {
        if fd < 0 {
            return None;
        }
        let ctxs = self.ctxs.read().unwrap_or_else(|err| err.into_inner());
        ctxs.get(&fd).cloned()
    }

    /// Registers `fd`, replacing any stale entry left by a reused number.
    pub(crate) fn register(&self, fd: RawFd) -> Option<Arc<FdCtx>> {
        if fd < 0 {
            return None;
        }
        let ctx = Arc::new(FdCtx::new(fd));
        let mut ctxs = self.ctxs.write().unwrap_or_else(|err| err.into_inner());
        if let Some(old) = ctxs.insert(fd, ctx.clone()) {
            old.mark_closed();
        }
        log::trace!(fd = fd, is_socket = ctx.is_socket(); "registered descriptor");
        Some(ctx)
    }

    /// Marks `fd` closed and forgets it.
    pub(crate) fn remove(&self, fd: RawFd) {
        let mut ctxs = self.ctxs.write().unwrap_or_else(|err| err.into_inner());
        if let Some(ctx) = ctxs.remove(&fd) {
            ctx.mark_closed();
            log::trace!(fd = fd; "removed descriptor");
        }
    }
}
