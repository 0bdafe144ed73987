//! Explicit suspension layer.
//!
//! Every potentially blocking socket call goes through here: issue the
//! syscall on the non-blocking descriptor, and if it would block, suspend
//! the task on the [`Scheduler`] bounded by the timeout recorded in the
//! [`FdRegistry`], then retry. Descriptors that are not registered
//! sockets, or that the user switched to non-blocking mode, bypass the
//! wait and behave like the plain syscall.

use std::io;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use crate::addr::{Address, ToSockAddr};
use crate::fd_registry::{FdCtx, FdRegistry};
use crate::scheduler::{Interest, Scheduler, Wakeup};
use crate::socket::options;

/// Creates a socket descriptor and registers it.
pub(crate) fn socket(family: libc::c_int, sock_type: libc::c_int, protocol: libc::c_int) -> io::Result<OwnedFd> {
    let fd = syscall!(socket(family, sock_type | libc::SOCK_CLOEXEC, protocol))?;
    FdRegistry::global().register(fd);
    // SAFETY: `socket` just returned a fresh descriptor we own.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Accepts a connection on `fd`, suspending until one is pending.
pub(crate) fn accept(fd: RawFd, scheduler: &dyn Scheduler) -> io::Result<OwnedFd> {
    let new_fd = do_io(fd, scheduler, "accept", Interest::Read, || {
        syscall!(accept4(fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_CLOEXEC))
    })?;
    FdRegistry::global().register(new_fd);
    // SAFETY: `accept4` just returned a fresh descriptor we own.
    Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
}

/// Connects `fd` to `addr`, waiting at most `timeout` for the handshake.
///
/// An expired timer fails with `ETIMEDOUT`, a cancelled wait with `ECANCELED`.
pub(crate) fn connect_with_timeout(
    fd: RawFd,
    addr: &Address,
    timeout: Option<Duration>,
    scheduler: &dyn Scheduler,
) -> io::Result<()> {
    let res = addr
        .with_raw(|ptr, len| syscall!(connect(fd, ptr, len)))
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EAFNOSUPPORT))?;

    if !suspendable(FdRegistry::global().get(fd).as_deref())? {
        return res.map(|_| ());
    }
    match res {
        Ok(_) => return Ok(()),
        Err(ref err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(err) => return Err(err),
    }

    match scheduler.wait_ready(fd, Interest::Write, timeout)? {
        Wakeup::Ready => {}
        Wakeup::TimedOut => {
            log::debug!(fd = fd; "connect({addr}) timer expired after {timeout:?}");
            return Err(io::Error::from_raw_os_error(libc::ETIMEDOUT));
        }
        Wakeup::Cancelled => return Err(io::Error::from_raw_os_error(libc::ECANCELED)),
    }

    match options::take_error(fd)? {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Runs `op` until it stops reporting `EAGAIN`, suspending in between.
pub(crate) fn do_io<T, F>(
    fd: RawFd,
    scheduler: &dyn Scheduler,
    name: &'static str,
    interest: Interest,
    mut op: F,
) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let ctx = FdRegistry::global().get(fd);
    if !suspendable(ctx.as_deref())? {
        return op();
    }
    let deadline = ctx
        .and_then(|ctx| ctx.timeout(interest))
        .map(|timeout| Instant::now() + timeout);

    loop {
        match op() {
            Ok(res) => return Ok(res),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }

        let left = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match scheduler.wait_ready(fd, interest, left)? {
            Wakeup::Ready => {}
            Wakeup::TimedOut => {
                log::debug!(fd = fd; "{name} timed out");
                return Err(io::Error::from_raw_os_error(libc::ETIMEDOUT));
            }
            Wakeup::Cancelled => {
                log::debug!(fd = fd; "{name} cancelled");
                return Err(io::Error::from_raw_os_error(libc::ECANCELED));
            }
        }
    }
}

/// Whether a call on this descriptor should wait on the scheduler.
fn suspendable(ctx: Option<&FdCtx>) -> io::Result<bool> {
    match ctx {
        Some(ctx) if ctx.is_closed() => Err(io::Error::from_raw_os_error(libc::EBADF)),
        Some(ctx) => Ok(ctx.is_socket() && !ctx.user_nonblock()),
        None => Ok(false),
    }
}

/// `setsockopt` that also records send/receive timeouts in the registry.
pub(crate) fn setsockopt<T: Copy>(fd: RawFd, level: libc::c_int, option: libc::c_int, value: &T) -> io::Result<()> {
    if level == libc::SOL_SOCKET && (option == libc::SO_RCVTIMEO || option == libc::SO_SNDTIMEO) {
        if let Some(ctx) = FdRegistry::global().get(fd) {
            if size_of::<T>() == size_of::<libc::timeval>() {
                // SAFETY: the caller passes a `timeval` for these options.
                let tv = unsafe { std::ptr::read_unaligned((value as *const T).cast::<libc::timeval>()) };
                let interest = if option == libc::SO_RCVTIMEO { Interest::Read } else { Interest::Write };
                ctx.set_timeout(interest, timeval_to_duration(tv));
            }
        }
    }
    syscall!(setsockopt(
        fd,
        level,
        option,
        (value as *const T).cast(),
        size_of::<T>() as libc::socklen_t,
    ))
    .map(|_| ())
}

/// A zero `timeval` means "no timeout" for socket timeouts.
fn timeval_to_duration(tv: libc::timeval) -> Option<Duration> {
    let micros = (tv.tv_sec as i128) * 1_000_000 + tv.tv_usec as i128;
    (micros > 0).then(|| Duration::from_micros(micros.min(u64::MAX as i128) as u64))
}

/// Records the user's non-blocking choice for `fd`.
pub(crate) fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    match FdRegistry::global().get(fd) {
        Some(ctx) if ctx.is_socket() => {
            ctx.set_user_nonblock(nonblocking);
            Ok(())
        }
        _ => {
            let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
            let flags = if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
            syscall!(fcntl(fd, libc::F_SETFL, flags)).map(|_| ())
        }
    }
}

/// Wakes every waiter on `fd`, forgets it and closes it.
pub(crate) fn close(fd: OwnedFd, scheduler: &dyn Scheduler) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    if FdRegistry::global().get(raw).is_some() {
        scheduler.cancel_all(raw);
        FdRegistry::global().remove(raw);
    }
    syscall!(close(raw)).map(|_| ())
}
