//! Readiness scheduling for suspended socket operations.
//!
//! A socket never blocks inside a syscall: its descriptors are non-blocking
//! and an operation that would block asks a [`Scheduler`] to suspend the
//! calling task until the descriptor is ready, a timer fires, or the
//! interest is cancelled. A fiber runtime implements [`Scheduler`] by
//! parking the current fiber; [`PollScheduler`] is the reference
//! implementation that parks the calling thread in `poll(2)`.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Kind of readiness a task waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Readable, also used for accept.
    Read,
    /// Writable, also used for connect.
    Write,
}

impl Interest {
    fn poll_events(self) -> libc::c_short {
        match self {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
        }
    }
}

/// Why a suspended task was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Ready,
    TimedOut,
    Cancelled,
}

/// Scheduler side of the suspension protocol.
pub trait Scheduler: Send + Sync {
    /// Registers `interest` on `fd` for the calling task and suspends it
    /// until the descriptor is ready, `timeout` expires or the interest is
    /// cancelled.
    fn wait_ready(&self, fd: RawFd, interest: Interest, timeout: Option<Duration>) -> io::Result<Wakeup>;

    /// Cancels a registered interest, waking its task with
    /// [`Wakeup::Cancelled`]. Cancelling an interest that is not registered
    /// is a no-op and still succeeds.
    fn cancel_interest(&self, fd: RawFd, interest: Interest) -> bool;

    /// Cancels every interest registered on `fd`.
    fn cancel_all(&self, fd: RawFd) -> bool {
        self.cancel_interest(fd, Interest::Read) && self.cancel_interest(fd, Interest::Write)
    }
}

/// Returns the process-wide default scheduler.
pub fn default_scheduler() -> Arc<dyn Scheduler> {
    static DEFAULT: OnceLock<Arc<PollScheduler>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(PollScheduler::new())).clone()
}

/// A registered waiter, woken through its own eventfd.
#[derive(Debug)]
struct Waiter {
    wake: OwnedFd,
    cancelled: AtomicBool,
}

impl Waiter {
    fn new() -> io::Result<Waiter> {
        let fd = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
        // SAFETY: `eventfd` just returned a fresh descriptor we own.
        let wake = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Waiter { wake, cancelled: AtomicBool::new(false) })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let one: u64 = 1;
        let res = syscall!(write(self.wake.as_raw_fd(), (&one as *const u64).cast(), size_of::<u64>()));
        if let Err(err) = res {
            log::warn!(wake_fd = self.wake.as_raw_fd(); "failed to signal waiter: {err}");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Scheduler that parks the calling thread in `poll(2)`.
///
/// Each waiter gets an eventfd next to the watched descriptor so that
/// cancellation from another thread wakes it immediately.
#[derive(Debug, Default)]
pub struct PollScheduler {
    waiters: Mutex<HashMap<(RawFd, Interest), Arc<Waiter>>>,
}

impl PollScheduler {
    pub fn new() -> PollScheduler {
        PollScheduler::default()
    }

    /// Number of currently suspended waiters.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(RawFd, Interest), Arc<Waiter>>> {
        // A panicking waiter can't leave the map half updated.
        self.waiters.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn register(&self, fd: RawFd, interest: Interest) -> io::Result<Arc<Waiter>> {
        let mut waiters = self.lock();
        if waiters.contains_key(&(fd, interest)) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{interest:?} interest already registered on fd {fd}"),
            ));
        }
        let waiter = Arc::new(Waiter::new()?);
        waiters.insert((fd, interest), waiter.clone());
        log::trace!(fd = fd, interest:? = interest; "registered interest");
        Ok(waiter)
    }

    fn unregister(&self, fd: RawFd, interest: Interest, waiter: &Arc<Waiter>) {
        let mut waiters = self.lock();
        if waiters.get(&(fd, interest)).is_some_and(|w| Arc::ptr_eq(w, waiter)) {
            waiters.remove(&(fd, interest));
        }
    }
}

impl Scheduler for PollScheduler {
    fn wait_ready(&self, fd: RawFd, interest: Interest, timeout: Option<Duration>) -> io::Result<Wakeup> {
        let waiter = self.register(fd, interest)?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let wakeup = loop {
            if waiter.is_cancelled() {
                break Ok(Wakeup::Cancelled);
            }
            let timeout_ms = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    // Round up so a sub-millisecond rest doesn't spin.
                    left.as_nanos().div_ceil(1_000_000).min(libc::c_int::MAX as u128) as libc::c_int
                }
                None => -1,
            };
            let mut fds = [
                libc::pollfd { fd, events: interest.poll_events(), revents: 0 },
                libc::pollfd { fd: waiter.wake.as_raw_fd(), events: libc::POLLIN, revents: 0 },
            ];
            match syscall!(poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms)) {
                Ok(0) => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        break Ok(Wakeup::TimedOut);
                    }
                }
                Ok(_) => {
                    if waiter.is_cancelled() || fds[1].revents != 0 {
                        break Ok(Wakeup::Cancelled);
                    }
                    // Errors and hang-ups count as ready, the retried syscall reports them.
                    if fds[0].revents != 0 {
                        break Ok(Wakeup::Ready);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };

        self.unregister(fd, interest, &waiter);
        log::trace!(fd = fd, interest:? = interest, wakeup:? = wakeup; "resumed waiter");
        wakeup
    }

    fn cancel_interest(&self, fd: RawFd, interest: Interest) -> bool {
        let waiter = self.lock().remove(&(fd, interest));
        if let Some(waiter) = waiter {
            log::trace!(fd = fd, interest:? = interest; "cancelling interest");
            waiter.cancel();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [-1; 2];
        syscall!(pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK)).unwrap();
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn ready_descriptor_wakes_immediately() {
        let scheduler = PollScheduler::new();
        let (_read, write) = pipe();
        let wakeup = scheduler.wait_ready(write.as_raw_fd(), Interest::Write, None).unwrap();
        assert_eq!(wakeup, Wakeup::Ready);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn timer_fires() {
        let scheduler = PollScheduler::new();
        let (read, _write) = pipe();
        let start = Instant::now();
        let wakeup = scheduler
            .wait_ready(read.as_raw_fd(), Interest::Read, Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(wakeup, Wakeup::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn cancel_wakes_waiter() {
        let scheduler = Arc::new(PollScheduler::new());
        let (read, _write) = pipe();
        let fd = read.as_raw_fd();

        let handle = {
            let scheduler = scheduler.clone();
            thread::spawn(move || scheduler.wait_ready(fd, Interest::Read, None))
        };
        while !handle.is_finished() {
            assert!(scheduler.cancel_interest(fd, Interest::Read));
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.join().unwrap().unwrap(), Wakeup::Cancelled);
    }

    #[test]
    fn cancel_without_waiter_is_noop() {
        let scheduler = PollScheduler::new();
        assert!(scheduler.cancel_interest(1000, Interest::Read));
        assert!(scheduler.cancel_all(1000));
    }
}
