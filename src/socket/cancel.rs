use crate::scheduler::Interest;
use super::Socket;

/// Cancellation of suspended operations.
///
/// A cancelled operation resumes and fails with `ECANCELED`. Without a
/// descriptor there is nothing to cancel and every call succeeds.
impl Socket {
	pub fn cancel_read(&self) -> bool {
		self.cancel(Interest::Read)
	}

	pub fn cancel_write(&self) -> bool {
		self.cancel(Interest::Write)
	}

	/// Accept waits for readability, so this cancels the read interest.
	pub fn cancel_accept(&self) -> bool {
		self.cancel(Interest::Read)
	}

	pub fn cancel_all(&self) -> bool {
		match self.raw_fd() {
			Some(fd) => self.scheduler.cancel_all(fd),
			None => true,
		}
	}

	fn cancel(&self, interest: Interest) -> bool {
		match self.raw_fd() {
			Some(fd) => self.scheduler.cancel_interest(fd, interest),
			None => true,
		}
	}
}
