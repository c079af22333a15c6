/*!
 * Wakeup Channel
 *
 * Non-blocking self-pipe used to interrupt a blocked poll(2). At most one
 * wakeup is in flight: `notify` writes a byte only when it wins the
 * `pending` flag, and the flag is cleared after the waiter drains the pipe.
 * Reads and writes bypass `errno`, so `notify` is safe on bootstrap threads.
 */

use crate::core::errors::PollError;
use crate::core::fatal;
use crate::core::limits::WAKEUP_DRAIN_BUF;
use crate::core::sys;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct WakeupChannel {
    read: OwnedFd,
    write: OwnedFd,
    pending: AtomicBool,
}

impl WakeupChannel {
    pub(crate) fn new() -> Result<Self, PollError> {
        let (read, write) = unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)
            .map_err(|e| PollError::ChannelCreation(e as i32))?;
        Ok(Self {
            read,
            write,
            pending: AtomicBool::new(false),
        })
    }

    #[inline]
    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    #[inline]
    pub(crate) fn write_fd(&self) -> RawFd {
        self.write.as_raw_fd()
    }

    #[inline]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue a wakeup unless one is already pending
    ///
    /// Returns true if this call wrote the byte.
    pub(crate) fn notify(&self) -> bool {
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        loop {
            match sys::write(self.write_fd(), &[0u8]) {
                Ok(_) => return true,
                Err(Errno::EINTR) => continue,
                // Pipe full: a byte is already queued for the waiter.
                Err(Errno::EAGAIN) => return true,
                Err(e) => fatal::die_raw(b"netpoll: wakeup write failed", Some(e as i32)),
            }
        }
    }

    /// Consume every queued byte
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; WAKEUP_DRAIN_BUF];
        loop {
            match sys::read(self.read_fd(), &mut buf) {
                Ok(n) if n == buf.len() => continue,
                Ok(_) => return,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return,
                Err(e) => fatal::die_raw(b"netpoll: wakeup read failed", Some(e as i32)),
            }
        }
    }

    /// Allow the next `notify` to write again
    #[inline]
    pub(crate) fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for WakeupChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeupChannel")
            .field("read", &self.read_fd())
            .field("write", &self.write_fd())
            .field("pending", &self.is_pending())
            .finish()
    }
}
