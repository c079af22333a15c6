/*!
 * Poller
 *
 * Readiness poller over poll(2). One process-wide instance is shared by all
 * worker threads; any of them may `wait`, and registration is allowed while
 * another thread is blocked inside poll(2). A mutation made during a wait is
 * published by breaking that wait: the blocked thread returns, and its next
 * `wait` snapshots the updated table.
 *
 * # Locking
 *
 * The table lock is held only to snapshot before poll(2) and to apply
 * results after it, never across the blocking call. `in_poll` counts
 * threads between those two critical sections; a mutation that observes a
 * non-zero count while holding the lock knows a waiter is using a stale
 * snapshot and breaks its wait.
 */

use super::config::PollConfig;
use super::interest::{Direction, Interest, PollResult};
use super::table::WaitTable;
use super::timeout::poll_timeout_ms;
use super::wakeup::WakeupChannel;
use crate::core::errors::PollError;
use crate::core::limits::WAKEUP_SLOT;
use crate::core::sync::{FutexMutex, FutexMutexGuard, SyncConfig};
use crate::core::{fatal, sys};
use nix::errno::Errno;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use tracing::{debug, info, trace};

/// Readiness poller keyed by descriptor, yielding caller tokens
pub struct Poller<T> {
    table: FutexMutex<WaitTable<T>>,
    wakeup: WakeupChannel,
    in_poll: AtomicU32,
    config: PollConfig,
}

impl<T: Clone + Send> Poller<T> {
    /// Create the wakeup channel and an empty table
    pub fn new(config: PollConfig) -> Result<Self, PollError> {
        Self::with_sync_config(config, &SyncConfig::default())
    }

    /// Like `new`, with the table lock built from `sync`
    pub fn with_sync_config(config: PollConfig, sync: &SyncConfig) -> Result<Self, PollError> {
        let wakeup = WakeupChannel::new()?;
        let table = FutexMutex::with_config(
            WaitTable::with_capacity(wakeup.read_fd(), config.initial_capacity),
            sync,
        );
        info!(
            wakeup_read = wakeup.read_fd(),
            wakeup_write = wakeup.write_fd(),
            max_timeout_ms = config.max_timeout_ms,
            lock_backend = table.backend_name(),
            "Poller initialized"
        );
        Ok(Self {
            table,
            wakeup,
            in_poll: AtomicU32::new(0),
            config,
        })
    }

    /// Like `with_sync_config`, but a poller that cannot be created is fatal
    pub fn initialize(config: PollConfig, sync: &SyncConfig) -> Self {
        match Self::with_sync_config(config, sync) {
            Ok(poller) => poller,
            Err(PollError::ChannelCreation(errno)) => {
                fatal::throw_errno("netpollinit: pipe2", Errno::from_raw(errno))
            }
            Err(e) => fatal::throw(&e.to_string()),
        }
    }

    /// Returns true if `fd` is one of the poller's own descriptors
    pub fn is_poll_descriptor(&self, fd: RawFd) -> bool {
        fd == self.wakeup.read_fd() || fd == self.wakeup.write_fd()
    }

    /// Number of watched descriptors
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Threads currently inside the blocking phase of `wait`
    pub fn waiters_in_poll(&self) -> u32 {
        self.in_poll.load(Ordering::Acquire)
    }

    /// Current interest of `fd`, if watched
    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.table.lock().interest_of(fd)
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Futex backend behind the table lock
    pub fn lock_backend(&self) -> &'static str {
        self.table.backend_name()
    }

    /// Lock the table for a mutation, breaking any wait using an old snapshot
    fn lock_for_change(&self) -> FutexMutexGuard<'_, WaitTable<T>> {
        let guard = self.table.lock();
        if self.in_poll.load(Ordering::SeqCst) > 0 {
            self.break_wait();
        }
        guard
    }

    /// Watch `fd` for `interest`, delivering `token` when it fires
    ///
    /// Registering an already-watched descriptor replaces its token and interest.
    pub fn register(&self, fd: RawFd, token: T, interest: Interest) -> Result<(), PollError> {
        if fd < 0 {
            return Err(PollError::InvalidDescriptor(fd));
        }
        if self.is_poll_descriptor(fd) {
            return Err(PollError::ReservedDescriptor(fd));
        }

        let mut table = self.lock_for_change();
        let slot = table.upsert(fd, token, interest);
        debug_assert!(table.check_invariants());
        debug!(fd, slot, ?interest, "registered descriptor");
        Ok(())
    }

    /// Stop watching `fd`, returning its token
    pub fn deregister(&self, fd: RawFd) -> Option<T> {
        let mut table = self.lock_for_change();
        let entry = table.remove(fd)?;
        debug_assert!(table.check_invariants());
        debug!(fd, remaining = table.len(), "deregistered descriptor");
        Some(entry.token)
    }

    /// Re-arm `direction` on a watched descriptor after it fired
    pub fn arm(&self, fd: RawFd, direction: Direction) -> Result<Interest, PollError> {
        let mut table = self.lock_for_change();
        let interest = table.arm(fd, direction)?;
        trace!(fd, ?direction, ?interest, "armed descriptor");
        Ok(interest)
    }

    /// Interrupt a blocked `wait`
    ///
    /// Coalesces: while a wakeup is pending, further calls do nothing.
    /// Returns true if this call queued the wakeup.
    pub fn break_wait(&self) -> bool {
        self.wakeup.notify()
    }

    /// Wait for readiness
    ///
    /// `timeout_ns < 0` blocks until something fires or `break_wait` is called,
    /// `0` checks without blocking, and positive values block at most that long.
    /// A broken wait returns an empty result.
    pub fn wait(&self, timeout_ns: i64) -> PollResult<T> {
        let timeout_ms = poll_timeout_ms(timeout_ns, self.config.max_timeout_ms);
        let mut fds = Vec::new();

        let mut remaining = loop {
            {
                let mut table = self.table.lock();
                table.snapshot(&mut fds);
                self.in_poll.fetch_add(1, Ordering::SeqCst);
            }

            let errno = match sys::poll(&mut fds, timeout_ms) {
                Ok(n) => break n,
                Err(errno) => errno,
            };

            self.in_poll.fetch_sub(1, Ordering::SeqCst);
            match errno {
                Errno::EINTR if timeout_ns > 0 => {
                    trace!("poll interrupted by signal");
                    return PollResult::empty();
                }
                Errno::EINTR => continue,
                errno => fatal::throw_errno("netpoll: poll", errno),
            }
        };

        let mut table = self.table.lock();
        self.in_poll.fetch_sub(1, Ordering::SeqCst);
        if remaining == 0 {
            return PollResult::empty();
        }

        if fds[WAKEUP_SLOT].revents != 0 {
            // A zero-timeout check must not consume a wakeup meant for a
            // blocking waiter.
            if timeout_ns != 0 {
                self.wakeup.drain();
                self.wakeup.clear();
            }
            remaining -= 1;
            trace!(pending_changes = table.pending_changes(), "poll woken by break_wait");
        }

        let mut ready = Vec::new();
        for pfd in &fds[WAKEUP_SLOT + 1..] {
            if remaining == 0 {
                break;
            }
            if pfd.revents == 0 {
                continue;
            }
            remaining -= 1;
            table.fire(pfd.fd, pfd.revents, &mut ready);
        }
        drop(table);

        let result = PollResult::from_ready(ready);
        if result.waiter_delta > 0 && result.ready.is_empty() {
            fatal::throw("netpoll: waiter delta with no ready tasks");
        }
        if !result.is_empty() {
            debug!(ready = result.len(), "poll reported readiness");
        }
        result
    }
}

impl<T> std::fmt::Debug for Poller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("wakeup", &self.wakeup)
            .field("in_poll", &self.in_poll.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Lazily constructed process-wide poller
///
/// Uninitialized until first use; `get` builds the poller exactly once and
/// aborts if it cannot.
pub struct PollerCell<T> {
    cell: OnceLock<Poller<T>>,
    config: PollConfig,
    sync: SyncConfig,
}

impl<T: Clone + Send> PollerCell<T> {
    pub const fn new(config: PollConfig) -> Self {
        Self::with_sync_config(config, SyncConfig::auto())
    }

    pub const fn with_sync_config(config: PollConfig, sync: SyncConfig) -> Self {
        Self {
            cell: OnceLock::new(),
            config,
            sync,
        }
    }

    /// The poller, initializing it on first call
    pub fn get(&self) -> &Poller<T> {
        self.cell
            .get_or_init(|| Poller::initialize(self.config.clone(), &self.sync))
    }

    /// The poller if already initialized
    pub fn try_get(&self) -> Option<&Poller<T>> {
        self.cell.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Returns false before initialization rather than creating the poller
    pub fn is_poll_descriptor(&self, fd: RawFd) -> bool {
        self.try_get().map_or(false, |p| p.is_poll_descriptor(fd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn poller() -> Poller<u64> {
        Poller::new(PollConfig::default()).unwrap()
    }

    #[test]
    fn test_register_rejects_bad_descriptors() {
        let p = poller();
        assert_eq!(
            p.register(-3, 1, Interest::READ),
            Err(PollError::InvalidDescriptor(-3))
        );
        let rd = p.wakeup.read_fd();
        assert_eq!(
            p.register(rd, 1, Interest::READ),
            Err(PollError::ReservedDescriptor(rd))
        );
        assert!(p.is_empty());
    }

    #[test]
    fn test_zero_timeout_keeps_wakeup_pending() {
        let p = poller();
        assert!(p.break_wait());
        assert!(p.wait(0).is_empty());
        // Still pending: the next break is coalesced
        assert!(!p.break_wait());
        assert!(p.wait(-1).is_empty());
        assert!(p.break_wait());
    }

    #[test]
    fn test_write_ready_pipe() {
        let p = poller();
        let (_r, w) = nix::unistd::pipe().unwrap();
        p.register(w.as_raw_fd(), 42, Interest::WRITE).unwrap();

        let result = p.wait(-1);
        assert_eq!(result.waiter_delta, 1);
        assert_eq!(result.ready[0].token, 42);
        assert_eq!(result.ready[0].direction, Direction::Write);
        assert_eq!(p.interest(w.as_raw_fd()), Some(Interest::NONE));
        assert_eq!(p.waiters_in_poll(), 0);
    }

    #[test]
    fn test_lock_follows_sync_config() {
        let p: Poller<u64> = Poller::with_sync_config(PollConfig::default(), &SyncConfig::emulated()).unwrap();
        assert_eq!(p.lock_backend(), "parking");

        let cell: PollerCell<u64> = PollerCell::with_sync_config(PollConfig::default(), SyncConfig::emulated());
        assert_eq!(cell.get().lock_backend(), "parking");

        #[cfg(target_os = "linux")]
        assert_eq!(poller().lock_backend(), "futex");
    }

    #[test]
    fn test_cell_is_lazy() {
        let cell: PollerCell<u64> = PollerCell::new(PollConfig::default());
        assert!(!cell.is_initialized());
        assert!(!cell.is_poll_descriptor(0));
        let rd = cell.get().wakeup.read_fd();
        assert!(cell.is_initialized());
        assert!(cell.is_poll_descriptor(rd));
    }
}
