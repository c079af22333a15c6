/*!
 * Futex Primitive
 *
 * A 32-bit word plus conditional-wait and bounded-wake.
 *
 *   futex_wait(word, val)   atomically: if *word == val, sleep
 *   futex_wake(word, n)     wake at most n sleepers on word
 *
 * `futex_wait` is allowed to return spuriously. The word has no kernel-side
 * identity: any thread that can address it may wait on or wake it.
 *
 * # Backends
 *
 * - `NativeFutex`: private futex(2) operations on Linux
 * - `ParkingFutex`: emulation on parking_lot_core's global parking table,
 *   keyed by the word's address. The park validation callback runs under the
 *   bucket lock, which gives the same check-then-block atomicity.
 */

use super::traits::{FutexBackend, WaitOutcome, WakeResult};
use parking_lot_core::{park, unpark_filter, FilterOp, ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
pub use native::NativeFutex;

#[cfg(target_os = "linux")]
mod native {
    use super::*;
    use crate::core::{fatal, sys};
    use nix::errno::Errno;

    const FUTEX_WAIT_PRIVATE: libc::c_int = libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG;
    const FUTEX_WAKE_PRIVATE: libc::c_int = libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG;

    /// Kernel futex(2) backend
    ///
    /// Uses the PRIVATE variants: every waiter shares one address space.
    /// Calls go through `core::sys`, so outcomes never depend on `errno`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NativeFutex;

    impl FutexBackend for NativeFutex {
        fn wait(&self, word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
            let ts = timeout.map(|d| libc::timespec {
                tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
                tv_nsec: d.subsec_nanos() as libc::c_long,
            });

            // SAFETY: word is a live, aligned u32 for the duration of the call.
            let ret = unsafe { sys::futex(word.as_ptr(), FUTEX_WAIT_PRIVATE, expected, ts.as_ref()) };
            match ret {
                Ok(_) => WaitOutcome::Woken,
                Err(Errno::EAGAIN) => WaitOutcome::ValueMismatch,
                Err(Errno::ETIMEDOUT) => WaitOutcome::TimedOut,
                Err(Errno::EINTR) => WaitOutcome::Interrupted,
                // Anything else is reported as a spurious wakeup; callers loop.
                Err(_) => WaitOutcome::Woken,
            }
        }

        fn wake(&self, word: &AtomicU32, max_waiters: u32) -> WakeResult {
            let count = max_waiters.min(i32::MAX as u32);
            // SAFETY: word is a live, aligned u32; FUTEX_WAKE ignores the timeout.
            match unsafe { sys::futex(word.as_ptr(), FUTEX_WAKE_PRIVATE, count, None) } {
                Ok(woken) => WakeResult::from_count(woken),
                // May run on a bootstrap thread: no logging, no allocation.
                Err(errno) => fatal::die_raw(b"futexwakeup failed", Some(errno as i32)),
            }
        }

        fn name(&self) -> &'static str {
            "futex"
        }
    }
}

/// Emulated futex on parking_lot_core
#[derive(Debug, Default, Clone, Copy)]
pub struct ParkingFutex;

impl ParkingFutex {
    #[inline]
    fn key(word: &AtomicU32) -> usize {
        word as *const AtomicU32 as usize
    }
}

impl FutexBackend for ParkingFutex {
    fn wait(&self, word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        // An unrepresentable deadline means "forever".
        let deadline = timeout.and_then(|d| Instant::now().checked_add(d));

        // SAFETY: the validate and callback closures do not panic and do not
        // call back into parking_lot_core.
        let result = unsafe {
            park(
                Self::key(word),
                || word.load(Ordering::SeqCst) == expected,
                || {},
                |_key, _timed_out| {},
                DEFAULT_PARK_TOKEN,
                deadline,
            )
        };

        match result {
            ParkResult::Unparked(_) => WaitOutcome::Woken,
            ParkResult::Invalid => WaitOutcome::ValueMismatch,
            ParkResult::TimedOut => WaitOutcome::TimedOut,
        }
    }

    fn wake(&self, word: &AtomicU32, max_waiters: u32) -> WakeResult {
        if max_waiters == 0 {
            return WakeResult::NoWaiters;
        }

        let mut remaining = max_waiters;
        // SAFETY: the filter and callback closures do not panic and do not
        // call back into parking_lot_core.
        let result = unsafe {
            unpark_filter(
                Self::key(word),
                |_token| {
                    if remaining == 0 {
                        FilterOp::Stop
                    } else {
                        remaining -= 1;
                        FilterOp::Unpark
                    }
                },
                |_result| DEFAULT_UNPARK_TOKEN,
            )
        };

        WakeResult::from_count(result.unparked_threads)
    }

    fn name(&self) -> &'static str {
        "parking"
    }
}

#[cfg(target_os = "linux")]
static PLATFORM: NativeFutex = NativeFutex;
#[cfg(not(target_os = "linux"))]
static PLATFORM: ParkingFutex = ParkingFutex;

static EMULATED: ParkingFutex = ParkingFutex;

/// The kernel backend where one exists, the emulation elsewhere
#[inline]
pub fn platform() -> &'static dyn FutexBackend {
    &PLATFORM
}

/// The parking_lot_core emulation
#[inline]
pub fn emulated() -> &'static dyn FutexBackend {
    &EMULATED
}

/// Block while `*word == expected` using the platform backend
///
/// Might return spuriously; callers must loop on their own condition.
#[inline]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    platform().wait(word, expected, timeout)
}

/// Nanosecond form of `futex_wait`: `ns < 0` sleeps without a deadline
#[inline]
pub fn futex_sleep(word: &AtomicU32, expected: u32, ns: i64) -> WaitOutcome {
    let timeout = u64::try_from(ns).ok().map(Duration::from_nanos);
    futex_wait(word, expected, timeout)
}

/// Wake up to `max_waiters` threads blocked on `word`
///
/// A no-op when nobody waits. A kernel failure aborts the process.
#[inline]
pub fn futex_wake(word: &AtomicU32, max_waiters: u32) -> WakeResult {
    platform().wake(word, max_waiters)
}
