/*!
 * Synchronization Traits
 *
 * Core abstraction for compare-and-block / wake on a 32-bit word.
 *
 * # Design: Trait-Based Backends
 *
 * The kernel futex and the parking_lot emulation expose the same contract,
 * so locks and notes are written once against `FutexBackend` and pick an
 * implementation at construction time.
 */

use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Result of a wake operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    /// Successfully woke N waiters (N >= 1)
    Woken(usize),
    /// No waiters were waiting
    NoWaiters,
}

impl WakeResult {
    #[inline]
    pub(crate) fn from_count(n: usize) -> Self {
        if n == 0 {
            WakeResult::NoWaiters
        } else {
            WakeResult::Woken(n)
        }
    }

    /// Check if any waiters were woken
    #[inline(always)]
    pub fn is_woken(&self) -> bool {
        matches!(self, WakeResult::Woken(_))
    }

    /// Get number of woken waiters (0 if none)
    #[inline(always)]
    pub fn count(&self) -> usize {
        match self {
            WakeResult::Woken(n) => *n,
            WakeResult::NoWaiters => 0,
        }
    }
}

/// Why a wait returned
///
/// Informational only. Every return may be spurious, so callers re-check
/// their own condition no matter which variant they get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a wake call, or for no observable reason
    Woken,
    /// The word no longer held the expected value; nothing blocked
    ValueMismatch,
    /// The timeout elapsed
    TimedOut,
    /// A signal interrupted the wait
    Interrupted,
}

/// A compare-and-block primitive on a shared 32-bit word
///
/// Implementations must be:
/// - **Atomic**: only block if `*word == expected` at the moment of blocking,
///   with respect to any `wake` on the same word
/// - **Infallible on wait**: never report errors from `wait`
/// - **Strict on wake**: a kernel failure in `wake` is a fatal defect
pub trait FutexBackend: Send + Sync {
    /// Block while `*word == expected`, for at most `timeout`
    ///
    /// `None` blocks indefinitely.
    fn wait(&self, word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome;

    /// Wake up to `max_waiters` threads blocked on `word`
    fn wake(&self, word: &AtomicU32, max_waiters: u32) -> WakeResult;

    /// Get backend name for debugging
    fn name(&self) -> &'static str;
}
