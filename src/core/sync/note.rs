/*!
 * One-Shot Notes
 *
 * A note is a single-use event used to park and unpark worker threads:
 * exactly one thread sleeps on it, exactly one thread wakes it, and it must
 * be cleared before reuse. Built directly on a futex word (0 = clear,
 * 1 = woken).
 */

use super::config::SyncConfig;
use super::traits::FutexBackend;
use crate::core::fatal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// One-shot wakeup event
///
/// Safe to use from bootstrap threads with the native backend.
pub struct Note {
    key: AtomicU32,
    backend: &'static dyn FutexBackend,
}

impl Note {
    /// Create a cleared note on the platform backend
    pub fn new() -> Self {
        Self::with_config(&SyncConfig::default())
    }

    /// Create a cleared note on the configured backend
    pub fn with_config(config: &SyncConfig) -> Self {
        Self {
            key: AtomicU32::new(0),
            backend: config.select_backend(),
        }
    }

    /// Reset the note so it can be slept on again
    ///
    /// Only valid when no thread is sleeping on it.
    #[inline]
    pub fn clear(&self) {
        self.key.store(0, Ordering::Relaxed);
    }

    /// Check whether `wakeup` has happened since the last `clear`
    #[inline]
    pub fn is_set(&self) -> bool {
        self.key.load(Ordering::Acquire) != 0
    }

    /// Signal the note, waking its sleeper if any
    ///
    /// A second wakeup without an intervening `clear` is a defect.
    pub fn wakeup(&self) {
        let old = self.key.swap(1, Ordering::Release);
        if old != 0 {
            fatal::die_raw(b"notewakeup - double wakeup", None);
        }
        self.backend.wake(&self.key, 1);
    }

    /// Sleep until the note is signalled
    pub fn sleep(&self) {
        while self.key.load(Ordering::Acquire) == 0 {
            self.backend.wait(&self.key, 0, None);
        }
    }

    /// Sleep until signalled or `ns` nanoseconds pass; `ns < 0` means forever
    ///
    /// Returns whether the note was signalled.
    pub fn sleep_timeout(&self, ns: i64) -> bool {
        let Ok(ns) = u64::try_from(ns) else {
            self.sleep();
            return true;
        };

        let deadline = Instant::now().checked_add(Duration::from_nanos(ns));
        while self.key.load(Ordering::Acquire) == 0 {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return self.is_set();
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.backend.wait(&self.key, 0, remaining);
        }
        true
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Note").field("set", &self.is_set()).finish()
    }
}
