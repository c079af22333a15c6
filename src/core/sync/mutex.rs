/*!
 * Futex Mutex
 *
 * Two-phase spin-then-block lock over a single futex word.
 *
 * # Design
 *
 * The word is in one of three states:
 * - UNLOCKED: free
 * - LOCKED: held, nobody sleeping in the kernel
 * - SLEEPING: held, at least one thread may be sleeping
 *
 * `lock` first tries an exchange. On contention it spins actively, then
 * yields, and only then marks the word SLEEPING and blocks in the futex. The
 * thread that acquired the lock after sleeping keeps the SLEEPING marking, so
 * `unlock` wakes exactly one waiter whenever someone may still be parked.
 */

use super::config::SyncConfig;
use super::traits::FutexBackend;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const SLEEPING: u32 = 2;

/// Mutual-exclusion lock built on the futex primitive
///
/// With the native backend the lock and unlock paths touch no thread-locals
/// and never allocate, so the lock is usable from bootstrap threads.
/// The parking_lot_core emulation keeps per-thread parking state and is not.
pub struct FutexMutex<T: ?Sized> {
    word: AtomicU32,
    backend: &'static dyn FutexBackend,
    active_spin: u32,
    active_spin_cnt: u32,
    passive_spin: u32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `word`.
unsafe impl<T: ?Sized + Send> Send for FutexMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for FutexMutex<T> {}

impl<T> FutexMutex<T> {
    /// Create a new lock with the default configuration
    pub fn new(value: T) -> Self {
        Self::with_config(value, &SyncConfig::default())
    }

    /// Create a new lock with explicit backend and spin settings
    pub fn with_config(value: T, config: &SyncConfig) -> Self {
        Self {
            word: AtomicU32::new(UNLOCKED),
            backend: config.select_backend(),
            active_spin: config.effective_active_spin(),
            active_spin_cnt: config.active_spin_cnt,
            passive_spin: config.passive_spin,
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the lock, returning the protected value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> FutexMutex<T> {
    /// Acquire the lock, blocking the calling thread if needed
    #[inline]
    pub fn lock(&self) -> FutexMutexGuard<'_, T> {
        let v = self.word.swap(LOCKED, Ordering::Acquire);
        if v != UNLOCKED {
            self.lock_contended(v);
        }
        FutexMutexGuard { mutex: self }
    }

    /// Acquire the lock only if it is free right now
    #[inline]
    pub fn try_lock(&self) -> Option<FutexMutexGuard<'_, T>> {
        self.word
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| FutexMutexGuard { mutex: self })
    }

    /// Check whether the lock is currently held (racy, for diagnostics)
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) != UNLOCKED
    }

    /// Mutable access without locking; the borrow proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Name of the futex backend in use
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[inline]
    fn try_acquire(&self, wait: u32) -> bool {
        while self.word.load(Ordering::Relaxed) == UNLOCKED {
            if self
                .word
                .compare_exchange(UNLOCKED, wait, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    #[cold]
    fn lock_contended(&self, mut v: u32) {
        // We may have just replaced SLEEPING with LOCKED; keep the stronger
        // state so a parked waiter is not forgotten.
        let mut wait = v;
        loop {
            for _ in 0..self.active_spin {
                if self.try_acquire(wait) {
                    return;
                }
                for _ in 0..self.active_spin_cnt {
                    std::hint::spin_loop();
                }
            }

            for _ in 0..self.passive_spin {
                if self.try_acquire(wait) {
                    return;
                }
                std::thread::yield_now();
            }

            v = self.word.swap(SLEEPING, Ordering::Acquire);
            if v == UNLOCKED {
                return;
            }
            wait = SLEEPING;
            self.backend.wait(&self.word, SLEEPING, None);
        }
    }

    #[inline]
    fn unlock(&self) {
        if self.word.swap(UNLOCKED, Ordering::Release) == SLEEPING {
            self.backend.wake(&self.word, 1);
        }
    }
}

impl<T: Default> Default for FutexMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for FutexMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutexMutex")
            .field("locked", &self.is_locked())
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

/// RAII guard; the lock is released on drop
#[must_use = "if unused the FutexMutex will immediately unlock"]
pub struct FutexMutexGuard<'a, T: ?Sized> {
    mutex: &'a FutexMutex<T>,
}

impl<T: ?Sized> Deref for FutexMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for FutexMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held exclusively.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for FutexMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
