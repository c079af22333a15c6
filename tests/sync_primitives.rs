/*!
 * Synchronization Primitives Integration Tests
 *
 * Futex wait/wake, the futex lock and notes on both backends
 */

use freya_rt::core::sync::{
    emulated, futex_sleep, futex_wait, futex_wake, platform, FutexBackend, FutexMutex, Note,
    SyncConfig, WaitOutcome, WakeResult,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn backends() -> [&'static dyn FutexBackend; 2] {
    [platform(), emulated()]
}

#[test]
fn test_futex_wakes_single_waiter() {
    let word = Arc::new(AtomicU32::new(0));
    let word_clone = word.clone();

    let handle = thread::spawn(move || {
        let start = Instant::now();
        while word_clone.load(Ordering::Acquire) == 0 {
            futex_wait(&word_clone, 0, Some(Duration::from_secs(2)));
        }
        start.elapsed()
    });

    // Give thread time to park
    thread::sleep(Duration::from_millis(50));

    word.store(1, Ordering::Release);
    futex_wake(&word, 1);

    let elapsed = handle.join().unwrap();
    assert!(elapsed < Duration::from_millis(1500));
}

#[test]
fn test_futex_wake_is_bounded() {
    for backend in backends() {
        let word = Arc::new(AtomicU32::new(0));
        let woken = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let word = word.clone();
                let woken = woken.clone();
                thread::spawn(move || {
                    // One wait only: count exactly the wakeups we were given
                    if backend.wait(&word, 0, Some(Duration::from_secs(5))) == WaitOutcome::Woken {
                        woken.fetch_add(1, Ordering::AcqRel);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(200));
        let result = backend.wake(&word, 2);
        assert!(result.count() <= 2, "{}: woke {:?}", backend.name(), result);

        thread::sleep(Duration::from_millis(100));
        assert!(woken.load(Ordering::Acquire) <= 2, "{}", backend.name());

        word.store(1, Ordering::Release);
        backend.wake(&word, u32::MAX);
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

#[test]
fn test_futex_mismatch_and_empty_wake() {
    let word = AtomicU32::new(3);
    assert_eq!(futex_wait(&word, 4, None), WaitOutcome::ValueMismatch);
    assert_eq!(futex_wake(&word, 10), WakeResult::NoWaiters);
    assert_eq!(futex_wake(&word, 0), WakeResult::NoWaiters);
}

#[test]
fn test_futex_sleep_times_out() {
    let word = AtomicU32::new(0);
    let start = Instant::now();
    let outcome = futex_sleep(&word, 0, 20_000_000);
    assert!(matches!(outcome, WaitOutcome::TimedOut | WaitOutcome::Woken));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_mutex_counter_under_contention() {
    let configs = [SyncConfig::default(), SyncConfig::no_spin(), SyncConfig::emulated()];
    for config in configs {
        let lock = Arc::new(FutexMutex::with_config(0u64, &config));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 16_000, "{:?}", config);
        assert!(!lock.is_locked());
    }
}

#[test]
fn test_note_wakeup_across_threads() {
    for config in [SyncConfig::default(), SyncConfig::emulated()] {
        let note = Arc::new(Note::with_config(&config));
        let sleeper = {
            let note = note.clone();
            thread::spawn(move || note.sleep())
        };

        thread::sleep(Duration::from_millis(20));
        note.wakeup();
        sleeper.join().unwrap();
        assert!(note.is_set());

        note.clear();
        assert!(!note.is_set());
        assert!(!note.sleep_timeout(5_000_000));
    }
}
