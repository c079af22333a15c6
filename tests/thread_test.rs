/*!
 * Thread Launcher Tests
 *
 * Launch real kernel threads on launcher-owned stacks. Workers have their own
 * thread-local block; bootstrap threads share the test thread's, so their
 * entry functions only touch atomics, futexes and raw syscalls.
 */

#![cfg(target_os = "linux")]

use freya_rt::core::limits::MIN_STACK_SIZE;
use freya_rt::core::sync::{futex_wait, futex_wake, WaitOutcome};
use freya_rt::netpoll::{Interest, PollConfig, Poller};
use freya_rt::thread::{current_tid, spawn, spawn_bootstrap, spawn_worker, StackRegion, ThreadConfig};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::collections::HashSet;
use std::ffi::c_void;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const WORKERS: usize = 4;

struct TidSlots {
    tids: [AtomicI32; WORKERS],
    next: AtomicU32,
}

extern "C" fn record_tid(ctx: *mut c_void) {
    let slots = unsafe { &*(ctx as *const TidSlots) };
    let idx = slots.next.fetch_add(1, Ordering::AcqRel) as usize;
    slots.tids[idx].store(current_tid(), Ordering::Release);
}

#[test]
#[serial]
fn test_workers_get_distinct_tids() {
    let slots = TidSlots {
        tids: Default::default(),
        next: AtomicU32::new(0),
    };
    let ctx = &slots as *const TidSlots as *mut c_void;
    let config = ThreadConfig::default();

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| unsafe { spawn_worker(&config, record_tid, ctx) }.unwrap())
        .collect();
    let spawned: HashSet<i32> = handles.iter().map(|h| h.tid()).collect();
    for handle in handles {
        handle.join();
    }

    let seen: HashSet<i32> = slots.tids.iter().map(|t| t.load(Ordering::Acquire)).collect();
    assert_eq!(seen.len(), WORKERS);
    assert_eq!(seen, spawned);
    assert!(!seen.contains(&current_tid()));
}

struct Gate {
    open: AtomicU32,
    passed: AtomicU32,
}

extern "C" fn wait_at_gate(ctx: *mut c_void) {
    let gate = unsafe { &*(ctx as *const Gate) };
    while gate.open.load(Ordering::Acquire) == 0 {
        futex_wait(&gate.open, 0, None);
    }
    gate.passed.fetch_add(1, Ordering::AcqRel);
}

#[test]
#[serial]
fn test_workers_block_on_futex_gate() {
    let gate = Gate {
        open: AtomicU32::new(0),
        passed: AtomicU32::new(0),
    };
    let ctx = &gate as *const Gate as *mut c_void;
    let config = ThreadConfig::default();

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| unsafe { spawn_worker(&config, wait_at_gate, ctx) }.unwrap())
        .collect();

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(gate.passed.load(Ordering::Acquire), 0);
    assert!(handles.iter().all(|h| !h.is_finished()));

    gate.open.store(1, Ordering::Release);
    futex_wake(&gate.open, u32::MAX);

    for handle in handles {
        handle.join();
    }
    assert_eq!(gate.passed.load(Ordering::Acquire), WORKERS as u32);
}

/// Whether the kernel reports `tid` as sleeping
fn is_sleeping(tid: i32) -> bool {
    let stat = std::fs::read_to_string(format!("/proc/self/task/{}/stat", tid)).unwrap_or_default();
    // The state follows the parenthesised command name
    stat.rsplit_once(") ")
        .and_then(|(_, rest)| rest.chars().next())
        == Some('S')
}

extern "C" fn pass_when_woken(ctx: *mut c_void) {
    let gate = unsafe { &*(ctx as *const Gate) };
    // The word stays 0 until the gate opens, so only a wake lets a worker out
    while gate.open.load(Ordering::Acquire) == 0 {
        if futex_wait(&gate.open, 0, None) == WaitOutcome::Woken {
            break;
        }
    }
    gate.passed.fetch_add(1, Ordering::AcqRel);
}

#[test]
#[serial]
fn test_futex_wake_releases_exactly_requested() {
    let gate = Gate {
        open: AtomicU32::new(0),
        passed: AtomicU32::new(0),
    };
    let ctx = &gate as *const Gate as *mut c_void;
    let config = ThreadConfig::default();

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| unsafe { spawn_worker(&config, pass_when_woken, ctx) }.unwrap())
        .collect();

    let start = Instant::now();
    while !handles.iter().all(|h| is_sleeping(h.tid())) {
        assert!(start.elapsed() < Duration::from_secs(5), "workers never blocked");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(gate.passed.load(Ordering::Acquire), 0);

    assert_eq!(futex_wake(&gate.open, 2).count(), 2);

    let start = Instant::now();
    while gate.passed.load(Ordering::Acquire) < 2 {
        assert!(start.elapsed() < Duration::from_secs(5), "woken workers never passed");
        std::thread::sleep(Duration::from_millis(1));
    }
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(gate.passed.load(Ordering::Acquire), 2);
    assert_eq!(handles.iter().filter(|h| h.is_finished()).count(), 2);

    gate.open.store(1, Ordering::Release);
    futex_wake(&gate.open, u32::MAX);
    for handle in handles {
        handle.join();
    }
    assert_eq!(gate.passed.load(Ordering::Acquire), WORKERS as u32);
}

/// State for a worker that keeps hitting syscall errors of its own
struct Busy {
    poller: Poller<u64>,
    stop: AtomicU32,
    rounds: AtomicU32,
    wrong: AtomicU32,
}

extern "C" fn fail_syscalls_and_poll(ctx: *mut c_void) {
    let busy = unsafe { &*(ctx as *const Busy) };
    let word = AtomicU32::new(0);
    while busy.stop.load(Ordering::Acquire) == 0 {
        let mut ok = matches!(
            futex_wait(&word, 0, Some(Duration::ZERO)),
            WaitOutcome::TimedOut | WaitOutcome::Interrupted
        );
        // errno-based failure through the C library
        ok &= nix::unistd::dup(-1) == Err(Errno::EBADF);
        // Nothing was written to the watched pipe
        ok &= busy.poller.wait(0).is_empty();
        if !ok {
            busy.wrong.fetch_add(1, Ordering::Relaxed);
        }
        busy.rounds.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
#[serial]
fn test_worker_errors_stay_on_the_worker() {
    let (r, _w) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).unwrap();
    let busy = Busy {
        poller: Poller::new(PollConfig::default()).unwrap(),
        stop: AtomicU32::new(0),
        rounds: AtomicU32::new(0),
        wrong: AtomicU32::new(0),
    };
    busy.poller.register(r.as_raw_fd(), 1, Interest::READ).unwrap();
    let ctx = &busy as *const Busy as *mut c_void;
    let handle = unsafe { spawn_worker(&ThreadConfig::default(), fail_syscalls_and_poll, ctx) }.unwrap();

    let word = AtomicU32::new(7);
    let mut misreported = 0;
    for _ in 0..200_000 {
        if futex_wait(&word, 5, None) != WaitOutcome::ValueMismatch {
            misreported += 1;
        }
        if nix::unistd::close(-1) != Err(Errno::EBADF) {
            misreported += 1;
        }
    }

    busy.stop.store(1, Ordering::Release);
    handle.join();
    assert_eq!(misreported, 0);
    assert!(busy.rounds.load(Ordering::Acquire) > 0);
    assert_eq!(busy.wrong.load(Ordering::Acquire), 0);
}

struct BootstrapSpin {
    stop: AtomicU32,
    exited: AtomicU32,
    rounds: AtomicU32,
}

static BOOTSTRAP_SPIN: BootstrapSpin = BootstrapSpin {
    stop: AtomicU32::new(0),
    exited: AtomicU32::new(0),
    rounds: AtomicU32::new(0),
};

extern "C" fn time_out_until_stopped(_: *mut c_void) {
    let word = AtomicU32::new(0);
    let fd: RawFd = -1;
    let mut buf = [0u8; 1];
    while BOOTSTRAP_SPIN.stop.load(Ordering::Acquire) == 0 {
        futex_wait(&word, 0, Some(Duration::ZERO));
        let _ = freya_rt::core::sys::read(fd, &mut buf);
        BOOTSTRAP_SPIN.rounds.fetch_add(1, Ordering::Relaxed);
    }
    BOOTSTRAP_SPIN.exited.store(1, Ordering::Release);
    futex_wake(&BOOTSTRAP_SPIN.exited, 1);
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[test]
#[serial]
fn test_bootstrap_thread_leaves_errno_alone() {
    let tid = unsafe { spawn_bootstrap(MIN_STACK_SIZE, time_out_until_stopped, std::ptr::null_mut()) };
    assert!(tid > 0);

    // The bootstrap thread shares this thread's errno slot
    let word = AtomicU32::new(7);
    let mut misreported = 0;
    for _ in 0..200_000 {
        if futex_wait(&word, 5, None) != WaitOutcome::ValueMismatch {
            misreported += 1;
        }
        if nix::unistd::close(-1) != Err(Errno::EBADF) {
            misreported += 1;
        }
    }

    BOOTSTRAP_SPIN.stop.store(1, Ordering::Release);
    while BOOTSTRAP_SPIN.exited.load(Ordering::Acquire) == 0 {
        futex_wait(&BOOTSTRAP_SPIN.exited, 0, Some(Duration::from_millis(100)));
    }
    assert_eq!(misreported, 0);
    assert!(BOOTSTRAP_SPIN.rounds.load(Ordering::Acquire) > 0);
}

extern "C" fn noop(_: *mut c_void) {}

#[test]
#[serial]
fn test_join_returns_stack() {
    let stack = StackRegion::allocate(MIN_STACK_SIZE).unwrap();
    let (base, len) = (stack.as_ptr(), stack.len());

    let handle = unsafe { spawn(stack, noop, std::ptr::null_mut(), &ThreadConfig::default()) };
    let back = handle.join();

    assert_eq!(back.as_ptr(), base);
    assert_eq!(back.len(), len);
    assert!(back.is_owned());
}

#[test]
#[serial]
fn test_external_stack_region() {
    let mut buf = vec![0u128; MIN_STACK_SIZE / 16];
    let base = NonNull::new(buf.as_mut_ptr() as *mut u8).unwrap();
    let region = unsafe { StackRegion::from_raw_parts(base, MIN_STACK_SIZE) }.unwrap();

    let counter = AtomicU32::new(0);
    extern "C" fn bump(ctx: *mut c_void) {
        let counter = unsafe { &*(ctx as *const AtomicU32) };
        counter.fetch_add(1, Ordering::Release);
    }

    let handle = unsafe {
        spawn(
            region,
            bump,
            &counter as *const AtomicU32 as *mut c_void,
            &ThreadConfig::default(),
        )
    };
    let back = handle.join();
    assert!(!back.is_owned());
    assert_eq!(counter.load(Ordering::Acquire), 1);
    drop(back);
    buf[0] = 1;
}

#[test]
#[serial]
fn test_parent_signal_mask_restored() {
    let mut block = SigSet::empty();
    block.add(Signal::SIGUSR2);
    let mut original = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&block), Some(&mut original)).unwrap();

    let handle = unsafe { spawn_worker(&ThreadConfig::default(), noop, std::ptr::null_mut()) }.unwrap();
    handle.join();

    let mut current = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, None, Some(&mut current)).unwrap();
    assert!(current.contains(Signal::SIGUSR2));
    assert!(!current.contains(Signal::SIGUSR1));
    assert!(!current.contains(Signal::SIGTERM));

    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&original), None).unwrap();
}

extern "C" fn record_mask(ctx: *mut c_void) {
    let out = unsafe { &*(ctx as *const AtomicU64) };
    let mut mask: u64 = 0;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_rt_sigprocmask,
            libc::SIG_BLOCK,
            std::ptr::null::<u64>(),
            &mut mask as *mut u64,
            std::mem::size_of::<u64>(),
        )
    };
    if ret == 0 {
        out.store(mask, Ordering::Release);
    }
}

#[test]
#[serial]
fn test_child_starts_with_signals_blocked() {
    let mask = AtomicU64::new(0);
    let handle = unsafe {
        spawn_worker(
            &ThreadConfig::default(),
            record_mask,
            &mask as *const AtomicU64 as *mut c_void,
        )
    }
    .unwrap();
    handle.join();

    let mask = mask.load(Ordering::Acquire);
    let bit = |sig: i32| 1u64 << (sig - 1);
    assert_ne!(mask & bit(libc::SIGUSR1), 0);
    assert_ne!(mask & bit(libc::SIGTERM), 0);
    assert_ne!(mask & bit(libc::SIGINT), 0);
}

#[test]
#[serial]
fn test_bootstrap_thread_runs() {
    static STARTED: AtomicU32 = AtomicU32::new(0);
    extern "C" fn announce(_: *mut c_void) {
        STARTED.store(1, Ordering::Release);
        futex_wake(&STARTED, 1);
    }

    let tid = unsafe { spawn_bootstrap(MIN_STACK_SIZE, announce, std::ptr::null_mut()) };
    assert!(tid > 0);
    while STARTED.load(Ordering::Acquire) == 0 {
        futex_wait(&STARTED, 0, Some(Duration::from_millis(100)));
    }
}

#[test]
fn test_rejects_bad_stack_sizes() {
    let config = ThreadConfig {
        stack_size: 0,
        ..Default::default()
    };
    let err = unsafe { spawn_worker(&config, noop, std::ptr::null_mut()) }.unwrap_err();
    assert_eq!(err, freya_rt::SpawnError::EmptyStack);

    let config = ThreadConfig {
        stack_size: 512,
        ..Default::default()
    };
    assert!(unsafe { spawn_worker(&config, noop, std::ptr::null_mut()) }.is_err());
}
