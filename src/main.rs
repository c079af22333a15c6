/*!
 * rtprobe - Runtime Self Check
 *
 * Exercises the three OS services end to end on the host:
 * - futex wait/wake on a gate word
 * - worker threads blocked on that gate
 * - the poll(2) poller observing the workers' writes, plus a broken wait
 *
 * Prints the effective configuration as JSON first.
 *
 * Usage: rtprobe [WORKERS]
 */

use anyhow::{bail, ensure, Context, Result};
use std::ffi::c_void;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use freya_rt::core::sync::{futex_wait, futex_wake, FutexMutex, WaitOutcome};
use freya_rt::core::sys;
use freya_rt::netpoll::{Direction, Interest, Poller};
use freya_rt::{init_tracing, RuntimeConfig};

const DEFAULT_WORKERS: u32 = 4;
const CHECK_TOKEN: u64 = 0xF4E7A;

/// State shared with the workers
struct CheckShared {
    gate: AtomicU32,
    finished: AtomicU32,
    hits: FutexMutex<u64>,
    write_fd: RawFd,
}

extern "C" fn check_worker(ctx: *mut c_void) {
    // SAFETY: ctx is the CheckShared owned by main, alive until every worker is joined.
    let shared = unsafe { &*(ctx as *const CheckShared) };

    while shared.gate.load(Ordering::Acquire) == 0 {
        futex_wait(&shared.gate, 0, None);
    }

    *shared.hits.lock() += 1;

    while let Err(nix::errno::Errno::EINTR) = sys::write(shared.write_fd, &[1u8]) {}
    shared.finished.fetch_add(1, Ordering::Release);
}

fn check_futex() -> Result<()> {
    let word = AtomicU32::new(1);
    let outcome = futex_wait(&word, 0, Some(Duration::from_secs(1)));
    ensure!(
        outcome == WaitOutcome::ValueMismatch,
        "futex wait on a changed word returned {:?}",
        outcome
    );
    ensure!(
        !futex_wake(&word, 1).is_woken(),
        "futex wake found a waiter on a private word"
    );
    info!("futex: compare-and-block and empty wake ok");
    Ok(())
}

fn drain_pipe(fd: RawFd) -> Result<u32> {
    let mut buf = [0u8; 64];
    let mut total = 0u32;
    loop {
        match nix::unistd::read(fd, &mut buf) {
            Ok(0) => bail!("check pipe closed unexpectedly"),
            Ok(n) => total += n as u32,
            Err(nix::errno::Errno::EAGAIN) => return Ok(total),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e).context("reading check pipe"),
        }
    }
}

fn check_workers(config: &RuntimeConfig, workers: u32) -> Result<()> {
    use nix::fcntl::OFlag;

    let poller: Poller<u64> = config.poller().context("creating poller")?;
    let (read_end, write_end) =
        nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).context("creating check pipe")?;
    poller.register(read_end.as_raw_fd(), CHECK_TOKEN, Interest::READ)?;

    let shared = Arc::new(CheckShared {
        gate: AtomicU32::new(0),
        finished: AtomicU32::new(0),
        hits: FutexMutex::with_config(0, &config.sync),
        write_fd: write_end.as_raw_fd(),
    });
    let ctx = Arc::as_ptr(&shared) as *mut c_void;

    let mut handles = Vec::with_capacity(workers as usize);
    for _ in 0..workers {
        // SAFETY: check_worker honours the entry contract and `shared`
        // outlives every worker because all of them are joined below.
        let handle = unsafe { freya_rt::spawn_worker(&config.thread, check_worker, ctx) }
            .context("spawning worker")?;
        handles.push(handle);
    }
    info!(workers, tids = ?handles.iter().map(|h| h.tid()).collect::<Vec<_>>(), "workers launched");

    shared.gate.store(1, Ordering::Release);
    futex_wake(&shared.gate, u32::MAX);

    let started = Instant::now();
    let mut received = 0;
    while received < workers {
        let result = poller.wait(Duration::from_secs(5).as_nanos() as i64);
        ensure!(
            result.waiter_delta as usize == result.len(),
            "waiter delta {} does not match {} ready task(s)",
            result.waiter_delta,
            result.len()
        );
        if result.is_empty() {
            ensure!(
                started.elapsed() < Duration::from_secs(30),
                "timed out waiting for workers ({}/{})",
                received,
                workers
            );
            warn!(received, "poll returned nothing, retrying");
            continue;
        }
        for event in &result.ready {
            ensure!(event.token == CHECK_TOKEN, "unexpected token {:#x}", event.token);
            ensure!(event.direction == Direction::Read, "unexpected direction");
        }
        received += drain_pipe(read_end.as_raw_fd())?;
        poller.arm(read_end.as_raw_fd(), Direction::Read)?;
    }

    for handle in handles {
        let tid = handle.tid();
        let stack = handle.join();
        info!(tid, stack_len = stack.len(), "worker joined");
    }

    let hits = *shared.hits.lock();
    ensure!(hits == u64::from(workers), "lock counted {} of {} workers", hits, workers);
    ensure!(shared.finished.load(Ordering::Acquire) == workers, "not every worker finished");
    ensure!(poller.deregister(read_end.as_raw_fd()) == Some(CHECK_TOKEN), "deregister lost the token");
    info!(workers, lock = poller.lock_backend(), "threads and poller: all workers observed");
    Ok(())
}

fn check_break_wait(config: &RuntimeConfig) -> Result<()> {
    let poller: Arc<Poller<u64>> = Arc::new(config.poller()?);
    let breaker = {
        let poller = Arc::clone(&poller);
        std::thread::spawn(move || {
            while poller.waiters_in_poll() == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
            poller.break_wait();
        })
    };

    let started = Instant::now();
    let result = poller.wait(-1);
    breaker
        .join()
        .map_err(|_| anyhow::anyhow!("breaker thread panicked"))?;
    ensure!(result.is_empty() && result.waiter_delta == 0, "broken wait reported readiness");
    info!(elapsed_us = started.elapsed().as_micros() as u64, "poller: break_wait ok");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let workers = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u32>()
            .with_context(|| format!("invalid worker count {:?}", arg))?,
        None => DEFAULT_WORKERS,
    };

    let config = RuntimeConfig::from_env().context("loading runtime configuration")?;
    println!("{}", serde_json::to_string_pretty(&config)?);

    check_futex()?;
    check_workers(&config, workers)?;
    check_break_wait(&config)?;

    info!("rtprobe: all checks passed");
    Ok(())
}
