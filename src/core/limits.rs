/*!
 * Runtime Limits and Constants
 *
 * Centralized location for the tunables of the futex lock, the thread
 * launcher and the poller.
 *
 * - Performance-critical constants are marked with [PERF]
 * - Linux-compatible values are marked with [LINUX-COMPAT]
 */

// =============================================================================
// FUTEX LOCK
// =============================================================================

/// Rounds of active spinning before a contended lock yields the CPU
/// [PERF] Only applied when more than one CPU is online
pub const ACTIVE_SPIN: u32 = 4;

/// CPU relax hints issued per active spin round
pub const ACTIVE_SPIN_CNT: u32 = 30;

/// Rounds of `sched_yield` before a contended lock sleeps in the kernel
pub const PASSIVE_SPIN: u32 = 1;

// =============================================================================
// THREAD LAUNCHER
// =============================================================================

/// Attempts made when thread creation reports EAGAIN
pub const SPAWN_EAGAIN_RETRIES: u32 = 20;

/// Default worker stack size (256KB)
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest usable stack accepted by the launcher (256KB)
/// [LINUX-COMPAT] Worker stacks also hold the C library's thread control
/// block and static TLS, and glibc's aarch64 PTHREAD_STACK_MIN is 128KB
pub const MIN_STACK_SIZE: usize = 256 * 1024;

/// Stack pointer alignment required at thread entry
/// [LINUX-COMPAT] x86_64 and aarch64 SysV ABIs both require 16 bytes
pub const STACK_ALIGN: usize = 16;

/// Fallback page size when sysconf cannot report one
pub const FALLBACK_PAGE_SIZE: usize = 4096;

// =============================================================================
// POLLER
// =============================================================================

/// Nanoseconds per poll(2) timeout unit
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Requests at or above this many nanoseconds are capped
/// Keeps `ns / NANOS_PER_MILLI` well inside a C int
pub const POLL_TIMEOUT_CAP_NANOS: i64 = 1_000_000_000_000_000;

/// Timeout used for capped requests (~11.5 days)
pub const DEFAULT_MAX_POLL_TIMEOUT_MS: i32 = 1_000_000_000;

/// Scratch buffer used when draining the wakeup channel
pub const WAKEUP_DRAIN_BUF: usize = 16;

/// Slot permanently owned by the wakeup channel
pub const WAKEUP_SLOT: usize = 0;
