/*!
 * Synchronization Primitives
 *
 * The futex primitive and the locks built on it:
 * - `futex_wait` / `futex_wake`: compare-and-block on a 32-bit word
 * - `FutexMutex`: two-phase spin-then-block mutual exclusion
 * - `Note`: one-shot park/unpark event for worker threads
 *
 * # Backends
 *
 * Linux uses futex(2) directly. Elsewhere, or on request, the same contract
 * is emulated with parking_lot_core.
 */

mod config;
mod futex;
mod mutex;
mod note;
mod traits;

pub use config::{BackendKind, SyncConfig};
pub use futex::{emulated, futex_sleep, futex_wait, futex_wake, platform, ParkingFutex};
pub use mutex::{FutexMutex, FutexMutexGuard};
pub use note::Note;
pub use traits::{FutexBackend, WaitOutcome, WakeResult};

#[cfg(target_os = "linux")]
pub use futex::NativeFutex;
