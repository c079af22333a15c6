/*!
 * Freya Runtime Support Library
 * Low-level OS services for a user-space M:N runtime
 *
 * - `core::sync`: futex wait/wake, the futex lock and one-shot notes
 * - `thread`: kernel worker threads on caller-supplied stacks
 * - `netpoll`: poll(2)-based readiness poller with a self-pipe wakeup
 */

pub mod core;
pub mod monitoring;
pub mod netpoll;
#[cfg(target_os = "linux")]
pub mod thread;

// Re-exports
pub use crate::core::errors::{ConfigError, PollError, SpawnError, SpawnResult};
pub use crate::core::sync::{futex_sleep, futex_wait, futex_wake, FutexMutex, Note, WaitOutcome, WakeResult};
pub use crate::core::RuntimeConfig;
pub use monitoring::init_tracing;
pub use netpoll::{Direction, Interest, PollConfig, PollResult, Poller, PollerCell, Readiness, ReadyEvent};
#[cfg(target_os = "linux")]
pub use thread::{spawn, spawn_bootstrap, spawn_worker, StackRegion, ThreadConfig, ThreadHandle};
