/*!
 * Thread Launcher
 *
 * Kernel worker threads for the runtime: stack regions, creation on a
 * caller-supplied stack with signal masking and EAGAIN retry, a heap-free
 * clone(2) bootstrap variant, and a join that hands the stack back only
 * after the thread is gone.
 */

mod config;
mod launcher;
mod stack;

pub use config::ThreadConfig;
pub use launcher::{current_tid, spawn, spawn_bootstrap, spawn_worker, ThreadEntry, ThreadHandle};
pub use stack::{page_size, StackRegion};
