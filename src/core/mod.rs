/*!
 * Core Module
 * Errors, fatal diagnostics, constants, configuration, raw system calls and
 * the futex layer
 */

pub mod config;
pub mod errors;
pub mod fatal;
pub mod limits;
pub mod sync;
pub mod sys;

// Re-export for convenience
pub use config::RuntimeConfig;
pub use errors::*;
