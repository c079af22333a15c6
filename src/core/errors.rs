/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 *
 * Only caller mistakes surface as values. Everything the runtime cannot
 * recover from goes through `core::fatal` instead.
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Poller errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum PollError {
    #[error("Descriptor {0} is not a valid file descriptor")]
    #[diagnostic(
        code(netpoll::invalid_descriptor),
        help("Descriptors must be non-negative and open.")
    )]
    InvalidDescriptor(i32),

    #[error("Descriptor {0} belongs to the poller's wakeup channel")]
    #[diagnostic(
        code(netpoll::reserved_descriptor),
        help("The wakeup channel is managed internally and cannot be watched.")
    )]
    ReservedDescriptor(i32),

    #[error("Descriptor {0} is not registered with the poller")]
    #[diagnostic(
        code(netpoll::not_registered),
        help("Call register() before arming a direction.")
    )]
    NotRegistered(i32),

    #[error("Failed to create wakeup channel (errno={0})")]
    #[diagnostic(
        code(netpoll::channel_creation_failed),
        help("The process may be out of file descriptors. Check ulimit -n.")
    )]
    ChannelCreation(i32),
}

/// Thread launcher errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SpawnError {
    #[error("Stack region is empty")]
    #[diagnostic(
        code(thread::empty_stack),
        help("Pass a region with a non-zero length.")
    )]
    EmptyStack,

    #[error("Stack region of {size} bytes is below the {min} byte minimum")]
    #[diagnostic(
        code(thread::stack_too_small),
        help("Increase the requested stack size.")
    )]
    StackTooSmall { size: usize, min: usize },

    #[error("Failed to map thread stack (errno={0})")]
    #[diagnostic(
        code(thread::stack_allocation_failed),
        help("System may be low on memory or address space.")
    )]
    StackAllocation(i32),
}

/// Configuration errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    #[diagnostic(
        code(config::invalid_value),
        help("Check the environment variable for typos or out-of-range values.")
    )]
    InvalidValue { key: String, value: String },
}

pub type SpawnResult<T> = Result<T, SpawnError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
