/*!
 * Poller Configuration
 */

use crate::core::limits::DEFAULT_MAX_POLL_TIMEOUT_MS;
use serde::{Deserialize, Serialize};

/// Poller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Ceiling applied to oversized timeouts, in milliseconds
    pub max_timeout_ms: i32,
    /// Watched-table slots reserved up front
    pub initial_capacity: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_timeout_ms: DEFAULT_MAX_POLL_TIMEOUT_MS,
            initial_capacity: 64,
        }
    }
}
