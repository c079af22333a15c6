/*!
 * Thread Launcher Configuration
 */

use crate::core::limits::{DEFAULT_STACK_SIZE, SPAWN_EAGAIN_RETRIES};
use serde::{Deserialize, Serialize};

/// Worker thread creation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadConfig {
    /// Usable stack size for each worker, rounded up to whole pages
    pub stack_size: usize,
    /// Creation attempts when the kernel reports EAGAIN
    pub spawn_retries: u32,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            spawn_retries: SPAWN_EAGAIN_RETRIES,
        }
    }
}
