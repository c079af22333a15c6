/*!
 * Runtime Configuration
 * Aggregate of the per-component configs, loadable from the environment
 *
 * Environment variables (all optional):
 * - FREYA_RT_STACK_SIZE: worker stack size in bytes
 * - FREYA_RT_SPAWN_RETRIES: thread creation attempts on EAGAIN
 * - FREYA_RT_ACTIVE_SPIN: active spin rounds in the futex lock
 * - FREYA_RT_PASSIVE_SPIN: yield rounds in the futex lock
 * - FREYA_RT_POLL_MAX_TIMEOUT_MS: poll timeout ceiling
 * - FREYA_RT_FUTEX_BACKEND: native | emulated | auto
 */

use super::errors::{ConfigError, ConfigResult, PollError};
use super::sync::{BackendKind, SyncConfig};
use crate::netpoll::{PollConfig, Poller, PollerCell};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

#[cfg(target_os = "linux")]
use crate::thread::ThreadConfig;

pub const ENV_STACK_SIZE: &str = "FREYA_RT_STACK_SIZE";
pub const ENV_SPAWN_RETRIES: &str = "FREYA_RT_SPAWN_RETRIES";
pub const ENV_ACTIVE_SPIN: &str = "FREYA_RT_ACTIVE_SPIN";
pub const ENV_PASSIVE_SPIN: &str = "FREYA_RT_PASSIVE_SPIN";
pub const ENV_POLL_MAX_TIMEOUT_MS: &str = "FREYA_RT_POLL_MAX_TIMEOUT_MS";
pub const ENV_FUTEX_BACKEND: &str = "FREYA_RT_FUTEX_BACKEND";

/// Effective configuration of every runtime component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub sync: SyncConfig,
    #[cfg(target_os = "linux")]
    pub thread: ThreadConfig,
    pub poll: PollConfig,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "futex" => Ok(BackendKind::Native),
            "emulated" | "parking" => Ok(BackendKind::Emulated),
            "auto" => Ok(BackendKind::Auto),
            _ => Err(invalid(ENV_FUTEX_BACKEND, s)),
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

impl RuntimeConfig {
    /// Defaults overridden by any `FREYA_RT_*` variables that are set
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_FUTEX_BACKEND) {
            config.sync.backend = v.parse()?;
        }
        if let Some(v) = lookup(ENV_ACTIVE_SPIN) {
            config.sync.active_spin = parse(ENV_ACTIVE_SPIN, &v)?;
        }
        if let Some(v) = lookup(ENV_PASSIVE_SPIN) {
            config.sync.passive_spin = parse(ENV_PASSIVE_SPIN, &v)?;
        }
        if let Some(v) = lookup(ENV_POLL_MAX_TIMEOUT_MS) {
            let ms: i32 = parse(ENV_POLL_MAX_TIMEOUT_MS, &v)?;
            if ms <= 0 {
                return Err(invalid(ENV_POLL_MAX_TIMEOUT_MS, &v));
            }
            config.poll.max_timeout_ms = ms;
        }

        #[cfg(target_os = "linux")]
        {
            if let Some(v) = lookup(ENV_STACK_SIZE) {
                let size: usize = parse(ENV_STACK_SIZE, &v)?;
                if size < crate::core::limits::MIN_STACK_SIZE {
                    return Err(invalid(ENV_STACK_SIZE, &v));
                }
                config.thread.stack_size = size;
            }
            if let Some(v) = lookup(ENV_SPAWN_RETRIES) {
                let retries: u32 = parse(ENV_SPAWN_RETRIES, &v)?;
                if retries == 0 {
                    return Err(invalid(ENV_SPAWN_RETRIES, &v));
                }
                config.thread.spawn_retries = retries;
            }
        }

        debug!(?config, "runtime configuration loaded");
        Ok(config)
    }

    /// Poller built from `poll`, its table lock from `sync`
    pub fn poller<T: Clone + Send>(&self) -> Result<Poller<T>, PollError> {
        Poller::with_sync_config(self.poll.clone(), &self.sync)
    }

    /// Lazily initialized poller built the same way as `poller`
    pub fn poller_cell<T: Clone + Send>(&self) -> PollerCell<T> {
        PollerCell::with_sync_config(self.poll.clone(), self.sync.clone())
    }
}
