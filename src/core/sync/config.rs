/*!
 * Synchronization Configuration
 *
 * Runtime configuration for futex backend selection and lock spinning
 */

use super::futex;
use super::traits::FutexBackend;
use crate::core::limits::{ACTIVE_SPIN, ACTIVE_SPIN_CNT, PASSIVE_SPIN};
use serde::{Deserialize, Serialize};

/// Futex backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Kernel futex(2) (Linux only, fastest)
    Native,
    /// parking_lot_core emulation (cross-platform)
    Emulated,
    /// Auto-select based on platform
    Auto,
}

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Preferred futex backend
    pub backend: BackendKind,
    /// Active spin rounds before yielding (multi-CPU only)
    pub active_spin: u32,
    /// CPU relax hints per active spin round
    pub active_spin_cnt: u32,
    /// `sched_yield` rounds before sleeping
    pub passive_spin: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::auto()
    }
}

impl SyncConfig {
    /// Platform backend with default spinning, usable in const contexts
    pub const fn auto() -> Self {
        Self {
            backend: BackendKind::Auto,
            active_spin: ACTIVE_SPIN,
            active_spin_cnt: ACTIVE_SPIN_CNT,
            passive_spin: PASSIVE_SPIN,
        }
    }

    /// Configuration that goes straight to the kernel on contention
    pub const fn no_spin() -> Self {
        Self {
            backend: BackendKind::Auto,
            active_spin: 0,
            active_spin_cnt: 0,
            passive_spin: 0,
        }
    }

    /// Configuration for the emulated backend with default spinning
    pub const fn emulated() -> Self {
        Self {
            backend: BackendKind::Emulated,
            active_spin: ACTIVE_SPIN,
            active_spin_cnt: ACTIVE_SPIN_CNT,
            passive_spin: PASSIVE_SPIN,
        }
    }

    /// Select the backend for the current platform
    pub fn select_backend(&self) -> &'static dyn FutexBackend {
        match self.backend {
            BackendKind::Emulated => futex::emulated(),
            // Falls back to the emulation where no kernel futex exists
            BackendKind::Native | BackendKind::Auto => futex::platform(),
        }
    }

    /// Active spin rounds to actually perform on this machine
    ///
    /// Spinning on a single CPU only delays the lock holder.
    pub fn effective_active_spin(&self) -> u32 {
        let ncpu = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if ncpu > 1 {
            self.active_spin
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_backend() {
        let auto = SyncConfig::default().select_backend();
        #[cfg(target_os = "linux")]
        assert_eq!(auto.name(), "futex");
        #[cfg(not(target_os = "linux"))]
        assert_eq!(auto.name(), "parking");

        assert_eq!(SyncConfig::emulated().select_backend().name(), "parking");
    }

    #[test]
    fn test_backend_kind_serde() {
        let json = serde_json::to_string(&BackendKind::Emulated).unwrap();
        assert_eq!(json, "\"emulated\"");
    }
}
