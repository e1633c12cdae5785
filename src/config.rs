/// Runtime configuration of the key manager.
///
/// Chip and board selection happen at compile time through Cargo features;
/// what remains configurable at construction is scan timing and whether the
/// stored registry is restored on boot.
use thiserror::Error;

use crate::defaults::{
    DEFAULT_RESTORE_ON_STARTUP, DEFAULT_SCAN_DURATION_MS, DEFAULT_SCAN_INTERVAL_MS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("scan interval must be greater than zero")]
    ZeroInterval,
    #[error("scan duration must be greater than zero")]
    ZeroDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Time between the starts of two periodic scans (ms).
    pub scan_interval_ms: u32,
    /// Length of one scan window (ms).
    pub scan_duration_ms: u32,
    /// Load the persisted registry during setup.
    pub restore_on_startup: bool,
}

impl ManagerConfig {
    pub const fn new() -> Self {
        Self {
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            scan_duration_ms: DEFAULT_SCAN_DURATION_MS,
            restore_on_startup: DEFAULT_RESTORE_ON_STARTUP,
        }
    }

    pub const fn with_scan_interval(mut self, ms: u32) -> Self {
        self.scan_interval_ms = ms;
        self
    }

    pub const fn with_scan_duration(mut self, ms: u32) -> Self {
        self.scan_duration_ms = ms;
        self
    }

    pub const fn with_restore_on_startup(mut self, restore: bool) -> Self {
        self.restore_on_startup = restore;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.scan_duration_ms == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if self.scan_duration_ms >= self.scan_interval_ms {
            log::warn!(
                "Scan duration {} ms >= interval {} ms; radio will scan continuously",
                self.scan_duration_ms,
                self.scan_interval_ms
            );
        }
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
