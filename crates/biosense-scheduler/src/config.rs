//! Coordinator configuration.

use crate::lockout::LockoutPolicy;
use biosense_core::Error;
use biosense_core::constants::DEFAULT_COMMAND_CHANNEL_CAPACITY;
use serde::{Deserialize, Serialize};

/// Fate of queued operations when the scheduler is reset after a hardware
/// failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Fail every queued operation with `HW_UNAVAILABLE`.
    #[default]
    FailPending,
    /// Keep caller operations queued for the next session. Scheduler
    /// generated user switches are dropped.
    RetainPending,
}

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub lockout: LockoutPolicy,
    pub reset_policy: ResetPolicy,
    /// Vendor error codes that invalidate the session like `HW_UNAVAILABLE`.
    pub fatal_vendor_codes: Vec<i32>,
    /// Consecutive HAL deaths before the coordinator refuses new work.
    /// Zero disables the limit.
    pub max_consecutive_hal_deaths: u32,
    pub command_channel_capacity: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            lockout: LockoutPolicy::default(),
            reset_policy: ResetPolicy::default(),
            fatal_vendor_codes: Vec::new(),
            max_consecutive_hal_deaths: 5,
            command_channel_capacity: DEFAULT_COMMAND_CHANNEL_CAPACITY,
        }
    }
}

impl SensorConfig {
    /// Parse and validate a JSON configuration. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> biosense_core::Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> biosense_core::Result<()> {
        self.lockout.validate()?;
        if self.command_channel_capacity == 0 {
            return Err(Error::Config(
                "command_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn is_fatal_vendor_code(&self, vendor_code: i32) -> bool {
        self.fatal_vendor_codes.contains(&vendor_code)
    }
}
