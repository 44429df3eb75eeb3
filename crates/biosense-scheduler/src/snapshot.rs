//! Diagnostic dump of a coordinator.

use crate::lockout::LockoutMode;
use crate::operation::OperationSummary;
use crate::scheduler::{CompletedOperation, CrashState};
use crate::session::{SessionInfo, SessionPhase};
use biosense_core::{SensorId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-user part of a [`SensorSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSnapshot {
    pub user: UserId,
    pub enrollments: u32,
    pub authenticator_id: Option<u64>,
    pub lockout: LockoutMode,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub invalidation_in_progress: bool,
}

/// Point-in-time state of one sensor, serializable to JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorSnapshot {
    pub sensor_id: SensorId,
    pub test_hal_enabled: bool,
    pub session_phase: SessionPhase,
    pub session: Option<SessionInfo>,
    pub current_operation: Option<OperationSummary>,
    pub queue_depth: usize,
    pub pending: Vec<OperationSummary>,
    pub recent: Vec<CompletedOperation>,
    pub users: Vec<UserSnapshot>,
    pub reset_lockout_requires_hardware_auth_token: bool,
    pub reset_lockout_requires_challenge: bool,
    pub crash_state: Option<CrashState>,
    pub fatal_reason: Option<String>,
    pub consecutive_hal_deaths: u32,
    pub session_transitions: u64,
}

impl SensorSnapshot {
    pub fn user(&self, user: UserId) -> Option<&UserSnapshot> {
        self.users.iter().find(|u| u.user == user)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
