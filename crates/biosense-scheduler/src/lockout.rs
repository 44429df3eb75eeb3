//! Per-user authentication lockout.
//!
//! Failed authentications are counted per user. Once the count reaches the
//! policy threshold the user is locked out for a duration that grows with
//! each further failure:
//!
//! - below `threshold`: no lockout
//! - `threshold` failures: first entry of `lockout_durations`
//! - each additional failure: the next entry, capped at the last
//! - `permanent_after` failures: locked until explicitly cleared
//!
//! When the sensor enforces lockout in hardware, a successful
//! authentication does not clear the counter. Only a hardware-verified
//! reset does.

use crate::clock::Clock;
use biosense_core::constants::{
    DEFAULT_LOCKOUT_THRESHOLD, DEFAULT_PERMANENT_LOCKOUT_THRESHOLD, DEFAULT_TIMED_LOCKOUT_SECS,
};
use biosense_core::{Error, UserId};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Progressive lockout policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutPolicy {
    /// Failed attempts before the first timed lockout.
    pub threshold: u32,
    /// Lockout durations for each level, in seconds.
    pub lockout_durations: Vec<u64>,
    /// Failed attempts before the lockout becomes permanent.
    pub permanent_after: Option<u32>,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_durations: vec![DEFAULT_TIMED_LOCKOUT_SECS],
            permanent_after: Some(DEFAULT_PERMANENT_LOCKOUT_THRESHOLD),
        }
    }
}

impl LockoutPolicy {
    /// Lockout that grows with each failure past the threshold, from 30
    /// seconds up to a 30 minute cap.
    pub fn escalating() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_durations: vec![
                30,   // 5 failures: 30 seconds
                60,   // 6 failures: 1 minute
                120,  // 7 failures: 2 minutes
                300,  // 8 failures: 5 minutes
                1800, // 9+ failures: 30 minutes
            ],
            permanent_after: Some(DEFAULT_PERMANENT_LOCKOUT_THRESHOLD),
        }
    }

    /// Create a strict policy (locks out sooner, longer durations)
    pub fn strict() -> Self {
        Self {
            threshold: 3,
            lockout_durations: vec![
                60,   // 3 failures: 1 minute
                600,  // 4 failures: 10 minutes
                3600, // 5+ failures: 1 hour
            ],
            permanent_after: Some(10),
        }
    }

    /// Create a lenient policy that never locks out permanently
    pub fn lenient() -> Self {
        Self {
            threshold: 10,
            lockout_durations: vec![15, 60],
            permanent_after: None,
        }
    }

    /// Lockout duration for the given number of failed attempts.
    /// Returns None if not yet locked out.
    pub fn lockout_duration(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts < self.threshold {
            return None;
        }

        let lockout_level = (failed_attempts - self.threshold) as usize;
        let duration_index = lockout_level.min(self.lockout_durations.len().saturating_sub(1));

        self.lockout_durations
            .get(duration_index)
            .map(|secs| Duration::from_secs(*secs))
    }

    pub fn is_locked(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.threshold
    }

    pub fn is_permanent(&self, failed_attempts: u32) -> bool {
        self.permanent_after
            .is_some_and(|limit| failed_attempts >= limit)
    }

    /// Check the policy is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a zero threshold, an empty duration list,
    /// or a permanent limit below the threshold.
    pub fn validate(&self) -> biosense_core::Result<()> {
        if self.threshold == 0 {
            return Err(Error::Config("lockout threshold must be at least 1".into()));
        }
        if self.lockout_durations.is_empty() {
            return Err(Error::Config("lockout_durations must not be empty".into()));
        }
        if let Some(limit) = self.permanent_after
            && limit < self.threshold
        {
            return Err(Error::Config(format!(
                "permanent_after ({limit}) is below threshold ({})",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Observable lockout condition of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutMode {
    None,
    Timed,
    Permanent,
}

/// Lockout imposed by the hardware itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareLockout {
    Timed(Duration),
    Permanent,
}

/// Lockout bookkeeping for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub permanent: bool,
    /// Number of timed lockouts applied since the last reset.
    pub timed_lockouts: u32,
    pub hardware_enforced: bool,
}

impl LockoutState {
    fn mode_at(&self, now: DateTime<Utc>) -> LockoutMode {
        if self.permanent {
            LockoutMode::Permanent
        } else if self.lockout_until.is_some_and(|until| until > now) {
            LockoutMode::Timed
        } else {
            LockoutMode::None
        }
    }
}

/// Tracks failed authentications and lockouts for every user of a sensor.
#[derive(Debug)]
pub struct LockoutTracker {
    policy: LockoutPolicy,
    hardware_enforced: bool,
    clock: Arc<dyn Clock>,
    states: HashMap<UserId, LockoutState>,
}

impl LockoutTracker {
    pub fn new(policy: LockoutPolicy, hardware_enforced: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            hardware_enforced,
            clock,
            states: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn is_hardware_enforced(&self) -> bool {
        self.hardware_enforced
    }

    /// Count a failed authentication and return the resulting mode.
    pub fn record_failure(&mut self, user: UserId) -> LockoutMode {
        let now = self.clock.now();
        let hardware_enforced = self.hardware_enforced;
        let state = self.states.entry(user).or_insert_with(|| LockoutState {
            hardware_enforced,
            ..LockoutState::default()
        });
        state.failed_attempts = state.failed_attempts.saturating_add(1);

        if self.policy.is_permanent(state.failed_attempts) {
            if !state.permanent {
                warn!(
                    "User {} permanently locked out after {} failed attempts",
                    user, state.failed_attempts
                );
            }
            state.permanent = true;
        } else if let Some(duration) = self.policy.lockout_duration(state.failed_attempts) {
            let until = now
                .checked_add_signed(TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            state.lockout_until = Some(until);
            state.timed_lockouts = state.timed_lockouts.saturating_add(1);
            info!(
                "User {} locked out for {:?} after {} failed attempts",
                user, duration, state.failed_attempts
            );
        } else {
            debug!(
                "User {} failed authentication ({} of {})",
                user, state.failed_attempts, self.policy.threshold
            );
        }

        state.mode_at(now)
    }

    /// Record a successful authentication.
    ///
    /// Returns true if the user's counter was cleared. A hardware-enforced
    /// lockout survives a success and needs [`clear`](Self::clear).
    pub fn record_success(&mut self, user: UserId) -> bool {
        if self.hardware_enforced {
            return false;
        }
        self.states.remove(&user).is_some()
    }

    pub fn is_locked_out(&self, user: UserId) -> bool {
        self.lockout_mode(user) != LockoutMode::None
    }

    pub fn lockout_mode(&self, user: UserId) -> LockoutMode {
        self.states
            .get(&user)
            .map_or(LockoutMode::None, |state| state.mode_at(self.clock.now()))
    }

    /// Time until a timed lockout expires.
    pub fn remaining(&self, user: UserId) -> Option<Duration> {
        let until = self.states.get(&user)?.lockout_until?;
        (until - self.clock.now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Clear all lockout state for `user`.
    pub fn clear(&mut self, user: UserId) {
        if self.states.remove(&user).is_some() {
            info!("Lockout cleared for user {}", user);
        }
    }

    /// Mirror a lockout the hardware applied on its own.
    pub fn apply_hardware_lockout(&mut self, user: UserId, lockout: HardwareLockout) {
        let now = self.clock.now();
        let hardware_enforced = self.hardware_enforced;
        let state = self.states.entry(user).or_insert_with(|| LockoutState {
            hardware_enforced,
            ..LockoutState::default()
        });
        match lockout {
            HardwareLockout::Permanent => state.permanent = true,
            HardwareLockout::Timed(duration) => {
                let until = now
                    .checked_add_signed(TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                state.lockout_until = Some(state.lockout_until.map_or(until, |u| u.max(until)));
                state.timed_lockouts = state.timed_lockouts.saturating_add(1);
            }
        }
        info!("Hardware lockout for user {}: {:?}", user, lockout);
    }

    pub fn state(&self, user: UserId) -> Option<&LockoutState> {
        self.states.get(&user)
    }

    /// Users with any lockout bookkeeping.
    pub fn tracked_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.states.keys().copied()
    }
}
