//! Hardware session lifecycle.
//!
//! At most one hardware session exists per sensor, bound to exactly one
//! user. The [`SessionManager`] owns it and records every phase change.
//!
//! # Phases
//!
//! - `NoSession`: nothing is open
//! - `Opening`: a session is being opened for a user
//! - `Bound`: a session is open and serving its user
//! - `Closing`: close was requested and the HAL has not acknowledged it
//!
//! # Valid Transitions
//!
//! - NoSession → Opening → Bound → Closing → NoSession
//! - Opening → NoSession (open failed)
//! - Bound → NoSession (session lost, or close failed)
//!
//! # Examples
//!
//! ```
//! use biosense_scheduler::session::SessionPhase;
//!
//! assert!(SessionPhase::NoSession.can_transition_to(&SessionPhase::Opening));
//! assert!(!SessionPhase::NoSession.can_transition_to(&SessionPhase::Bound));
//! ```

use biosense_core::{SensorId, SessionId, UserId};
use biosense_hal::{HalCallback, HalError, HalEventSender, HalSession, SensorHal};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Maximum number of phase transitions kept for diagnostics.
const MAX_HISTORY_SIZE: usize = 100;

/// Coarse session phase, without the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NoSession,
    Opening,
    Bound,
    Closing,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            SessionPhase::NoSession => "NoSession",
            SessionPhase::Opening => "Opening",
            SessionPhase::Bound => "Bound",
            SessionPhase::Closing => "Closing",
        };
        write!(f, "{}", phase)
    }
}

impl SessionPhase {
    /// Check if moving to `target` follows the session lifecycle.
    pub fn can_transition_to(&self, target: &SessionPhase) -> bool {
        matches!(
            (self, target),
            (SessionPhase::NoSession, SessionPhase::Opening)
                | (SessionPhase::Opening, SessionPhase::Bound | SessionPhase::NoSession)
                | (SessionPhase::Bound, SessionPhase::Closing | SessionPhase::NoSession)
                | (SessionPhase::Closing, SessionPhase::NoSession)
        )
    }
}

/// A single phase change with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub user: Option<UserId>,

    /// Not serialized; set to the time of deserialization.
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl SessionTransition {
    fn new(from: SessionPhase, to: SessionPhase, user: Option<UserId>) -> Self {
        Self {
            from,
            to,
            user,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Serializable description of an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user: UserId,
    pub interface_version: u32,
    pub hal: String,
}

/// An open hardware session bound to one user.
pub struct HardwareSession {
    id: SessionId,
    user: UserId,
    interface_version: u32,
    hal: String,
    handle: Box<dyn HalSession>,
}

impl HardwareSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn interface_version(&self) -> u32 {
        self.interface_version
    }

    /// The HAL request interface.
    pub fn hal(&mut self) -> &mut dyn HalSession {
        self.handle.as_mut()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            user: self.user,
            interface_version: self.interface_version,
            hal: self.hal.clone(),
        }
    }
}

impl fmt::Debug for HardwareSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareSession")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("interface_version", &self.interface_version)
            .field("hal", &self.hal)
            .finish_non_exhaustive()
    }
}

/// Session state, carrying the session while one exists.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    NoSession,
    Opening {
        user: UserId,
    },
    Bound(HardwareSession),
    Closing(HardwareSession),
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::NoSession => SessionPhase::NoSession,
            SessionState::Opening { .. } => SessionPhase::Opening,
            SessionState::Bound(_) => SessionPhase::Bound,
            SessionState::Closing(_) => SessionPhase::Closing,
        }
    }

    fn user(&self) -> Option<UserId> {
        match self {
            SessionState::NoSession => None,
            SessionState::Opening { user } => Some(*user),
            SessionState::Bound(session) | SessionState::Closing(session) => Some(session.user),
        }
    }
}

/// Result of [`SessionManager::begin_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// Close requested; `SessionClosed` will follow.
    Closing,
    /// The session is gone already.
    Closed,
    /// There was no bound session.
    NotOpen,
}

/// Owner of the sensor's single hardware session.
pub struct SessionManager {
    sensor: SensorId,
    hal: Arc<dyn SensorHal>,
    test_hal: Option<Arc<dyn SensorHal>>,
    test_mode: bool,
    events: HalEventSender,
    state: SessionState,
    history: VecDeque<SessionTransition>,
    transition_count: u64,
    started: Vec<UserId>,
}

impl SessionManager {
    pub fn new(sensor: SensorId, hal: Arc<dyn SensorHal>, events: HalEventSender) -> Self {
        Self {
            sensor,
            hal,
            test_hal: None,
            test_mode: false,
            events,
            state: SessionState::NoSession,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            transition_count: 0,
            started: Vec::new(),
        }
    }

    /// HAL used while test mode is enabled.
    #[must_use]
    pub fn with_test_hal(mut self, hal: Arc<dyn SensorHal>) -> Self {
        self.test_hal = Some(hal);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    /// User of the bound session. `None` while opening or closing.
    pub fn bound_user(&self) -> Option<UserId> {
        match &self.state {
            SessionState::Bound(session) => Some(session.user),
            _ => None,
        }
    }

    /// User of the session that is still allowed to send callbacks.
    pub fn live_user(&self) -> Option<UserId> {
        match &self.state {
            SessionState::Bound(session) | SessionState::Closing(session) => Some(session.user),
            _ => None,
        }
    }

    /// Whether callbacks tagged with `session` should be processed.
    pub fn is_live(&self, session: SessionId) -> bool {
        match &self.state {
            SessionState::Bound(current) | SessionState::Closing(current) => current.id == session,
            _ => false,
        }
    }

    /// The session, only if it is bound to `user`.
    pub fn session_for_user(&self, user: UserId) -> Option<SessionInfo> {
        match &self.state {
            SessionState::Bound(session) if session.user == user => Some(session.info()),
            _ => None,
        }
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        match &self.state {
            SessionState::Bound(session) | SessionState::Closing(session) => Some(session.info()),
            _ => None,
        }
    }

    /// Bound session for request dispatch.
    pub fn bound_session_mut(&mut self, user: UserId) -> Option<&mut HardwareSession> {
        match &mut self.state {
            SessionState::Bound(session) if session.user == user => Some(session),
            _ => None,
        }
    }

    /// Open a session for `user`.
    ///
    /// # Errors
    ///
    /// Returns `HalError::InvalidState` if a session exists already, or the
    /// HAL's error if it refuses the session. The manager is back in
    /// `NoSession` after any error.
    pub fn open(&mut self, user: UserId) -> Result<SessionInfo, HalError> {
        if !matches!(self.state, SessionState::NoSession) {
            return Err(HalError::invalid_state(format!(
                "cannot open a session for user {} while {}",
                user,
                self.phase()
            )));
        }

        self.set_state(SessionState::Opening { user });

        let hal = match (&self.test_hal, self.test_mode) {
            (Some(test_hal), true) => test_hal.clone(),
            _ => self.hal.clone(),
        };
        let id = SessionId::new();
        let callback = HalCallback::new(id, self.events.clone());

        match hal.open_session(self.sensor, user, callback) {
            Ok(opened) => {
                let session = HardwareSession {
                    id,
                    user,
                    interface_version: opened.interface_version,
                    hal: hal.name().to_string(),
                    handle: opened.session,
                };
                let info = session.info();
                info!(
                    "Opened session {} for user {} on {} (interface v{})",
                    id,
                    user,
                    hal.name(),
                    opened.interface_version
                );
                self.set_state(SessionState::Bound(session));
                self.started.push(user);
                Ok(info)
            }
            Err(e) => {
                warn!("Failed to open session for user {}: {}", user, e);
                self.set_state(SessionState::NoSession);
                Err(e)
            }
        }
    }

    /// Ask the bound session to close.
    pub fn begin_close(&mut self) -> CloseStatus {
        match std::mem::take(&mut self.state) {
            SessionState::Bound(mut session) => {
                let user = session.user;
                match session.handle.close() {
                    Ok(()) => {
                        debug!("Closing session {} for user {}", session.id, user);
                        self.record(SessionPhase::Bound, SessionPhase::Closing, Some(user));
                        self.state = SessionState::Closing(session);
                        CloseStatus::Closing
                    }
                    Err(e) => {
                        warn!("Close of session {} failed, dropping it: {}", session.id, e);
                        self.record(SessionPhase::Bound, SessionPhase::NoSession, Some(user));
                        CloseStatus::Closed
                    }
                }
            }
            other => {
                self.state = other;
                CloseStatus::NotOpen
            }
        }
    }

    /// Handle the HAL's close acknowledgement for `session`.
    ///
    /// Returns the user whose session ended, if `session` was live.
    pub fn on_session_closed(&mut self, session: SessionId) -> Option<UserId> {
        if !self.is_live(session) {
            return None;
        }
        let user = self.state.user();
        if self.phase() == SessionPhase::Bound {
            warn!("Session {} closed without a close request", session);
        }
        self.set_state(SessionState::NoSession);
        user
    }

    /// Close the session, if any, and forget it without waiting for the
    /// acknowledgement.
    pub fn close_and_drop(&mut self) {
        match std::mem::take(&mut self.state) {
            SessionState::Bound(mut session) => {
                if let Err(e) = session.handle.close() {
                    debug!("Ignoring close failure for session {}: {}", session.id, e);
                }
                self.record(SessionPhase::Bound, SessionPhase::NoSession, Some(session.user));
            }
            SessionState::Closing(session) => {
                self.record(SessionPhase::Closing, SessionPhase::NoSession, Some(session.user));
            }
            other => self.state = other,
        }
    }

    /// Forget a session whose HAL has died. Nothing is sent to the HAL.
    pub fn drop_dead(&mut self) {
        if let Some(user) = self.live_user() {
            warn!("Dropping session of dead HAL for user {}", user);
        }
        self.set_state(SessionState::NoSession);
    }

    /// Switch between the production and test HAL.
    ///
    /// Returns true if the mode changed, in which case any session has been
    /// closed and dropped.
    pub fn set_test_mode(&mut self, enabled: bool) -> bool {
        if self.test_mode == enabled {
            return false;
        }
        if enabled && self.test_hal.is_none() {
            warn!("Test mode enabled without a test HAL, using {}", self.hal.name());
        }
        self.close_and_drop();
        self.test_mode = enabled;
        true
    }

    /// Users whose session was opened since the last call.
    pub fn drain_started_users(&mut self) -> Vec<UserId> {
        std::mem::take(&mut self.started)
    }

    pub fn history(&self) -> &VecDeque<SessionTransition> {
        &self.history
    }

    /// Total transitions since creation, including those evicted from history.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    fn set_state(&mut self, next: SessionState) {
        let from = self.phase();
        let to = next.phase();
        let user = next.user().or_else(|| self.state.user());
        self.state = next;
        if from == to {
            return;
        }
        self.record(from, to, user);
    }

    fn record(&mut self, from: SessionPhase, to: SessionPhase, user: Option<UserId>) {
        if !from.can_transition_to(&to) {
            error!("Invalid session transition {} -> {} on {}", from, to, self.sensor);
        }
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(SessionTransition::new(from, to, user));
        self.transition_count += 1;
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sensor", &self.sensor)
            .field("hal", &self.hal.name())
            .field("test_mode", &self.test_mode)
            .field("state", &self.state)
            .field("transition_count", &self.transition_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biosense_hal::HalMessage;
    use biosense_hal::mock::{HalCall, MockHal, MockHalHandle};
    use biosense_hal::{HalEvent, HalEventReceiver};
    use tokio::sync::mpsc;

    fn user(id: i32) -> UserId {
        UserId::new(id).unwrap()
    }

    fn manager() -> (SessionManager, MockHalHandle, HalEventReceiver) {
        let (hal, handle) = MockHal::new();
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionManager::new(SensorId(0), Arc::new(hal), tx), handle, rx)
    }

    #[test]
    fn test_phase_transitions() {
        use SessionPhase::*;
        assert!(NoSession.can_transition_to(&Opening));
        assert!(Opening.can_transition_to(&Bound));
        assert!(Opening.can_transition_to(&NoSession));
        assert!(Bound.can_transition_to(&Closing));
        assert!(Bound.can_transition_to(&NoSession));
        assert!(Closing.can_transition_to(&NoSession));

        assert!(!NoSession.can_transition_to(&Bound));
        assert!(!Closing.can_transition_to(&Bound));
        assert!(!Bound.can_transition_to(&Opening));
    }

    #[test]
    fn test_open_binds_user() {
        let (mut manager, handle, _rx) = manager();

        let info = manager.open(user(3)).unwrap();

        assert_eq!(info.user, user(3));
        assert_eq!(info.interface_version, 3);
        assert_eq!(info.hal, "mock-hal");
        assert_eq!(manager.phase(), SessionPhase::Bound);
        assert_eq!(manager.bound_user(), Some(user(3)));
        assert!(manager.is_live(info.id));
        assert_eq!(handle.live_session(), Some(info.id));
        assert_eq!(manager.session_for_user(user(3)), Some(info));
        assert_eq!(manager.session_for_user(user(4)), None);
        assert_eq!(manager.drain_started_users(), vec![user(3)]);
        assert!(manager.drain_started_users().is_empty());
        assert_eq!(manager.history().len(), 2);
    }

    #[test]
    fn test_open_failure_returns_to_no_session() {
        let (mut manager, handle, _rx) = manager();
        handle.fail_next_open(HalError::session_open_failed("busy"));

        assert!(manager.open(user(0)).is_err());
        assert_eq!(manager.phase(), SessionPhase::NoSession);
        assert!(manager.drain_started_users().is_empty());

        let phases: Vec<_> = manager.history().iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            phases,
            vec![
                (SessionPhase::NoSession, SessionPhase::Opening),
                (SessionPhase::Opening, SessionPhase::NoSession),
            ]
        );
    }

    #[test]
    fn test_open_while_bound_is_rejected() {
        let (mut manager, handle, _rx) = manager();
        manager.open(user(0)).unwrap();

        assert!(matches!(
            manager.open(user(1)),
            Err(HalError::InvalidState { .. })
        ));
        assert_eq!(manager.bound_user(), Some(user(0)));
        assert_eq!(handle.sessions_opened(), 1);
    }

    #[test]
    fn test_close_is_acknowledged() {
        let (mut manager, handle, mut rx) = manager();
        let info = manager.open(user(2)).unwrap();

        assert_eq!(manager.begin_close(), CloseStatus::Closing);
        assert_eq!(manager.phase(), SessionPhase::Closing);
        assert_eq!(manager.bound_user(), None);
        assert_eq!(manager.live_user(), Some(user(2)));
        assert!(handle.calls().contains(&HalCall::Close { user: user(2) }));

        let ack = rx.try_recv().unwrap();
        assert_eq!(
            ack,
            HalMessage::Event {
                session: info.id,
                operation: None,
                event: HalEvent::SessionClosed,
            }
        );
        assert_eq!(manager.on_session_closed(info.id), Some(user(2)));
        assert_eq!(manager.phase(), SessionPhase::NoSession);
        assert_eq!(manager.on_session_closed(info.id), None);
    }

    #[test]
    fn test_close_failure_drops_session() {
        let (mut manager, handle, _rx) = manager();
        manager.open(user(2)).unwrap();
        handle.fail_next_call(HalError::remote("close failed"));

        assert_eq!(manager.begin_close(), CloseStatus::Closed);
        assert_eq!(manager.phase(), SessionPhase::NoSession);
        assert_eq!(manager.begin_close(), CloseStatus::NotOpen);
    }

    #[test]
    fn test_stale_close_ack_ignored() {
        let (mut manager, _handle, _rx) = manager();
        manager.open(user(1)).unwrap();

        assert_eq!(manager.on_session_closed(SessionId::new()), None);
        assert_eq!(manager.phase(), SessionPhase::Bound);
    }

    #[test]
    fn test_drop_dead_skips_close() {
        let (mut manager, handle, _rx) = manager();
        manager.open(user(1)).unwrap();
        handle.die();
        handle.clear_calls();

        manager.drop_dead();

        assert_eq!(manager.phase(), SessionPhase::NoSession);
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn test_test_mode_switches_hal() {
        let (hal, handle) = MockHal::new();
        let (test_hal, test_handle) = MockHal::with_name("test-hal");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager =
            SessionManager::new(SensorId(0), Arc::new(hal), tx).with_test_hal(Arc::new(test_hal));
        manager.open(user(0)).unwrap();

        assert!(manager.set_test_mode(true));
        assert!(!manager.set_test_mode(true));
        assert!(manager.is_test_mode());
        assert_eq!(manager.phase(), SessionPhase::NoSession);
        assert!(handle.calls().contains(&HalCall::Close { user: user(0) }));

        let info = manager.open(user(0)).unwrap();
        assert_eq!(info.hal, "test-hal");
        assert_eq!(test_handle.sessions_opened(), 1);
        assert_eq!(handle.sessions_opened(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let (mut manager, _handle, _rx) = manager();
        for _ in 0..60 {
            manager.open(user(0)).unwrap();
            manager.close_and_drop();
        }

        assert_eq!(manager.history().len(), MAX_HISTORY_SIZE);
        assert_eq!(manager.transition_count(), 180);
    }
}
