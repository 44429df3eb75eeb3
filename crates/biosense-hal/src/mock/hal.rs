//! Mock sensor HAL for testing and development.
//!
//! The mock records every request it receives and lets a test inject the
//! asynchronous callbacks a real HAL would send.

use crate::{
    Result,
    error::HalError,
    traits::{HalSession, OpenedSession, SensorHal},
    types::{HalCallback, HalEvent},
};
use biosense_core::{ErrorCode, HardwareAuthToken, OperationId, SensorId, SessionId, UserId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Interface version reported by mock sessions unless overridden.
pub const MOCK_INTERFACE_VERSION: u32 = 3;

/// A request the mock HAL received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalCall {
    OpenSession { user: UserId },
    Enroll { operation: OperationId, user: UserId },
    Authenticate { operation: OperationId, user: UserId, challenge: u64 },
    DetectInteraction { operation: OperationId, user: UserId },
    EnumerateEnrollments { operation: OperationId, user: UserId },
    RemoveEnrollments { operation: OperationId, user: UserId, enrollment_ids: Vec<u32> },
    GetAuthenticatorId { operation: OperationId, user: UserId },
    InvalidateAuthenticatorId { operation: OperationId, user: UserId },
    ResetLockout { operation: OperationId, user: UserId },
    Cancel { operation: OperationId, user: UserId },
    Close { user: UserId },
}

impl HalCall {
    /// The user of the session the request was issued on.
    pub fn user(&self) -> UserId {
        match self {
            HalCall::OpenSession { user }
            | HalCall::Enroll { user, .. }
            | HalCall::Authenticate { user, .. }
            | HalCall::DetectInteraction { user, .. }
            | HalCall::EnumerateEnrollments { user, .. }
            | HalCall::RemoveEnrollments { user, .. }
            | HalCall::GetAuthenticatorId { user, .. }
            | HalCall::InvalidateAuthenticatorId { user, .. }
            | HalCall::ResetLockout { user, .. }
            | HalCall::Cancel { user, .. }
            | HalCall::Close { user } => *user,
        }
    }

    /// The operation the request was issued for, if any.
    pub fn operation(&self) -> Option<OperationId> {
        match self {
            HalCall::OpenSession { .. } | HalCall::Close { .. } => None,
            HalCall::Enroll { operation, .. }
            | HalCall::Authenticate { operation, .. }
            | HalCall::DetectInteraction { operation, .. }
            | HalCall::EnumerateEnrollments { operation, .. }
            | HalCall::RemoveEnrollments { operation, .. }
            | HalCall::GetAuthenticatorId { operation, .. }
            | HalCall::InvalidateAuthenticatorId { operation, .. }
            | HalCall::ResetLockout { operation, .. }
            | HalCall::Cancel { operation, .. } => Some(*operation),
        }
    }

    /// Whether this request is session management rather than user work.
    pub fn is_session_management(&self) -> bool {
        matches!(
            self,
            HalCall::OpenSession { .. } | HalCall::Close { .. } | HalCall::Cancel { .. }
        )
    }
}

#[derive(Debug)]
struct MockState {
    name: String,
    calls: Vec<HalCall>,
    open_failures: VecDeque<HalError>,
    call_failures: VecDeque<HalError>,
    live: Option<HalCallback>,
    /// Session closed while auto-acknowledgement was off.
    closing: Option<HalCallback>,
    sessions_opened: usize,
    interface_version: u32,
    auto_ack_cancel: bool,
    auto_ack_close: bool,
    dead: bool,
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock sensor HAL.
///
/// # Examples
///
/// ```
/// use biosense_core::{SensorId, SessionId, UserId};
/// use biosense_hal::mock::{HalCall, MockHal};
/// use biosense_hal::{HalCallback, SensorHal};
///
/// let (hal, handle) = MockHal::new();
/// let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
/// let user = UserId::new(5).unwrap();
///
/// let opened = hal
///     .open_session(SensorId(1), user, HalCallback::new(SessionId::new(), tx))
///     .unwrap();
/// assert_eq!(opened.interface_version, 3);
/// assert_eq!(handle.calls(), vec![HalCall::OpenSession { user }]);
/// ```
#[derive(Debug, Clone)]
pub struct MockHal {
    name: String,
    state: SharedState,
}

impl MockHal {
    /// Create a new mock HAL with the default name.
    ///
    /// Returns a tuple of (MockHal, MockHalHandle) where the handle injects
    /// callbacks and inspects recorded requests.
    pub fn new() -> (Self, MockHalHandle) {
        Self::with_name("mock-hal")
    }

    /// Create a new mock HAL with a custom instance name.
    pub fn with_name(name: impl Into<String>) -> (Self, MockHalHandle) {
        let name = name.into();
        let state = Arc::new(Mutex::new(MockState {
            name: name.clone(),
            calls: Vec::new(),
            open_failures: VecDeque::new(),
            call_failures: VecDeque::new(),
            live: None,
            closing: None,
            sessions_opened: 0,
            interface_version: MOCK_INTERFACE_VERSION,
            auto_ack_cancel: true,
            auto_ack_close: true,
            dead: false,
        }));

        let hal = Self {
            name,
            state: state.clone(),
        };
        let handle = MockHalHandle { state };

        (hal, handle)
    }
}

impl SensorHal for MockHal {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_session(
        &self,
        _sensor: SensorId,
        user: UserId,
        callback: HalCallback,
    ) -> Result<OpenedSession> {
        let mut state = lock(&self.state);
        state.calls.push(HalCall::OpenSession { user });

        if state.dead {
            return Err(HalError::dead(state.name.clone()));
        }
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }

        state.live = Some(callback.clone());
        state.sessions_opened += 1;
        tracing::debug!(
            "Mock HAL {} opened session {} for user {}",
            state.name,
            callback.session(),
            user
        );

        Ok(OpenedSession {
            session: Box::new(MockSession {
                state: self.state.clone(),
                user,
                callback,
                closed: false,
            }),
            interface_version: state.interface_version,
        })
    }
}

/// Session handed out by [`MockHal`].
#[derive(Debug)]
struct MockSession {
    state: SharedState,
    user: UserId,
    callback: HalCallback,
    closed: bool,
}

impl MockSession {
    fn record(&mut self, call: HalCall) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(call);

        if state.dead {
            return Err(HalError::dead(state.name.clone()));
        }
        if self.closed {
            return Err(HalError::invalid_state("session closed"));
        }
        match state.call_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl HalSession for MockSession {
    fn enroll(&mut self, operation: OperationId, _token: &HardwareAuthToken) -> Result<()> {
        let user = self.user;
        self.record(HalCall::Enroll { operation, user })
    }

    fn authenticate(&mut self, operation: OperationId, challenge: u64) -> Result<()> {
        let user = self.user;
        self.record(HalCall::Authenticate {
            operation,
            user,
            challenge,
        })
    }

    fn detect_interaction(&mut self, operation: OperationId) -> Result<()> {
        let user = self.user;
        self.record(HalCall::DetectInteraction { operation, user })
    }

    fn enumerate_enrollments(&mut self, operation: OperationId) -> Result<()> {
        let user = self.user;
        self.record(HalCall::EnumerateEnrollments { operation, user })
    }

    fn remove_enrollments(
        &mut self,
        operation: OperationId,
        enrollment_ids: &[u32],
    ) -> Result<()> {
        let user = self.user;
        self.record(HalCall::RemoveEnrollments {
            operation,
            user,
            enrollment_ids: enrollment_ids.to_vec(),
        })
    }

    fn get_authenticator_id(&mut self, operation: OperationId) -> Result<()> {
        let user = self.user;
        self.record(HalCall::GetAuthenticatorId { operation, user })
    }

    fn invalidate_authenticator_id(&mut self, operation: OperationId) -> Result<()> {
        let user = self.user;
        self.record(HalCall::InvalidateAuthenticatorId { operation, user })
    }

    fn reset_lockout(&mut self, operation: OperationId, _token: &HardwareAuthToken) -> Result<()> {
        let user = self.user;
        self.record(HalCall::ResetLockout { operation, user })
    }

    fn cancel(&mut self, operation: OperationId) -> Result<()> {
        let user = self.user;
        self.record(HalCall::Cancel { operation, user })?;

        if lock(&self.state).auto_ack_cancel {
            self.callback
                .error(Some(operation), ErrorCode::Canceled, 0);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let user = self.user;
        self.record(HalCall::Close { user })?;
        self.closed = true;

        let mut state = lock(&self.state);
        if state
            .live
            .as_ref()
            .is_some_and(|live| live.session() == self.callback.session())
        {
            state.live = None;
        }
        if state.auto_ack_close {
            self.callback.emit(None, HalEvent::SessionClosed);
        } else {
            state.closing = Some(self.callback.clone());
        }
        Ok(())
    }
}

/// Handle for controlling a [`MockHal`].
///
/// # Examples
///
/// ```
/// use biosense_core::ErrorCode;
/// use biosense_hal::mock::MockHal;
///
/// let (_hal, handle) = MockHal::new();
///
/// // Next open fails, later opens succeed.
/// handle.fail_next_open(biosense_hal::HalError::session_open_failed("busy"));
/// handle.set_auto_ack_cancel(false);
///
/// // No live session yet, so injected events go nowhere.
/// assert!(!handle.error(None, ErrorCode::Timeout, 0));
/// ```
#[derive(Debug, Clone)]
pub struct MockHalHandle {
    state: SharedState,
}

impl MockHalHandle {
    /// All requests received so far, in order.
    pub fn calls(&self) -> Vec<HalCall> {
        lock(&self.state).calls.clone()
    }

    /// Requests excluding session management (open, close, cancel).
    pub fn work_calls(&self) -> Vec<HalCall> {
        self.calls()
            .into_iter()
            .filter(|call| !call.is_session_management())
            .collect()
    }

    /// Forget recorded requests.
    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Number of sessions opened successfully.
    pub fn sessions_opened(&self) -> usize {
        lock(&self.state).sessions_opened
    }

    /// Id of the most recently opened session that has not been closed.
    pub fn live_session(&self) -> Option<SessionId> {
        lock(&self.state).live.as_ref().map(HalCallback::session)
    }

    /// Make the next `open_session` fail with `error`.
    pub fn fail_next_open(&self, error: HalError) {
        lock(&self.state).open_failures.push_back(error);
    }

    /// Make the next session request fail synchronously with `error`.
    pub fn fail_next_call(&self, error: HalError) {
        lock(&self.state).call_failures.push_back(error);
    }

    /// Acknowledge cancel requests with a `Canceled` error automatically.
    pub fn set_auto_ack_cancel(&self, enabled: bool) {
        lock(&self.state).auto_ack_cancel = enabled;
    }

    /// Acknowledge close requests with `SessionClosed` automatically.
    pub fn set_auto_ack_close(&self, enabled: bool) {
        lock(&self.state).auto_ack_close = enabled;
    }

    /// Interface version reported by sessions opened from now on.
    pub fn set_interface_version(&self, version: u32) {
        lock(&self.state).interface_version = version;
    }

    /// Inject `event` on the live session.
    ///
    /// Returns `false` if there is no live session.
    pub fn emit(&self, operation: Option<OperationId>, event: HalEvent) -> bool {
        let live = lock(&self.state).live.clone();
        match live {
            Some(callback) => {
                callback.emit(operation, event);
                true
            }
            None => false,
        }
    }

    /// Inject `event` on the last session closed without acknowledgement.
    ///
    /// Returns `false` if no session has been closed while
    /// [`set_auto_ack_close`](Self::set_auto_ack_close) was off.
    pub fn emit_on_closing(&self, operation: Option<OperationId>, event: HalEvent) -> bool {
        let closing = lock(&self.state).closing.clone();
        match closing {
            Some(callback) => {
                callback.emit(operation, event);
                true
            }
            None => false,
        }
    }

    /// Inject an error on the live session.
    pub fn error(&self, operation: Option<OperationId>, code: ErrorCode, vendor_code: i32) -> bool {
        self.emit(operation, HalEvent::Error { code, vendor_code })
    }

    /// Simulate the HAL process dying.
    ///
    /// Every later request fails with `HalError::Dead` until [`revive`](Self::revive).
    /// Returns `false` if no session was live to report the death.
    pub fn die(&self) -> bool {
        let live = {
            let mut state = lock(&self.state);
            state.dead = true;
            state.live.take()
        };
        match live {
            Some(callback) => {
                callback.died();
                true
            }
            None => false,
        }
    }

    /// Bring the HAL back after [`die`](Self::die).
    pub fn revive(&self) {
        lock(&self.state).dead = false;
    }
}
