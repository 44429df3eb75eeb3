//! Queued units of sensor work.
//!
//! A [`ClientOperation`] is owned by the scheduler from submission until it
//! completes. Completing consumes it: the result is sent to the submitter's
//! [`OperationTicket`] and, for failures, the operation's [`ErrorConsumer`]
//! is invoked. Both happen at most once because the operation is gone
//! afterwards.

use crate::error::OperationError;
use biosense_core::{AcquiredInfo, ErrorCode, HardwareAuthToken, OperationId, UserHandle, UserId};
use serde::Serialize;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// What an operation asks the hardware to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Enroll { token: HardwareAuthToken },
    Authenticate { challenge: u64 },
    Detect,
    Invalidate,
    ResetLockout { token: HardwareAuthToken },
    GetAuthenticatorId,
    Enumerate,
    Remove { enrollment_ids: Vec<u32> },
    /// Open a session for the operation's user. Scheduler generated.
    StartUser,
    /// Close the session of the operation's user. Scheduler generated.
    StopUser,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enroll { .. } => "enroll",
            Self::Authenticate { .. } => "authenticate",
            Self::Detect => "detect",
            Self::Invalidate => "invalidate",
            Self::ResetLockout { .. } => "reset_lockout",
            Self::GetAuthenticatorId => "get_authenticator_id",
            Self::Enumerate => "enumerate",
            Self::Remove { .. } => "remove",
            Self::StartUser => "start_user",
            Self::StopUser => "stop_user",
        }
    }

    /// Whether this kind opens or closes the hardware session.
    pub fn is_user_switch(&self) -> bool {
        matches!(self, Self::StartUser | Self::StopUser)
    }

    /// Whether the hardware reports capture feedback for this kind.
    pub fn acquires(&self) -> bool {
        matches!(
            self,
            Self::Enroll { .. } | Self::Authenticate { .. } | Self::Detect
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Enrolled {
        enrollment_id: u32,
    },
    Authenticated {
        enrollment_id: u32,
        token: Option<HardwareAuthToken>,
    },
    InteractionDetected,
    AuthenticatorIdInvalidated {
        authenticator_id: u64,
    },
    AuthenticatorId {
        authenticator_id: u64,
    },
    Enumerated {
        enrollment_ids: Vec<u32>,
    },
    Removed {
        enrollment_ids: Vec<u32>,
    },
    LockoutReset,
    UserStarted {
        user: UserId,
        interface_version: u32,
    },
    UserStopped {
        user: UserId,
    },
}

pub type OperationResult = std::result::Result<OperationOutcome, OperationError>;

/// Intermediate feedback for a running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationEvent {
    Acquired(AcquiredInfo),
    EnrollmentProgress { remaining: u32 },
    /// A rejected attempt. The authentication keeps running.
    AuthenticationFailed { failed_attempts: u32 },
}

/// Receives the error code of a failed operation.
pub trait ErrorConsumer: Send {
    fn on_error(&mut self, code: ErrorCode, vendor_code: i32);
}

impl<F> ErrorConsumer for F
where
    F: FnMut(ErrorCode, i32) + Send,
{
    fn on_error(&mut self, code: ErrorCode, vendor_code: i32) {
        self(code, vendor_code)
    }
}

/// Lifecycle of an operation while the scheduler owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Queued,
    Started,
    Cancelling,
}

/// Work submitted by a caller.
pub struct OperationRequest {
    pub user: UserHandle,
    pub kind: OperationKind,
    pub error_consumer: Option<Box<dyn ErrorConsumer>>,
}

impl OperationRequest {
    pub fn new(user: impl Into<UserHandle>, kind: OperationKind) -> Self {
        Self {
            user: user.into(),
            kind,
            error_consumer: None,
        }
    }

    pub fn enroll(user: impl Into<UserHandle>, token: HardwareAuthToken) -> Self {
        Self::new(user, OperationKind::Enroll { token })
    }

    pub fn authenticate(user: impl Into<UserHandle>, challenge: u64) -> Self {
        Self::new(user, OperationKind::Authenticate { challenge })
    }

    pub fn detect(user: impl Into<UserHandle>) -> Self {
        Self::new(user, OperationKind::Detect)
    }

    pub fn invalidate(user: impl Into<UserHandle>) -> Self {
        Self::new(user, OperationKind::Invalidate)
    }

    pub fn reset_lockout(user: impl Into<UserHandle>, token: HardwareAuthToken) -> Self {
        Self::new(user, OperationKind::ResetLockout { token })
    }

    pub fn enumerate(user: impl Into<UserHandle>) -> Self {
        Self::new(user, OperationKind::Enumerate)
    }

    pub fn remove(user: impl Into<UserHandle>, enrollment_ids: Vec<u32>) -> Self {
        Self::new(user, OperationKind::Remove { enrollment_ids })
    }

    pub fn get_authenticator_id(user: impl Into<UserHandle>) -> Self {
        Self::new(user, OperationKind::GetAuthenticatorId)
    }

    pub fn with_error_consumer(mut self, consumer: impl ErrorConsumer + 'static) -> Self {
        self.error_consumer = Some(Box::new(consumer));
        self
    }
}

impl fmt::Debug for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRequest")
            .field("user", &self.user)
            .field("kind", &self.kind)
            .field("error_consumer", &self.error_consumer.is_some())
            .finish()
    }
}

/// Serializable view of an operation for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    pub id: OperationId,
    pub user: UserId,
    pub kind: &'static str,
    pub sequence: u64,
    pub state: OperationState,
    pub triggered_by: Option<OperationId>,
}

/// An operation owned by the scheduler.
pub struct ClientOperation {
    id: OperationId,
    user: UserId,
    kind: OperationKind,
    sequence: u64,
    state: OperationState,
    triggered_by: Option<OperationId>,
    reply: Option<oneshot::Sender<OperationResult>>,
    progress: Option<mpsc::UnboundedSender<OperationEvent>>,
    error_consumer: Option<Box<dyn ErrorConsumer>>,
    /// Reported when the hardware acknowledges a cancel.
    cancel_error: OperationError,
}

impl ClientOperation {
    /// Create a caller operation and the ticket its caller keeps.
    pub fn new(id: OperationId, user: UserId, kind: OperationKind) -> (Self, OperationTicket) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let operation = Self {
            reply: Some(reply_tx),
            progress: Some(progress_tx),
            ..Self::internal(id, user, kind, None)
        };
        let ticket = OperationTicket {
            id,
            result: reply_rx,
            progress: progress_rx,
        };
        (operation, ticket)
    }

    /// Create an operation nobody waits on, such as a user switch.
    pub fn internal(
        id: OperationId,
        user: UserId,
        kind: OperationKind,
        triggered_by: Option<OperationId>,
    ) -> Self {
        Self {
            id,
            user,
            kind,
            sequence: 0,
            state: OperationState::Queued,
            triggered_by,
            reply: None,
            progress: None,
            error_consumer: None,
            cancel_error: OperationError::Canceled,
        }
    }

    pub fn with_error_consumer(mut self, consumer: Box<dyn ErrorConsumer>) -> Self {
        self.error_consumer = Some(consumer);
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Position in submission order. Assigned by the scheduler.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// The operation this one was synthesized for.
    pub fn triggered_by(&self) -> Option<OperationId> {
        self.triggered_by
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state == OperationState::Cancelling
    }

    pub(crate) fn assign_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub(crate) fn mark_started(&mut self) {
        self.state = OperationState::Started;
    }

    /// The error the operation finishes with once its cancel is
    /// acknowledged. `CANCELED` unless the cancel had another cause.
    pub fn cancel_error(&self) -> &OperationError {
        &self.cancel_error
    }

    pub(crate) fn mark_cancelling(&mut self, error: OperationError) {
        self.state = OperationState::Cancelling;
        self.cancel_error = error;
    }

    /// Forward intermediate feedback to the submitter, if still listening.
    pub fn notify(&self, event: OperationEvent) {
        if let Some(progress) = &self.progress {
            let _ = progress.send(event);
        }
    }

    /// Finish the operation. Failures reach the error consumer first.
    pub fn complete(mut self, result: OperationResult) {
        if let Err(error) = &result
            && let Some(consumer) = self.error_consumer.as_mut()
        {
            consumer.on_error(error.error_code(), error.vendor_code());
        }
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }

    pub fn summary(&self) -> OperationSummary {
        OperationSummary {
            id: self.id,
            user: self.user,
            kind: self.kind.name(),
            sequence: self.sequence,
            state: self.state,
            triggered_by: self.triggered_by,
        }
    }
}

impl fmt::Debug for ClientOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOperation")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("kind", &self.kind)
            .field("sequence", &self.sequence)
            .field("state", &self.state)
            .field("triggered_by", &self.triggered_by)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ClientOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (user {})", self.id, self.kind, self.user)
    }
}

/// The submitter's end of an operation.
#[derive(Debug)]
pub struct OperationTicket {
    id: OperationId,
    result: oneshot::Receiver<OperationResult>,
    progress: mpsc::UnboundedReceiver<OperationEvent>,
}

impl OperationTicket {
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Wait for the operation to finish.
    pub async fn outcome(self) -> OperationResult {
        self.result.await.unwrap_or(Err(OperationError::Abandoned))
    }

    /// The result, if the operation has finished. Yields the result once.
    pub fn try_outcome(&mut self) -> Option<OperationResult> {
        match self.result.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(OperationError::Abandoned)),
        }
    }

    pub async fn next_event(&mut self) -> Option<OperationEvent> {
        self.progress.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<OperationEvent> {
        self.progress.try_recv().ok()
    }
}
