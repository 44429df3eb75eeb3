//! Callback types flowing from the HAL back to the coordinator.
//!
//! The HAL reports results asynchronously. Every event is wrapped in a
//! [`HalMessage`] that carries the [`SessionId`] of the session it belongs to
//! and, where applicable, the [`OperationId`] of the operation that caused it.
//! The coordinator uses both tags to drop callbacks that belong to a session
//! or operation that is no longer live.

use biosense_core::{AcquiredInfo, ErrorCode, HardwareAuthToken, OperationId, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Asynchronous callback reported by a HAL session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum HalEvent {
    /// Intermediate capture feedback.
    Acquired { info: AcquiredInfo },

    /// One enrollment step finished. `remaining == 0` completes the enrollment.
    EnrollmentProgress { enrollment_id: u32, remaining: u32 },

    /// The presented biometric matched an enrollment.
    AuthenticationSucceeded {
        enrollment_id: u32,
        token: Option<HardwareAuthToken>,
    },

    /// The presented biometric did not match. The operation stays active.
    AuthenticationFailed,

    /// A finger touched the sensor during detect.
    InteractionDetected,

    /// Result of enumerate.
    EnrollmentsEnumerated { enrollment_ids: Vec<u32> },

    /// Result of remove.
    EnrollmentsRemoved { enrollment_ids: Vec<u32> },

    /// Result of get-authenticator-id.
    AuthenticatorIdRetrieved { authenticator_id: u64 },

    /// Result of invalidate-authenticator-id.
    AuthenticatorIdInvalidated { new_authenticator_id: u64 },

    /// The HAL applied a timed lockout.
    LockoutTimed { duration_ms: u64 },

    /// The HAL applied a permanent lockout.
    LockoutPermanent,

    /// The HAL cleared the lockout after a hardware-verified reset.
    LockoutCleared,

    /// The in-flight operation failed, or a cancel was acknowledged.
    Error { code: ErrorCode, vendor_code: i32 },

    /// The session finished closing.
    SessionClosed,
}

/// Envelope delivered on the coordinator's HAL channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalMessage {
    /// A session callback.
    Event {
        session: SessionId,
        operation: Option<OperationId>,
        event: HalEvent,
    },

    /// The HAL process serving `session` terminated.
    Died { session: SessionId },
}

/// Sending half of the coordinator's HAL channel.
pub type HalEventSender = mpsc::UnboundedSender<HalMessage>;

/// Receiving half of the coordinator's HAL channel.
pub type HalEventReceiver = mpsc::UnboundedReceiver<HalMessage>;

/// Back-reference a HAL session uses to route callbacks to its coordinator.
///
/// A callback is bound to one session id for its whole life. Sends never
/// block; if the coordinator is gone the event is dropped.
#[derive(Debug, Clone)]
pub struct HalCallback {
    session: SessionId,
    sender: HalEventSender,
}

impl HalCallback {
    /// Create a callback bound to `session`.
    pub fn new(session: SessionId, sender: HalEventSender) -> Self {
        Self { session, sender }
    }

    /// The session this callback reports for.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Report an event for `operation`.
    pub fn emit(&self, operation: Option<OperationId>, event: HalEvent) {
        let message = HalMessage::Event {
            session: self.session,
            operation,
            event,
        };
        if self.sender.send(message).is_err() {
            tracing::trace!("Coordinator gone, dropping HAL event for {}", self.session);
        }
    }

    /// Report an error for `operation`.
    pub fn error(&self, operation: Option<OperationId>, code: ErrorCode, vendor_code: i32) {
        self.emit(operation, HalEvent::Error { code, vendor_code });
    }

    /// Report that the HAL process died.
    pub fn died(&self) {
        let _ = self.sender.send(HalMessage::Died {
            session: self.session,
        });
    }

    /// Whether the coordinator end of the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
