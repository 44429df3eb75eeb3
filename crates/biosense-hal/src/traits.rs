//! Hardware session interface.
//!
//! These traits are the boundary between the scheduler core and the sensor
//! HAL. A [`SensorHal`] opens one [`HalSession`] per user; the session accepts
//! operation requests and reports their outcome later through the
//! [`HalCallback`] it was opened with.
//!
//! # Fire and Forget
//!
//! Every method returns as soon as the request has been handed to the HAL.
//! `Ok(())` means the request was accepted, not that it succeeded. The outcome
//! arrives as a [`HalEvent`](crate::types::HalEvent) tagged with the
//! [`OperationId`] passed in.
//!
//! # Object Safety
//!
//! Unlike async device traits, these methods are synchronous, so both traits
//! are object-safe and are used as `Arc<dyn SensorHal>` and
//! `Box<dyn HalSession>`. The coordinator receives its HAL this way at
//! construction time rather than looking it up globally.

use crate::error::Result;
use crate::types::HalCallback;
use biosense_core::{HardwareAuthToken, OperationId, SensorId, UserId};

/// A session freshly opened by [`SensorHal::open_session`].
pub struct OpenedSession {
    /// Handle for issuing requests.
    pub session: Box<dyn HalSession>,

    /// Interface version reported by the HAL.
    pub interface_version: u32,
}

impl std::fmt::Debug for OpenedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSession")
            .field("interface_version", &self.interface_version)
            .finish_non_exhaustive()
    }
}

/// Provider of hardware sessions for a sensor.
pub trait SensorHal: Send + Sync {
    /// Instance name, used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Open a session bound to `user`.
    ///
    /// # Errors
    ///
    /// Returns `HalError::SessionOpenFailed` if the HAL refuses the session,
    /// or `HalError::Dead` if the HAL process is gone.
    fn open_session(
        &self,
        sensor: SensorId,
        user: UserId,
        callback: HalCallback,
    ) -> Result<OpenedSession>;
}

/// One open channel to the hardware, bound to one user.
///
/// Every request is tagged with the scheduler's [`OperationId`] so the
/// matching callbacks can be routed to it.
pub trait HalSession: Send {
    /// Start an enrollment.
    fn enroll(&mut self, operation: OperationId, token: &HardwareAuthToken) -> Result<()>;

    /// Start an authentication for `challenge`.
    fn authenticate(&mut self, operation: OperationId, challenge: u64) -> Result<()>;

    /// Wait for any finger on the sensor, without matching.
    fn detect_interaction(&mut self, operation: OperationId) -> Result<()>;

    /// List the user's enrollments.
    fn enumerate_enrollments(&mut self, operation: OperationId) -> Result<()>;

    /// Remove the given enrollments.
    fn remove_enrollments(&mut self, operation: OperationId, enrollment_ids: &[u32])
    -> Result<()>;

    /// Read the current authenticator id.
    fn get_authenticator_id(&mut self, operation: OperationId) -> Result<()>;

    /// Rotate the authenticator id.
    fn invalidate_authenticator_id(&mut self, operation: OperationId) -> Result<()>;

    /// Clear a lockout, verified by `token`.
    fn reset_lockout(&mut self, operation: OperationId, token: &HardwareAuthToken) -> Result<()>;

    /// Ask the HAL to cancel `operation`. Acknowledged by a `Canceled` error.
    fn cancel(&mut self, operation: OperationId) -> Result<()>;

    /// Begin closing. Acknowledged by `SessionClosed`.
    fn close(&mut self) -> Result<()>;
}
