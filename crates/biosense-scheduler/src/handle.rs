//! Cloneable client handle to a running coordinator.

use crate::error::{Result, SchedulerError};
use crate::operation::{OperationRequest, OperationTicket};
use crate::scheduler::CancelOutcome;
use crate::snapshot::SensorSnapshot;
use biosense_core::{HardwareAuthToken, OperationId, SensorId, UserHandle, UserId};
use tokio::sync::{mpsc, oneshot};

/// Message from a [`SensorHandle`] to the coordinator task.
#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        request: OperationRequest,
        reply: oneshot::Sender<Result<OperationTicket>>,
    },
    Cancel {
        id: OperationId,
        reply: oneshot::Sender<CancelOutcome>,
    },
    CancelCurrent {
        reply: oneshot::Sender<CancelOutcome>,
    },
    SetTestHalEnabled {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    DumpState {
        reply: oneshot::Sender<SensorSnapshot>,
    },
    IsLockedOut {
        user: UserId,
        reply: oneshot::Sender<bool>,
    },
    ClearLockout {
        user: UserId,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a coordinator started with
/// [`SensorCoordinator::start`](crate::SensorCoordinator::start).
///
/// Every method returns once the coordinator has accepted the command;
/// operation results arrive on the returned [`OperationTicket`].
///
/// # Examples
///
/// ```
/// use biosense_core::{SensorId, SensorProperties, UserHandle};
/// use biosense_hal::mock::MockHal;
/// use biosense_scheduler::SensorCoordinator;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> biosense_scheduler::Result<()> {
/// let (hal, _mock) = MockHal::new();
/// let handle = SensorCoordinator::builder(SensorProperties::new(SensorId(0)), Arc::new(hal))
///     .build()?
///     .start();
///
/// let ticket = handle.detect(UserHandle::Current).await?;
/// handle.cancel(ticket.id()).await?;
/// assert!(ticket.outcome().await.is_err());
///
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SensorHandle {
    sensor: SensorId,
    commands: mpsc::Sender<Command>,
}

impl SensorHandle {
    pub(crate) fn new(sensor: SensorId, commands: mpsc::Sender<Command>) -> Self {
        Self { sensor, commands }
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor
    }

    /// Whether the coordinator task is gone.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Queue an operation.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::CoordinatorStopped` if the coordinator is not
    /// running, or the coordinator's rejection of the request.
    pub async fn submit(&self, request: OperationRequest) -> Result<OperationTicket> {
        self.request(|reply| Command::Submit { request, reply }).await?
    }

    pub async fn enroll(
        &self,
        user: impl Into<UserHandle>,
        token: HardwareAuthToken,
    ) -> Result<OperationTicket> {
        self.submit(OperationRequest::enroll(user, token)).await
    }

    pub async fn authenticate(
        &self,
        user: impl Into<UserHandle>,
        challenge: u64,
    ) -> Result<OperationTicket> {
        self.submit(OperationRequest::authenticate(user, challenge)).await
    }

    pub async fn detect(&self, user: impl Into<UserHandle>) -> Result<OperationTicket> {
        self.submit(OperationRequest::detect(user)).await
    }

    pub async fn cancel(&self, id: OperationId) -> Result<CancelOutcome> {
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    pub async fn cancel_current(&self) -> Result<CancelOutcome> {
        self.request(|reply| Command::CancelCurrent { reply }).await
    }

    pub async fn set_test_hal_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetTestHalEnabled { enabled, reply })
            .await
    }

    pub async fn dump_state(&self) -> Result<SensorSnapshot> {
        self.request(|reply| Command::DumpState { reply }).await
    }

    pub async fn is_locked_out(&self, user: UserId) -> Result<bool> {
        self.request(|reply| Command::IsLockedOut { user, reply }).await
    }

    pub async fn clear_lockout(&self, user: UserId) -> Result<()> {
        self.request(|reply| Command::ClearLockout { user, reply }).await
    }

    /// Stop the coordinator. Outstanding operations fail with
    /// `HW_UNAVAILABLE`.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SchedulerError::CoordinatorStopped)?;
        response.await.map_err(|_| SchedulerError::CoordinatorStopped)
    }
}
