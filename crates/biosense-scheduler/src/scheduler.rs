//! Single-flight FIFO operation scheduler.
//!
//! The scheduler owns a queue of [`ClientOperation`]s and at most one
//! current operation. It never talks to hardware itself: dispatching goes
//! through a [`DispatchTarget`], which the coordinator implements on top of
//! the session manager. Keeping the target behind a trait lets the queueing
//! rules be exercised without a HAL.
//!
//! # Rules
//!
//! - At most one operation is current.
//! - Operations are dispatched in submission order. The only exception is
//!   a user switch, which the scheduler places directly in front of the
//!   operation that needs it.
//! - An operation whose user differs from the bound user is never handed
//!   to the target. A `StopUser` for the bound user (if any) and a
//!   `StartUser` for the new user are queued ahead of it first.
//! - A failed `StartUser` fails the operation that triggered it with
//!   `HW_UNAVAILABLE`; the scheduler then moves on.

use crate::config::ResetPolicy;
use crate::error::OperationError;
use crate::operation::{ClientOperation, OperationKind, OperationResult, OperationSummary};
use biosense_core::{OperationId, SensorId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Completed operations kept for diagnostics.
const MAX_RECENT_OPERATIONS: usize = 20;

/// Result of handing an operation to a [`DispatchTarget`].
#[derive(Debug)]
pub enum DispatchStatus {
    /// The hardware accepted the request; the result arrives later.
    Pending,
    /// The operation finished during dispatch.
    Completed(OperationResult),
}

/// Where the scheduler sends work.
pub trait DispatchTarget {
    /// The user whose session is currently bound, if any.
    fn bound_user(&self) -> Option<UserId>;

    /// Start `operation`.
    fn dispatch(&mut self, operation: &ClientOperation) -> DispatchStatus;

    /// Ask the hardware to stop `operation`. Returns false if the request
    /// could not be issued, in which case no acknowledgement will come.
    fn cancel(&mut self, operation: &ClientOperation) -> bool;
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The current operation was asked to stop; it completes on acknowledgement.
    CancelRequested,
    /// The current operation could not reach the hardware and was finished
    /// as canceled.
    Canceled,
    /// A queued operation was removed and failed with `CANCELED`.
    RemovedFromQueue,
    AlreadyCancelling,
    /// User switches cannot be canceled.
    NotCancellable,
    NotFound,
}

/// Scheduler contents captured when the HAL dies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashState {
    pub recorded_at: DateTime<Utc>,
    pub current: Option<OperationSummary>,
    pub pending: Vec<OperationSummary>,
}

/// A finished operation, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedOperation {
    pub id: OperationId,
    pub user: UserId,
    pub kind: &'static str,
    /// `"ok"` or the error code.
    pub result: String,
}

/// Single-flight FIFO scheduler for one sensor.
#[derive(Debug)]
pub struct OperationScheduler {
    sensor: SensorId,
    queue: VecDeque<ClientOperation>,
    current: Option<ClientOperation>,
    next_id: u64,
    next_sequence: u64,
    interposed_for: Option<OperationId>,
    crash_state: Option<CrashState>,
    fatal: Option<String>,
    recent: VecDeque<CompletedOperation>,
}

impl OperationScheduler {
    pub fn new(sensor: SensorId) -> Self {
        Self {
            sensor,
            queue: VecDeque::new(),
            current: None,
            next_id: 1,
            next_sequence: 0,
            interposed_for: None,
            crash_state: None,
            fatal: None,
            recent: VecDeque::with_capacity(MAX_RECENT_OPERATIONS),
        }
    }

    /// Reserve a fresh operation id.
    pub fn allocate_id(&mut self) -> OperationId {
        let id = OperationId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn current(&self) -> Option<&ClientOperation> {
        self.current.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &ClientOperation> {
        self.queue.iter()
    }

    /// Whether the current or any queued operation matches `predicate`.
    pub fn contains(&self, mut predicate: impl FnMut(&ClientOperation) -> bool) -> bool {
        self.current.iter().chain(self.queue.iter()).any(|op| predicate(op))
    }

    pub fn recent(&self) -> impl Iterator<Item = &CompletedOperation> {
        self.recent.iter()
    }

    /// Queue `operation` and dispatch if idle.
    ///
    /// While the scheduler is in its fatal state the operation is accepted
    /// and immediately failed with `HW_UNAVAILABLE`.
    pub fn submit<T: DispatchTarget + ?Sized>(
        &mut self,
        mut operation: ClientOperation,
        target: &mut T,
    ) -> OperationId {
        let id = operation.id();
        operation.assign_sequence(self.take_sequence());

        if let Some(reason) = self.fatal.clone() {
            warn!(
                "Rejecting {} on {}: scheduler is in fatal state ({})",
                operation, self.sensor, reason
            );
            self.finish(operation, Err(OperationError::hw_unavailable()));
            return id;
        }

        debug!("Queued {} on {} (depth {})", operation, self.sensor, self.queue.len() + 1);
        self.queue.push_back(operation);
        self.try_dispatch_next(target);
        id
    }

    /// Dispatch queued work until an operation is pending or the queue is
    /// empty. Does nothing while an operation is current.
    pub fn try_dispatch_next<T: DispatchTarget + ?Sized>(&mut self, target: &mut T) {
        while self.current.is_none() {
            let Some(head) = self.queue.front() else {
                return;
            };

            if !head.kind().is_user_switch() {
                let bound = target.bound_user();
                let (head_id, head_user) = (head.id(), head.user());
                if bound != Some(head_user) {
                    if self.interposed_for == Some(head_id) {
                        error!(
                            "User switch for {} did not bind user {} (bound: {:?})",
                            head_id, head_user, bound
                        );
                        if let Some(operation) = self.remove_queued(head_id) {
                            self.finish(operation, Err(OperationError::hw_unavailable()));
                        }
                        self.interposed_for = None;
                        continue;
                    }
                    self.interpose_user_switch(bound, head_user, head_id);
                    continue;
                }
                if self.interposed_for == Some(head_id) {
                    self.interposed_for = None;
                }
            }

            let Some(mut operation) = self.queue.pop_front() else {
                return;
            };
            operation.mark_started();
            debug!("Dispatching {} on {}", operation, self.sensor);

            match target.dispatch(&operation) {
                DispatchStatus::Pending => self.current = Some(operation),
                DispatchStatus::Completed(result) => self.finish(operation, result),
            }
        }
    }

    /// Complete the current operation if its id is `id`, then dispatch the
    /// next one. Returns false if `id` is not current.
    pub fn on_operation_complete<T: DispatchTarget + ?Sized>(
        &mut self,
        id: OperationId,
        result: OperationResult,
        target: &mut T,
    ) -> bool {
        match self.current.take() {
            Some(operation) if operation.id() == id => {
                self.finish(operation, result);
                self.try_dispatch_next(target);
                true
            }
            other => {
                debug!("Ignoring completion of {}: not current", id);
                self.current = other;
                false
            }
        }
    }

    /// Cancel operation `id`, wherever it is.
    pub fn cancel<T: DispatchTarget + ?Sized>(
        &mut self,
        id: OperationId,
        target: &mut T,
    ) -> CancelOutcome {
        if self.current.as_ref().is_some_and(|op| op.id() == id) {
            return self.cancel_current(target);
        }

        match self.queue.iter().find(|op| op.id() == id) {
            None => return CancelOutcome::NotFound,
            Some(op) if op.kind().is_user_switch() => return CancelOutcome::NotCancellable,
            Some(_) => {}
        }

        let Some(operation) = self.remove_queued(id) else {
            return CancelOutcome::NotFound;
        };
        info!("Canceled queued {} on {}", operation, self.sensor);
        self.finish(operation, Err(OperationError::Canceled));

        // User switches queued only for this operation are no longer needed.
        self.queue.retain(|op| op.triggered_by() != Some(id));
        if self.interposed_for == Some(id) {
            self.interposed_for = None;
        }
        self.try_dispatch_next(target);
        CancelOutcome::RemovedFromQueue
    }

    /// Cancel the current operation, if any.
    pub fn cancel_current<T: DispatchTarget + ?Sized>(&mut self, target: &mut T) -> CancelOutcome {
        self.cancel_current_with(OperationError::Canceled, target)
    }

    /// Cancel the current operation and finish it with `error` instead of
    /// `CANCELED`. The slot stays occupied until the hardware acknowledges.
    pub fn cancel_current_with<T: DispatchTarget + ?Sized>(
        &mut self,
        error: OperationError,
        target: &mut T,
    ) -> CancelOutcome {
        let Some(operation) = self.current.as_mut() else {
            return CancelOutcome::NotFound;
        };
        if operation.kind().is_user_switch() {
            return CancelOutcome::NotCancellable;
        }
        if operation.is_cancel_requested() {
            return CancelOutcome::AlreadyCancelling;
        }

        operation.mark_cancelling(error);
        let Some(operation) = self.current.as_ref() else {
            return CancelOutcome::NotFound;
        };
        if target.cancel(operation) {
            debug!("Cancel requested for {}", operation);
            return CancelOutcome::CancelRequested;
        }

        warn!("Cancel for {} could not be issued, finishing it", operation);
        let (id, error) = (operation.id(), operation.cancel_error().clone());
        self.on_operation_complete(id, Err(error), target);
        CancelOutcome::Canceled
    }

    /// Fail the current operation with `current_error` and clear the queue
    /// according to `policy`. Returns the number of operations failed.
    ///
    /// Does not dispatch; the caller decides when work may resume.
    pub fn reset(&mut self, current_error: OperationError, policy: ResetPolicy) -> usize {
        let mut failed = 0;
        if let Some(operation) = self.current.take() {
            warn!("Reset on {}: failing current {}", self.sensor, operation);
            self.finish(operation, Err(current_error));
            failed += 1;
        }

        match policy {
            ResetPolicy::FailPending => {
                while let Some(operation) = self.queue.pop_front() {
                    if !operation.kind().is_user_switch() {
                        failed += 1;
                    }
                    self.finish(operation, Err(OperationError::hw_unavailable()));
                }
            }
            ResetPolicy::RetainPending => {
                self.queue.retain(|op| !op.kind().is_user_switch());
                if !self.queue.is_empty() {
                    info!(
                        "Reset on {}: retaining {} queued operations",
                        self.sensor,
                        self.queue.len()
                    );
                }
            }
        }

        self.interposed_for = None;
        failed
    }

    /// Snapshot the queue for the dump.
    pub fn record_crash_state(&mut self, now: DateTime<Utc>) {
        self.crash_state = Some(CrashState {
            recorded_at: now,
            current: self.current.as_ref().map(ClientOperation::summary),
            pending: self.queue.iter().map(ClientOperation::summary).collect(),
        });
    }

    pub fn crash_state(&self) -> Option<&CrashState> {
        self.crash_state.as_ref()
    }

    /// Refuse all further work until [`clear_fatal_state`](Self::clear_fatal_state).
    pub fn record_fatal_state(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("Scheduler on {} entering fatal state: {}", self.sensor, reason);
        self.fatal = Some(reason);
    }

    pub fn clear_fatal_state(&mut self) {
        if self.fatal.take().is_some() {
            info!("Scheduler on {} left fatal state", self.sensor);
        }
    }

    pub fn fatal_reason(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn remove_queued(&mut self, id: OperationId) -> Option<ClientOperation> {
        let position = self.queue.iter().position(|op| op.id() == id)?;
        self.queue.remove(position)
    }

    fn interpose_user_switch(&mut self, bound: Option<UserId>, user: UserId, trigger: OperationId) {
        info!(
            "Switching {} from user {:?} to user {} for {}",
            self.sensor, bound, user, trigger
        );

        let id = self.allocate_id();
        let mut start = ClientOperation::internal(id, user, OperationKind::StartUser, Some(trigger));
        start.assign_sequence(self.take_sequence());
        self.queue.push_front(start);

        if let Some(previous) = bound {
            let id = self.allocate_id();
            let mut stop =
                ClientOperation::internal(id, previous, OperationKind::StopUser, Some(trigger));
            stop.assign_sequence(self.take_sequence());
            self.queue.push_front(stop);
        }
        self.interposed_for = Some(trigger);
    }

    fn finish(&mut self, operation: ClientOperation, result: OperationResult) {
        if matches!(operation.kind(), OperationKind::StartUser)
            && result.is_err()
            && let Some(trigger) = operation.triggered_by()
            && let Some(triggering) = self.remove_queued(trigger)
        {
            warn!(
                "Starting user {} failed, failing {}",
                operation.user(),
                triggering
            );
            if self.interposed_for == Some(trigger) {
                self.interposed_for = None;
            }
            self.finish(triggering, Err(OperationError::hw_unavailable()));
        }

        if self.recent.len() >= MAX_RECENT_OPERATIONS {
            self.recent.pop_front();
        }
        self.recent.push_back(CompletedOperation {
            id: operation.id(),
            user: operation.user(),
            kind: operation.kind().name(),
            result: match &result {
                Ok(_) => "ok".to_string(),
                Err(e) => e.error_code().to_string(),
            },
        });
        debug!("Finished {} on {}", operation, self.sensor);
        operation.complete(result);
    }
}
