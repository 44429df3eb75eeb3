//! Property-based tests for scheduler ordering.
//!
//! These tests use proptest to generate random interleavings of
//! submissions, completions and cancellations and verify the scheduler's
//! ordering guarantees hold for all of them.

mod common;

use biosense_core::{OperationId, SensorId, UserId};
use biosense_scheduler::{
    CancelOutcome, ClientOperation, DispatchStatus, DispatchTarget, LockoutPolicy,
    OperationError, OperationKind, OperationOutcome, OperationScheduler, OperationTicket,
};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

/// Session double that binds instantly and tracks hardware work in flight.
#[derive(Debug, Default)]
struct RecordingTarget {
    bound: Option<UserId>,
    in_flight: Option<OperationId>,
    dispatched: Vec<(OperationId, UserId)>,
    violations: Vec<String>,
}

impl DispatchTarget for RecordingTarget {
    fn bound_user(&self) -> Option<UserId> {
        self.bound
    }

    fn dispatch(&mut self, operation: &ClientOperation) -> DispatchStatus {
        let user = operation.user();
        match operation.kind() {
            OperationKind::StopUser => {
                self.bound = None;
                DispatchStatus::Completed(Ok(OperationOutcome::UserStopped { user }))
            }
            OperationKind::StartUser => {
                if self.bound.is_some() {
                    self.violations
                        .push(format!("{} while user {:?} bound", operation, self.bound));
                }
                self.bound = Some(user);
                DispatchStatus::Completed(Ok(OperationOutcome::UserStarted {
                    user,
                    interface_version: 1,
                }))
            }
            _ => {
                if let Some(other) = self.in_flight {
                    self.violations
                        .push(format!("{} dispatched while {} in flight", operation, other));
                }
                if self.bound != Some(user) {
                    self.violations
                        .push(format!("{} dispatched with {:?} bound", operation, self.bound));
                }
                self.in_flight = Some(operation.id());
                self.dispatched.push((operation.id(), user));
                DispatchStatus::Pending
            }
        }
    }

    fn cancel(&mut self, _operation: &ClientOperation) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Step {
    Submit(i32),
    Complete,
    CancelQueued(usize),
}

/// Strategy for generating scheduler steps, weighted towards submissions.
fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0i32..4).prop_map(Step::Submit),
        3 => Just(Step::Complete),
        1 => any::<usize>().prop_map(Step::CancelQueued),
    ]
}

fn complete_in_flight(scheduler: &mut OperationScheduler, target: &mut RecordingTarget) -> bool {
    match target.in_flight.take() {
        Some(id) => {
            assert!(scheduler.on_operation_complete(
                id,
                Ok(OperationOutcome::InteractionDetected),
                target
            ));
            true
        }
        None => false,
    }
}

proptest! {
    /// Property: hardware sees one operation at a time, always on a session
    /// bound to that operation's user, in global submission order.
    #[test]
    fn prop_single_flight_fifo_with_switches(steps in prop::collection::vec(step(), 1..60)) {
        let mut scheduler = OperationScheduler::new(SensorId(0));
        let mut target = RecordingTarget::default();
        let mut submitted: Vec<(OperationId, UserId)> = Vec::new();
        let mut tickets: HashMap<OperationId, OperationTicket> = HashMap::new();
        let mut canceled: HashSet<OperationId> = HashSet::new();

        for step in steps {
            match step {
                Step::Submit(id) => {
                    let user = common::user(id);
                    let op_id = scheduler.allocate_id();
                    let (operation, ticket) =
                        ClientOperation::new(op_id, user, OperationKind::Detect);
                    scheduler.submit(operation, &mut target);
                    submitted.push((op_id, user));
                    tickets.insert(op_id, ticket);
                }
                Step::Complete => {
                    complete_in_flight(&mut scheduler, &mut target);
                }
                Step::CancelQueued(pick) => {
                    let queued: Vec<OperationId> = scheduler
                        .pending()
                        .filter(|op| !op.kind().is_user_switch())
                        .map(ClientOperation::id)
                        .collect();
                    if !queued.is_empty() {
                        let id = queued[pick % queued.len()];
                        prop_assert_eq!(
                            scheduler.cancel(id, &mut target),
                            CancelOutcome::RemovedFromQueue
                        );
                        canceled.insert(id);
                    }
                }
            }
        }
        while complete_in_flight(&mut scheduler, &mut target) {}

        prop_assert!(scheduler.is_idle());
        prop_assert_eq!(scheduler.queue_depth(), 0);
        prop_assert!(target.violations.is_empty(), "{:?}", target.violations);

        let expected: Vec<(OperationId, UserId)> = submitted
            .iter()
            .copied()
            .filter(|(id, _)| !canceled.contains(id))
            .collect();
        prop_assert_eq!(&target.dispatched, &expected);

        for id in &canceled {
            let ticket = tickets.get_mut(id).unwrap();
            prop_assert_eq!(ticket.try_outcome(), Some(Err(OperationError::Canceled)));
        }
        for (id, _) in &expected {
            let ticket = tickets.get_mut(id).unwrap();
            prop_assert_eq!(
                ticket.try_outcome(),
                Some(Ok(OperationOutcome::InteractionDetected))
            );
        }
    }

    /// Property: a lockout starts exactly at the threshold and never gets
    /// shorter as failures accumulate.
    #[test]
    fn prop_lockout_duration_is_monotonic(failures in 0u32..200) {
        let policy = LockoutPolicy::escalating();

        prop_assert_eq!(policy.is_locked(failures), failures >= policy.threshold);
        prop_assert_eq!(
            policy.lockout_duration(failures).is_some(),
            failures >= policy.threshold
        );
        if let (Some(now), Some(next)) = (
            policy.lockout_duration(failures),
            policy.lockout_duration(failures + 1),
        ) {
            prop_assert!(next >= now);
        }
    }
}
