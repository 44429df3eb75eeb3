//! Per-sensor coordinator.
//!
//! A [`SensorCoordinator`] owns everything about one sensor: the operation
//! scheduler, the hardware session, lockout tracking and cached per-user
//! data. All of it is mutated from a single task. Client commands arrive on
//! a bounded channel from [`SensorHandle`]s and HAL callbacks on an
//! unbounded channel; the task handles one message at a time, so no state
//! is shared and nothing is locked.
//!
//! The coordinator can also be driven synchronously, which is how most of
//! the unit tests exercise it:
//!
//! ```
//! use biosense_core::{SensorId, SensorProperties, UserHandle, UserId};
//! use biosense_hal::HalEvent;
//! use biosense_hal::mock::MockHal;
//! use biosense_scheduler::{OperationOutcome, OperationRequest, SensorCoordinator};
//! use std::sync::Arc;
//!
//! let (hal, handle) = MockHal::new();
//! let mut coordinator = SensorCoordinator::builder(SensorProperties::new(SensorId(0)), Arc::new(hal))
//!     .build()
//!     .unwrap();
//!
//! let mut ticket = coordinator
//!     .handle_client_request(OperationRequest::detect(UserHandle::Current))
//!     .unwrap();
//! handle.emit(Some(ticket.id()), HalEvent::InteractionDetected);
//! coordinator.process_hal_events();
//!
//! assert_eq!(ticket.try_outcome(), Some(Ok(OperationOutcome::InteractionDetected)));
//! assert_eq!(coordinator.session_for_user(UserId::new(0).unwrap()).unwrap().user.as_i32(), 0);
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::{ResetPolicy, SensorConfig};
use crate::error::{OperationError, Result, SchedulerError};
use crate::handle::{Command, SensorHandle};
use crate::lockout::{HardwareLockout, LockoutMode, LockoutTracker};
use crate::operation::{
    ClientOperation, OperationEvent, OperationKind, OperationOutcome, OperationRequest,
    OperationResult, OperationTicket,
};
use crate::resolver::{StaticUserResolver, UserResolver};
use crate::scheduler::{CancelOutcome, DispatchStatus, DispatchTarget, OperationScheduler};
use crate::session::{CloseStatus, SessionInfo, SessionManager};
use crate::snapshot::{SensorSnapshot, UserSnapshot};
use biosense_core::constants::MIN_USER_ID;
use biosense_core::{ErrorCode, OperationId, SensorProperties, SessionId, UserId};
use biosense_hal::{HalError, HalEvent, HalEventReceiver, HalMessage, SensorHal};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// [`DispatchTarget`] over the session manager, built per dispatch from
/// disjoint borrows of the coordinator.
struct Dispatcher<'a> {
    session: &'a mut SessionManager,
    lockout: &'a mut LockoutTracker,
    enrollments: &'a HashMap<UserId, u32>,
    max_enrollments: u32,
}

impl Dispatcher<'_> {
    fn start_user(&mut self, user: UserId) -> DispatchStatus {
        match self.session.open(user) {
            Ok(info) => DispatchStatus::Completed(Ok(OperationOutcome::UserStarted {
                user,
                interface_version: info.interface_version,
            })),
            Err(_) => DispatchStatus::Completed(Err(OperationError::hw_unavailable())),
        }
    }

    fn issue(&mut self, operation: &ClientOperation) -> DispatchStatus {
        let user = operation.user();
        let Some(session) = self.session.bound_session_mut(user) else {
            error!(
                "Protocol violation: dispatching {} without a session bound to user {}",
                operation, user
            );
            return DispatchStatus::Completed(Err(OperationError::hw_unavailable()));
        };

        let id = operation.id();
        let hal = session.hal();
        let issued = match operation.kind() {
            OperationKind::Enroll { token } => hal.enroll(id, token),
            OperationKind::Authenticate { challenge } => hal.authenticate(id, *challenge),
            OperationKind::Detect => hal.detect_interaction(id),
            OperationKind::Invalidate => hal.invalidate_authenticator_id(id),
            OperationKind::ResetLockout { token } => hal.reset_lockout(id, token),
            OperationKind::GetAuthenticatorId => hal.get_authenticator_id(id),
            OperationKind::Enumerate => hal.enumerate_enrollments(id),
            OperationKind::Remove { enrollment_ids } => hal.remove_enrollments(id, enrollment_ids),
            kind @ (OperationKind::StartUser | OperationKind::StopUser) => {
                Err(HalError::unsupported(kind.name()))
            }
        };

        match issued {
            Ok(()) => DispatchStatus::Pending,
            Err(e) => {
                warn!("HAL rejected {}: {}", operation, e);
                DispatchStatus::Completed(Err(OperationError::hw_unavailable()))
            }
        }
    }
}

impl DispatchTarget for Dispatcher<'_> {
    fn bound_user(&self) -> Option<UserId> {
        self.session.bound_user()
    }

    fn dispatch(&mut self, operation: &ClientOperation) -> DispatchStatus {
        let user = operation.user();
        match operation.kind() {
            OperationKind::StartUser => self.start_user(user),
            OperationKind::StopUser => match self.session.begin_close() {
                CloseStatus::Closing => DispatchStatus::Pending,
                CloseStatus::Closed | CloseStatus::NotOpen => {
                    DispatchStatus::Completed(Ok(OperationOutcome::UserStopped { user }))
                }
            },
            OperationKind::Authenticate { .. } if self.lockout.is_locked_out(user) => {
                let permanent = self.lockout.lockout_mode(user) == LockoutMode::Permanent;
                info!("Rejecting {}: user is locked out", operation);
                DispatchStatus::Completed(Err(OperationError::LockedOut { user, permanent }))
            }
            OperationKind::Enroll { .. }
                if self.enrollments.get(&user).copied().unwrap_or(0) >= self.max_enrollments =>
            {
                info!("Rejecting {}: enrollment limit reached", operation);
                DispatchStatus::Completed(Err(OperationError::hardware(ErrorCode::NoSpace)))
            }
            OperationKind::ResetLockout { .. } if !self.lockout.is_hardware_enforced() => {
                self.lockout.clear(user);
                DispatchStatus::Completed(Ok(OperationOutcome::LockoutReset))
            }
            _ => self.issue(operation),
        }
    }

    fn cancel(&mut self, operation: &ClientOperation) -> bool {
        let Some(session) = self.session.bound_session_mut(operation.user()) else {
            return false;
        };
        match session.hal().cancel(operation.id()) {
            Ok(()) => true,
            Err(e) => {
                warn!("HAL rejected cancel of {}: {}", operation, e);
                false
            }
        }
    }
}

/// Builder for [`SensorCoordinator`].
pub struct CoordinatorBuilder {
    properties: SensorProperties,
    hal: Arc<dyn SensorHal>,
    test_hal: Option<Arc<dyn SensorHal>>,
    config: SensorConfig,
    resolver: Option<Arc<dyn UserResolver>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoordinatorBuilder {
    /// HAL to use while test mode is enabled.
    pub fn with_test_hal(mut self, hal: Arc<dyn SensorHal>) -> Self {
        self.test_hal = Some(hal);
        self
    }

    pub fn with_config(mut self, config: SensorConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a resolver that only knows user 0.
    pub fn with_resolver(mut self, resolver: Arc<dyn UserResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    ///
    /// Returns `SchedulerError::Core` if the configuration is invalid.
    pub fn build(self) -> Result<SensorCoordinator> {
        self.config.validate()?;

        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(StaticUserResolver::new(UserId::new(MIN_USER_ID)?, [])),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let sensor = self.properties.sensor_id;

        let (hal_tx, hal_rx) = mpsc::unbounded_channel();
        let mut session = SessionManager::new(sensor, self.hal, hal_tx);
        if let Some(test_hal) = self.test_hal {
            session = session.with_test_hal(test_hal);
        }

        let lockout = LockoutTracker::new(
            self.config.lockout.clone(),
            self.properties.hardware_enforced_lockout(),
            clock.clone(),
        );

        Ok(SensorCoordinator {
            scheduler: OperationScheduler::new(sensor),
            session,
            lockout,
            resolver,
            clock,
            hal_events: Some(hal_rx),
            authenticator_ids: HashMap::new(),
            enrollments: HashMap::new(),
            invalidations_in_progress: HashSet::new(),
            consecutive_hal_deaths: 0,
            properties: self.properties,
            config: self.config,
        })
    }
}

/// Scheduling, session and lockout state of one sensor.
pub struct SensorCoordinator {
    properties: SensorProperties,
    config: SensorConfig,
    scheduler: OperationScheduler,
    session: SessionManager,
    lockout: LockoutTracker,
    resolver: Arc<dyn UserResolver>,
    clock: Arc<dyn Clock>,
    hal_events: Option<HalEventReceiver>,
    authenticator_ids: HashMap<UserId, u64>,
    enrollments: HashMap<UserId, u32>,
    invalidations_in_progress: HashSet<UserId>,
    consecutive_hal_deaths: u32,
}

impl SensorCoordinator {
    pub fn builder(properties: SensorProperties, hal: Arc<dyn SensorHal>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            properties,
            hal,
            test_hal: None,
            config: SensorConfig::default(),
            resolver: None,
            clock: None,
        }
    }

    pub fn properties(&self) -> &SensorProperties {
        &self.properties
    }

    pub fn scheduler(&self) -> &OperationScheduler {
        &self.scheduler
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn lockout(&self) -> &LockoutTracker {
        &self.lockout
    }

    /// Resolve, wrap and queue a caller request.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::UnknownUser` if the user cannot be resolved
    /// and `SchedulerError::ReservedOperation` for user switches. Nothing is
    /// queued in either case.
    pub fn handle_client_request(&mut self, request: OperationRequest) -> Result<OperationTicket> {
        let OperationRequest {
            user,
            kind,
            error_consumer,
        } = request;

        if kind.is_user_switch() {
            return Err(SchedulerError::ReservedOperation(kind.name()));
        }
        let user = self
            .resolver
            .resolve(user)
            .ok_or(SchedulerError::UnknownUser(user))?;

        if matches!(kind, OperationKind::Invalidate) {
            self.invalidations_in_progress.insert(user);
        }

        let id = self.scheduler.allocate_id();
        let (mut operation, ticket) = ClientOperation::new(id, user, kind);
        if let Some(consumer) = error_consumer {
            operation = operation.with_error_consumer(consumer);
        }
        debug!("Client request {}", operation);

        self.with_target(|scheduler, target| scheduler.submit(operation, target));
        self.after_dispatch();
        Ok(ticket)
    }

    /// Cancel operation `id`, current or queued.
    pub fn cancel(&mut self, id: OperationId) -> CancelOutcome {
        let outcome = self.with_target(|scheduler, target| scheduler.cancel(id, target));
        self.after_dispatch();
        outcome
    }

    pub fn cancel_current(&mut self) -> CancelOutcome {
        let outcome = self.with_target(|scheduler, target| scheduler.cancel_current(target));
        self.after_dispatch();
        outcome
    }

    /// Handle every HAL callback received so far. Returns how many.
    pub fn process_hal_events(&mut self) -> usize {
        let mut processed = 0;
        while let Some(Ok(message)) = self.hal_events.as_mut().map(|rx| rx.try_recv()) {
            self.on_hal_message(message);
            processed += 1;
        }
        processed
    }

    /// Route one HAL callback. Callbacks from sessions that are no longer
    /// live are dropped.
    pub fn on_hal_message(&mut self, message: HalMessage) {
        match message {
            HalMessage::Died { session } => {
                if self.session.is_live(session) {
                    self.on_hardware_died();
                } else {
                    debug!("Ignoring death report for stale session {}", session);
                }
            }
            HalMessage::Event {
                session,
                operation,
                event,
            } => {
                if !self.session.is_live(session) {
                    debug!("Dropping {:?} from stale session {}", event, session);
                    return;
                }
                self.on_hal_event(session, operation, event);
            }
        }
    }

    /// Handle an error reported by the hardware.
    ///
    /// The current operation receives the error and completes. Unrecoverable
    /// errors also close the session and reset the scheduler.
    pub fn on_hardware_error(
        &mut self,
        operation: Option<OperationId>,
        code: ErrorCode,
        vendor_code: i32,
    ) {
        let unrecoverable = code.is_unrecoverable()
            || (code == ErrorCode::Vendor && self.config.is_fatal_vendor_code(vendor_code));
        let current = self.scheduler.current().map(|op| {
            let cancel_error = op.is_cancel_requested().then(|| op.cancel_error().clone());
            (op.id(), cancel_error)
        });

        match (current, operation) {
            (Some((current_id, _)), Some(tagged)) if tagged != current_id => {
                debug!("Error {} for {} arrived after it finished", code, tagged);
            }
            (None, Some(tagged)) => {
                debug!("Error {} for {} arrived after it finished", code, tagged);
            }
            (None, None) => warn!("Error {} reported while idle", code),
            (Some((id, cancel_error)), _) if !unrecoverable => {
                let error = match cancel_error {
                    Some(error) if code == ErrorCode::Canceled => error,
                    _ => OperationError::Hardware { code, vendor_code },
                };
                self.complete_current(id, Err(error));
            }
            (Some(_), _) => {}
        }

        if unrecoverable {
            error!(
                "Unrecoverable error {} (vendor {}) on {}, resetting",
                code, vendor_code, self.properties.sensor_id
            );
            self.session.close_and_drop();
            let failed = self.scheduler.reset(
                OperationError::Hardware { code, vendor_code },
                self.config.reset_policy,
            );
            debug!("Reset failed {} operations", failed);
            self.dispatch_pending();
        }
    }

    /// Handle the death of the HAL serving the live session.
    ///
    /// The session is dropped without being closed; the next operation opens
    /// a new one.
    pub fn on_hardware_died(&mut self) {
        let current = self.scheduler.current().map(ToString::to_string);
        error!(
            "HAL died on {}, sending HW_UNAVAILABLE for {}",
            self.properties.sensor_id,
            current.as_deref().unwrap_or("no operation")
        );

        self.scheduler.record_crash_state(self.clock.now());
        self.session.drop_dead();

        self.consecutive_hal_deaths = self.consecutive_hal_deaths.saturating_add(1);
        let limit = self.config.max_consecutive_hal_deaths;
        let policy = if limit > 0 && self.consecutive_hal_deaths >= limit {
            self.scheduler.record_fatal_state(format!(
                "HAL died {} times without a successful operation",
                self.consecutive_hal_deaths
            ));
            ResetPolicy::FailPending
        } else {
            self.config.reset_policy
        };

        self.scheduler.reset(OperationError::hw_unavailable(), policy);
        self.dispatch_pending();
    }

    /// Update lockout bookkeeping for an authentication attempt and return
    /// the user's resulting lockout mode.
    pub fn on_authentication_result(&mut self, user: UserId, success: bool) -> LockoutMode {
        if success {
            if self.lockout.record_success(user) {
                debug!("Cleared failed attempts for user {}", user);
            }
            self.lockout.lockout_mode(user)
        } else {
            self.lockout.record_failure(user)
        }
    }

    /// Switch between the production and test HAL.
    ///
    /// A change drops the session. The current operation, if any, cannot
    /// finish on the dropped session: a pending user stop completes, anything
    /// else fails with `HW_UNAVAILABLE`. Queued work stays queued and runs on
    /// a session from the newly selected HAL.
    pub fn set_test_mode_enabled(&mut self, enabled: bool) {
        if !self.session.set_test_mode(enabled) {
            debug!("Test mode already {}", enabled);
            return;
        }
        warn!(
            "Test HAL {} on {}",
            if enabled { "enabled" } else { "disabled" },
            self.properties.sensor_id
        );

        self.scheduler.clear_fatal_state();
        self.consecutive_hal_deaths = 0;

        match self.matching_current(None) {
            Some((id, user, OperationKind::StopUser)) => {
                self.complete_current(id, Ok(OperationOutcome::UserStopped { user }));
            }
            Some((id, _, _)) => {
                self.complete_current(id, Err(OperationError::hw_unavailable()));
            }
            None => self.dispatch_pending(),
        }
    }

    pub fn is_locked_out(&self, user: UserId) -> bool {
        self.lockout.is_locked_out(user)
    }

    /// Clear a software lockout without a hardware reset.
    pub fn clear_lockout(&mut self, user: UserId) {
        self.lockout.clear(user);
    }

    /// The session, only if it is bound to `user`.
    pub fn session_for_user(&self, user: UserId) -> Option<SessionInfo> {
        self.session.session_for_user(user)
    }

    pub fn dump_state(&self) -> SensorSnapshot {
        let mut users: BTreeSet<UserId> = self.resolver.users().into_iter().collect();
        users.extend(self.lockout.tracked_users());
        users.extend(self.enrollments.keys().copied());
        users.extend(self.authenticator_ids.keys().copied());

        let users = users
            .into_iter()
            .map(|user| {
                let lockout = self.lockout.state(user);
                UserSnapshot {
                    user,
                    enrollments: self.enrollments.get(&user).copied().unwrap_or(0),
                    authenticator_id: self.authenticator_ids.get(&user).copied(),
                    lockout: self.lockout.lockout_mode(user),
                    failed_attempts: lockout.map_or(0, |s| s.failed_attempts),
                    lockout_until: lockout.and_then(|s| s.lockout_until),
                    invalidation_in_progress: self.invalidations_in_progress.contains(&user),
                }
            })
            .collect();

        SensorSnapshot {
            sensor_id: self.properties.sensor_id,
            test_hal_enabled: self.session.is_test_mode(),
            session_phase: self.session.phase(),
            session: self.session.session_info(),
            current_operation: self.scheduler.current().map(ClientOperation::summary),
            queue_depth: self.scheduler.queue_depth(),
            pending: self.scheduler.pending().map(ClientOperation::summary).collect(),
            recent: self.scheduler.recent().cloned().collect(),
            users,
            reset_lockout_requires_hardware_auth_token: self
                .properties
                .reset_lockout_requires_hardware_auth_token,
            reset_lockout_requires_challenge: self.properties.reset_lockout_requires_challenge,
            crash_state: self.scheduler.crash_state().cloned(),
            fatal_reason: self.scheduler.fatal_reason().map(str::to_string),
            consecutive_hal_deaths: self.consecutive_hal_deaths,
            session_transitions: self.session.transition_count(),
        }
    }

    /// Spawn the coordinator task and return a handle to it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(mut self) -> SensorHandle {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_channel_capacity);
        let sensor = self.properties.sensor_id;
        let hal_events = self.hal_events.take();

        tokio::spawn(async move {
            match hal_events {
                Some(hal_events) => self.run(command_rx, hal_events).await,
                None => error!("Coordinator for {} started without a HAL channel", sensor),
            }
        });

        SensorHandle::new(sensor, command_tx)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut hal_events: HalEventReceiver) {
        info!("Coordinator for {} started", self.properties.sensor_id);

        loop {
            tokio::select! {
                Some(message) = hal_events.recv() => self.on_hal_message(message),
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
            }
        }

        info!("Coordinator for {} stopped", self.properties.sensor_id);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { request, reply } => {
                let _ = reply.send(self.handle_client_request(request));
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            Command::CancelCurrent { reply } => {
                let _ = reply.send(self.cancel_current());
            }
            Command::SetTestHalEnabled { enabled, reply } => {
                self.set_test_mode_enabled(enabled);
                let _ = reply.send(());
            }
            Command::DumpState { reply } => {
                let _ = reply.send(self.dump_state());
            }
            Command::IsLockedOut { user, reply } => {
                let _ = reply.send(self.is_locked_out(user));
            }
            Command::ClearLockout { user, reply } => {
                self.clear_lockout(user);
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    /// Close the session and fail all outstanding work.
    fn shutdown(&mut self) {
        self.session.close_and_drop();
        let failed = self
            .scheduler
            .reset(OperationError::hw_unavailable(), ResetPolicy::FailPending);
        if failed > 0 {
            info!("Shutdown failed {} outstanding operations", failed);
        }
    }

    fn on_hal_event(&mut self, session: SessionId, operation: Option<OperationId>, event: HalEvent) {
        match event {
            HalEvent::SessionClosed => {
                let Some(user) = self.session.on_session_closed(session) else {
                    return;
                };
                match self.matching_current(None) {
                    Some((id, _, OperationKind::StopUser)) => {
                        self.complete_current(id, Ok(OperationOutcome::UserStopped { user }));
                    }
                    Some((id, _, _)) => {
                        warn!("Session for user {} closed under {}", user, id);
                        self.complete_current(id, Err(OperationError::hw_unavailable()));
                    }
                    None => self.dispatch_pending(),
                }
            }
            HalEvent::Error { code, vendor_code } => {
                self.on_hardware_error(operation, code, vendor_code);
            }
            HalEvent::LockoutTimed { duration_ms } => self.on_hardware_lockout(
                operation,
                HardwareLockout::Timed(Duration::from_millis(duration_ms)),
            ),
            HalEvent::LockoutPermanent => {
                self.on_hardware_lockout(operation, HardwareLockout::Permanent);
            }
            HalEvent::LockoutCleared => {
                let Some(user) = self.session.live_user() else {
                    return;
                };
                self.lockout.clear(user);
                if let Some((id, _, OperationKind::ResetLockout { .. })) =
                    self.matching_current(operation)
                {
                    self.complete_current(id, Ok(OperationOutcome::LockoutReset));
                }
            }
            event => self.on_operation_event(operation, event),
        }
    }

    fn on_operation_event(&mut self, operation: Option<OperationId>, event: HalEvent) {
        let Some((id, user, kind)) = self.matching_current(operation) else {
            debug!("Dropping {:?}: no matching operation", event);
            return;
        };

        match (kind, event) {
            (kind, HalEvent::Acquired { info }) if kind.acquires() => {
                self.notify_current(OperationEvent::Acquired(info));
            }
            (
                OperationKind::Enroll { .. },
                HalEvent::EnrollmentProgress {
                    enrollment_id,
                    remaining,
                },
            ) => {
                self.notify_current(OperationEvent::EnrollmentProgress { remaining });
                if remaining == 0 {
                    *self.enrollments.entry(user).or_default() += 1;
                    self.complete_current(id, Ok(OperationOutcome::Enrolled { enrollment_id }));
                }
            }
            (
                OperationKind::Authenticate { .. },
                HalEvent::AuthenticationSucceeded {
                    enrollment_id,
                    token,
                },
            ) => {
                self.on_authentication_result(user, true);
                self.complete_current(
                    id,
                    Ok(OperationOutcome::Authenticated {
                        enrollment_id,
                        token,
                    }),
                );
            }
            (OperationKind::Authenticate { .. }, HalEvent::AuthenticationFailed) => {
                let mode = self.on_authentication_result(user, false);
                let failed_attempts = self.lockout.state(user).map_or(0, |s| s.failed_attempts);
                self.notify_current(OperationEvent::AuthenticationFailed { failed_attempts });
                if mode != LockoutMode::None {
                    self.finish_locked_out(id, user, mode);
                }
            }
            (OperationKind::Detect, HalEvent::InteractionDetected) => {
                self.complete_current(id, Ok(OperationOutcome::InteractionDetected));
            }
            (OperationKind::Enumerate, HalEvent::EnrollmentsEnumerated { enrollment_ids }) => {
                self.enrollments
                    .insert(user, u32::try_from(enrollment_ids.len()).unwrap_or(u32::MAX));
                self.complete_current(id, Ok(OperationOutcome::Enumerated { enrollment_ids }));
            }
            (OperationKind::Remove { .. }, HalEvent::EnrollmentsRemoved { enrollment_ids }) => {
                let removed = u32::try_from(enrollment_ids.len()).unwrap_or(u32::MAX);
                let count = self.enrollments.entry(user).or_default();
                *count = count.saturating_sub(removed);
                self.complete_current(id, Ok(OperationOutcome::Removed { enrollment_ids }));
            }
            (
                OperationKind::GetAuthenticatorId,
                HalEvent::AuthenticatorIdRetrieved { authenticator_id },
            ) => {
                self.authenticator_ids.insert(user, authenticator_id);
                self.complete_current(id, Ok(OperationOutcome::AuthenticatorId { authenticator_id }));
            }
            (
                OperationKind::Invalidate,
                HalEvent::AuthenticatorIdInvalidated {
                    new_authenticator_id,
                },
            ) => {
                self.authenticator_ids.insert(user, new_authenticator_id);
                self.invalidations_in_progress.remove(&user);
                info!("Authenticator id invalidated for user {}", user);
                self.complete_current(
                    id,
                    Ok(OperationOutcome::AuthenticatorIdInvalidated {
                        authenticator_id: new_authenticator_id,
                    }),
                );
            }
            (kind, event) => warn!("Unexpected {:?} during {} {}", event, kind, id),
        }
    }

    fn on_hardware_lockout(&mut self, operation: Option<OperationId>, lockout: HardwareLockout) {
        let Some(user) = self.session.live_user() else {
            return;
        };
        self.lockout.apply_hardware_lockout(user, lockout);

        if let Some((id, _, OperationKind::Authenticate { .. })) = self.matching_current(operation) {
            let permanent = lockout == HardwareLockout::Permanent;
            self.complete_current(id, Err(OperationError::LockedOut { user, permanent }));
        }
    }

    /// Stop an authentication that just locked its user out. It finishes
    /// with `LockedOut` once the hardware acknowledges the cancel.
    fn finish_locked_out(&mut self, id: OperationId, user: UserId, mode: LockoutMode) {
        let error = OperationError::LockedOut {
            user,
            permanent: mode == LockoutMode::Permanent,
        };
        let outcome =
            self.with_target(|scheduler, target| scheduler.cancel_current_with(error, target));
        debug!("Lockout of user {} stopping {}: {:?}", user, id, outcome);
        self.after_dispatch();
    }

    /// The current operation, if `operation` is absent or names it.
    fn matching_current(
        &self,
        operation: Option<OperationId>,
    ) -> Option<(OperationId, UserId, OperationKind)> {
        let current = self.scheduler.current()?;
        match operation {
            Some(id) if id != current.id() => None,
            _ => Some((current.id(), current.user(), current.kind().clone())),
        }
    }

    fn notify_current(&self, event: OperationEvent) {
        if let Some(current) = self.scheduler.current() {
            current.notify(event);
        }
    }

    fn complete_current(&mut self, id: OperationId, result: OperationResult) -> bool {
        if result.is_ok() {
            self.consecutive_hal_deaths = 0;
        } else if let Some((_, user, OperationKind::StopUser)) = self.matching_current(Some(id)) {
            // The close will not be acknowledged; the next start must not wait for it.
            warn!("Stopping user {} failed, dropping the session", user);
            self.session.close_and_drop();
        }
        let completed =
            self.with_target(|scheduler, target| scheduler.on_operation_complete(id, result, target));
        self.after_dispatch();
        completed
    }

    fn dispatch_pending(&mut self) {
        self.with_target(|scheduler, target| scheduler.try_dispatch_next(target));
        self.after_dispatch();
    }

    fn with_target<R>(
        &mut self,
        f: impl FnOnce(&mut OperationScheduler, &mut Dispatcher<'_>) -> R,
    ) -> R {
        let mut target = Dispatcher {
            session: &mut self.session,
            lockout: &mut self.lockout,
            enrollments: &self.enrollments,
            max_enrollments: self.properties.max_enrollments_per_user,
        };
        f(&mut self.scheduler, &mut target)
    }

    /// Follow-up work for sessions opened during the last dispatch.
    fn after_dispatch(&mut self) {
        loop {
            let started = self.session.drain_started_users();
            if started.is_empty() {
                return;
            }

            for user in started {
                if !self.invalidations_in_progress.contains(&user)
                    || self.scheduler.contains(|op| {
                        op.user() == user && matches!(op.kind(), OperationKind::Invalidate)
                    })
                {
                    continue;
                }
                info!("Resuming authenticator id invalidation for user {}", user);
                let id = self.scheduler.allocate_id();
                let operation = ClientOperation::internal(id, user, OperationKind::Invalidate, None);
                self.with_target(|scheduler, target| scheduler.submit(operation, target));
            }
        }
    }
}

impl std::fmt::Debug for SensorCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorCoordinator")
            .field("properties", &self.properties)
            .field("scheduler", &self.scheduler)
            .field("session", &self.session)
            .field("consecutive_hal_deaths", &self.consecutive_hal_deaths)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use biosense_core::constants::HARDWARE_AUTH_TOKEN_LENGTH;
    use biosense_core::{HardwareAuthToken, SensorId, UserHandle};
    use biosense_hal::mock::{HalCall, MockHal, MockHalHandle};

    fn user(id: i32) -> UserId {
        UserId::new(id).unwrap()
    }

    fn token() -> HardwareAuthToken {
        HardwareAuthToken::new(vec![0; HARDWARE_AUTH_TOKEN_LENGTH]).unwrap()
    }

    struct Fixture {
        coordinator: SensorCoordinator,
        mock: MockHalHandle,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with(|builder| builder)
        }

        fn with(configure: impl FnOnce(CoordinatorBuilder) -> CoordinatorBuilder) -> Self {
            let (hal, mock) = MockHal::new();
            let clock = ManualClock::default();
            let resolver = Arc::new(StaticUserResolver::new(user(0), [user(3), user(5)]));
            let builder = SensorCoordinator::builder(SensorProperties::new(SensorId(0)), Arc::new(hal))
                .with_resolver(resolver)
                .with_clock(Arc::new(clock.clone()));
            Self {
                coordinator: configure(builder).build().unwrap(),
                mock,
                clock,
            }
        }

        fn submit(&mut self, request: OperationRequest) -> OperationTicket {
            self.coordinator.handle_client_request(request).unwrap()
        }

        fn emit(&mut self, operation: Option<OperationId>, event: HalEvent) {
            assert!(self.mock.emit(operation, event));
            self.coordinator.process_hal_events();
        }

        fn die(&mut self) {
            assert!(self.mock.die());
            self.coordinator.process_hal_events();
        }

        fn count_calls(&self, predicate: impl Fn(&HalCall) -> bool) -> usize {
            self.mock.calls().iter().filter(|call| predicate(call)).count()
        }
    }

    #[test]
    fn test_rejects_unknown_user_and_reserved_kinds() {
        let mut fixture = Fixture::new();

        assert!(matches!(
            fixture
                .coordinator
                .handle_client_request(OperationRequest::detect(UserHandle::Explicit(42))),
            Err(SchedulerError::UnknownUser(UserHandle::Explicit(42)))
        ));
        assert!(matches!(
            fixture
                .coordinator
                .handle_client_request(OperationRequest::new(user(0), OperationKind::StartUser)),
            Err(SchedulerError::ReservedOperation("start_user"))
        ));
        assert!(fixture.mock.calls().is_empty());
    }

    #[test]
    fn test_failed_attempts_lock_out_and_cancel() {
        let mut fixture = Fixture::new();
        let mut auth = fixture.submit(OperationRequest::authenticate(user(0), 7));

        for attempt in 1..=5 {
            fixture.emit(Some(auth.id()), HalEvent::AuthenticationFailed);
            assert_eq!(
                auth.try_next_event(),
                Some(OperationEvent::AuthenticationFailed {
                    failed_attempts: attempt
                })
            );
        }

        assert_eq!(
            auth.try_outcome(),
            Some(Err(OperationError::LockedOut {
                user: user(0),
                permanent: false
            }))
        );
        assert!(fixture.mock.calls().contains(&HalCall::Cancel {
            operation: auth.id(),
            user: user(0)
        }));
        assert!(fixture.coordinator.is_locked_out(user(0)));
        assert!(fixture.coordinator.scheduler().is_idle());

        // Further attempts are refused without reaching the hardware.
        let mut again = fixture.submit(OperationRequest::authenticate(user(0), 8));
        assert!(matches!(
            again.try_outcome(),
            Some(Err(OperationError::LockedOut { .. }))
        ));
        assert_eq!(
            fixture.count_calls(|call| matches!(call, HalCall::Authenticate { .. })),
            1
        );

        fixture.clock.advance(Duration::from_secs(31));
        assert!(!fixture.coordinator.is_locked_out(user(0)));
    }

    #[test]
    fn test_lockout_holds_sensor_until_cancel_is_acknowledged() {
        let mut fixture = Fixture::new();
        fixture.mock.set_auto_ack_cancel(false);
        let mut auth = fixture.submit(OperationRequest::authenticate(user(0), 7));
        let mut detect = fixture.submit(OperationRequest::detect(user(0)));

        for _ in 0..5 {
            fixture.emit(Some(auth.id()), HalEvent::AuthenticationFailed);
        }

        assert!(auth.try_outcome().is_none());
        let current = fixture.coordinator.scheduler().current().unwrap();
        assert_eq!(current.id(), auth.id());
        assert!(current.is_cancel_requested());
        assert_eq!(
            fixture.count_calls(|call| matches!(call, HalCall::DetectInteraction { .. })),
            0
        );

        fixture.emit(
            Some(auth.id()),
            HalEvent::Error {
                code: ErrorCode::Canceled,
                vendor_code: 0,
            },
        );

        assert_eq!(
            auth.try_outcome(),
            Some(Err(OperationError::LockedOut {
                user: user(0),
                permanent: false
            }))
        );
        assert_eq!(
            fixture.coordinator.scheduler().current().map(ClientOperation::id),
            Some(detect.id())
        );
        assert_eq!(
            fixture.mock.calls().last(),
            Some(&HalCall::DetectInteraction {
                operation: detect.id(),
                user: user(0)
            })
        );
        assert!(detect.try_outcome().is_none());
    }

    #[test]
    fn test_lockout_finishes_at_once_when_cancel_cannot_be_sent() {
        let mut fixture = Fixture::new();
        let mut auth = fixture.submit(OperationRequest::authenticate(user(0), 7));

        for _ in 0..4 {
            fixture.emit(Some(auth.id()), HalEvent::AuthenticationFailed);
        }
        fixture
            .mock
            .fail_next_call(HalError::invalid_state("cancel refused"));
        fixture.emit(Some(auth.id()), HalEvent::AuthenticationFailed);

        assert_eq!(
            auth.try_outcome(),
            Some(Err(OperationError::LockedOut {
                user: user(0),
                permanent: false
            }))
        );
        assert!(fixture.coordinator.scheduler().is_idle());
    }

    #[test]
    fn test_success_clears_failed_attempts() {
        let mut fixture = Fixture::new();
        let mut auth = fixture.submit(OperationRequest::authenticate(user(0), 1));
        fixture.emit(Some(auth.id()), HalEvent::AuthenticationFailed);
        fixture.emit(Some(auth.id()), HalEvent::AuthenticationFailed);

        fixture.emit(
            Some(auth.id()),
            HalEvent::AuthenticationSucceeded {
                enrollment_id: 4,
                token: None,
            },
        );

        assert_eq!(
            auth.try_outcome(),
            Some(Ok(OperationOutcome::Authenticated {
                enrollment_id: 4,
                token: None
            }))
        );
        assert!(fixture.coordinator.lockout().state(user(0)).is_none());
    }

    #[test]
    fn test_hardware_enforced_lockout_needs_hardware_reset() {
        let (hal, mock) = MockHal::new();
        let properties = SensorProperties::new(SensorId(1)).with_hardware_enforced_lockout(true);
        let mut coordinator = SensorCoordinator::builder(properties, Arc::new(hal))
            .build()
            .unwrap();

        let auth = coordinator
            .handle_client_request(OperationRequest::authenticate(user(0), 1))
            .unwrap();
        for _ in 0..5 {
            mock.emit(Some(auth.id()), HalEvent::AuthenticationFailed);
        }
        coordinator.process_hal_events();
        assert!(coordinator.is_locked_out(user(0)));

        let mut reset = coordinator
            .handle_client_request(OperationRequest::reset_lockout(user(0), token()))
            .unwrap();
        assert!(mock.calls().contains(&HalCall::ResetLockout {
            operation: reset.id(),
            user: user(0)
        }));
        assert!(reset.try_outcome().is_none());

        mock.emit(Some(reset.id()), HalEvent::LockoutCleared);
        coordinator.process_hal_events();

        assert_eq!(reset.try_outcome(), Some(Ok(OperationOutcome::LockoutReset)));
        assert!(!coordinator.is_locked_out(user(0)));
    }

    #[test]
    fn test_software_lockout_reset_skips_hardware() {
        let mut fixture = Fixture::new();
        let auth = fixture.submit(OperationRequest::authenticate(user(0), 1));
        for _ in 0..5 {
            fixture.emit(Some(auth.id()), HalEvent::AuthenticationFailed);
        }

        let mut reset = fixture.submit(OperationRequest::reset_lockout(user(0), token()));

        assert_eq!(reset.try_outcome(), Some(Ok(OperationOutcome::LockoutReset)));
        assert!(!fixture.coordinator.is_locked_out(user(0)));
        assert_eq!(
            fixture.count_calls(|call| matches!(call, HalCall::ResetLockout { .. })),
            0
        );
    }

    #[test]
    fn test_hardware_lockout_event_fails_authentication() {
        let mut fixture = Fixture::new();
        let mut auth = fixture.submit(OperationRequest::authenticate(user(0), 1));

        fixture.emit(Some(auth.id()), HalEvent::LockoutPermanent);

        assert_eq!(
            auth.try_outcome(),
            Some(Err(OperationError::LockedOut {
                user: user(0),
                permanent: true
            }))
        );
        assert_eq!(
            fixture.coordinator.lockout().lockout_mode(user(0)),
            LockoutMode::Permanent
        );
    }

    #[test]
    fn test_enrollment_progress_and_limit() {
        let mut fixture = Fixture::new();
        fixture.coordinator.properties.max_enrollments_per_user = 1;

        let mut enroll = fixture.submit(OperationRequest::enroll(user(0), token()));
        fixture.emit(
            Some(enroll.id()),
            HalEvent::Acquired {
                info: biosense_core::AcquiredInfo::Partial,
            },
        );
        fixture.emit(
            Some(enroll.id()),
            HalEvent::EnrollmentProgress {
                enrollment_id: 11,
                remaining: 1,
            },
        );
        assert!(enroll.try_outcome().is_none());
        fixture.emit(
            Some(enroll.id()),
            HalEvent::EnrollmentProgress {
                enrollment_id: 11,
                remaining: 0,
            },
        );

        assert_eq!(
            enroll.try_next_event(),
            Some(OperationEvent::Acquired(biosense_core::AcquiredInfo::Partial))
        );
        assert_eq!(
            enroll.try_outcome(),
            Some(Ok(OperationOutcome::Enrolled { enrollment_id: 11 }))
        );

        let mut second = fixture.submit(OperationRequest::enroll(user(0), token()));
        assert_eq!(
            second.try_outcome(),
            Some(Err(OperationError::hardware(ErrorCode::NoSpace)))
        );
        assert_eq!(
            fixture.count_calls(|call| matches!(call, HalCall::Enroll { .. })),
            1
        );
        assert_eq!(fixture.coordinator.dump_state().user(user(0)).unwrap().enrollments, 1);
    }

    #[test]
    fn test_invalidation_resumes_after_hal_death() {
        let mut fixture = Fixture::new();
        let mut invalidate = fixture.submit(OperationRequest::invalidate(user(0)));
        fixture.die();

        assert_eq!(
            invalidate.try_outcome(),
            Some(Err(OperationError::hw_unavailable()))
        );
        assert!(fixture.coordinator.dump_state().user(user(0)).unwrap().invalidation_in_progress);

        fixture.mock.revive();
        let detect = fixture.submit(OperationRequest::detect(user(0)));
        fixture.emit(Some(detect.id()), HalEvent::InteractionDetected);

        // The resumed invalidation runs after the request that opened the session.
        assert_eq!(
            fixture.count_calls(|call| matches!(call, HalCall::InvalidateAuthenticatorId { .. })),
            2
        );
        fixture.emit(
            None,
            HalEvent::AuthenticatorIdInvalidated {
                new_authenticator_id: 77,
            },
        );

        let snapshot = fixture.coordinator.dump_state();
        let state = snapshot.user(user(0)).unwrap();
        assert_eq!(state.authenticator_id, Some(77));
        assert!(!state.invalidation_in_progress);
        assert!(fixture.coordinator.scheduler().is_idle());
    }

    #[test]
    fn test_hal_death_records_crash_state_and_reopens() {
        let mut fixture = Fixture::new();
        let mut auth = fixture.submit(OperationRequest::authenticate(user(0), 1));

        fixture.die();

        assert_eq!(auth.try_outcome(), Some(Err(OperationError::hw_unavailable())));
        let snapshot = fixture.coordinator.dump_state();
        let crash = snapshot.crash_state.unwrap();
        assert_eq!(crash.current.unwrap().kind, "authenticate");
        assert_eq!(snapshot.session, None);
        assert_eq!(snapshot.consecutive_hal_deaths, 1);

        fixture.mock.revive();
        fixture.mock.clear_calls();
        fixture.submit(OperationRequest::detect(user(0)));

        assert_eq!(fixture.mock.sessions_opened(), 2);
        assert_eq!(
            fixture.mock.calls().first(),
            Some(&HalCall::OpenSession { user: user(0) })
        );
    }

    #[test]
    fn test_repeated_deaths_enter_fatal_state() {
        let mut fixture = Fixture::with(|builder| {
            builder.with_config(SensorConfig {
                max_consecutive_hal_deaths: 2,
                ..SensorConfig::default()
            })
        });

        for _ in 0..2 {
            fixture.submit(OperationRequest::detect(user(0)));
            fixture.die();
            fixture.mock.revive();
        }
        assert!(fixture.coordinator.scheduler().fatal_reason().is_some());

        let opened = fixture.mock.sessions_opened();
        let mut refused = fixture.submit(OperationRequest::detect(user(0)));
        assert_eq!(refused.try_outcome(), Some(Err(OperationError::hw_unavailable())));
        assert_eq!(fixture.mock.sessions_opened(), opened);

        fixture.coordinator.set_test_mode_enabled(true);
        assert!(fixture.coordinator.scheduler().fatal_reason().is_none());
        fixture.submit(OperationRequest::detect(user(0)));
        assert_eq!(fixture.mock.sessions_opened(), opened + 1);
    }

    #[test]
    fn test_fatal_vendor_code_resets_session() {
        let mut fixture = Fixture::with(|builder| {
            builder.with_config(SensorConfig {
                fatal_vendor_codes: vec![99],
                ..SensorConfig::default()
            })
        });
        let mut detect = fixture.submit(OperationRequest::detect(user(0)));
        let mut enumerate = fixture.submit(OperationRequest::enumerate(user(0)));

        assert!(fixture.mock.error(Some(detect.id()), ErrorCode::Vendor, 99));
        fixture.coordinator.process_hal_events();

        assert_eq!(
            detect.try_outcome(),
            Some(Err(OperationError::Hardware {
                code: ErrorCode::Vendor,
                vendor_code: 99
            }))
        );
        assert_eq!(enumerate.try_outcome(), Some(Err(OperationError::hw_unavailable())));
        assert_eq!(fixture.coordinator.session().bound_user(), None);
    }

    #[test]
    fn test_recoverable_error_keeps_session() {
        let mut fixture = Fixture::new();
        let mut detect = fixture.submit(OperationRequest::detect(user(0)));
        let enumerate = fixture.submit(OperationRequest::enumerate(user(0)));

        assert!(fixture.mock.error(Some(detect.id()), ErrorCode::Timeout, 0));
        fixture.coordinator.process_hal_events();

        assert_eq!(
            detect.try_outcome(),
            Some(Err(OperationError::hardware(ErrorCode::Timeout)))
        );
        assert_eq!(fixture.coordinator.session().bound_user(), Some(user(0)));
        assert_eq!(
            fixture.coordinator.scheduler().current().map(ClientOperation::id),
            Some(enumerate.id())
        );
    }

    #[test]
    fn test_stale_callbacks_are_dropped() {
        let mut fixture = Fixture::new();
        let mut detect = fixture.submit(OperationRequest::detect(user(0)));

        fixture.coordinator.on_hal_message(HalMessage::Event {
            session: SessionId::new(),
            operation: Some(detect.id()),
            event: HalEvent::InteractionDetected,
        });
        fixture.coordinator.on_hal_message(HalMessage::Died {
            session: SessionId::new(),
        });
        fixture.emit(Some(OperationId(999)), HalEvent::InteractionDetected);

        assert!(detect.try_outcome().is_none());
        assert_eq!(fixture.coordinator.session().bound_user(), Some(user(0)));
    }

    #[test]
    fn test_spurious_idle_error_is_ignored() {
        let mut fixture = Fixture::new();
        let mut detect = fixture.submit(OperationRequest::detect(user(0)));
        fixture.emit(Some(detect.id()), HalEvent::InteractionDetected);
        assert!(detect.try_outcome().is_some());

        fixture.coordinator.on_hardware_error(None, ErrorCode::Timeout, 0);

        assert_eq!(fixture.coordinator.session().bound_user(), Some(user(0)));
        assert!(fixture.coordinator.scheduler().is_idle());
    }

    #[test]
    fn test_test_mode_toggle_fails_current_and_keeps_queue() {
        let (test_hal, test_mock) = MockHal::with_name("test-hal");
        let mut fixture = Fixture::with(|builder| builder.with_test_hal(Arc::new(test_hal)));
        let mut detect = fixture.submit(OperationRequest::detect(user(0)));
        let mut enumerate = fixture.submit(OperationRequest::enumerate(user(0)));

        fixture.coordinator.set_test_mode_enabled(true);

        assert_eq!(detect.try_outcome(), Some(Err(OperationError::hw_unavailable())));
        assert!(enumerate.try_outcome().is_none());
        assert!(fixture.mock.calls().contains(&HalCall::Close { user: user(0) }));
        assert_eq!(
            test_mock.work_calls(),
            vec![HalCall::EnumerateEnrollments {
                operation: enumerate.id(),
                user: user(0)
            }]
        );
        assert!(fixture.coordinator.dump_state().test_hal_enabled);

        // Same mode again is a no-op.
        fixture.coordinator.set_test_mode_enabled(true);
        assert!(enumerate.try_outcome().is_none());
    }

    #[test]
    fn test_test_mode_toggle_completes_pending_stop() {
        let (test_hal, test_mock) = MockHal::with_name("test-hal");
        let mut fixture = Fixture::with(|builder| builder.with_test_hal(Arc::new(test_hal)));
        fixture.mock.set_auto_ack_close(false);
        let first = fixture.submit(OperationRequest::detect(user(0)));
        let mut second = fixture.submit(OperationRequest::detect(user(5)));
        fixture.emit(Some(first.id()), HalEvent::InteractionDetected);
        assert_eq!(
            fixture.coordinator.scheduler().current().map(|op| op.kind().name()),
            Some("stop_user")
        );

        fixture.coordinator.set_test_mode_enabled(true);

        assert!(second.try_outcome().is_none());
        assert_eq!(
            test_mock.calls(),
            vec![
                HalCall::OpenSession { user: user(5) },
                HalCall::DetectInteraction {
                    operation: second.id(),
                    user: user(5)
                },
            ]
        );
    }

    #[test]
    fn test_cancel_current_is_acknowledged_as_canceled() {
        let mut fixture = Fixture::new();
        let mut detect = fixture.submit(OperationRequest::detect(user(0)));

        assert_eq!(
            fixture.coordinator.cancel(detect.id()),
            CancelOutcome::CancelRequested
        );
        assert!(detect.try_outcome().is_none());
        fixture.coordinator.process_hal_events();

        assert_eq!(detect.try_outcome(), Some(Err(OperationError::Canceled)));
    }

    #[test]
    fn test_dump_state_serializes() {
        let mut fixture = Fixture::new();
        fixture.submit(OperationRequest::detect(user(3)));
        fixture.submit(OperationRequest::enumerate(user(3)));

        let snapshot = fixture.coordinator.dump_state();
        assert_eq!(snapshot.session.as_ref().unwrap().user, user(3));
        assert_eq!(snapshot.queue_depth, 1);
        assert_eq!(snapshot.users.len(), 3);

        let json = snapshot.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["session_phase"], "bound");
        assert_eq!(value["current_operation"]["kind"], "detect");
        assert_eq!(value["pending"][0]["kind"], "enumerate");
    }
}
