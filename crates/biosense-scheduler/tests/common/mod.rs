//! Common test utilities for coordinator integration tests.
//!
//! Every helper builds on the mock HAL from `biosense_hal::mock`, so tests
//! can drive the coordinator end to end without hardware.
//!
//! # Usage
//!
//! ```ignore
//! let harness = common::start_coordinator();
//! let ticket = harness.handle.detect(common::user(0)).await.unwrap();
//! common::wait_for_call(&harness.mock, |call| matches!(call, HalCall::DetectInteraction { .. })).await;
//! ```

#![allow(dead_code)]

use biosense_core::constants::HARDWARE_AUTH_TOKEN_LENGTH;
use biosense_core::{ErrorCode, HardwareAuthToken, SensorId, SensorProperties, UserId};
use biosense_hal::mock::{HalCall, MockHal, MockHalHandle};
use biosense_scheduler::{
    OperationResult, OperationTicket, SensorConfig, SensorCoordinator, SensorHandle,
    StaticUserResolver,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound for anything a test waits on.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Users known to every test coordinator. User 0 is the foreground user.
pub const KNOWN_USERS: [i32; 4] = [0, 3, 5, 10];

pub fn user(id: i32) -> UserId {
    UserId::new(id).unwrap()
}

pub fn token() -> HardwareAuthToken {
    HardwareAuthToken::new(vec![0xA5; HARDWARE_AUTH_TOKEN_LENGTH]).unwrap()
}

/// A running coordinator and the mock behind it.
pub struct Harness {
    pub handle: SensorHandle,
    pub mock: MockHalHandle,
    pub resolver: Arc<StaticUserResolver>,
}

/// Build a synchronous coordinator over a fresh mock HAL.
pub fn build_coordinator(config: SensorConfig) -> (SensorCoordinator, MockHalHandle) {
    let (hal, mock) = MockHal::new();
    let coordinator = SensorCoordinator::builder(SensorProperties::new(SensorId(0)), Arc::new(hal))
        .with_config(config)
        .with_resolver(resolver())
        .build()
        .unwrap();
    (coordinator, mock)
}

/// Start a coordinator task with the default configuration.
pub fn start_coordinator() -> Harness {
    start_coordinator_with(SensorConfig::default())
}

pub fn start_coordinator_with(config: SensorConfig) -> Harness {
    let (hal, mock) = MockHal::new();
    let resolver = resolver();
    let handle = SensorCoordinator::builder(SensorProperties::new(SensorId(0)), Arc::new(hal))
        .with_config(config)
        .with_resolver(resolver.clone())
        .build()
        .unwrap()
        .start();
    Harness {
        handle,
        mock,
        resolver,
    }
}

fn resolver() -> Arc<StaticUserResolver> {
    Arc::new(StaticUserResolver::new(
        user(KNOWN_USERS[0]),
        KNOWN_USERS.iter().map(|id| user(*id)),
    ))
}

/// Wait until the mock has received a request matching `predicate`.
///
/// HAL callbacks are handled on the coordinator task, so follow-up requests
/// show up some time after the event that triggers them.
pub async fn wait_for_call(mock: &MockHalHandle, predicate: impl Fn(&HalCall) -> bool) -> HalCall {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Some(call) = mock.calls().into_iter().find(|call| predicate(call)) {
                return call;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for HAL request")
}

pub async fn wait_for_outcome(ticket: OperationTicket) -> OperationResult {
    tokio::time::timeout(WAIT_TIMEOUT, ticket.outcome())
        .await
        .expect("timed out waiting for operation outcome")
}

/// Error consumer that records every error it receives.
pub fn recording_consumer() -> (
    impl FnMut(ErrorCode, i32) + Send + 'static,
    Arc<Mutex<Vec<(ErrorCode, i32)>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let consumer = move |code: ErrorCode, vendor_code: i32| {
        sink.lock().unwrap().push((code, vendor_code));
    };
    (consumer, seen)
}

/// Work requests (no session management) as `(kind, user)` pairs.
pub fn work_summary(mock: &MockHalHandle) -> Vec<(&'static str, i32)> {
    mock.work_calls()
        .iter()
        .map(|call| (call_name(call), call.user().as_i32()))
        .collect()
}

pub fn call_name(call: &HalCall) -> &'static str {
    match call {
        HalCall::OpenSession { .. } => "open",
        HalCall::Enroll { .. } => "enroll",
        HalCall::Authenticate { .. } => "authenticate",
        HalCall::DetectInteraction { .. } => "detect",
        HalCall::EnumerateEnrollments { .. } => "enumerate",
        HalCall::RemoveEnrollments { .. } => "remove",
        HalCall::GetAuthenticatorId { .. } => "get_authenticator_id",
        HalCall::InvalidateAuthenticatorId { .. } => "invalidate",
        HalCall::ResetLockout { .. } => "reset_lockout",
        HalCall::Cancel { .. } => "cancel",
        HalCall::Close { .. } => "close",
    }
}
