//! Scripted scenarios against the mock HAL.
//!
//! Each scenario starts a fresh coordinator, plays the HAL's side of a
//! conversation and reports what every operation returned.

use anyhow::{Context, Result, bail};
use biosense_core::constants::HARDWARE_AUTH_TOKEN_LENGTH;
use biosense_core::{ErrorCode, HardwareAuthToken, OperationId, SensorId, SensorProperties, UserId};
use biosense_hal::HalEvent;
use biosense_hal::mock::{HalCall, MockHal, MockHalHandle};
use biosense_scheduler::{
    OperationRequest, OperationResult, OperationTicket, SensorConfig, SensorCoordinator,
    SensorHandle, SensorSnapshot, StaticUserResolver,
};
use clap::ValueEnum;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long a scenario waits for any single step.
const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Users known to the demo resolver. The first is the foreground user.
const DEMO_USERS: [i32; 3] = [0, 3, 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Same-user requests run in order on one session
    Fifo,
    /// A request for another user stops and starts sessions first
    Switch,
    /// Repeated failed authentications lock the user out
    Lockout,
    /// HW_UNAVAILABLE tears down the session and fails queued work
    Failure,
    /// Cancel a queued request, then the running one
    Cancel,
    /// The HAL dies mid-operation and the next request reopens
    Death,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::Fifo,
        Scenario::Switch,
        Scenario::Lockout,
        Scenario::Failure,
        Scenario::Cancel,
        Scenario::Death,
    ];
}

/// What one operation in a scenario returned.
#[derive(Debug, Serialize)]
pub struct StepResult {
    pub operation: OperationId,
    pub request: &'static str,
    pub result: String,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub scenario: Scenario,
    pub results: Vec<StepResult>,
    pub hal_calls: Vec<String>,
    pub snapshot: SensorSnapshot,
}

/// A coordinator task wired to a mock HAL.
struct Rig {
    handle: SensorHandle,
    mock: MockHalHandle,
    users: Vec<UserId>,
    results: Vec<StepResult>,
}

impl Rig {
    fn start(config: SensorConfig) -> Result<Self> {
        let (hal, mock) = MockHal::with_name("demo-hal");
        let users = DEMO_USERS
            .iter()
            .map(|id| UserId::new(*id))
            .collect::<biosense_core::Result<Vec<_>>>()?;
        let resolver = Arc::new(StaticUserResolver::new(users[0], users.iter().copied()));

        let handle = SensorCoordinator::builder(SensorProperties::new(SensorId(0)), Arc::new(hal))
            .with_config(config)
            .with_resolver(resolver)
            .build()?
            .start();

        Ok(Self {
            handle,
            mock,
            users,
            results: Vec::new(),
        })
    }

    fn user(&self, index: usize) -> UserId {
        self.users[index]
    }

    /// Wait until the HAL has been asked to do the work of `id`.
    async fn wait_for_work(&self, id: OperationId) -> Result<()> {
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                let issued = self
                    .mock
                    .calls()
                    .iter()
                    .any(|call| !call.is_session_management() && call.operation() == Some(id));
                if issued {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .with_context(|| format!("timed out waiting for the HAL to receive {}", id))
    }

    fn emit(&self, id: OperationId, event: HalEvent) -> Result<()> {
        if !self.mock.emit(Some(id), event) {
            bail!("no live session to deliver the event for {}", id);
        }
        Ok(())
    }

    async fn finish(&mut self, request: &'static str, ticket: OperationTicket) -> Result<()> {
        let operation = ticket.id();
        let result = tokio::time::timeout(STEP_TIMEOUT, ticket.outcome())
            .await
            .with_context(|| format!("timed out waiting for {} to finish", operation))?;

        let result = describe(&result);
        info!("{} {} -> {}", request, operation, result);
        self.results.push(StepResult {
            operation,
            request,
            result,
        });
        Ok(())
    }

    async fn report(self, scenario: Scenario) -> Result<Report> {
        let snapshot = self.handle.dump_state().await?;
        self.handle.shutdown().await?;

        Ok(Report {
            scenario,
            results: self.results,
            hal_calls: self.mock.calls().iter().map(describe_call).collect(),
            snapshot,
        })
    }
}

fn describe(result: &OperationResult) -> String {
    match result {
        Ok(outcome) => format!("{:?}", outcome),
        Err(e) => e.to_string(),
    }
}

fn describe_call(call: &HalCall) -> String {
    match call.operation() {
        Some(operation) => format!("{:?} ({})", call, operation),
        None => format!("{:?}", call),
    }
}

fn demo_token() -> Result<HardwareAuthToken> {
    Ok(HardwareAuthToken::new(vec![0; HARDWARE_AUTH_TOKEN_LENGTH])?)
}

/// Run `scenario` on a fresh coordinator.
pub async fn run(scenario: Scenario, config: &SensorConfig) -> Result<Report> {
    debug!("Running scenario {:?}", scenario);
    let mut rig = Rig::start(config.clone())?;

    match scenario {
        Scenario::Fifo => fifo(&mut rig).await?,
        Scenario::Switch => switch(&mut rig).await?,
        Scenario::Lockout => lockout(&mut rig, config.lockout.threshold).await?,
        Scenario::Failure => failure(&mut rig).await?,
        Scenario::Cancel => cancel(&mut rig).await?,
        Scenario::Death => death(&mut rig).await?,
    }

    rig.report(scenario).await
}

async fn fifo(rig: &mut Rig) -> Result<()> {
    let user = rig.user(0);
    let detect = rig.handle.detect(user).await?;
    let enumerate = rig
        .handle
        .submit(OperationRequest::enumerate(user))
        .await?;
    let enumerate_id = enumerate.id();

    rig.wait_for_work(detect.id()).await?;
    rig.emit(detect.id(), HalEvent::InteractionDetected)?;
    rig.finish("detect", detect).await?;

    rig.wait_for_work(enumerate_id).await?;
    rig.emit(
        enumerate_id,
        HalEvent::EnrollmentsEnumerated {
            enrollment_ids: vec![1, 2],
        },
    )?;
    rig.finish("enumerate", enumerate).await
}

async fn switch(rig: &mut Rig) -> Result<()> {
    let detect = rig.handle.detect(rig.user(1)).await?;
    rig.wait_for_work(detect.id()).await?;
    rig.emit(detect.id(), HalEvent::InteractionDetected)?;
    rig.finish("detect", detect).await?;

    let auth = rig.handle.authenticate(rig.user(2), 42).await?;
    rig.wait_for_work(auth.id()).await?;
    rig.emit(
        auth.id(),
        HalEvent::AuthenticationSucceeded {
            enrollment_id: 1,
            token: None,
        },
    )?;
    rig.finish("authenticate", auth).await
}

async fn lockout(rig: &mut Rig, threshold: u32) -> Result<()> {
    let user = rig.user(0);
    let auth = rig.handle.authenticate(user, 1).await?;
    rig.wait_for_work(auth.id()).await?;
    for _ in 0..threshold {
        rig.emit(auth.id(), HalEvent::AuthenticationFailed)?;
    }
    rig.finish("authenticate", auth).await?;

    let retry = rig.handle.authenticate(user, 2).await?;
    rig.finish("authenticate", retry).await
}

async fn failure(rig: &mut Rig) -> Result<()> {
    let user = rig.user(0);
    let enroll = rig.handle.enroll(user, demo_token()?).await?;
    let detect = rig.handle.detect(user).await?;

    rig.wait_for_work(enroll.id()).await?;
    if !rig.mock.error(Some(enroll.id()), ErrorCode::HwUnavailable, 0) {
        bail!("no live session to fail");
    }
    rig.finish("enroll", enroll).await?;
    rig.finish("detect", detect).await
}

async fn cancel(rig: &mut Rig) -> Result<()> {
    let user = rig.user(0);
    let auth = rig.handle.authenticate(user, 7).await?;
    let detect = rig.handle.detect(user).await?;

    let outcome = rig.handle.cancel(detect.id()).await?;
    debug!("Cancel of queued detect: {:?}", outcome);
    rig.finish("detect", detect).await?;

    rig.wait_for_work(auth.id()).await?;
    let outcome = rig.handle.cancel_current().await?;
    debug!("Cancel of running authenticate: {:?}", outcome);
    rig.finish("authenticate", auth).await
}

async fn death(rig: &mut Rig) -> Result<()> {
    let user = rig.user(0);
    let detect = rig.handle.detect(user).await?;
    let enumerate = rig
        .handle
        .submit(OperationRequest::enumerate(user))
        .await?;

    rig.wait_for_work(detect.id()).await?;
    if !rig.mock.die() {
        bail!("no live session to kill");
    }
    rig.finish("detect", detect).await?;
    rig.finish("enumerate", enumerate).await?;

    rig.mock.revive();
    let again = rig.handle.detect(user).await?;
    rig.wait_for_work(again.id()).await?;
    rig.emit(again.id(), HalEvent::InteractionDetected)?;
    rig.finish("detect", again).await
}
