//! Operation scheduling for a biometric sensor.
//!
//! One [`SensorCoordinator`] per sensor serializes all hardware access: a
//! FIFO of operations with exactly one in flight, transparent user switches
//! between them, lockout tracking, and recovery when the HAL errors out or
//! dies.
//!
//! # Modules
//!
//! - [`scheduler`]: single-flight FIFO with user-switch interposition
//! - [`session`]: hardware session lifecycle
//! - [`lockout`]: failed-attempt counting and lockout policy
//! - [`coordinator`]: the per-sensor state owner and its task
//! - [`handle`]: async client handle to a running coordinator

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod lockout;
pub mod operation;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod snapshot;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ResetPolicy, SensorConfig};
pub use coordinator::{CoordinatorBuilder, SensorCoordinator};
pub use error::{OperationError, Result, SchedulerError};
pub use handle::SensorHandle;
pub use lockout::{HardwareLockout, LockoutMode, LockoutPolicy, LockoutState, LockoutTracker};
pub use operation::{
    ClientOperation, ErrorConsumer, OperationEvent, OperationKind, OperationOutcome,
    OperationRequest, OperationResult, OperationState, OperationSummary, OperationTicket,
};
pub use resolver::{StaticUserResolver, UserResolver};
pub use scheduler::{
    CancelOutcome, CompletedOperation, CrashState, DispatchStatus, DispatchTarget,
    OperationScheduler,
};
pub use session::{SessionInfo, SessionManager, SessionPhase, SessionState};
pub use snapshot::{SensorSnapshot, UserSnapshot};
