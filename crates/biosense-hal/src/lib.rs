//! Hardware abstraction layer boundary for the biosense sensor scheduler.
//!
//! This crate defines the contract between the scheduling core and a
//! biometric sensor HAL, plus a controllable mock implementation.
//!
//! # Design Philosophy
//!
//! - **Fire-and-forget**: session requests return immediately. Outcomes
//!   arrive later as [`HalEvent`]s on the coordinator's channel.
//! - **Explicit routing**: every callback carries the [`SessionId`] of the
//!   session that produced it and the [`OperationId`] it concerns, so stale
//!   callbacks can be recognized.
//! - **Injected, not looked up**: the coordinator receives an
//!   `Arc<dyn SensorHal>` at construction time.
//! - **Thread-safe**: [`SensorHal`] is `Send + Sync` and [`HalSession`] is
//!   `Send`, so HAL callbacks may originate on any thread.
//!
//! # Opening a Session
//!
//! ```
//! use biosense_core::{OperationId, SensorId, SessionId, UserId};
//! use biosense_hal::mock::MockHal;
//! use biosense_hal::{HalCallback, HalEvent, HalMessage, SensorHal};
//!
//! let (hal, handle) = MockHal::new();
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let session_id = SessionId::new();
//!
//! let mut opened = hal
//!     .open_session(SensorId(0), UserId::new(0).unwrap(), HalCallback::new(session_id, tx))
//!     .unwrap();
//! opened.session.detect_interaction(OperationId(1)).unwrap();
//!
//! // The HAL reports back asynchronously.
//! handle.emit(Some(OperationId(1)), HalEvent::InteractionDetected);
//! assert!(matches!(rx.try_recv().unwrap(), HalMessage::Event { session, .. } if session == session_id));
//! ```
//!
//! # Error Handling
//!
//! Synchronous failures to issue a request use [`HalError`]. Failures of an
//! issued request are reported as [`HalEvent::Error`] with an
//! [`ErrorCode`](biosense_core::ErrorCode).
//!
//! [`SessionId`]: biosense_core::SessionId
//! [`OperationId`]: biosense_core::OperationId

pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{HalError, Result};
pub use traits::{HalSession, OpenedSession, SensorHal};
pub use types::{HalCallback, HalEvent, HalEventReceiver, HalEventSender, HalMessage};
