use biosense_core::{ErrorCode, UserHandle, UserId};
use thiserror::Error;

/// Failure delivered on an operation's result channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The HAL reported an error, or the session was lost.
    #[error("Hardware error {code} (vendor code {vendor_code})")]
    Hardware { code: ErrorCode, vendor_code: i32 },

    /// The operation was canceled before it produced a result.
    #[error("Operation canceled")]
    Canceled,

    /// The user is locked out of authentication.
    #[error("User {user} is locked out (permanent: {permanent})")]
    LockedOut { user: UserId, permanent: bool },

    /// The coordinator went away without completing the operation.
    #[error("Coordinator stopped before the operation completed")]
    Abandoned,
}

impl OperationError {
    /// The error used whenever the hardware cannot serve the operation.
    pub fn hw_unavailable() -> Self {
        Self::Hardware {
            code: ErrorCode::HwUnavailable,
            vendor_code: 0,
        }
    }

    /// Create a hardware error without a vendor code.
    pub fn hardware(code: ErrorCode) -> Self {
        Self::Hardware {
            code,
            vendor_code: 0,
        }
    }

    /// The HAL error code equivalent to this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Hardware { code, .. } => *code,
            Self::Canceled => ErrorCode::Canceled,
            Self::LockedOut {
                permanent: false, ..
            } => ErrorCode::Lockout,
            Self::LockedOut {
                permanent: true, ..
            } => ErrorCode::LockoutPermanent,
            Self::Abandoned => ErrorCode::HwUnavailable,
        }
    }

    /// The vendor code, or 0 when the failure is not vendor specific.
    pub fn vendor_code(&self) -> i32 {
        match self {
            Self::Hardware { vendor_code, .. } => *vendor_code,
            _ => 0,
        }
    }
}

/// Errors returned synchronously by the coordinator and its handle.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Unknown user: {0:?}")]
    UnknownUser(UserHandle),

    #[error("Operation {0} is reserved for the scheduler")]
    ReservedOperation(&'static str),

    #[error("Coordinator is not running")]
    CoordinatorStopped,

    #[error(transparent)]
    Core(#[from] biosense_core::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
