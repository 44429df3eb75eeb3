use crate::{
    Result,
    constants::{
        ACQUIRED_GOOD, ACQUIRED_INSUFFICIENT, ACQUIRED_PARTIAL, ACQUIRED_SENSOR_DIRTY,
        ACQUIRED_START, ACQUIRED_TOO_FAST, ACQUIRED_TOO_SLOW,
        DEFAULT_MAX_ENROLLMENTS_PER_USER, ERROR_CANCELED, ERROR_HW_NOT_PRESENT,
        ERROR_HW_UNAVAILABLE, ERROR_LOCKOUT, ERROR_LOCKOUT_PERMANENT, ERROR_NO_ENROLLMENTS,
        ERROR_NO_SPACE, ERROR_TIMEOUT, ERROR_UNABLE_TO_PROCESS, ERROR_UNABLE_TO_REMOVE,
        ERROR_USER_CANCELED, ERROR_VENDOR, HARDWARE_AUTH_TOKEN_LENGTH, MIN_USER_ID,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Concrete device user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(i32);

impl UserId {
    /// Create a new user id with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidUserId` for negative ids, which are reserved
    /// for pseudo-users such as "current" or "null".
    pub fn new(id: i32) -> Result<Self> {
        if id < MIN_USER_ID {
            return Err(Error::InvalidUserId(id));
        }
        Ok(UserId(id))
    }

    #[must_use]
    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id: i32 = s
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid user id: {s}")))?;
        UserId::new(id)
    }
}

/// Caller-supplied reference to a user, resolved to a [`UserId`] by the
/// coordinator before an operation is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserHandle {
    /// The foreground user at the time of resolution.
    Current,
    /// An explicit user id as supplied by the caller. Not yet validated.
    Explicit(i32),
}

impl From<UserId> for UserHandle {
    fn from(user: UserId) -> Self {
        UserHandle::Explicit(user.as_i32())
    }
}

/// Identifier of a physical sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorId(pub u32);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "sensor-{}", self.0)
    }
}

/// Identifier of a scheduled operation, unique per coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Identifier of one opened hardware session.
///
/// Every session gets a fresh id, so callbacks tagged with the id of a
/// closed or dead session can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error reported by the HAL for the in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    HwUnavailable,
    UnableToProcess,
    Timeout,
    NoSpace,
    Canceled,
    UnableToRemove,
    Lockout,
    Vendor,
    LockoutPermanent,
    UserCanceled,
    NoEnrollments,
    HwNotPresent,
}

impl ErrorCode {
    /// Numeric HAL code.
    #[must_use]
    pub fn as_code(&self) -> i32 {
        match self {
            ErrorCode::HwUnavailable => ERROR_HW_UNAVAILABLE,
            ErrorCode::UnableToProcess => ERROR_UNABLE_TO_PROCESS,
            ErrorCode::Timeout => ERROR_TIMEOUT,
            ErrorCode::NoSpace => ERROR_NO_SPACE,
            ErrorCode::Canceled => ERROR_CANCELED,
            ErrorCode::UnableToRemove => ERROR_UNABLE_TO_REMOVE,
            ErrorCode::Lockout => ERROR_LOCKOUT,
            ErrorCode::Vendor => ERROR_VENDOR,
            ErrorCode::LockoutPermanent => ERROR_LOCKOUT_PERMANENT,
            ErrorCode::UserCanceled => ERROR_USER_CANCELED,
            ErrorCode::NoEnrollments => ERROR_NO_ENROLLMENTS,
            ErrorCode::HwNotPresent => ERROR_HW_NOT_PRESENT,
        }
    }

    /// Parse a numeric HAL code.
    ///
    /// # Errors
    /// Returns `Error::InvalidErrorCode` for codes outside the known range.
    pub fn from_code(code: i32) -> Result<Self> {
        let parsed = match code {
            ERROR_HW_UNAVAILABLE => ErrorCode::HwUnavailable,
            ERROR_UNABLE_TO_PROCESS => ErrorCode::UnableToProcess,
            ERROR_TIMEOUT => ErrorCode::Timeout,
            ERROR_NO_SPACE => ErrorCode::NoSpace,
            ERROR_CANCELED => ErrorCode::Canceled,
            ERROR_UNABLE_TO_REMOVE => ErrorCode::UnableToRemove,
            ERROR_LOCKOUT => ErrorCode::Lockout,
            ERROR_VENDOR => ErrorCode::Vendor,
            ERROR_LOCKOUT_PERMANENT => ErrorCode::LockoutPermanent,
            ERROR_USER_CANCELED => ErrorCode::UserCanceled,
            ERROR_NO_ENROLLMENTS => ErrorCode::NoEnrollments,
            ERROR_HW_NOT_PRESENT => ErrorCode::HwNotPresent,
            other => return Err(Error::InvalidErrorCode(other)),
        };
        Ok(parsed)
    }

    /// Whether this error invalidates the hardware session.
    ///
    /// Vendor codes are classified by configuration, not here.
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, ErrorCode::HwUnavailable | ErrorCode::HwNotPresent)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::HwUnavailable => "HW_UNAVAILABLE",
            ErrorCode::UnableToProcess => "UNABLE_TO_PROCESS",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NoSpace => "NO_SPACE",
            ErrorCode::Canceled => "CANCELED",
            ErrorCode::UnableToRemove => "UNABLE_TO_REMOVE",
            ErrorCode::Lockout => "LOCKOUT",
            ErrorCode::Vendor => "VENDOR",
            ErrorCode::LockoutPermanent => "LOCKOUT_PERMANENT",
            ErrorCode::UserCanceled => "USER_CANCELED",
            ErrorCode::NoEnrollments => "NO_ENROLLMENTS",
            ErrorCode::HwNotPresent => "HW_NOT_PRESENT",
        };
        write!(f, "{name}")
    }
}

/// Acquisition feedback reported while a capture is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquiredInfo {
    Good,
    Partial,
    Insufficient,
    SensorDirty,
    TooSlow,
    TooFast,
    Start,
    /// Vendor specific message with the vendor code.
    Vendor(i32),
}

impl AcquiredInfo {
    /// Build from the numeric HAL code and vendor code. Unknown codes are
    /// treated as vendor messages.
    #[must_use]
    pub fn from_code(code: i32, vendor: i32) -> Self {
        match code {
            ACQUIRED_GOOD => AcquiredInfo::Good,
            ACQUIRED_PARTIAL => AcquiredInfo::Partial,
            ACQUIRED_INSUFFICIENT => AcquiredInfo::Insufficient,
            ACQUIRED_SENSOR_DIRTY => AcquiredInfo::SensorDirty,
            ACQUIRED_TOO_SLOW => AcquiredInfo::TooSlow,
            ACQUIRED_TOO_FAST => AcquiredInfo::TooFast,
            ACQUIRED_START => AcquiredInfo::Start,
            _ => AcquiredInfo::Vendor(vendor),
        }
    }
}

/// Opaque hardware auth token produced by a trusted credential check.
///
/// The token bytes are never printed and compare in constant time.
#[derive(Clone, Serialize, Deserialize)]
pub struct HardwareAuthToken(Vec<u8>);

impl HardwareAuthToken {
    /// Wrap a serialized token.
    ///
    /// # Errors
    /// Returns `Error::InvalidAuthToken` if the length does not match
    /// [`HARDWARE_AUTH_TOKEN_LENGTH`].
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != HARDWARE_AUTH_TOKEN_LENGTH {
            return Err(Error::InvalidAuthToken {
                expected: HARDWARE_AUTH_TOKEN_LENGTH,
                actual: bytes.len(),
            });
        }
        Ok(HardwareAuthToken(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for HardwareAuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for HardwareAuthToken {}

impl fmt::Debug for HardwareAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareAuthToken(<{} bytes>)", self.0.len())
    }
}

/// Strength class of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStrength {
    Convenience,
    Weak,
    Strong,
}

/// Physical sensor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Rear,
    UnderDisplayOptical,
    UnderDisplayUltrasonic,
    PowerButton,
}

/// Static properties of one sensor, as reported by the HAL at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorProperties {
    pub sensor_id: SensorId,
    pub strength: SensorStrength,
    pub sensor_type: SensorType,
    pub max_enrollments_per_user: u32,

    /// Unlocking requires a hardware auth token rather than a software reset.
    pub reset_lockout_requires_hardware_auth_token: bool,

    /// Unlocking requires a challenge issued by the HAL.
    pub reset_lockout_requires_challenge: bool,
}

impl SensorProperties {
    /// Properties with defaults for everything but the id.
    #[must_use]
    pub fn new(sensor_id: SensorId) -> Self {
        Self {
            sensor_id,
            strength: SensorStrength::Strong,
            sensor_type: SensorType::Rear,
            max_enrollments_per_user: DEFAULT_MAX_ENROLLMENTS_PER_USER,
            reset_lockout_requires_hardware_auth_token: false,
            reset_lockout_requires_challenge: false,
        }
    }

    #[must_use]
    pub fn with_hardware_enforced_lockout(mut self, enforced: bool) -> Self {
        self.reset_lockout_requires_hardware_auth_token = enforced;
        self
    }

    #[must_use]
    pub fn with_sensor_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = sensor_type;
        self
    }

    /// Whether a successful authentication alone may clear a lockout.
    ///
    /// When either reset property is set, only a hardware-verified reset
    /// clears it.
    #[must_use]
    pub fn hardware_enforced_lockout(&self) -> bool {
        self.reset_lockout_requires_hardware_auth_token || self.reset_lockout_requires_challenge
    }
}
