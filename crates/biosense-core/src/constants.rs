//! Core constants for the biosense sensor scheduler.
//!
//! This module collects the numeric contracts shared between the scheduler and
//! the hardware abstraction layer: error and acquisition codes reported by the
//! HAL, default lockout thresholds, and sizing limits.
//!
//! # Usage
//!
//! ```
//! use biosense_core::constants::*;
//!
//! assert_eq!(ERROR_HW_UNAVAILABLE, 1);
//! assert!(DEFAULT_LOCKOUT_THRESHOLD > 0);
//! ```
//!
//! # Compatibility
//!
//! The error and acquired codes match the values emitted by fingerprint HAL
//! implementations. Changing them breaks interpretation of vendor callbacks.

// ============================================================================
// Error codes reported by the HAL
// ============================================================================

/// The hardware is unavailable. Unrecoverable: the session must be recreated.
pub const ERROR_HW_UNAVAILABLE: i32 = 1;

/// The sensor could not process the current image.
pub const ERROR_UNABLE_TO_PROCESS: i32 = 2;

/// The current operation ran longer than the HAL allows.
pub const ERROR_TIMEOUT: i32 = 3;

/// No storage left for another enrollment.
pub const ERROR_NO_SPACE: i32 = 4;

/// The operation was canceled, usually in response to a cancel request.
pub const ERROR_CANCELED: i32 = 5;

/// The enrollment could not be removed.
pub const ERROR_UNABLE_TO_REMOVE: i32 = 6;

/// Too many failed attempts, timed lockout in effect.
pub const ERROR_LOCKOUT: i32 = 7;

/// Vendor specific error, see the accompanying vendor code.
pub const ERROR_VENDOR: i32 = 8;

/// Too many failed attempts, a strong credential is required to unlock.
pub const ERROR_LOCKOUT_PERMANENT: i32 = 9;

/// The user canceled the operation.
pub const ERROR_USER_CANCELED: i32 = 10;

/// The user has no enrollments.
pub const ERROR_NO_ENROLLMENTS: i32 = 11;

/// The device has no sensor.
pub const ERROR_HW_NOT_PRESENT: i32 = 12;

// ============================================================================
// Acquisition codes reported by the HAL
// ============================================================================

/// The image acquired was good.
pub const ACQUIRED_GOOD: i32 = 0;

/// Only a partial image was detected.
pub const ACQUIRED_PARTIAL: i32 = 1;

/// The image was too noisy or lacked detail.
pub const ACQUIRED_INSUFFICIENT: i32 = 2;

/// The sensor surface needs cleaning.
pub const ACQUIRED_SENSOR_DIRTY: i32 = 3;

/// The finger moved too slowly.
pub const ACQUIRED_TOO_SLOW: i32 = 4;

/// The finger moved too fast.
pub const ACQUIRED_TOO_FAST: i32 = 5;

/// Vendor specific acquisition message.
pub const ACQUIRED_VENDOR: i32 = 6;

/// The sensor started capturing.
pub const ACQUIRED_START: i32 = 7;

// ============================================================================
// Lockout defaults
// ============================================================================

/// Consecutive failed attempts before the first timed lockout.
pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;

/// Failed attempts after which the lockout becomes permanent.
pub const DEFAULT_PERMANENT_LOCKOUT_THRESHOLD: u32 = 20;

/// Duration of the first timed lockout, in seconds.
pub const DEFAULT_TIMED_LOCKOUT_SECS: u64 = 30;

// ============================================================================
// Sizing
// ============================================================================

/// Size of a serialized hardware auth token in bytes.
pub const HARDWARE_AUTH_TOKEN_LENGTH: usize = 69;

/// Default number of enrollments a single user may hold on one sensor.
pub const DEFAULT_MAX_ENROLLMENTS_PER_USER: u32 = 5;

/// Default capacity of a coordinator's command channel.
pub const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Smallest valid user id.
pub const MIN_USER_ID: i32 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let codes = [
            ERROR_HW_UNAVAILABLE,
            ERROR_UNABLE_TO_PROCESS,
            ERROR_TIMEOUT,
            ERROR_NO_SPACE,
            ERROR_CANCELED,
            ERROR_UNABLE_TO_REMOVE,
            ERROR_LOCKOUT,
            ERROR_VENDOR,
            ERROR_LOCKOUT_PERMANENT,
            ERROR_USER_CANCELED,
            ERROR_NO_ENROLLMENTS,
            ERROR_HW_NOT_PRESENT,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn test_lockout_defaults_are_ordered() {
        assert!(DEFAULT_LOCKOUT_THRESHOLD < DEFAULT_PERMANENT_LOCKOUT_THRESHOLD);
    }
}
