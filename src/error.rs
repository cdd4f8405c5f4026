//! Custom error types for the library.
//!
//! This module defines the primary error type, `CamError`, used by the parameter tree,
//! the acquisition session and the device registry. Using the `thiserror` crate, it
//! provides one consistent taxonomy for everything that can go wrong between a caller
//! and a camera, from a malformed feature enumeration to a rejected write.
//!
//! ## Error Hierarchy
//!
//! `CamError` consolidates the following categories:
//!
//! - **`DeviceQuery`**: The device's feature enumeration failed or returned metadata the
//!   parameter tree cannot represent (missing type, missing limits, ...).
//! - **`NotFound`**: A device selector or parameter path did not resolve.
//! - **`Validation`**: A value violates the node's type, limits, step or choices. These
//!   are detected locally and never reach the device.
//! - **`Access`**: Write or invoke on a read-only node, or a write on a group/action.
//! - **`DeviceIo`**: Communication with the device failed or the device rejected a request.
//! - **`DeviceBusy`**: The streaming grant is held by another session, or a
//!   streaming-critical setting was changed while streaming.
//! - **`Configuration`**: The device rejected the acquisition configuration, or the
//!   application configuration failed semantic validation.
//! - **`TypeMismatch`**: An action was requested on a node that is not an action (or a
//!   value was requested from an action).
//!
//! Driver implementations report failures as [`DriverError`]; the layer that calls the
//! driver decides which `CamError` category the failure belongs to.

use std::fmt;

use thiserror::Error;

use crate::parameter::{ParameterKind, ParameterValue};

// =============================================================================
// Driver Errors
// =============================================================================

/// Classification of a failure reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The device or feature does not exist.
    NotFound,
    /// The device refused a value or setting.
    Rejected,
    /// The communication channel failed or is unavailable.
    Communication,
    /// The device did not answer in time.
    Timeout,
    /// The device reported an internal fault.
    Hardware,
    /// The device returned data the caller cannot interpret.
    Protocol,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DriverErrorKind::NotFound => "not_found",
            DriverErrorKind::Rejected => "rejected",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Protocol => "protocol",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a transport or camera driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that produced the error (e.g. `"emulation"`).
    pub driver_type: String,
    /// Failure classification.
    pub kind: DriverErrorKind,
    /// Human readable detail.
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Result type returned by driver contract methods.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

// =============================================================================
// Constraint violations
// =============================================================================

/// The rule a rejected value violated.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// The value's type does not match the node kind.
    Type {
        /// Kind of the node.
        expected: ParameterKind,
        /// Kind of the offered value.
        found: ParameterKind,
    },
    /// The value lies outside `[min, max]`.
    Limits {
        /// Lower bound (inclusive).
        min: ParameterValue,
        /// Upper bound (inclusive).
        max: ParameterValue,
    },
    /// The value is not `min + k * step`.
    Step {
        /// Offset origin.
        min: ParameterValue,
        /// Increment.
        step: ParameterValue,
    },
    /// The value is not one of the enumeration entries.
    Choices(Vec<String>),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Type { expected, found } => {
                write!(f, "expected {} value, got {}", expected, found)
            }
            Constraint::Limits { min, max } => write!(f, "value must be within [{}:{}]", min, max),
            Constraint::Step { min, step } => {
                write!(f, "value must be {} plus a multiple of {}", min, step)
            }
            Constraint::Choices(choices) => {
                write!(f, "value must be one of: {}", choices.join(", "))
            }
        }
    }
}

// =============================================================================
// CamError
// =============================================================================

/// Convenience alias for results using the library error type.
pub type CamResult<T> = std::result::Result<T, CamError>;

/// Primary error type for camera control.
#[derive(Error, Debug)]
pub enum CamError {
    /// Feature enumeration failed or produced malformed metadata.
    #[error("Device query error: {0}")]
    DeviceQuery(String),

    /// Device selector or parameter path did not resolve.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Value rejected before contacting the device.
    #[error("Invalid value for '{path}': {constraint}")]
    Validation {
        /// Path of the node that rejected the value.
        path: String,
        /// The violated rule.
        constraint: Constraint,
    },

    /// Write or invoke on a node that does not allow it.
    #[error("Access denied on '{path}': {reason}")]
    Access {
        /// Path of the node.
        path: String,
        /// Why the access was denied.
        reason: String,
    },

    /// Communication with the device failed or the device rejected the request.
    #[error("Device I/O error: {0}")]
    DeviceIo(String),

    /// Exclusive resource contention.
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Rejected configuration (device side or application config).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation requested on a node of the wrong kind.
    #[error("Type mismatch on '{path}': expected {expected}, node is {found}")]
    TypeMismatch {
        /// Path of the node.
        path: String,
        /// Kind the operation requires.
        expected: ParameterKind,
        /// Kind of the node.
        found: ParameterKind,
    },

    /// Configuration file or environment could not be parsed.
    #[error("Configuration load error: {0}")]
    Config(#[from] figment::Error),

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CamError {
    /// Build a `DeviceIo` error from a driver failure, keeping the driver message.
    pub fn device_io(context: impl fmt::Display, err: DriverError) -> Self {
        CamError::DeviceIo(format!("{}: {}", context, err))
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CamError::DeviceIo(_) | CamError::DeviceBusy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_constraint() {
        let err = CamError::Validation {
            path: "AOI/Height".into(),
            constraint: Constraint::Limits {
                min: ParameterValue::Int(1),
                max: ParameterValue::Int(4096),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("AOI/Height"));
        assert!(msg.contains("[1:4096]"));
    }

    #[test]
    fn driver_error_wraps_into_device_io() {
        let driver = DriverError::new("emulation", DriverErrorKind::Timeout, "no answer");
        let err = CamError::device_io("write ExposureTime", driver);
        match &err {
            CamError::DeviceIo(msg) => {
                assert!(msg.contains("write ExposureTime"));
                assert!(msg.contains("timeout"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert!(err.is_transient());
    }

    #[test]
    fn type_constraint_display() {
        let c = Constraint::Type {
            expected: ParameterKind::Int,
            found: ParameterKind::String,
        };
        assert_eq!(c.to_string(), "expected int value, got str");
    }
}
