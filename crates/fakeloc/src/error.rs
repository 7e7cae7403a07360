//! Error types for fakeloc.
//!
//! This module defines the errors surfaced by the location simulation
//! workflow, giving each failing step its own variant so the user can tell
//! where a run stopped.

use idevice::IdeviceError;
use thiserror::Error;

use crate::device::DeviceError;

/// The main error type for fakeloc operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Device Errors ===
    /// No attached device matched the request.
    #[error("unable to connect to the device{}: make sure it is connected", udid_suffix(.udid.as_deref()))]
    DeviceNotFound {
        /// The requested device, if one was named.
        udid: Option<String>,
    },

    /// The lockdown handshake failed.
    #[error("unable to connect to lockdownd: {source}")]
    Handshake {
        /// The underlying transport error.
        #[source]
        source: DeviceError,
    },

    /// None of the candidate services could be started.
    #[error("unable to start any location service (tried {})", .tried.join(", "))]
    ServiceUnavailable {
        /// Service names tried, in order.
        tried: Vec<String>,
    },

    /// The service client could not be created.
    #[error("unable to create client for service '{service}': {source}")]
    ServiceClient {
        /// The started service.
        service: String,
        /// The underlying transport error.
        #[source]
        source: DeviceError,
    },

    /// Sending the location command failed.
    #[error("unable to send {command} command to '{service}': {source}")]
    Send {
        /// Which command was being sent.
        command: &'static str,
        /// The service it was sent to.
        service: String,
        /// The underlying transport error.
        #[source]
        source: DeviceError,
    },

    /// Any other transport failure.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    // === Input Errors ===
    /// A coordinate was out of range or not a number.
    #[error("invalid coordinate: {message}")]
    InvalidCoordinate {
        /// Description of the problem.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },
}

/// A specialized Result type for fakeloc operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

fn udid_suffix(udid: Option<&str>) -> String {
    udid.map(|u| format!(" {u}")).unwrap_or_default()
}

impl Error {
    /// Create a new invalid coordinate error.
    #[must_use]
    pub fn invalid_coordinate(message: impl Into<String>) -> Self {
        Self::InvalidCoordinate {
            message: message.into(),
        }
    }

    /// Create a timeout error for `operation`.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// A suggestion for the user, for failures they can usually fix.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        if self.is_pairing_error() {
            Some("unlock the device, accept the trust prompt, then try again")
        } else if self.is_device_not_found() {
            Some("run `fakeloc devices` to list attached devices")
        } else {
            None
        }
    }

    /// Check if this error means the device could not be found.
    #[must_use]
    pub fn is_device_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound { .. })
    }

    /// Check if this error means the device has not trusted this host.
    #[must_use]
    pub fn is_pairing_error(&self) -> bool {
        matches!(
            self,
            Self::Handshake {
                source: DeviceError::PairRecord { .. }
                    | DeviceError::Idevice(IdeviceError::InvalidHostID)
            }
        )
    }
}
