//! Error types for the Ledger signer library.
//!
//! This module provides a single error type [`enum@Error`] that covers every
//! failure mode of talking to a Ledger device, from enumerating the USB bus
//! to the user pressing "reject" on the device screen.
//!
//! # Error Categories
//!
//! - **Connection errors**: raised while opening a device; retry enumeration
//! - **Transport errors**: raised mid-exchange; the session is dropped to
//!   [`Disconnected`](crate::ledger::SessionState::Disconnected)
//! - **Device errors**: a well-formed response carrying a non-success
//!   status word
//! - **Validation errors**: caller mistakes caught before touching the
//!   transport
//!
//! [`Error::category`] returns the category of any variant.
//!
//! # Example
//!
//! ```
//! use ledger_signer_core::{Error, ErrorCategory};
//!
//! let err = Error::UserRejected;
//! assert_eq!(err.category(), ErrorCategory::Device);
//! assert!(err.user_hint().is_some());
//! ```

use core::fmt;
use core::result::Result as CoreResult;
use std::io::Error as IoError;

use hex::FromHexError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// The main error type for the Ledger signer library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// No Ledger device was found on the bus.
    #[error("no Ledger device found")]
    DeviceNotFound,

    /// The device or session is already in use.
    #[error("device is busy with another operation")]
    DeviceBusy,

    /// The OS refused access to the device (udev rules, another process).
    #[error("permission denied opening device: {0}")]
    PermissionDenied(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The transport failed mid-exchange (cable pulled, device detached).
    #[error("transport lost: {0}")]
    TransportLost(String),

    /// A frame violated the wire format.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// No response arrived within the operation timeout.
    #[error("device did not respond within {0} ms")]
    Timeout(u64),

    /// The pending exchange was cancelled by closing the session.
    #[error("operation cancelled")]
    Cancelled,

    // =========================================================================
    // Device Errors
    // =========================================================================
    /// A different application (or the dashboard) is open on the device.
    #[error("wrong application: expected {expected}, found {}", .found.as_deref().unwrap_or("unknown"))]
    WrongApplication {
        /// Name of the application that must be open.
        expected: String,
        /// Name reported by the device, when it could be read.
        found: Option<String>,
    },

    /// The right application is open but its version is not supported.
    #[error("incompatible application {name} {version}: requires {required}")]
    IncompatibleApp {
        /// Application name reported by the device.
        name: String,
        /// Version reported by the device.
        version: String,
        /// Minimum supported version requirement.
        required: String,
    },

    /// The user refused the request on the device.
    #[error("request rejected on device")]
    UserRejected,

    /// The device rejected the request data.
    #[error("device rejected data (status {0:#06x})")]
    InvalidData(u16),

    /// The device is locked with its PIN.
    #[error("device is locked")]
    DeviceLocked,

    /// A status word with no known meaning.
    #[error("unknown device error (status {0:#06x})")]
    UnknownDeviceError(u16),

    /// A successful response whose payload does not match the operation.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The returned public key is not a valid point for the curve.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The returned signature is not well formed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// The derivation path is empty, too deep or unparsable.
    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    /// The transaction payload is empty.
    #[error("transaction payload is empty")]
    EmptyPayload,

    /// The payload cannot be represented on the wire.
    #[error("payload too large: {len} bytes (limit {limit})")]
    PayloadTooLarge {
        /// Length that was supplied.
        len: usize,
        /// Largest accepted length.
        limit: usize,
    },

    /// The session is not connected.
    #[error("session is not ready")]
    SessionNotReady,

    // =========================================================================
    // Installer Errors
    // =========================================================================
    /// The vendor loader exited unsuccessfully.
    #[error("installer failed with status {status:?}")]
    InstallerFailed {
        /// Exit code, `None` when killed by a signal.
        status: Option<i32>,
        /// Combined output of the loader.
        output: String,
    },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse hex data.
    #[error("hex decoding failed: {0}")]
    HexDecodeFailed(String),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// Local I/O failure (config files, spawning the loader).
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// The broad category an [`enum@Error`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Raised while opening a device.
    Connection,
    /// Raised mid-exchange; the session is no longer usable.
    Transport,
    /// Raised from a device status word.
    Device,
    /// Caller error caught before any device interaction.
    Validation,
    /// Raised by the installer bridge.
    Installer,
    /// Host-side failures unrelated to the device.
    Local,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connection => "connection",
            Self::Transport => "transport",
            Self::Device => "device",
            Self::Validation => "validation",
            Self::Installer => "installer",
            Self::Local => "local",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::DeviceNotFound | Self::DeviceBusy | Self::PermissionDenied(_) => {
                ErrorCategory::Connection
            }
            Self::TransportLost(_) | Self::MalformedFrame(_) | Self::Timeout(_) | Self::Cancelled => {
                ErrorCategory::Transport
            }
            Self::WrongApplication { .. }
            | Self::IncompatibleApp { .. }
            | Self::UserRejected
            | Self::InvalidData(_)
            | Self::DeviceLocked
            | Self::UnknownDeviceError(_)
            | Self::MalformedResponse(_)
            | Self::InvalidPublicKey(_)
            | Self::InvalidSignature(_) => ErrorCategory::Device,
            Self::InvalidPath(_)
            | Self::EmptyPayload
            | Self::PayloadTooLarge { .. }
            | Self::SessionNotReady => ErrorCategory::Validation,
            Self::InstallerFailed { .. } => ErrorCategory::Installer,
            Self::Config(_) | Self::HexDecodeFailed(_) | Self::JsonError(_) | Self::Io(_) => {
                ErrorCategory::Local
            }
        }
    }

    /// Returns `true` if the error leaves the session unusable.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transport)
    }

    /// A short instruction for the user, for errors the user can fix on the
    /// device itself.
    #[must_use]
    pub fn user_hint(&self) -> Option<String> {
        match self {
            Self::DeviceNotFound => Some("Connect your Ledger and unlock it.".to_string()),
            Self::PermissionDenied(_) => {
                Some("Grant USB access to the device (udev rules on Linux).".to_string())
            }
            Self::WrongApplication { expected, .. } => Some(format!(
                "Open the {expected} application on your device."
            )),
            Self::IncompatibleApp { name, required, .. } => Some(format!(
                "Update the {name} application on your device to {required}."
            )),
            Self::UserRejected => Some("The request was rejected on the device.".to_string()),
            Self::DeviceLocked => Some("Unlock your device with its PIN.".to_string()),
            Self::TransportLost(_) | Self::Timeout(_) => {
                Some("Reconnect your device and try again.".to_string())
            }
            _ => None,
        }
    }
}

impl From<FromHexError> for Error {
    fn from(err: FromHexError) -> Self {
        Error::HexDecodeFailed(err.to_string())
    }
}

impl From<SerdeJsonError> for Error {
    fn from(err: SerdeJsonError) -> Self {
        Error::JsonError(err.to_string())
    }
}

impl From<TomlError> for Error {
    fn from(err: TomlError) -> Self {
        Error::Config(err.to_string())
    }
}

/// A specialized [`Result`] type for Ledger signer operations.
pub type Result<T> = CoreResult<T, Error>;
