//! Status word table.
//!
//! Every response ends with a 16-bit status word. The mapping from status
//! words to outcomes is a single lookup table so that codes introduced by
//! new firmware can be added here without touching any control flow.
//!
//! | Status        | Outcome                                   |
//! |---------------|-------------------------------------------|
//! | `9000`        | success                                   |
//! | `6985`, `5501`| user rejected the request on the device   |
//! | `6a80`, `6a87`, `6700`, `6b00` | invalid data             |
//! | `6d00`, `6e00`, `6e01`, `6511`, `6a83` | wrong application |
//! | `5515`, `6982`| device locked                             |
//! | anything else | unknown, carrying the raw code            |

use super::apdu::ApduResponse;
use crate::error::{Error, Result};

/// The meaning of a status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// The command succeeded.
    Success,
    /// The user refused the request on the device.
    UserRejected,
    /// The device rejected the request data.
    InvalidData,
    /// The command was sent to the wrong application.
    WrongApplication,
    /// The device is locked.
    DeviceLocked,
    /// Not in the table.
    Unknown,
}

/// Known status words.
const STATUS_TABLE: &[(u16, StatusKind, &str)] = &[
    (0x9000, StatusKind::Success, "success"),
    (0x6985, StatusKind::UserRejected, "conditions of use not satisfied"),
    (0x5501, StatusKind::UserRejected, "user refused on device"),
    (0x6a80, StatusKind::InvalidData, "invalid data"),
    (0x6a87, StatusKind::InvalidData, "Lc inconsistent with P1/P2"),
    (0x6700, StatusKind::InvalidData, "wrong length"),
    (0x6b00, StatusKind::InvalidData, "incorrect P1/P2"),
    (0x6d00, StatusKind::WrongApplication, "instruction not supported"),
    (0x6e00, StatusKind::WrongApplication, "class not supported"),
    (0x6e01, StatusKind::WrongApplication, "application not open"),
    (0x6511, StatusKind::WrongApplication, "application not open"),
    (0x6a83, StatusKind::WrongApplication, "application not found"),
    (0x5515, StatusKind::DeviceLocked, "device locked"),
    (0x6982, StatusKind::DeviceLocked, "security status not satisfied"),
];

/// Looks up a status word.
#[must_use]
pub fn classify(status_word: u16) -> StatusKind {
    STATUS_TABLE
        .iter()
        .find(|(code, _, _)| *code == status_word)
        .map_or(StatusKind::Unknown, |(_, kind, _)| *kind)
}

/// Human-readable description of a status word.
#[must_use]
pub fn describe(status_word: u16) -> &'static str {
    STATUS_TABLE
        .iter()
        .find(|(code, _, _)| *code == status_word)
        .map_or("unknown status", |(_, _, text)| *text)
}

/// Converts a non-success status word into an error.
///
/// `expected_app` names the application the command was meant for, so a
/// wrong-application status can tell the user what to open.
#[must_use]
pub fn to_error(status_word: u16, expected_app: &str) -> Error {
    match classify(status_word) {
        StatusKind::UserRejected => Error::UserRejected,
        StatusKind::InvalidData => Error::InvalidData(status_word),
        StatusKind::WrongApplication => Error::WrongApplication {
            expected: expected_app.to_string(),
            found: None,
        },
        StatusKind::DeviceLocked => Error::DeviceLocked,
        StatusKind::Success | StatusKind::Unknown => Error::UnknownDeviceError(status_word),
    }
}

/// Returns the response if it succeeded, the mapped error otherwise.
///
/// # Errors
///
/// Returns the error [`to_error`] maps the status word to.
pub fn check(response: ApduResponse, expected_app: &str) -> Result<ApduResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(to_error(response.status_word(), expected_app))
    }
}
