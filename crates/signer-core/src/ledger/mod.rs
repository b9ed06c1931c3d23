//! Ledger device communication module.
//!
//! This module provides host-side communication with Ledger hardware
//! wallets. It supports:
//!
//! - Device discovery and connection
//! - APDU command/response handling and HID framing
//! - Key derivation paths
//! - Public key retrieval and transaction signing
//!
//! # Architecture
//!
//! The module is organized into several submodules, leaf first:
//!
//! - [`apdu`]: APDU command/response types and encoding
//! - [`framing`]: splitting APDUs into HID reports and reassembling them
//! - [`path`]: BIP32 derivation paths
//! - [`status`]: the status word table
//! - [`curve`]: curve selectors and public keys
//! - [`session`]: the device session and its busy guard
//! - [`signer`]: the multi-APDU signing flow
//! - [`scripted`]: an in-memory device for tests and demos
//!
//! # Transport Abstraction
//!
//! The [`Transport`] trait abstracts over the physical link (USB HID, BLE)
//! as a duplex channel of fixed-size reports, and [`DeviceHub`] abstracts
//! device enumeration. The session only ever sees these two traits, so a
//! scripted device and a real one are interchangeable.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ledger_signer_core::SignerConfig;
//! use ledger_signer_core::ledger::scripted::ScriptedDevice;
//! use ledger_signer_core::ledger::{DeviceSession, SessionState};
//!
//! let device = Arc::new(ScriptedDevice::new());
//! let session = DeviceSession::new(device, SignerConfig::default()).unwrap();
//! assert_eq!(session.state(), SessionState::Connected);
//!
//! session.close();
//! assert_eq!(session.state(), SessionState::Disconnected);
//! ```

pub mod apdu;
pub mod curve;
pub mod framing;
pub mod path;
pub mod scripted;
pub mod session;
pub mod signer;
pub mod status;

#[cfg(feature = "hid")]
pub mod hid_transport;

pub use apdu::{ApduCommand, ApduResponse};
pub use curve::{Curve, PublicKey};
pub use framing::FrameCodec;
pub use path::{ChildIndex, DerivationPath};
pub use session::{AppInfo, DeviceSession, OperationKind, SessionState, TargetInfo};
pub use signer::{AppRequirements, Signer, SigningRequest};

#[cfg(feature = "hid")]
pub use hid_transport::{HidHub, HidTransport};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// USB vendor identifier of Ledger devices.
pub const LEDGER_VENDOR_ID: u16 = 0x2c97;

/// A duplex channel of fixed-size reports to one physical device.
///
/// Methods take `&self` so that [`close`](Self::close) can be called from
/// another thread while a [`read`](Self::read) is blocked; implementations
/// must make the pending read return [`Error::Cancelled`] or
/// [`Error::TransportLost`] when that happens.
///
/// [`Error::Cancelled`]: crate::Error::Cancelled
/// [`Error::TransportLost`]: crate::Error::TransportLost
pub trait Transport: Send + Sync {
    /// Opens the link, or re-opens it after [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns a connection error if the device is gone or held elsewhere.
    fn open(&self) -> Result<()>;

    /// Closes the link. Idempotent.
    fn close(&self);

    /// Checks if the link is open.
    fn is_open(&self) -> bool;

    /// Writes one report.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the device is unreachable.
    fn write(&self, report: &[u8]) -> Result<()>;

    /// Reads one report, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`](crate::Error::Timeout) if nothing arrives in time
    /// - [`Error::Cancelled`](crate::Error::Cancelled) if the link is closed
    ///   while waiting
    /// - [`Error::TransportLost`](crate::Error::TransportLost) if the device
    ///   disappears
    fn read(&self, timeout: Duration) -> Result<Vec<u8>>;
}

/// Enumerates devices and opens transports to them.
pub trait DeviceHub: Send + Sync {
    /// Lists the devices currently attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus cannot be enumerated.
    fn devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Creates a transport to `device`. The transport is not opened yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`](crate::Error::DeviceNotFound) if
    /// the device is no longer attached.
    fn transport(&self, device: &DeviceDescriptor) -> Result<Arc<dyn Transport>>;
}

/// Identifies one attached device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// OS-specific device path.
    pub path: String,

    /// USB vendor identifier.
    pub vendor_id: u16,

    /// USB product identifier.
    pub product_id: u16,

    /// Product string, if the OS exposes it.
    pub product: Option<String>,

    /// Serial number, if the OS exposes it.
    pub serial: Option<String>,
}

impl DeviceDescriptor {
    /// Checks if the descriptor belongs to a Ledger device.
    #[must_use]
    pub const fn is_ledger(&self) -> bool {
        self.vendor_id == LEDGER_VENDOR_ID
    }
}
