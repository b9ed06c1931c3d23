//! Ledger Signer Core Library
//!
//! This crate is the host side of the Ledger hardware wallet protocol for
//! the Minter application: it frames APDUs into HID reports, encodes
//! derivation paths, and drives multi-step signing flows that end with the
//! user approving or rejecting the transaction on the device itself.
//!
//! # Overview
//!
//! This library provides:
//!
//! - **Transport Abstraction**: [`ledger::Transport`] and [`ledger::DeviceHub`]
//!   traits over the physical link, with a USB HID implementation behind the
//!   `hid` feature and a scripted in-memory device for tests
//! - **Device Session**: one busy-guarded session per device exposing public
//!   keys, application info and application launch
//! - **Signing**: the chunked sign flow with typed outcomes for every status
//!   word the device can answer
//! - **Monitoring**: a background [`DeviceMonitor`] reporting whether the
//!   device is attached and the Minter application is open
//! - **Installation**: an [`Installer`] bridge to the vendor loader
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Signer     │  DeviceMonitor │   Address    │   Installer   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Device Session                           │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌─────────────────┐ │
//! │  │  Path   │  │  APDU   │  │ Status  │  │    Framing      │ │
//! │  │ Encode  │  │ Encode  │  │  Table  │  │  (HID reports)  │ │
//! │  └─────────┘  └─────────┘  └─────────┘  └─────────────────┘ │
//! ├─────────────────────────────────────────────────────────────┤
//! │              Transport Layer (USB HID / scripted)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ## Deriving an Address
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ledger_signer_core::SignerConfig;
//! use ledger_signer_core::ledger::scripted::ScriptedDevice;
//! use ledger_signer_core::ledger::{ApduResponse, DeviceSession};
//!
//! // The generator point, i.e. the public key of private key 1.
//! let key = hex::decode(
//!     "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
//!      483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8",
//! )
//! .unwrap();
//! let mut payload = vec![key.len() as u8];
//! payload.extend_from_slice(&key);
//!
//! let device = Arc::new(ScriptedDevice::new());
//! device.respond(ApduResponse::success(payload));
//!
//! let session = DeviceSession::new(device, SignerConfig::default()).unwrap();
//! let (_, address) = session.address(&"m/44'/60'/0'/0/0".parse().unwrap()).unwrap();
//! assert_eq!(address.to_string(), "Mx7e5f4552091a69125d5dfcb7b8c2659029395bdf");
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use ledger_signer_core::SignerConfig;
//!
//! let config = SignerConfig::from_toml_str(
//!     r#"
//!     approval_timeout_ms = 30000
//!
//!     [app]
//!     name = "Minter"
//!     min_version = "1.0.0"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.approval_timeout().as_secs(), 30);
//! ```
//!
//! # Feature Flags
//!
//! - `hid`: enables [`ledger::HidHub`] and [`ledger::HidTransport`] on top
//!   of `hidapi`
//!
//! # Security Considerations
//!
//! - Private keys never leave the device
//! - Every signature requires confirmation on the device screen
//! - Payload bytes are never logged, only their lengths

// Modules
pub mod address;
pub mod config;
pub mod error;
pub mod installer;
pub mod ledger;
pub mod monitor;
pub mod signature;

// Re-exports for convenience
pub use address::Address;
pub use config::SignerConfig;
pub use error::{Error, ErrorCategory, Result};
pub use installer::{InstallParams, Installer};
pub use monitor::{DeviceMonitor, DeviceState};
pub use signature::Signature;

// Re-export commonly used alloy types
pub use alloy_primitives::U256;

#[cfg(test)]
use tracing_subscriber as _;
