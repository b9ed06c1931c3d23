//! Signer configuration.
//!
//! Every tunable of the protocol client lives in [`SignerConfig`]. The
//! defaults match a Nano S/X over USB HID running the Minter application,
//! so most callers never need a configuration file.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use ledger_signer_core::SignerConfig;
//!
//! let config = SignerConfig::from_toml_str(
//!     r#"
//!     approval_timeout_ms = 30000
//!
//!     [app]
//!     name = "Minter"
//!     min_version = "1.2.0"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.approval_timeout(), Duration::from_secs(30));
//! assert_eq!(config.packet_size, 64);
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::framing::{DEFAULT_CHANNEL, DEFAULT_MAX_MESSAGE_LEN, DEFAULT_PACKET_SIZE};
use crate::ledger::path::MAX_DEPTH;
use crate::ledger::{AppRequirements, FrameCodec};

/// Configuration of the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignerConfig {
    /// Per-read bound for ordinary exchanges, in milliseconds.
    pub exchange_timeout_ms: u64,

    /// Bound for the on-device approval wait, in milliseconds.
    pub approval_timeout_ms: u64,

    /// HID report size.
    pub packet_size: usize,

    /// HID channel identifier.
    pub channel: u16,

    /// Largest response the host reassembles.
    pub max_response_len: usize,

    /// Payload bytes per sign APDU, the header included.
    pub chunk_size: usize,

    /// Deepest derivation path sent to the device.
    pub max_path_depth: usize,

    /// Application the signer expects on the device.
    pub app: AppRequirements,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: 5_000,
            approval_timeout_ms: 60_000,
            packet_size: DEFAULT_PACKET_SIZE,
            channel: DEFAULT_CHANNEL,
            max_response_len: DEFAULT_MAX_MESSAGE_LEN,
            chunk_size: 255,
            max_path_depth: MAX_DEPTH,
            app: AppRequirements::default(),
        }
    }
}

impl SignerConfig {
    /// Parses and validates a TOML document. Missing keys take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document does not parse or fails
    /// [`validate`](Self::validate).
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.exchange_timeout_ms == 0 {
            return Err(Error::Config("exchange_timeout_ms must be positive".to_string()));
        }
        if self.approval_timeout_ms == 0 {
            return Err(Error::Config("approval_timeout_ms must be positive".to_string()));
        }
        if self.chunk_size == 0 || self.chunk_size > 255 {
            return Err(Error::Config(format!(
                "chunk_size must be within 1..=255, got {}",
                self.chunk_size
            )));
        }
        if self.max_path_depth == 0 || self.max_path_depth > MAX_DEPTH {
            return Err(Error::Config(format!(
                "max_path_depth must be within 1..={MAX_DEPTH}, got {}",
                self.max_path_depth
            )));
        }
        if self.app.name.is_empty() {
            return Err(Error::Config("app.name must not be empty".to_string()));
        }
        self.frame_codec().map(|_| ())
    }

    /// Bound for ordinary exchanges.
    #[must_use]
    pub const fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    /// Bound for the on-device approval wait.
    #[must_use]
    pub const fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }

    /// Builds the frame codec for these settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the packet size or response limit is
    /// unusable.
    pub fn frame_codec(&self) -> Result<FrameCodec> {
        FrameCodec::new(self.channel, self.packet_size, self.max_response_len)
    }
}
