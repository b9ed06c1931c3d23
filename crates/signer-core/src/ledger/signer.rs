//! The transaction signing flow.
//!
//! Signing takes several APDUs on one busy session:
//!
//! 1. Check the running application (`B0 01`): its name must match and its
//!    version must satisfy the [`AppRequirements`].
//! 2. Send the header (`E0 04 00 <curve>`): encoded path, curve byte and
//!    the first `chunk_size` bytes of the payload.
//! 3. Stream the rest in continuation APDUs (`E0 04 80 <curve>`) of at most
//!    `chunk_size` bytes each. Every APDU but the last, header included, is
//!    acknowledged with an empty `9000`.
//! 4. After the last APDU the device shows the transaction and waits for
//!    the user; the host blocks on a single read bounded by the approval
//!    timeout. A payload that fits the header is signed in one APDU.
//! 5. Map the final status word and validate the signature.
//!
//! ```text
//! header:        | path (1 + 4n B) | curve (1B) | first chunk (<= chunk_size B) |
//! continuation:  | payload chunk (<= chunk_size B)                               |
//! ```
//!
//! A 200 byte payload with 64 byte chunks goes out as one header carrying
//! 64 bytes and continuations of 64, 64 and 8 bytes.
//!
//! The flow never retries. On a transport failure the session drops to
//! `Disconnected` and the caller decides whether to reconnect.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ledger_signer_core::SignerConfig;
//! use ledger_signer_core::ledger::scripted::ScriptedDevice;
//! use ledger_signer_core::ledger::{ApduResponse, Curve, DeviceSession, Signer, SigningRequest};
//!
//! let device = Arc::new(ScriptedDevice::new());
//! device.respond(ApduResponse::success(ScriptedDevice::app_info_payload("Minter", "1.0.0")));
//! let mut signature = vec![0x11; 32];
//! signature.extend_from_slice(&[0x22; 32]);
//! device.respond(ApduResponse::success(signature.clone())); // approval
//!
//! let session = DeviceSession::new(device, SignerConfig::default()).unwrap();
//! let request = SigningRequest::new(
//!     "m/44'/60'/0'/0/0".parse().unwrap(),
//!     vec![0xAB; 32],
//!     Curve::Secp256k1,
//! );
//! let result = Signer::new(&session).sign(&request).unwrap();
//! assert_eq!(result.to_bytes(), signature);
//! ```

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::apdu::ApduCommand;
use super::curve::Curve;
use super::path::DerivationPath;
use super::session::{AppInfo, DeviceSession, Operation, OperationKind, ins};
use crate::error::{Error, Result};
use crate::signature::Signature;

/// P1 of the sign header APDU.
const P1_FIRST: u8 = 0x00;

/// P1 of a sign continuation APDU.
const P1_MORE: u8 = 0x80;

/// The application the signer accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppRequirements {
    /// Application name as reported by the device.
    pub name: String,

    /// Lowest accepted version.
    pub min_version: Version,
}

impl Default for AppRequirements {
    fn default() -> Self {
        Self {
            name: "Minter".to_string(),
            min_version: Version::new(0, 1, 0),
        }
    }
}

impl AppRequirements {
    /// Checks `info` against the requirements.
    ///
    /// # Errors
    ///
    /// - [`Error::WrongApplication`] if another application is open
    /// - [`Error::IncompatibleApp`] if the version is unparsable or too old
    pub fn check(&self, info: &AppInfo) -> Result<()> {
        if info.name != self.name {
            return Err(Error::WrongApplication {
                expected: self.name.clone(),
                found: Some(info.name.clone()),
            });
        }

        match info.semver() {
            Some(version) if version >= self.min_version => Ok(()),
            _ => Err(Error::IncompatibleApp {
                name: info.name.clone(),
                version: info.version.clone(),
                required: format!(">={}", self.min_version),
            }),
        }
    }
}

/// A transaction to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    /// Key to sign with.
    pub path: DerivationPath,

    /// Unsigned transaction bytes.
    pub payload: Vec<u8>,

    /// Curve of the key.
    pub curve: Curve,
}

impl SigningRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(path: DerivationPath, payload: Vec<u8>, curve: Curve) -> Self {
        Self {
            path,
            payload,
            curve,
        }
    }
}

/// Drives signing flows on a session.
#[derive(Debug, Clone)]
pub struct Signer<'s> {
    session: &'s DeviceSession,
    requirements: AppRequirements,
    chunk_size: usize,
}

impl<'s> Signer<'s> {
    /// Creates a signer using the session's configured requirements and
    /// chunk size.
    #[must_use]
    pub fn new(session: &'s DeviceSession) -> Self {
        let config = session.config();
        Self {
            session,
            requirements: config.app.clone(),
            chunk_size: config.chunk_size,
        }
    }

    /// Overrides the application requirements.
    #[must_use]
    pub fn with_requirements(mut self, requirements: AppRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Overrides the payload chunk size, clamped to `1..=255`.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, ApduCommand::MAX_SHORT_DATA);
        self
    }

    /// Returns the payload chunk size.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of sign APDUs a payload of `len` bytes takes. The header
    /// carries the first chunk.
    #[must_use]
    pub const fn apdu_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }

    /// Signs `request`, blocking until the user approves or rejects it on
    /// the device.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotReady`] / [`Error::DeviceBusy`] for the session
    ///   state
    /// - [`Error::EmptyPayload`] and [`Error::InvalidPath`] before any
    ///   device interaction
    /// - [`Error::WrongApplication`] / [`Error::IncompatibleApp`] before the
    ///   payload is sent
    /// - [`Error::UserRejected`], [`Error::InvalidData`],
    ///   [`Error::UnknownDeviceError`] from the final status word
    /// - [`Error::InvalidSignature`] if the returned bytes are not a
    ///   signature on the request's curve
    /// - transport errors, after which the session is disconnected
    pub fn sign(&self, request: &SigningRequest) -> Result<Signature> {
        let op = self.session.begin(OperationKind::Sign)?;

        if request.payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let prefix = self.prefix(request)?;

        let info = op.app_info()?;
        self.requirements.check(&info)?;

        debug!(
            path = %request.path,
            curve = %request.curve,
            len = request.payload.len(),
            apdus = self.apdu_count(request.payload.len()),
            "signing"
        );
        self.stream(&op, request, prefix)
    }

    /// Encoded path and curve byte, the part of the header in front of the
    /// first payload chunk.
    fn prefix(&self, request: &SigningRequest) -> Result<Vec<u8>> {
        let max_depth = self.session.config().max_path_depth;
        let mut prefix = request.path.encode_with_max_depth(max_depth)?;
        prefix.push(request.curve.id());
        Ok(prefix)
    }

    fn stream(
        &self,
        op: &Operation<'_>,
        request: &SigningRequest,
        prefix: Vec<u8>,
    ) -> Result<Signature> {
        let config = op.session().config();
        let expected = self.requirements.name.as_str();
        let curve = request.curve.id();

        let mut commands = Vec::with_capacity(self.apdu_count(request.payload.len()));
        for (i, chunk) in request.payload.chunks(self.chunk_size).enumerate() {
            let command = if i == 0 {
                let mut data = prefix.clone();
                data.extend_from_slice(chunk);
                ApduCommand::new(ins::CLA_APP, ins::SIGN, P1_FIRST, curve, data)?
            } else {
                ApduCommand::new(ins::CLA_APP, ins::SIGN, P1_MORE, curve, chunk.to_vec())?
            };
            commands.push(command);
        }
        let (last, init) = commands.split_last().ok_or(Error::EmptyPayload)?;

        for command in init {
            self.acknowledge(op, command)?;
        }

        info!("Please confirm the transaction on your device");
        let response = op.exchange_checked(last, config.approval_timeout(), expected)?;
        debug!(len = response.data().len(), "device approved");

        Signature::from_device(request.curve, response.data())
    }

    /// Sends a non-final APDU and checks its empty acknowledgement.
    fn acknowledge(&self, op: &Operation<'_>, command: &ApduCommand) -> Result<()> {
        let config = op.session().config();
        let response =
            op.exchange_checked(command, config.exchange_timeout(), &self.requirements.name)?;
        if !response.data().is_empty() {
            return Err(Error::MalformedResponse(format!(
                "unexpected {} bytes in chunk acknowledgement",
                response.data().len()
            )));
        }
        Ok(())
    }
}
