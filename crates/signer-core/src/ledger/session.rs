//! Device session management and operations.
//!
//! This module provides the [`DeviceSession`] type binding one transport to
//! the protocol client. It handles:
//!
//! - Connecting through a [`DeviceHub`] and reconnecting after a failure
//! - Application and device information
//! - Public key and address retrieval
//! - Launching and quitting device applications
//!
//! # State machine
//!
//! ```text
//!                 connect / reconnect
//!  Disconnected ───────────────────────▶ Connected ◀──┐
//!       ▲                                    │        │ operation resolved
//!       │ transport error / close            ▼        │
//!       └─────────────────────────────── Busy(kind) ──┘
//! ```
//!
//! Only one operation runs at a time: a second caller gets
//! [`Error::DeviceBusy`] immediately instead of queueing. Any transport-level
//! error closes the transport and leaves the session `Disconnected` until
//! [`reconnect`](DeviceSession::reconnect) is called.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ledger_signer_core::SignerConfig;
//! use ledger_signer_core::ledger::scripted::ScriptedDevice;
//! use ledger_signer_core::ledger::{ApduResponse, DeviceSession};
//!
//! let device = Arc::new(ScriptedDevice::new());
//! device.respond(ApduResponse::success(ScriptedDevice::app_info_payload("Minter", "1.0.0")));
//!
//! let session = DeviceSession::new(device, SignerConfig::default()).unwrap();
//! let info = session.app_info().unwrap();
//! assert_eq!(info.name, "Minter");
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use semver::Version;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::apdu::{ApduCommand, ApduResponse};
use super::curve::{Curve, PublicKey};
use super::framing::{Decoded, FrameCodec};
use super::path::DerivationPath;
use super::{DeviceDescriptor, DeviceHub, Transport, status};
use crate::address::Address;
use crate::config::SignerConfig;
use crate::error::{Error, Result};

/// Class and instruction codes.
pub(crate) mod ins {
    /// Class byte of application commands.
    pub(crate) const CLA_APP: u8 = 0xE0;

    /// Class byte of OS-level commands answered by any application.
    pub(crate) const CLA_OS: u8 = 0xB0;

    /// `GET DEVICE INFO` (dashboard) instruction.
    pub(crate) const GET_DEVICE_INFO: u8 = 0x01;

    /// `GET PUBLIC KEY` instruction.
    pub(crate) const GET_PUBLIC_KEY: u8 = 0x02;

    /// `SIGN` instruction.
    pub(crate) const SIGN: u8 = 0x04;

    /// `RUN APP` (dashboard) instruction.
    pub(crate) const RUN_APP: u8 = 0xD8;

    /// `GET APP NAME AND VERSION` instruction.
    pub(crate) const APP_INFO: u8 = 0x01;

    /// `QUIT APP` instruction.
    pub(crate) const QUIT_APP: u8 = 0xA7;
}

/// Format byte leading an app-info response.
const APP_INFO_FORMAT: u8 = 0x01;

/// The kind of operation a busy session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    /// Reading the application name and version.
    AppInfo,
    /// Reading the device target identifier.
    TargetInfo,
    /// Reading a public key.
    PublicKey,
    /// Signing a transaction.
    Sign,
    /// Launching an application.
    OpenApp,
    /// Quitting the running application.
    QuitApp,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AppInfo => "app-info",
            Self::TargetInfo => "target-info",
            Self::PublicKey => "public-key",
            Self::Sign => "sign",
            Self::OpenApp => "open-app",
            Self::QuitApp => "quit-app",
        };
        f.write_str(name)
    }
}

/// The state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// The transport is closed.
    Disconnected,
    /// Ready for an operation.
    Connected,
    /// An operation is in flight.
    Busy(OperationKind),
}

/// Name and version of the application running on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    /// Application name (`BOLOS` for the dashboard).
    pub name: String,

    /// Version string as reported by the application.
    pub version: String,

    /// Application flags.
    pub flags: u8,
}

impl AppInfo {
    /// Parses the version as semver, if it is one.
    #[must_use]
    pub fn semver(&self) -> Option<Version> {
        Version::parse(self.version.trim_start_matches('v')).ok()
    }

    /// Checks if the dashboard rather than an application is open.
    #[must_use]
    pub fn is_dashboard(&self) -> bool {
        self.name == "BOLOS"
    }

    fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let format = reader.byte("format")?;
        if format != APP_INFO_FORMAT {
            return Err(Error::MalformedResponse(format!(
                "unknown app info format {format:#04x}"
            )));
        }
        let name = reader.prefixed_string("name")?;
        let version = reader.prefixed_string("version")?;
        // Older firmware omits the flags field.
        let flags = if reader.is_empty() {
            0
        } else {
            reader.prefixed("flags")?.first().copied().unwrap_or(0)
        };

        Ok(Self {
            name,
            version,
            flags,
        })
    }
}

/// Device identification returned by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    /// Hardware target identifier (`0x31100004` for a Nano S).
    pub target_id: u32,

    /// Secure element firmware version.
    pub os_version: String,
}

impl TargetInfo {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let id = reader.take(4, "target id")?;
        let target_id = u32::from_be_bytes([id[0], id[1], id[2], id[3]]);
        let os_version = reader.prefixed_string("os version")?;

        Ok(Self {
            target_id,
            os_version,
        })
    }
}

/// Cursor over a response body with length-prefixed fields.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        if self.data.len() < len {
            return Err(Error::MalformedResponse(format!(
                "{field}: need {len} bytes, {} left",
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn byte(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn prefixed(&mut self, field: &str) -> Result<&'a [u8]> {
        let len = self.byte(field)? as usize;
        self.take(len, field)
    }

    fn prefixed_string(&mut self, field: &str) -> Result<String> {
        let bytes = self.prefixed(field)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::MalformedResponse(format!("{field} is not UTF-8")))
    }
}

/// A session with one Ledger device.
///
/// All methods take `&self`; the session can be shared between threads
/// behind an [`Arc`]. [`close`](Self::close) may be called from any thread
/// and unblocks an operation waiting on the device.
pub struct DeviceSession {
    /// The underlying transport.
    transport: Arc<dyn Transport>,

    /// The device the transport was opened for, when known.
    descriptor: Option<DeviceDescriptor>,

    /// Settings.
    config: SignerConfig,

    /// Frame codec built from `config`.
    codec: FrameCodec,

    /// Busy guard.
    guard: Mutex<Guard>,
}

/// The session state plus an epoch that changes whenever ownership of the
/// transport changes hands, so a stale [`Operation`] cannot release or
/// tear down a newer one.
#[derive(Debug, Clone, Copy)]
struct Guard {
    state: SessionState,
    epoch: u64,
}

impl Guard {
    const fn new(state: SessionState) -> Self {
        Self { state, epoch: 0 }
    }

    fn set(&mut self, state: SessionState) -> u64 {
        self.state = state;
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Opens `transport` and creates a connected session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration, or the
    /// connection error of [`Transport::open`].
    pub fn new(transport: Arc<dyn Transport>, config: SignerConfig) -> Result<Self> {
        Self::with_descriptor(transport, None, config)
    }

    /// Opens the first Ledger device `hub` reports.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`] if no Ledger is attached
    /// - [`Error::DeviceBusy`] or [`Error::PermissionDenied`] if the device
    ///   cannot be opened
    pub fn connect(hub: &dyn DeviceHub, config: SignerConfig) -> Result<Self> {
        let descriptor = hub
            .devices()?
            .into_iter()
            .find(DeviceDescriptor::is_ledger)
            .ok_or(Error::DeviceNotFound)?;
        debug!(path = %descriptor.path, product = ?descriptor.product, "found device");

        let transport = hub.transport(&descriptor)?;
        Self::with_descriptor(transport, Some(descriptor), config)
    }

    fn with_descriptor(
        transport: Arc<dyn Transport>,
        descriptor: Option<DeviceDescriptor>,
        config: SignerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let codec = config.frame_codec()?;
        transport.open()?;
        info!(path = ?descriptor.as_ref().map(|d| &d.path), "session connected");

        Ok(Self {
            transport,
            descriptor,
            config,
            codec,
            guard: Mutex::new(Guard::new(SessionState::Connected)),
        })
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.guard.lock().state
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Returns the device descriptor, when the session came from a hub.
    #[must_use]
    pub const fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.descriptor.as_ref()
    }

    /// Re-opens a disconnected session. A connected session is left as is.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceBusy`] if an operation is in flight
    /// - the connection error of [`Transport::open`]
    pub fn reconnect(&self) -> Result<()> {
        let mut guard = self.guard.lock();
        match guard.state {
            SessionState::Connected => Ok(()),
            SessionState::Busy(_) => Err(Error::DeviceBusy),
            SessionState::Disconnected => {
                self.transport.open()?;
                guard.set(SessionState::Connected);
                info!("session reconnected");
                Ok(())
            }
        }
    }

    /// Closes the transport. Idempotent.
    ///
    /// An operation blocked on the device fails with
    /// [`Error::Cancelled`] or [`Error::TransportLost`].
    pub fn close(&self) {
        let previous = {
            let mut guard = self.guard.lock();
            let previous = guard.state;
            guard.set(SessionState::Disconnected);
            previous
        };
        if previous != SessionState::Disconnected {
            info!(state = ?previous, "closing session");
        }
        self.transport.close();
    }

    /// Reads the name and version of the running application.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotReady`] or [`Error::DeviceBusy`] for the session
    ///   state
    /// - [`Error::MalformedResponse`] if the reply cannot be parsed
    /// - device and transport errors of the exchange
    pub fn app_info(&self) -> Result<AppInfo> {
        self.begin(OperationKind::AppInfo)?.app_info()
    }

    /// Reads the target identifier and firmware version.
    ///
    /// Only the dashboard answers this; with an application open the device
    /// reports [`Error::WrongApplication`].
    ///
    /// # Errors
    ///
    /// As [`app_info`](Self::app_info).
    pub fn target_info(&self) -> Result<TargetInfo> {
        let op = self.begin(OperationKind::TargetInfo)?;
        let command = ApduCommand::new(ins::CLA_APP, ins::GET_DEVICE_INFO, 0x00, 0x00, vec![])?;
        let response = op.exchange_checked(&command, self.config.exchange_timeout(), "BOLOS")?;
        TargetInfo::parse(response.data())
    }

    /// Reads the public key at `path` on `curve`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] if the path is empty or too deep, before any
    ///   device interaction
    /// - [`Error::InvalidPublicKey`] if the key has the wrong size or is not
    ///   on the curve
    /// - device and transport errors of the exchange
    pub fn public_key(&self, path: &DerivationPath, curve: Curve) -> Result<PublicKey> {
        let encoded = path.encode_with_max_depth(self.config.max_path_depth)?;
        self.begin(OperationKind::PublicKey)?
            .public_key(encoded, curve)
    }

    /// Reads the secp256k1 key at `path` and derives its account address.
    ///
    /// # Errors
    ///
    /// As [`public_key`](Self::public_key).
    pub fn address(&self, path: &DerivationPath) -> Result<(PublicKey, Address)> {
        let key = self.public_key(path, Curve::Secp256k1)?;
        let address = Address::from_public_key(&key)?;
        debug!(%address, %path, "derived address");
        Ok((key, address))
    }

    /// Asks the dashboard to launch application `name`.
    ///
    /// The device asks the user to confirm, so the wait is bounded by the
    /// approval timeout. A launched application re-enumerates on the bus,
    /// so the session is closed afterwards and must be reconnected.
    ///
    /// # Errors
    ///
    /// - [`Error::UserRejected`] if the user refuses
    /// - device and transport errors of the exchange
    pub fn open_app(&self, name: &str) -> Result<()> {
        let op = self.begin(OperationKind::OpenApp)?;
        let command = ApduCommand::new(
            ins::CLA_APP,
            ins::RUN_APP,
            0x00,
            0x00,
            name.as_bytes().to_vec(),
        )?;
        info!(app = name, "confirm opening the application on your device");
        op.exchange_checked(&command, self.config.approval_timeout(), "BOLOS")?;
        drop(op);

        self.close();
        Ok(())
    }

    /// Asks the running application to exit back to the dashboard.
    ///
    /// The session is closed afterwards, as for
    /// [`open_app`](Self::open_app).
    ///
    /// # Errors
    ///
    /// Device and transport errors of the exchange.
    pub fn quit_app(&self) -> Result<()> {
        let op = self.begin(OperationKind::QuitApp)?;
        let command = ApduCommand::new(ins::CLA_OS, ins::QUIT_APP, 0x00, 0x00, vec![])?;
        op.exchange_checked(&command, self.config.exchange_timeout(), &self.config.app.name)?;
        drop(op);

        self.close();
        Ok(())
    }

    /// Marks the session busy with `kind`.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceBusy`] if another operation is in flight,
    /// [`Error::SessionNotReady`] if the session is disconnected.
    pub(crate) fn begin(&self, kind: OperationKind) -> Result<Operation<'_>> {
        let mut guard = self.guard.lock();
        match guard.state {
            SessionState::Connected => {
                let epoch = guard.set(SessionState::Busy(kind));
                debug!(%kind, "operation started");
                Ok(Operation {
                    session: self,
                    kind,
                    epoch,
                })
            }
            SessionState::Busy(current) => {
                debug!(%kind, %current, "rejecting operation on busy session");
                Err(Error::DeviceBusy)
            }
            SessionState::Disconnected => Err(Error::SessionNotReady),
        }
    }

    /// Sends one APDU and reads its response, waiting at most `timeout`
    /// for the whole response.
    fn transmit(&self, command: &ApduCommand, timeout: Duration) -> Result<ApduResponse> {
        let frames = self.codec.encode_command(command)?;
        debug!(
            cla = command.cla(),
            ins = command.ins(),
            p1 = command.p1(),
            p2 = command.p2(),
            len = command.data().len(),
            frames = frames.len(),
            "sending APDU"
        );
        for frame in &frames {
            self.transport.write(frame)?;
        }

        let deadline = Instant::now() + timeout;
        let mut decoder = self.codec.decoder();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout.as_millis() as u64));
            }
            let report = self.transport.read(remaining)?;
            if let Decoded::Complete(response) = decoder.push_response(&report)? {
                debug!(
                    sw = format_args!("{:#06x}", response.status_word()),
                    len = response.data().len(),
                    "received response"
                );
                return Ok(response);
            }
        }
    }

    /// Drops the session to `Disconnected` after a transport error seen by
    /// the operation started at `epoch`. A stale operation leaves a newer
    /// one alone.
    fn lose(&self, epoch: u64, err: &Error) {
        let mut guard = self.guard.lock();
        if guard.epoch != epoch {
            debug!(error = %err, "ignoring transport failure of a finished operation");
            return;
        }
        warn!(error = %err, "transport failure, disconnecting session");
        guard.set(SessionState::Disconnected);
        self.transport.close();
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// An in-flight operation. Dropping it returns the session to
/// `Connected` unless the operation lost the transport.
pub(crate) struct Operation<'s> {
    session: &'s DeviceSession,
    kind: OperationKind,
    epoch: u64,
}

impl Operation<'_> {
    /// Returns the session running the operation.
    pub(crate) const fn session(&self) -> &DeviceSession {
        self.session
    }

    /// Exchanges one APDU. Transport errors disconnect the session.
    pub(crate) fn exchange(&self, command: &ApduCommand, timeout: Duration) -> Result<ApduResponse> {
        self.session.transmit(command, timeout).inspect_err(|err| {
            if err.is_transport() {
                self.session.lose(self.epoch, err);
            }
        })
    }

    /// Exchanges one APDU and maps a non-success status word to its error.
    pub(crate) fn exchange_checked(
        &self,
        command: &ApduCommand,
        timeout: Duration,
        expected_app: &str,
    ) -> Result<ApduResponse> {
        let response = self.exchange(command, timeout)?;
        status::check(response, expected_app)
    }

    /// Reads the running application's name and version.
    pub(crate) fn app_info(&self) -> Result<AppInfo> {
        let command = ApduCommand::new(ins::CLA_OS, ins::APP_INFO, 0x00, 0x00, vec![])?;
        let config = self.session.config();
        let response =
            self.exchange_checked(&command, config.exchange_timeout(), &config.app.name)?;
        let info = AppInfo::parse(response.data())?;
        debug!(app = %info.name, version = %info.version, "application info");
        Ok(info)
    }

    /// Reads a public key for an already encoded path.
    fn public_key(&self, encoded_path: Vec<u8>, curve: Curve) -> Result<PublicKey> {
        let command = ApduCommand::new(
            ins::CLA_APP,
            ins::GET_PUBLIC_KEY,
            0x00,
            curve.id(),
            encoded_path,
        )?;
        let config = self.session.config();
        let response =
            self.exchange_checked(&command, config.exchange_timeout(), &config.app.name)?;

        let mut reader = Reader::new(response.data());
        let key = reader.prefixed("public key")?;
        PublicKey::from_bytes(curve, key)
    }
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        let mut guard = self.session.guard.lock();
        if guard.epoch == self.epoch && guard.state == SessionState::Busy(self.kind) {
            guard.set(SessionState::Connected);
            debug!(kind = %self.kind, "operation finished");
        }
    }
}
