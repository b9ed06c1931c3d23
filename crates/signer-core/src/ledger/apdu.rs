//! APDU (Application Protocol Data Unit) command and response types.
//!
//! Ledger applications speak a dialect of ISO 7816-4: every command is a
//! `CLA INS P1 P2 Lc Data` header-plus-body, and every response ends with a
//! two-byte status word.
//!
//! # APDU Command Structure
//!
//! ```text
//! | CLA | INS | P1 | P2 | Lc      | Data |
//! |-----|-----|----|----|---------|------|
//! | 1B  | 1B  | 1B | 1B | 1B / 3B | Var  |
//! ```
//!
//! Unlike a smart card, the Ledger OS expects `Lc` to be present even when
//! the body is empty, so an empty command is always five bytes long.
//!
//! # APDU Response Structure
//!
//! ```text
//! | Data | SW1 | SW2 |
//! |------|-----|-----|
//! | Var  | 1B  | 1B  |
//! ```
//!
//! # Example
//!
//! ```
//! use ledger_signer_core::ledger::{ApduCommand, ApduResponse};
//!
//! let command = ApduCommand::new(0xB0, 0x01, 0x00, 0x00, vec![]).unwrap();
//! assert_eq!(command.to_bytes(), vec![0xB0, 0x01, 0x00, 0x00, 0x00]);
//!
//! let response = ApduResponse::from_bytes(vec![0x01, 0x02, 0x90, 0x00]).unwrap();
//! assert!(response.is_success());
//! assert_eq!(response.data(), &[0x01, 0x02]);
//! ```

use crate::error::{Error, Result};

/// An APDU command.
///
/// Immutable once constructed; the payload length is checked by
/// [`ApduCommand::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    /// Class byte.
    cla: u8,

    /// Instruction byte.
    ins: u8,

    /// Parameter 1.
    p1: u8,

    /// Parameter 2.
    p2: u8,

    /// Command data.
    data: Vec<u8>,
}

impl ApduCommand {
    /// Maximum short APDU data length.
    pub const MAX_SHORT_DATA: usize = 255;

    /// Maximum extended APDU data length.
    pub const MAX_DATA: usize = u16::MAX as usize;

    /// Creates a new APDU command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if `data` exceeds
    /// [`MAX_DATA`](Self::MAX_DATA) bytes.
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self> {
        if data.len() > Self::MAX_DATA {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                limit: Self::MAX_DATA,
            });
        }

        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
        })
    }

    /// Parses a serialized command, as produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the header is truncated or `Lc`
    /// disagrees with the body length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(Error::MalformedFrame(format!(
                "command of {} bytes is shorter than its header",
                bytes.len()
            )));
        }

        let (declared, body) = if bytes[4] == 0x00 && bytes.len() > 5 {
            if bytes.len() < 7 {
                return Err(Error::MalformedFrame("truncated extended Lc".to_string()));
            }
            let len = u16::from_be_bytes([bytes[5], bytes[6]]) as usize;
            (len, &bytes[7..])
        } else {
            (bytes[4] as usize, &bytes[5..])
        };

        if declared != body.len() {
            return Err(Error::MalformedFrame(format!(
                "Lc declares {declared} bytes, body has {}",
                body.len()
            )));
        }

        Self::new(bytes[0], bytes[1], bytes[2], bytes[3], body.to_vec())
    }

    /// Returns the class byte.
    #[must_use]
    pub const fn cla(&self) -> u8 {
        self.cla
    }

    /// Returns the instruction byte.
    #[must_use]
    pub const fn ins(&self) -> u8 {
        self.ins
    }

    /// Returns parameter 1.
    #[must_use]
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// Returns parameter 2.
    #[must_use]
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Returns the command data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serializes the command to bytes.
    ///
    /// Bodies up to 255 bytes use a one-byte `Lc`; longer bodies use the
    /// extended `00 Lc_hi Lc_lo` form.
    ///
    /// # Example
    ///
    /// ```
    /// use ledger_signer_core::ledger::ApduCommand;
    ///
    /// let command = ApduCommand::new(0xE0, 0x02, 0x00, 0x00, vec![0xAA, 0xBB]).unwrap();
    /// assert_eq!(command.to_bytes(), vec![0xE0, 0x02, 0x00, 0x00, 0x02, 0xAA, 0xBB]);
    /// ```
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(7 + self.data.len());

        // Header
        bytes.push(self.cla);
        bytes.push(self.ins);
        bytes.push(self.p1);
        bytes.push(self.p2);

        if self.data.len() > Self::MAX_SHORT_DATA {
            bytes.push(0x00); // Extended Lc marker
            bytes.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        } else {
            bytes.push(self.data.len() as u8);
        }
        bytes.extend_from_slice(&self.data);

        bytes
    }
}

/// An APDU response from the device.
///
/// Contains the response data and the status word. Status words other than
/// `0x9000` are device-reported outcomes, not transport failures; see
/// [`status`](super::status) for their meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data.
    data: Vec<u8>,

    /// Status word.
    status_word: u16,
}

impl ApduResponse {
    /// Success status word (0x9000).
    pub const SW_SUCCESS: u16 = 0x9000;

    /// Creates a response from its parts.
    #[must_use]
    pub const fn new(data: Vec<u8>, status_word: u16) -> Self {
        Self { data, status_word }
    }

    /// Creates a successful response carrying `data`.
    #[must_use]
    pub const fn success(data: Vec<u8>) -> Self {
        Self::new(data, Self::SW_SUCCESS)
    }

    /// Creates an empty response with the given status word.
    #[must_use]
    pub const fn status(status_word: u16) -> Self {
        Self::new(Vec::new(), status_word)
    }

    /// Splits raw bytes into data and the trailing status word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if fewer than two bytes are given.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::MalformedFrame(format!(
                "response of {} bytes has no status word",
                bytes.len()
            )));
        }

        let len = bytes.len();
        let status_word = u16::from_be_bytes([bytes[len - 2], bytes[len - 1]]);
        bytes.truncate(len - 2);

        Ok(Self {
            data: bytes,
            status_word,
        })
    }

    /// Serializes the response to `data || SW1 || SW2`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + 2);
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.status_word.to_be_bytes());
        bytes
    }

    /// Returns the response data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the response and returns the data.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the full status word.
    #[must_use]
    pub const fn status_word(&self) -> u16 {
        self.status_word
    }

    /// Checks if the response indicates success (`SW = 0x9000`).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_word == Self::SW_SUCCESS
    }
}
