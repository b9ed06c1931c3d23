//! Transport-level framing of APDUs into fixed-size HID reports.
//!
//! A Ledger device exchanges 64-byte reports. A serialized APDU is split
//! across as many reports as needed, each prefixed with a small header:
//!
//! ```text
//! first frame:        | channel (2B) | tag 0x05 | seq (2B) | length (2B) | data ... |
//! continuation frame: | channel (2B) | tag 0x05 | seq (2B) | data ...               |
//! ```
//!
//! Sequence indexes start at zero and increase by one per frame. The
//! two-byte big-endian length, carried only by the first frame, is the
//! length of the whole message; the receiver accumulates frames until that
//! many bytes have arrived and discards the zero padding of the last frame.
//! Both directions use the same format, and there is no per-frame
//! acknowledgement: one logical command yields exactly one logical response.
//!
//! # Example
//!
//! ```
//! use ledger_signer_core::ledger::framing::{Decoded, FrameCodec};
//! use ledger_signer_core::ledger::ApduCommand;
//!
//! let codec = FrameCodec::default();
//! let command = ApduCommand::new(0xE0, 0x01, 0x00, 0x00, vec![]).unwrap();
//! let frames = codec.encode_command(&command).unwrap();
//! assert_eq!(frames.len(), 1);
//!
//! let mut decoder = codec.decoder();
//! let Decoded::Complete(bytes) = decoder.push(&frames[0]).unwrap() else {
//!     panic!("single frame message");
//! };
//! assert_eq!(bytes, command.to_bytes());
//! ```

use tracing::trace;

use super::apdu::{ApduCommand, ApduResponse};
use crate::error::{Error, Result};

/// Default HID channel identifier.
pub const DEFAULT_CHANNEL: u16 = 0x0101;

/// Default HID report size.
pub const DEFAULT_PACKET_SIZE: usize = 64;

/// Default upper bound for a reassembled message.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4096;

/// Tag marking an APDU frame.
const TAG_APDU: u8 = 0x05;

/// Channel, tag and sequence index.
const HEADER_LEN: usize = 5;

/// Message length, first frame only.
const LENGTH_LEN: usize = 2;

/// The outcome of feeding one frame to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// The message is complete.
    Complete(T),
    /// More frames are needed.
    NeedMore,
}

/// Splits messages into frames and builds reassemblers for the reverse
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    /// HID channel identifier.
    channel: u16,

    /// Size of one report in bytes.
    packet_size: usize,

    /// Largest message a reassembler accepts.
    max_message_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            packet_size: DEFAULT_PACKET_SIZE,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

impl FrameCodec {
    /// Creates a codec for the given channel and report size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `packet_size` cannot hold a first-frame
    /// header plus at least one data byte.
    pub fn new(channel: u16, packet_size: usize, max_message_len: usize) -> Result<Self> {
        if packet_size <= HEADER_LEN + LENGTH_LEN {
            return Err(Error::Config(format!(
                "packet size {packet_size} cannot hold a frame header"
            )));
        }
        if max_message_len < 2 {
            return Err(Error::Config(
                "maximum message length must hold a status word".to_string(),
            ));
        }

        Ok(Self {
            channel,
            packet_size,
            max_message_len,
        })
    }

    /// Returns the HID channel identifier.
    #[must_use]
    pub const fn channel(&self) -> u16 {
        self.channel
    }

    /// Returns the report size.
    #[must_use]
    pub const fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Data bytes carried by the first frame.
    #[must_use]
    pub const fn first_frame_capacity(&self) -> usize {
        self.packet_size - HEADER_LEN - LENGTH_LEN
    }

    /// Data bytes carried by every continuation frame.
    #[must_use]
    pub const fn continuation_capacity(&self) -> usize {
        self.packet_size - HEADER_LEN
    }

    /// Number of frames needed for a message of `len` bytes.
    #[must_use]
    pub const fn frame_count(&self, len: usize) -> usize {
        let first = self.first_frame_capacity();
        if len <= first {
            1
        } else {
            1 + (len - first).div_ceil(self.continuation_capacity())
        }
    }

    /// Splits `message` into zero-padded frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the message length does not fit
    /// the two-byte length prefix.
    pub fn encode(&self, message: &[u8]) -> Result<Vec<Vec<u8>>> {
        let len = u16::try_from(message.len()).map_err(|_| Error::PayloadTooLarge {
            len: message.len(),
            limit: u16::MAX as usize,
        })?;

        let mut frames = Vec::with_capacity(self.frame_count(message.len()));
        let mut remaining = message;
        let mut seq: u16 = 0;

        loop {
            let mut frame = Vec::with_capacity(self.packet_size);
            frame.extend_from_slice(&self.channel.to_be_bytes());
            frame.push(TAG_APDU);
            frame.extend_from_slice(&seq.to_be_bytes());

            let capacity = if seq == 0 {
                frame.extend_from_slice(&len.to_be_bytes());
                self.first_frame_capacity()
            } else {
                self.continuation_capacity()
            };

            let take = remaining.len().min(capacity);
            frame.extend_from_slice(&remaining[..take]);
            frame.resize(self.packet_size, 0);
            remaining = &remaining[take..];

            trace!(seq, data = take, "encoded frame");
            frames.push(frame);

            if remaining.is_empty() {
                break;
            }
            seq = seq.wrapping_add(1);
        }

        Ok(frames)
    }

    /// Frames a serialized command.
    ///
    /// # Errors
    ///
    /// See [`encode`](Self::encode).
    pub fn encode_command(&self, command: &ApduCommand) -> Result<Vec<Vec<u8>>> {
        self.encode(&command.to_bytes())
    }

    /// Frames a serialized response, as a device would.
    ///
    /// # Errors
    ///
    /// See [`encode`](Self::encode).
    pub fn encode_response(&self, response: &ApduResponse) -> Result<Vec<Vec<u8>>> {
        self.encode(&response.to_bytes())
    }

    /// Returns a fresh reassembler for one incoming message.
    #[must_use]
    pub fn decoder(&self) -> Reassembler {
        Reassembler::new(self.channel, self.max_message_len)
    }
}

/// Accumulates frames until a complete message is available.
///
/// A reassembler handles one message; after [`Decoded::Complete`] it resets
/// itself and is ready for the next one.
#[derive(Debug, Clone)]
pub struct Reassembler {
    /// Expected channel identifier.
    channel: u16,

    /// Largest accepted declared length.
    max_message_len: usize,

    /// Length declared by the first frame.
    expected_len: Option<usize>,

    /// Sequence index of the next frame.
    next_seq: u16,

    /// Bytes accumulated so far.
    buffer: Vec<u8>,
}

impl Reassembler {
    /// Creates an empty reassembler.
    #[must_use]
    pub const fn new(channel: u16, max_message_len: usize) -> Self {
        Self {
            channel,
            max_message_len,
            expected_len: None,
            next_seq: 0,
            buffer: Vec::new(),
        }
    }

    /// Returns `true` if no frame of the current message has arrived yet.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.expected_len.is_none()
    }

    /// Discards any partially assembled message.
    pub fn reset(&mut self) {
        self.expected_len = None;
        self.next_seq = 0;
        self.buffer.clear();
    }

    /// Feeds one frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] on a truncated header, a foreign
    /// channel or tag, an out-of-order sequence index, or a declared length
    /// above the configured maximum. The reassembler is reset on error.
    pub fn push(&mut self, frame: &[u8]) -> Result<Decoded<Vec<u8>>> {
        let result = self.push_inner(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn push_inner(&mut self, frame: &[u8]) -> Result<Decoded<Vec<u8>>> {
        if frame.len() < HEADER_LEN {
            return Err(Error::MalformedFrame(format!(
                "frame of {} bytes is shorter than its header",
                frame.len()
            )));
        }

        let channel = u16::from_be_bytes([frame[0], frame[1]]);
        if channel != self.channel {
            return Err(Error::MalformedFrame(format!(
                "unexpected channel {channel:#06x}"
            )));
        }
        if frame[2] != TAG_APDU {
            return Err(Error::MalformedFrame(format!(
                "unexpected tag {:#04x}",
                frame[2]
            )));
        }

        let seq = u16::from_be_bytes([frame[3], frame[4]]);
        if seq != self.next_seq {
            return Err(Error::MalformedFrame(format!(
                "unexpected sequence index {seq}, expected {}",
                self.next_seq
            )));
        }

        let mut data = &frame[HEADER_LEN..];
        let expected = match self.expected_len {
            Some(expected) => expected,
            None => {
                if data.len() < LENGTH_LEN {
                    return Err(Error::MalformedFrame(
                        "first frame is missing its length".to_string(),
                    ));
                }
                let declared = u16::from_be_bytes([data[0], data[1]]) as usize;
                if declared > self.max_message_len {
                    return Err(Error::MalformedFrame(format!(
                        "declared length {declared} exceeds limit {}",
                        self.max_message_len
                    )));
                }
                data = &data[LENGTH_LEN..];
                self.expected_len = Some(declared);
                self.buffer.reserve(declared);
                declared
            }
        };

        let take = (expected - self.buffer.len()).min(data.len());
        self.buffer.extend_from_slice(&data[..take]);
        self.next_seq = self.next_seq.wrapping_add(1);
        trace!(seq, data = take, total = self.buffer.len(), expected, "decoded frame");

        if self.buffer.len() == expected {
            let message = core::mem::take(&mut self.buffer);
            self.reset();
            Ok(Decoded::Complete(message))
        } else {
            Ok(Decoded::NeedMore)
        }
    }

    /// Feeds one frame of a response and parses the completed message.
    ///
    /// # Errors
    ///
    /// As [`push`](Self::push), plus [`Error::MalformedFrame`] if the
    /// completed message is too short to carry a status word.
    pub fn push_response(&mut self, frame: &[u8]) -> Result<Decoded<ApduResponse>> {
        match self.push(frame)? {
            Decoded::Complete(bytes) => Ok(Decoded::Complete(ApduResponse::from_bytes(bytes)?)),
            Decoded::NeedMore => Ok(Decoded::NeedMore),
        }
    }

    /// Feeds one frame of a command and parses the completed message.
    ///
    /// # Errors
    ///
    /// As [`push`](Self::push), plus the parse errors of
    /// [`ApduCommand::from_bytes`].
    pub fn push_command(&mut self, frame: &[u8]) -> Result<Decoded<ApduCommand>> {
        match self.push(frame)? {
            Decoded::Complete(bytes) => Ok(Decoded::Complete(ApduCommand::from_bytes(&bytes)?)),
            Decoded::NeedMore => Ok(Decoded::NeedMore),
        }
    }
}
