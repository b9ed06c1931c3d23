//! Signatures returned by the device.
//!
//! This module provides the [`Signature`] type holding the result of a
//! signing flow. The device returns the signature as raw bytes after the
//! user approves the transaction:
//!
//! - `r`: 32 bytes (the `R` point encoding for Ed25519)
//! - `s`: 32 bytes
//! - `v`: an optional recovery/parity byte, present only for ECDSA curves
//!   when the application reports it
//!
//! # Example
//!
//! ```
//! use ledger_signer_core::Signature;
//!
//! let sig = Signature::new([1u8; 32], [2u8; 32], Some(1));
//! assert_eq!(sig.to_bytes().len(), 65);
//! assert_eq!(sig.v(), Some(1));
//! ```

use core::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::Curve;

/// A signature produced by the device.
///
/// # Wire Format
///
/// `r (32 bytes) || s (32 bytes)`, followed by `v (1 byte)` when the
/// recovery byte is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// The R component of the signature (32 bytes).
    #[serde(with = "hex_bytes")]
    r: [u8; 32],

    /// The S component of the signature (32 bytes).
    #[serde(with = "hex_bytes")]
    s: [u8; 32],

    /// The recovery parameter, when the device returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<u8>,
}

/// Serde helper for hex encoding/decoding 32-byte arrays.
mod hex_bytes {
    use hex::{decode, encode};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub(super) fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", encode(bytes)))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = decode(s).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| de::Error::custom("expected 32 bytes"))
    }
}

impl Signature {
    /// Length of a signature without recovery byte.
    pub const COMPACT_LEN: usize = 64;

    /// Length of a signature with recovery byte.
    pub const RECOVERABLE_LEN: usize = 65;

    /// Creates a new signature from raw components.
    #[must_use]
    pub const fn new(r: [u8; 32], s: [u8; 32], v: Option<u8>) -> Self {
        Self { r, s, v }
    }

    /// Creates a signature from its 64- or 65-byte wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the slice is neither 64 nor 65
    /// bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let v = match bytes.len() {
            Self::COMPACT_LEN => None,
            Self::RECOVERABLE_LEN => Some(bytes[64]),
            len => {
                return Err(Error::InvalidSignature(format!(
                    "expected {} or {} bytes, got {len}",
                    Self::COMPACT_LEN,
                    Self::RECOVERABLE_LEN
                )));
            }
        };

        let r: [u8; 32] = bytes[0..32]
            .try_into()
            .map_err(|_| Error::InvalidSignature("invalid r component".to_string()))?;
        let s: [u8; 32] = bytes[32..64]
            .try_into()
            .map_err(|_| Error::InvalidSignature("invalid s component".to_string()))?;

        Ok(Self::new(r, s, v))
    }

    /// Parses a device response for `curve` and checks the components.
    ///
    /// For the ECDSA curves `r` and `s` must be non-zero scalars below the
    /// group order; Ed25519 signatures must be 64 bytes with a canonical
    /// `s`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the bytes do not form a valid
    /// signature on `curve`.
    pub fn from_device(curve: Curve, bytes: &[u8]) -> Result<Self> {
        let signature = Self::from_bytes(bytes)?;
        let compact = &bytes[..Self::COMPACT_LEN];

        match curve {
            Curve::Secp256k1 => {
                k256::ecdsa::Signature::from_slice(compact)
                    .map_err(|e| Error::InvalidSignature(format!("secp256k1: {e}")))?;
            }
            Curve::Secp256r1 => {
                p256::ecdsa::Signature::from_slice(compact)
                    .map_err(|e| Error::InvalidSignature(format!("secp256r1: {e}")))?;
            }
            Curve::Ed25519 => {
                if signature.v.is_some() {
                    return Err(Error::InvalidSignature(
                        "ed25519 signatures carry no recovery byte".to_string(),
                    ));
                }
                let sig = ed25519_dalek::Signature::from_slice(compact)
                    .map_err(|e| Error::InvalidSignature(format!("ed25519: {e}")))?;
                // High bits of a canonical S are clear.
                if sig.s_bytes()[31] & 0xE0 != 0 {
                    return Err(Error::InvalidSignature(
                        "ed25519: non-canonical s".to_string(),
                    ));
                }
            }
        }

        Ok(signature)
    }

    /// Serializes the signature to its wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::RECOVERABLE_LEN);
        bytes.extend_from_slice(&self.r);
        bytes.extend_from_slice(&self.s);
        if let Some(v) = self.v {
            bytes.push(v);
        }
        bytes
    }

    /// Returns the R component of the signature.
    #[must_use]
    pub const fn r(&self) -> &[u8; 32] {
        &self.r
    }

    /// Returns the S component of the signature.
    #[must_use]
    pub const fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// Returns the recovery parameter, if present.
    #[must_use]
    pub const fn v(&self) -> Option<u8> {
        self.v
    }

    /// Returns the R component as a [`U256`].
    #[must_use]
    pub const fn r_u256(&self) -> U256 {
        U256::from_be_bytes(self.r)
    }

    /// Returns the S component as a [`U256`].
    #[must_use]
    pub const fn s_u256(&self) -> U256 {
        U256::from_be_bytes(self.s)
    }

    /// Encodes the signature as a hex string with `0x` prefix.
    ///
    /// # Example
    ///
    /// ```
    /// use ledger_signer_core::Signature;
    ///
    /// let sig = Signature::new([0u8; 32], [0u8; 32], None);
    /// assert_eq!(sig.to_hex().len(), 2 + 128);
    /// ```
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Parses a signature from a hex string, optionally prefixed with `0x`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] if the hex string is invalid, or
    /// [`Error::InvalidSignature`] if the decoded bytes are neither 64 nor
    /// 65 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact(r: u8, s: u8) -> Vec<u8> {
        let mut bytes = vec![r; 32];
        bytes.extend_from_slice(&[s; 32]);
        bytes
    }

    #[test]
    fn signature_from_bytes_compact() {
        let sig = Signature::from_bytes(&compact(1, 2)).unwrap();

        assert_eq!(sig.r(), &[1u8; 32]);
        assert_eq!(sig.s(), &[2u8; 32]);
        assert_eq!(sig.v(), None);
        assert_eq!(sig.to_bytes(), compact(1, 2));
    }

    #[test]
    fn signature_from_bytes_recoverable() {
        let mut bytes = compact(1, 2);
        bytes.push(1);

        let sig = Signature::from_bytes(&bytes).unwrap();
        assert_eq!(sig.v(), Some(1));
        assert_eq!(sig.to_bytes(), bytes);
    }

    #[test]
    fn signature_from_bytes_invalid_length() {
        for len in [0, 63, 66] {
            let result = Signature::from_bytes(&vec![1u8; len]);
            assert!(matches!(result, Err(Error::InvalidSignature(_))));
        }
    }

    #[test]
    fn device_signature_checks_scalars() {
        assert!(Signature::from_device(Curve::Secp256k1, &compact(0x11, 0x22)).is_ok());
        assert!(Signature::from_device(Curve::Secp256r1, &compact(0x11, 0x22)).is_ok());

        // Zero r is never a valid ECDSA scalar.
        let result = Signature::from_device(Curve::Secp256k1, &compact(0x00, 0x22));
        assert!(matches!(result, Err(Error::InvalidSignature(_))));

        // 0xff..ff exceeds both group orders.
        let result = Signature::from_device(Curve::Secp256r1, &compact(0xFF, 0x22));
        assert!(matches!(result, Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn device_signature_ed25519() {
        assert!(Signature::from_device(Curve::Ed25519, &compact(0x11, 0x01)).is_ok());

        let result = Signature::from_device(Curve::Ed25519, &compact(0x11, 0xFF));
        assert!(matches!(result, Err(Error::InvalidSignature(_))));

        let mut with_v = compact(0x11, 0x01);
        with_v.push(0);
        assert!(Signature::from_device(Curve::Ed25519, &with_v).is_err());
    }

    #[test]
    fn signature_hex_roundtrip() {
        let sig = Signature::new([5u8; 32], [6u8; 32], Some(1));
        let recovered = Signature::from_hex(&sig.to_hex()).unwrap();
        assert_eq!(sig, recovered);

        let sig = Signature::new([5u8; 32], [6u8; 32], None);
        let hex_no_prefix = sig.to_hex().trim_start_matches("0x").to_string();
        assert_eq!(Signature::from_hex(&hex_no_prefix).unwrap(), sig);
    }

    #[test]
    fn signature_json() {
        let sig = Signature::new([0xAB; 32], [0x01; 32], None);
        let json = serde_json::to_value(sig).unwrap();

        assert_eq!(json["r"], format!("0x{}", "ab".repeat(32)));
        assert!(json.get("v").is_none());
        assert_eq!(serde_json::from_value::<Signature>(json).unwrap(), sig);
    }

    #[test]
    fn signature_u256() {
        let mut s = [0u8; 32];
        s[31] = 42;
        let sig = Signature::new([0u8; 32], s, None);

        assert_eq!(sig.s_u256(), U256::from(42));
        assert_eq!(sig.r_u256(), U256::ZERO);
    }
}
