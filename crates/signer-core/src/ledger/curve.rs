//! Curve selectors and public keys.
//!
//! The device derives keys on one of several curves. The selector byte is
//! sent with key and signing requests; the public key returned by the device
//! must have the encoding that curve implies.
//!
//! | Curve       | Byte | Public key                  |
//! |-------------|------|-----------------------------|
//! | `secp256k1` | 0x00 | 65-byte uncompressed SEC1   |
//! | `secp256r1` | 0x01 | 65-byte uncompressed SEC1   |
//! | `ed25519`   | 0x02 | 32 bytes                    |
//!
//! # Example
//!
//! ```
//! use ledger_signer_core::ledger::Curve;
//!
//! assert_eq!(Curve::Secp256k1.id(), 0x00);
//! assert_eq!(Curve::Ed25519.public_key_len(), 32);
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An elliptic curve the device can derive keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Curve {
    /// secp256k1, the Bitcoin/Ethereum/Minter curve.
    #[default]
    #[serde(rename = "secp256k1")]
    Secp256k1 = 0x00,

    /// NIST P-256.
    #[serde(rename = "secp256r1")]
    Secp256r1 = 0x01,

    /// Edwards25519.
    #[serde(rename = "ed25519")]
    Ed25519 = 0x02,
}

impl Curve {
    /// Returns the selector byte sent to the device.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Creates a curve from its selector byte.
    ///
    /// # Example
    ///
    /// ```
    /// use ledger_signer_core::ledger::Curve;
    ///
    /// assert_eq!(Curve::from_id(0x02), Some(Curve::Ed25519));
    /// assert_eq!(Curve::from_id(0xFF), None);
    /// ```
    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(Self::Secp256k1),
            0x01 => Some(Self::Secp256r1),
            0x02 => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// Name used by the vendor loader's `--curve` option.
    #[must_use]
    pub const fn loader_name(self) -> &'static str {
        match self {
            Self::Secp256k1 => "secp256k1",
            Self::Secp256r1 => "prime256r1",
            Self::Ed25519 => "ed25519",
        }
    }

    /// Length of a public key on this curve, as returned by the device.
    #[must_use]
    pub const fn public_key_len(self) -> usize {
        match self {
            Self::Secp256k1 | Self::Secp256r1 => 65,
            Self::Ed25519 => 32,
        }
    }

    /// Returns `true` for ECDSA curves, whose signatures may carry a
    /// recovery byte.
    #[must_use]
    pub const fn is_ecdsa(self) -> bool {
        !matches!(self, Self::Ed25519)
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Secp256k1 => "secp256k1",
            Self::Secp256r1 => "secp256r1",
            Self::Ed25519 => "ed25519",
        };
        f.write_str(name)
    }
}

impl FromStr for Curve {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" => Ok(Self::Secp256k1),
            "secp256r1" | "prime256r1" | "p256" | "p-256" => Ok(Self::Secp256r1),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(Error::Config(format!("unknown curve {other:?}"))),
        }
    }
}

/// A public key returned by the device, validated for its curve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    /// Curve the key lives on.
    curve: Curve,

    /// Encoded key.
    #[serde(with = "hex::serde")]
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Validates `bytes` as a public key on `curve`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if the length is wrong for the
    /// curve or the bytes are not a point on it.
    pub fn from_bytes(curve: Curve, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != curve.public_key_len() {
            return Err(Error::InvalidPublicKey(format!(
                "expected {} bytes for {curve}, got {}",
                curve.public_key_len(),
                bytes.len()
            )));
        }

        let valid = match curve {
            Curve::Secp256k1 => k256::PublicKey::from_sec1_bytes(bytes).is_ok(),
            Curve::Secp256r1 => p256::PublicKey::from_sec1_bytes(bytes).is_ok(),
            Curve::Ed25519 => <[u8; 32]>::try_from(bytes)
                .ok()
                .and_then(|raw| ed25519_dalek::VerifyingKey::from_bytes(&raw).ok())
                .is_some(),
        };
        if !valid {
            return Err(Error::InvalidPublicKey(format!("not a {curve} point")));
        }

        Ok(Self {
            curve,
            bytes: bytes.to_vec(),
        })
    }

    /// Returns the curve.
    #[must_use]
    pub const fn curve(&self) -> Curve {
        self.curve
    }

    /// Returns the encoded key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encodes the key as hex with a `0x` prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.bytes))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The secp256k1 generator point, uncompressed.
    pub(crate) const SECP256K1_G: [u8; 65] = [
        0x04, 0x79, 0xBE, 0x66, 0x7E, 0xF9, 0xDC, 0xBB, 0xAC, 0x55, 0xA0, 0x62, 0x95, 0xCE, 0x87,
        0x0B, 0x07, 0x02, 0x9B, 0xFC, 0xDB, 0x2D, 0xCE, 0x28, 0xD9, 0x59, 0xF2, 0x81, 0x5B, 0x16,
        0xF8, 0x17, 0x98, 0x48, 0x3A, 0xDA, 0x77, 0x26, 0xA3, 0xC4, 0x65, 0x5D, 0xA4, 0xFB, 0xFC,
        0x0E, 0x11, 0x08, 0xA8, 0xFD, 0x17, 0xB4, 0x48, 0xA6, 0x85, 0x54, 0x19, 0x9C, 0x47, 0xD0,
        0x8F, 0xFB, 0x10, 0xD4, 0xB8,
    ];

    #[test]
    fn curve_ids() {
        assert_eq!(Curve::Secp256k1.id(), 0x00);
        assert_eq!(Curve::Secp256r1.id(), 0x01);
        assert_eq!(Curve::Ed25519.id(), 0x02);
        assert_eq!(Curve::from_id(0x01), Some(Curve::Secp256r1));
    }

    #[test]
    fn curve_parse() {
        assert_eq!("secp256k1".parse::<Curve>().unwrap(), Curve::Secp256k1);
        assert_eq!("prime256r1".parse::<Curve>().unwrap(), Curve::Secp256r1);
        assert_eq!("Ed25519".parse::<Curve>().unwrap(), Curve::Ed25519);
        assert!("bls12-381".parse::<Curve>().is_err());
    }

    #[test]
    fn curve_loader_names() {
        assert_eq!(Curve::Secp256k1.loader_name(), "secp256k1");
        assert_eq!(Curve::Secp256r1.loader_name(), "prime256r1");
    }

    #[test]
    fn public_key_valid_point() {
        let key = PublicKey::from_bytes(Curve::Secp256k1, &SECP256K1_G).unwrap();
        assert_eq!(key.curve(), Curve::Secp256k1);
        assert_eq!(key.as_bytes(), &SECP256K1_G);
        assert!(key.to_hex().starts_with("0x0479be"));
    }

    #[test]
    fn public_key_wrong_length() {
        let result = PublicKey::from_bytes(Curve::Secp256k1, &SECP256K1_G[..33]);
        assert!(matches!(result, Err(Error::InvalidPublicKey(_))));
    }

    #[test]
    fn public_key_not_on_curve() {
        let mut bytes = SECP256K1_G;
        bytes[64] ^= 0x01;
        let result = PublicKey::from_bytes(Curve::Secp256k1, &bytes);
        assert!(matches!(result, Err(Error::InvalidPublicKey(_))));
    }

    #[test]
    fn ed25519_key() {
        // The Ed25519 base point.
        let mut base = [0x66u8; 32];
        base[0] = 0x58;
        assert!(PublicKey::from_bytes(Curve::Ed25519, &base).is_ok());
        assert!(PublicKey::from_bytes(Curve::Ed25519, &[0u8; 31]).is_err());
    }
}
