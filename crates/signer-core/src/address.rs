//! Minter account addresses derived from secp256k1 public keys.
//!
//! The derivation follows the usual Keccak-based scheme:
//!
//! 1. Take the uncompressed public key (65 bytes: `0x04 || x || y`)
//! 2. Remove the `0x04` prefix to get 64 bytes (`x || y`)
//! 3. Compute the Keccak-256 hash of the 64 bytes
//! 4. Take the last 20 bytes of the hash as the address
//!
//! Minter displays addresses as lowercase hex behind an `Mx` prefix.
//!
//! # Example
//!
//! ```
//! use ledger_signer_core::Address;
//!
//! let addr: Address = "Mx0000000000000000000000000000000000000000".parse().unwrap();
//! assert!(addr.is_zero());
//! assert_eq!(addr.to_string(), "Mx0000000000000000000000000000000000000000");
//! ```

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address as AlloyAddress, keccak256};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{Error, Result};
use crate::ledger::{Curve, PublicKey};

/// Display prefix of Minter addresses.
pub const MINTER_PREFIX: &str = "Mx";

/// A Minter account address (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(AlloyAddress);

impl Address {
    /// The length of an address in bytes.
    pub const BYTE_LEN: usize = 20;

    /// Creates a new address from a 20-byte array.
    #[must_use]
    pub const fn new(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(AlloyAddress::new(bytes))
    }

    /// Returns the zero address.
    #[must_use]
    pub const fn zero() -> Self {
        Self(AlloyAddress::ZERO)
    }

    /// Checks if this is the zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Derives the address of a device public key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if the key is not a secp256k1
    /// key.
    pub fn from_public_key(public_key: &PublicKey) -> Result<Self> {
        if public_key.curve() != Curve::Secp256k1 {
            return Err(Error::InvalidPublicKey(format!(
                "addresses are derived from secp256k1 keys, not {}",
                public_key.curve()
            )));
        }
        Self::from_public_key_bytes(public_key.as_bytes())
    }

    /// Derives an address from raw uncompressed public key bytes.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Either 65 bytes (`0x04 || x || y`) or 64 bytes (`x || y`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if:
    /// - The byte length is not 64 or 65
    /// - For 65-byte input, the first byte is not `0x04`
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self> {
        let pubkey_bytes = match bytes.len() {
            64 => bytes,
            65 => {
                if bytes[0] != 0x04 {
                    return Err(Error::InvalidPublicKey(
                        "65-byte public key must start with 0x04".to_string(),
                    ));
                }
                &bytes[1..]
            }
            len => {
                return Err(Error::InvalidPublicKey(format!(
                    "expected 64 or 65 bytes, got {len}"
                )));
            }
        };

        let hash = keccak256(pubkey_bytes);

        let mut address_bytes = [0u8; Self::BYTE_LEN];
        address_bytes.copy_from_slice(&hash[12..]);

        Ok(Self::new(address_bytes))
    }

    /// Returns the address as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::BYTE_LEN] {
        self.0.as_ref()
    }

    /// Returns the address as a 20-byte array.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        self.0.0.0
    }

    /// Returns the address as lowercase hex with the `Mx` prefix.
    #[must_use]
    pub fn to_minter_string(&self) -> String {
        format!("{MINTER_PREFIX}{}", hex::encode(self.as_bytes()))
    }

    /// Returns the address as lowercase hex with the `0x` prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }

    /// Parses an address from `Mx`, `0x` or bare hex.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] if the hex string is invalid, or
    /// if the decoded bytes are not 20 bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use ledger_signer_core::Address;
    ///
    /// let mx = Address::from_hex("Mx00000000000000000000000000000000000000ff").unwrap();
    /// let ox = Address::from_hex("0x00000000000000000000000000000000000000FF").unwrap();
    /// assert_eq!(mx, ox);
    /// ```
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str
            .strip_prefix(MINTER_PREFIX)
            .or_else(|| hex_str.strip_prefix("mx"))
            .or_else(|| hex_str.strip_prefix("0x"))
            .unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;

        let address_bytes: [u8; Self::BYTE_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::HexDecodeFailed(format!(
                "expected {} address bytes, got {}",
                Self::BYTE_LEN,
                b.len()
            ))
        })?;
        Ok(Self::new(address_bytes))
    }

    /// Returns the inner [`alloy_primitives::Address`].
    #[must_use]
    pub const fn inner(&self) -> AlloyAddress {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_minter_string())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_minter_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Public key of the secp256k1 private key `1` (the generator).
    const GENERATOR: &str = "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";

    #[test]
    fn address_from_generator_key() {
        // Private key 1 maps to this well-known account.
        let key = PublicKey::from_bytes(Curve::Secp256k1, &hex::decode(GENERATOR).unwrap()).unwrap();
        let addr = Address::from_public_key(&key).unwrap();

        assert_eq!(
            addr.to_hex(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
        assert_eq!(
            addr.to_string(),
            "Mx7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn address_rejects_other_curves() {
        let mut base = [0x66u8; 32];
        base[0] = 0x58;
        let key = PublicKey::from_bytes(Curve::Ed25519, &base).unwrap();

        assert!(matches!(
            Address::from_public_key(&key),
            Err(Error::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn address_from_public_key_bytes_64_and_65_agree() {
        let mut pubkey_bytes = [0u8; 65];
        pubkey_bytes[0] = 0x04;

        let addr = Address::from_public_key_bytes(&pubkey_bytes).unwrap();
        let addr_64 = Address::from_public_key_bytes(&[0u8; 64]).unwrap();
        assert_eq!(addr, addr_64);

        let expected: [u8; 20] = keccak256([0u8; 64])[12..].try_into().unwrap();
        assert_eq!(addr.to_bytes(), expected);
    }

    #[test]
    fn address_from_public_key_bytes_invalid() {
        let mut pubkey_bytes = [0u8; 65];
        pubkey_bytes[0] = 0x02;
        assert!(matches!(
            Address::from_public_key_bytes(&pubkey_bytes),
            Err(Error::InvalidPublicKey(_))
        ));
        assert!(matches!(
            Address::from_public_key_bytes(&[0u8; 63]),
            Err(Error::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn address_parse_prefixes() {
        let original = Address::new([0xab; 20]);

        assert_eq!(Address::from_hex(&original.to_minter_string()).unwrap(), original);
        assert_eq!(Address::from_hex(&original.to_hex()).unwrap(), original);
        assert_eq!(Address::from_hex(&"ab".repeat(20)).unwrap(), original);
        assert_eq!(
            format!("mx{}", "ab".repeat(20)).parse::<Address>().unwrap(),
            original
        );
    }

    #[test]
    fn address_parse_wrong_length() {
        assert!(matches!(
            Address::from_hex("Mx0102"),
            Err(Error::HexDecodeFailed(_))
        ));
    }

    #[test]
    fn address_serde() {
        let addr = Address::new([0x01; 20]);
        let json = serde_json::to_string(&addr).unwrap();

        assert_eq!(json, format!("\"Mx{}\"", "01".repeat(20)));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);
    }
}
