//! BIP-32 derivation paths and their on-device encoding.
//!
//! A path such as `m/44'/60'/0'/0/0` is a sequence of 32-bit child indexes;
//! a trailing `'` (or `h`) marks a hardened index, encoded by setting the
//! top bit. On the wire a path is one length byte followed by four
//! big-endian bytes per segment:
//!
//! ```text
//! | depth (1B) | index 0 (4B BE) | index 1 (4B BE) | ... |
//! ```
//!
//! # Example
//!
//! ```
//! use ledger_signer_core::ledger::DerivationPath;
//!
//! let path: DerivationPath = "m/44'/60'".parse().unwrap();
//! assert_eq!(
//!     path.encode().unwrap(),
//!     vec![0x02, 0x80, 0x00, 0x00, 0x2C, 0x80, 0x00, 0x00, 0x3C]
//! );
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{Error, Result};

/// Top bit marking a hardened index.
pub const HARDENED: u32 = 0x8000_0000;

/// Deepest path the device firmware accepts.
pub const MAX_DEPTH: usize = 10;

/// One segment of a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildIndex {
    /// Index without the hardened bit.
    index: u32,

    /// Whether the segment is hardened.
    hardened: bool,
}

impl ChildIndex {
    /// Creates a normal (non-hardened) segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if `index` has the top bit set.
    pub fn normal(index: u32) -> Result<Self> {
        Self::new(index, false)
    }

    /// Creates a hardened segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if `index` has the top bit set.
    pub fn hardened(index: u32) -> Result<Self> {
        Self::new(index, true)
    }

    fn new(index: u32, hardened: bool) -> Result<Self> {
        if index & HARDENED != 0 {
            return Err(Error::InvalidPath(format!(
                "index {index} does not fit in 31 bits"
            )));
        }
        Ok(Self { index, hardened })
    }

    /// Splits a raw 32-bit value into index and hardened flag.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            index: raw & !HARDENED,
            hardened: raw & HARDENED != 0,
        }
    }

    /// Returns the index without the hardened bit.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns `true` for hardened segments.
    #[must_use]
    pub const fn is_hardened(self) -> bool {
        self.hardened
    }

    /// Returns the value sent to the device.
    #[must_use]
    pub const fn raw(self) -> u32 {
        if self.hardened {
            self.index | HARDENED
        } else {
            self.index
        }
    }
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// A hierarchical derivation path.
///
/// Construction does not bound the depth; [`encode`](Self::encode) does,
/// so that an empty or over-deep path fails before any device interaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DerivationPath {
    segments: Vec<ChildIndex>,
}

impl DerivationPath {
    /// Creates a path from its segments.
    #[must_use]
    pub const fn new(segments: Vec<ChildIndex>) -> Self {
        Self { segments }
    }

    /// The BIP-44 path `m/44'/coin'/account'/0/index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if any index has the top bit set.
    pub fn bip44(coin: u32, account: u32, index: u32) -> Result<Self> {
        Ok(Self::new(vec![
            ChildIndex::hardened(44)?,
            ChildIndex::hardened(coin)?,
            ChildIndex::hardened(account)?,
            ChildIndex::normal(0)?,
            ChildIndex::normal(index)?,
        ]))
    }

    /// Returns the segments.
    #[must_use]
    pub fn segments(&self) -> &[ChildIndex] {
        &self.segments
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if the path has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new path with `child` appended.
    #[must_use]
    pub fn child(&self, child: ChildIndex) -> Self {
        let mut segments = self.segments.clone();
        segments.push(child);
        Self { segments }
    }

    /// Encodes the path with the default [`MAX_DEPTH`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path is empty or deeper than
    /// [`MAX_DEPTH`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.encode_with_max_depth(MAX_DEPTH)
    }

    /// Encodes the path, bounding its depth by `max_depth`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path is empty or deeper than
    /// `max_depth`.
    pub fn encode_with_max_depth(&self, max_depth: usize) -> Result<Vec<u8>> {
        if self.segments.is_empty() {
            return Err(Error::InvalidPath("path is empty".to_string()));
        }
        let max_depth = max_depth.min(u8::MAX as usize);
        if self.segments.len() > max_depth {
            return Err(Error::InvalidPath(format!(
                "depth {} exceeds maximum {max_depth}",
                self.segments.len()
            )));
        }

        let mut bytes = Vec::with_capacity(1 + 4 * self.segments.len());
        bytes.push(self.segments.len() as u8);
        for segment in &self.segments {
            bytes.extend_from_slice(&segment.raw().to_be_bytes());
        }
        Ok(bytes)
    }

    /// Decodes a path produced by [`encode`](Self::encode).
    ///
    /// Returns the path and the number of bytes consumed, so callers can
    /// continue parsing whatever follows it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the input is truncated or encodes
    /// an empty or over-deep path.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let (&depth, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::InvalidPath("missing depth byte".to_string()))?;
        let depth = depth as usize;
        if depth == 0 || depth > MAX_DEPTH {
            return Err(Error::InvalidPath(format!("invalid depth {depth}")));
        }
        if rest.len() < depth * 4 {
            return Err(Error::InvalidPath(format!(
                "expected {} index bytes, got {}",
                depth * 4,
                rest.len()
            )));
        }

        let segments = rest[..depth * 4]
            .chunks_exact(4)
            .map(|c| ChildIndex::from_raw(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
            .collect();

        Ok((Self { segments }, 1 + depth * 4))
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    /// Parses `m/44'/60'/0'/0/0`; the leading `m/` is optional and `h` is
    /// accepted in place of `'`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let body = s
            .strip_prefix("m/")
            .or_else(|| s.strip_prefix("M/"))
            .unwrap_or(s);
        if body.is_empty() || body == "m" {
            return Err(Error::InvalidPath("path is empty".to_string()));
        }

        let segments = body
            .split('/')
            .map(|part| {
                let (digits, hardened) = match part
                    .strip_suffix('\'')
                    .or_else(|| part.strip_suffix('h'))
                    .or_else(|| part.strip_suffix('H'))
                {
                    Some(digits) => (digits, true),
                    None => (part, false),
                };
                let index = digits
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidPath(format!("invalid segment {part:?}")))?;
                ChildIndex::new(index, hardened)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encode_hardened_pair() {
        let path: DerivationPath = "m/44'/60'".parse().unwrap();
        assert_eq!(
            path.encode().unwrap(),
            vec![0x02, 0x80, 0x00, 0x00, 0x2C, 0x80, 0x00, 0x00, 0x3C]
        );
    }

    #[test]
    fn encode_mixed() {
        let path = DerivationPath::bip44(60, 0, 7).unwrap();
        let bytes = path.encode().unwrap();

        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[13..17], &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[17..21], &[0x00, 0x00, 0x00, 0x07]);
    }

    #[test]
    fn empty_path_is_invalid() {
        let result = DerivationPath::default().encode();
        assert!(matches!(result, Err(Error::InvalidPath(_))));
        assert!(matches!("m/".parse::<DerivationPath>(), Err(Error::InvalidPath(_))));
        assert!(matches!("".parse::<DerivationPath>(), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn too_deep_path_is_invalid() {
        let segments = vec![ChildIndex::normal(1).unwrap(); MAX_DEPTH + 1];
        let result = DerivationPath::new(segments).encode();
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }

    #[test]
    fn custom_max_depth() {
        let path = DerivationPath::bip44(60, 0, 0).unwrap();
        assert!(path.encode_with_max_depth(5).is_ok());
        assert!(matches!(
            path.encode_with_max_depth(4),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn parse_and_display() {
        let path: DerivationPath = "44h/60H/0'/0/3".parse().unwrap();
        assert_eq!(path.to_string(), "m/44'/60'/0'/0/3");
        assert_eq!(path.depth(), 5);
        assert!(path.segments()[2].is_hardened());
        assert!(!path.segments()[3].is_hardened());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("m/44'/x".parse::<DerivationPath>().is_err());
        assert!("m/2147483648".parse::<DerivationPath>().is_err());
        assert!("m//1".parse::<DerivationPath>().is_err());
    }

    #[test]
    fn decode_reports_consumed_bytes() {
        let path: DerivationPath = "m/44'/60'".parse().unwrap();
        let mut bytes = path.encode().unwrap();
        bytes.push(0xFF);

        let (decoded, consumed) = DerivationPath::decode(&bytes).unwrap();
        assert_eq!(decoded, path);
        assert_eq!(consumed, 9);
    }

    #[test]
    fn decode_rejects_truncated() {
        assert!(DerivationPath::decode(&[]).is_err());
        assert!(DerivationPath::decode(&[0x00]).is_err());
        assert!(DerivationPath::decode(&[0x02, 0x80, 0x00, 0x00, 0x2C]).is_err());
    }

    #[test]
    fn serde_as_string() {
        let path: DerivationPath = "m/44'/60'/0'".parse().unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"m/44'/60'/0'\"");
        let back: DerivationPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    fn arb_path() -> impl Strategy<Value = DerivationPath> {
        prop::collection::vec((0u32..HARDENED, any::<bool>()), 1..=MAX_DEPTH).prop_map(|segs| {
            DerivationPath::new(
                segs.into_iter()
                    .map(|(index, hardened)| ChildIndex { index, hardened })
                    .collect(),
            )
        })
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(path in arb_path()) {
            let bytes = path.encode().unwrap();
            prop_assert_eq!(bytes.len(), 1 + 4 * path.depth());

            let (decoded, consumed) = DerivationPath::decode(&bytes).unwrap();
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(&decoded, &path);
        }

        #[test]
        fn display_parse_roundtrip(path in arb_path()) {
            let parsed: DerivationPath = path.to_string().parse().unwrap();
            prop_assert_eq!(parsed, path);
        }
    }
}
