//! Strong type definitions for the tidewire sync layer.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in a peer's change history: `(version, sub)`.
///
/// `version` is the originating store's logical commit clock (its
/// `db_version`). `sub` is reserved for splitting one logical transaction
/// across multiple wire messages; it is always 0 today but must be carried
/// so the slot survives format evolution.
///
/// Sequence pairs are totally ordered lexicographically on `(version, sub)`.
/// The derived `Ord` gives exactly that because of field order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SeqPair {
    /// Logical commit clock value of the originating store.
    pub version: i64,
    /// Intra-transaction split index. Reserved; always 0 in current streams.
    pub sub: u32,
}

impl SeqPair {
    /// The genesis position: nothing has been streamed yet.
    pub const ZERO: Self = Self { version: 0, sub: 0 };

    /// Create a sequence pair.
    pub const fn new(version: i64, sub: u32) -> Self {
        Self { version, sub }
    }
}

impl fmt::Display for SeqPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.version, self.sub)
    }
}

/// A 16-byte replica identity, unique per participating database instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(pub [u8; 16]);

impl SiteId {
    /// Width of a site identifier in bytes.
    pub const LEN: usize = 16;

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Generate a random site ID for a new replica.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != Self::LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// The zero site ID (used as a sentinel in tests).
    pub const ZERO: Self = Self([0u8; 16]);
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({})", self.to_hex())
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

impl AsRef<[u8]> for SiteId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 16]> for SiteId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for SiteId {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 16] = slice.try_into()?;
        Ok(Self(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_pair_ordering_is_lexicographic() {
        assert!(SeqPair::new(1, 0) < SeqPair::new(2, 0));
        assert!(SeqPair::new(1, 0) < SeqPair::new(1, 1));
        assert!(SeqPair::new(1, 5) < SeqPair::new(2, 0));
        assert_eq!(SeqPair::new(3, 0), SeqPair::new(3, 0));
        assert!(SeqPair::ZERO < SeqPair::new(0, 1));
    }

    #[test]
    fn test_seq_pair_display() {
        assert_eq!(SeqPair::new(9, 0).to_string(), "(9, 0)");
    }

    #[test]
    fn test_site_id_hex_roundtrip() {
        let id = SiteId::from_bytes([0x42; 16]);
        let hex = id.to_hex();
        let recovered = SiteId::from_hex(&hex).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_site_id_from_hex_rejects_wrong_length() {
        assert!(SiteId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_site_id_try_from_slice() {
        let bytes = [7u8; 16];
        let id = SiteId::try_from(&bytes[..]).unwrap();
        assert_eq!(id.as_bytes(), &bytes);

        assert!(SiteId::try_from(&bytes[..8]).is_err());
    }

    #[test]
    fn test_random_site_ids_differ() {
        assert_ne!(SiteId::random(), SiteId::random());
    }
}
