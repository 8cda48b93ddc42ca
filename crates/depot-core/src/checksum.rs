//! Content checksum type and incremental hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A file content checksum: the lowercase hex encoding of a SHA-256 digest.
///
/// Checksums are the identity key of every file the engine knows about.
/// Request deduplication, cache lookups and content-addressed placement
/// all key on this value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute the checksum of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex_encode(&hasher.finalize()))
    }

    /// Create an incremental hasher for streaming input.
    pub fn hasher() -> ChecksumHasher {
        ChecksumHasher(Sha256::new())
    }

    /// Parse from a lowercase hex string.
    ///
    /// Uppercase input is normalized; non-hex input is rejected.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidChecksum(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidChecksum(format!(
                "non-hex character in checksum: {s}"
            )));
        }
        Ok(Self(s.to_lowercase()))
    }

    /// The hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.0[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental SHA-256 checksum hasher.
pub struct ChecksumHasher(Sha256);

impl ChecksumHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the checksum.
    pub fn finalize(self) -> Checksum {
        Checksum(hex_encode(&self.0.finalize()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_matches_incremental() {
        let whole = Checksum::compute(b"hello world");
        let mut hasher = Checksum::hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(whole, hasher.finalize());
    }

    #[test]
    fn test_parse_roundtrip() {
        let checksum = Checksum::compute(b"data");
        let parsed = Checksum::parse(checksum.as_str()).unwrap();
        assert_eq!(checksum, parsed);
    }

    #[test]
    fn test_parse_normalizes_case() {
        let checksum = Checksum::compute(b"data");
        let upper = checksum.as_str().to_uppercase();
        assert_eq!(Checksum::parse(&upper).unwrap(), checksum);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Checksum::parse("abc").is_err());
        assert!(Checksum::parse(&"z".repeat(64)).is_err());
    }
}
