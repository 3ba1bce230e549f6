//! Artifact version identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content digest of raw artifact bytes (blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Compute the digest of some bytes
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines
    #[must_use]
    pub fn short(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(12);
        s
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identifies one successfully installed artifact.
///
/// `generation` increases by one on every swap, so two installs of identical
/// bytes are still distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    /// Monotonic swap counter, starting at 1
    pub generation: u64,
    /// blake3 hex digest of the artifact file
    pub digest: String,
    /// When the swap happened
    pub loaded_at: DateTime<Utc>,
}

impl ArtifactVersion {
    /// Create a version record for a swap happening now
    #[must_use]
    pub fn new(generation: u64, digest: Digest) -> Self {
        Self {
            generation,
            digest: digest.to_hex(),
            loaded_at: Utc::now(),
        }
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.digest.get(..12).unwrap_or(&self.digest);
        write!(f, "v{}@{}", self.generation, short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_stable() {
        let a = Digest::compute(b"{\"hooks\":[]}");
        let b = Digest::compute(b"{\"hooks\":[]}");
        let c = Digest::compute(b"{\"hooks\":[1]}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_hex().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_version_display() {
        let v = ArtifactVersion::new(3, Digest::compute(b"x"));
        let s = v.to_string();
        assert!(s.starts_with("v3@"));
        assert_eq!(s.len(), "v3@".len() + 12);
    }
}
