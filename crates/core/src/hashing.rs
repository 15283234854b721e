//! Content fingerprints for stored artifacts.

use sha2::{Digest, Sha256};

use crate::types::ArtifactRef;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Derive the content-addressed reference for a blob.
pub fn fingerprint(data: &[u8]) -> ArtifactRef {
    ArtifactRef::from_fingerprint(sha256_hex(data))
}
