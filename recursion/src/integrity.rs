//! SHA-256 sealing of checkpoint payloads

use crate::types::DeepCheckpoint;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest as _;
use sha2::Sha256;
use std::fmt;

/// SHA-256 digest of a compressed payload
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

/// Computes and checks payload digests. Comparison is exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityValidator;

impl IntegrityValidator {
    pub const fn new() -> Self {
        Self
    }

    pub fn hash(&self, payload: &[u8]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Digest(bytes)
    }

    pub fn verify_payload(&self, payload: &[u8], digest: &Digest) -> bool {
        self.hash(payload) == *digest
    }

    /// Recompute the digest over the stored payload and compare
    pub fn verify(&self, checkpoint: &DeepCheckpoint) -> bool {
        self.verify_payload(&checkpoint.payload, &checkpoint.digest)
    }
}
