//! Content fingerprints for declarations.
//!
//! Uses BLAKE3 for all hashing operations. Fields are length-prefixed so
//! that `("ab", "c")` and `("a", "bc")` never collide.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Key-derivation context for the secret digest key
const SECRET_CONTEXT: &str = "ess-infra 2024-06 secret digest key v2";

/// Random per-process key for secret digests
static SECRET_KEY: Lazy<[u8; 32]> = Lazy::new(|| {
    let mut seed = [0u8; 32];
    seed[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    seed[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    blake3::derive_key(SECRET_CONTEXT, &seed)
});

/// A BLAKE3 hash (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Compute BLAKE3 hash of data
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Digest of secret material.
    ///
    /// Keyed with a random key drawn once per process: digests compare
    /// equal within one run and cannot be recomputed from a guess outside
    /// it. Never persist or print them.
    #[must_use]
    pub fn derive_secret(data: &[u8]) -> Self {
        Self(*blake3::keyed_hash(&SECRET_KEY, data).as_bytes())
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex prefix for display
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Incremental fingerprint over named fields
pub struct Fingerprinter {
    hasher: blake3::Hasher,
}

impl Fingerprinter {
    /// Start a fingerprint in the given domain (e.g. a resource type token)
    #[must_use]
    pub fn new(domain: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        write_prefixed(&mut hasher, domain.as_bytes());
        Self { hasher }
    }

    /// Add a named field
    pub fn field(&mut self, name: &str, value: &[u8]) -> &mut Self {
        write_prefixed(&mut self.hasher, name.as_bytes());
        write_prefixed(&mut self.hasher, value);
        self
    }

    /// Add a named field whose value is already a hash
    pub fn hash_field(&mut self, name: &str, value: &Hash) -> &mut Self {
        self.field(name, value.as_bytes())
    }

    /// Finish the fingerprint
    #[must_use]
    pub fn finish(&self) -> Hash {
        Hash(*self.hasher.finalize().as_bytes())
    }
}

fn write_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
