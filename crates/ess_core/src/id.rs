//! Identifiers for declared resources.
//!
//! IDs are name-based UUIDs, so evaluating the same declaration twice
//! yields the same identities.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for all resource identities (v5 of `urn:ess:resource` under the URL namespace)
static RESOURCE_NAMESPACE: Lazy<Uuid> =
    Lazy::new(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, b"urn:ess:resource"));

/// Resource identifier - identifies one declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Derive the identity of a resource from its type token and logical name
    #[must_use]
    pub fn from_name(type_token: &str, name: &str) -> Self {
        let key = format!("{}::{}", type_token, name);
        Self(Uuid::new_v5(&RESOURCE_NAMESPACE, key.as_bytes()))
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "res_{}", self.0)
    }
}
