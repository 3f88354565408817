//! Secret-valued configuration.
//!
//! A [`Secret`] never prints its plaintext: `Debug`, `Display` and
//! `Serialize` all emit [`REDACTED`]. The only way to the plaintext is
//! [`ExposeSecret::expose_secret`], which makes every read site greppable.

use crate::hash::Hash;
use secrecy::SecretString;
use serde::{Serialize, Serializer};
use std::fmt;

pub use secrecy::ExposeSecret;

/// Placeholder printed wherever a secret would appear
pub const REDACTED: &str = "[secret]";

/// A secret string value
pub struct Secret {
    inner: SecretString,
}

impl Secret {
    /// Wrap a plaintext value
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: SecretString::from(value.into()),
        }
    }

    /// Whether the plaintext is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }

    /// Keyed digest for change detection within this process; never print it
    #[must_use]
    pub fn digest(&self) -> Hash {
        Hash::derive_secret(self.inner.expose_secret().as_bytes())
    }
}

impl ExposeSecret<str> for Secret {
    fn expose_secret(&self) -> &str {
        self.inner.expose_secret()
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        Self::new(self.inner.expose_secret().to_owned())
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.digest() == other.digest()
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
