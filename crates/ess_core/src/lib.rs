//! ESS Infra Core Types
//!
//! This crate contains pure types and logic with no I/O: identities for
//! declared resources, content fingerprints, the secret wrapper and the
//! redactor used on every diagnostic path.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;
pub mod redact;
pub mod secret;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::{Fingerprinter, Hash};
pub use id::ResourceId;
pub use redact::{RedactedView, Redactor};
pub use secret::{ExposeSecret, REDACTED, Secret};
