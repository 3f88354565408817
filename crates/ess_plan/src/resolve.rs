//! Output resolution against realized state.
//!
//! Once the engine has created the resources it knows their
//! provider-assigned attributes. [`Resolver`] substitutes those into the
//! declaration's deferred outputs. Secret outputs come back wrapped in
//! [`Secret`] and only reveal their plaintext on request.

use crate::declare::Declaration;
use crate::value::{OutputValue, Value};
use ess_core::{CoreError, CoreResult, ExposeSecret, REDACTED, Secret};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Provider-assigned attributes per logical resource name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealizedState {
    /// Attributes by resource, then by attribute name
    #[serde(default)]
    pub resources: IndexMap<String, IndexMap<String, serde_json::Value>>,
}

impl RealizedState {
    /// Empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse state from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read state from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| CoreError::Config {
            message: format!("cannot read state file {}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    /// Record an attribute
    #[must_use]
    pub fn with_attribute(
        mut self,
        resource: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.resources
            .entry(resource.into())
            .or_default()
            .insert(attribute.into(), value.into());
        self
    }

    /// Look up an attribute
    #[must_use]
    pub fn attribute(&self, resource: &str, attribute: &str) -> Option<&serde_json::Value> {
        self.resources.get(resource)?.get(attribute)
    }
}

/// A resolved output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedOutput {
    /// Non-secret value
    Plain(serde_json::Value),
    /// Secret value, resolved to a string
    Secret(Secret),
}

impl ResolvedOutput {
    /// Whether the value is secret
    #[must_use]
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }

    /// Printable form; secrets print as `[secret]`
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Plain(serde_json::Value::String(s)) => s.clone(),
            Self::Plain(v) => v.to_string(),
            Self::Secret(_) => REDACTED.to_string(),
        }
    }

    /// Printable form including secret plaintext
    #[must_use]
    pub fn reveal(&self) -> String {
        match self {
            Self::Secret(s) => s.expose_secret().to_string(),
            Self::Plain(_) => self.display(),
        }
    }
}

/// Resolves deferred values against a [`RealizedState`]
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    state: &'a RealizedState,
}

impl<'a> Resolver<'a> {
    /// Resolver over `state`
    #[must_use]
    pub fn new(state: &'a RealizedState) -> Self {
        Self { state }
    }

    /// Resolve one output
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Unresolved`] if a referenced attribute is not
    /// in the state
    pub fn resolve(&self, output: &OutputValue) -> CoreResult<ResolvedOutput> {
        let value = self.resolve_value(&output.value)?;
        debug!(output = %output.name, secret = output.is_secret(), "resolved output");
        if output.is_secret() {
            Ok(ResolvedOutput::Secret(Secret::new(json_text(&value))))
        } else {
            Ok(ResolvedOutput::Plain(value))
        }
    }

    /// Resolve every output of a declaration
    ///
    /// # Errors
    ///
    /// Returns the first resolution failure
    pub fn resolve_all(
        &self,
        declaration: &Declaration,
    ) -> CoreResult<IndexMap<String, ResolvedOutput>> {
        declaration
            .outputs()
            .map(|o| Ok((o.name.clone(), self.resolve(o)?)))
            .collect()
    }

    fn resolve_value(&self, value: &Value) -> CoreResult<serde_json::Value> {
        Ok(match value {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_value(v))
                    .collect::<CoreResult<_>>()?,
            ),
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                    .collect::<CoreResult<_>>()?,
            ),
            Value::Ref(r) => self
                .state
                .attribute(&r.resource, &r.property)
                .cloned()
                .ok_or_else(|| CoreError::Unresolved {
                    resource: r.resource.clone(),
                    property: r.property.clone(),
                })?,
            Value::Secret { secret, .. } => {
                serde_json::Value::String(secret.expose_secret().to_string())
            }
            Value::Interpolate(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&json_text(&self.resolve_value(part)?));
                }
                serde_json::Value::String(out)
            }
        })
    }
}

/// Strings unquoted, everything else as JSON
fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
