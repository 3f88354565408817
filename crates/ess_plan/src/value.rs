//! Deferred values carried by resource properties and outputs.
//!
//! A [`Value`] is either known at declaration time (a literal), an
//! attribute the engine only learns after creating another resource (a
//! [`Reference`]), a secret from configuration, or a string interpolation
//! of those. Secrecy propagates: any value built from a secret is secret.
//!
//! `Serialize` produces the engine's program expression syntax, in which a
//! secret is written as a reference to its configuration key and never as
//! plaintext.

use ess_core::{Fingerprinter, Hash, REDACTED, ResourceId, Secret};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Reference to an attribute of another declared resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    /// Identity of the referenced resource
    pub target: ResourceId,
    /// Logical name of the referenced resource
    pub resource: String,
    /// Attribute on the referenced resource
    pub property: String,
}

impl Reference {
    /// Create a reference
    #[must_use]
    pub fn new(
        target: ResourceId,
        resource: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            target,
            resource: resource.into(),
            property: property.into(),
        }
    }

    /// Program expression, e.g. `${ess-network.id}`
    #[must_use]
    pub fn expression(&self) -> String {
        format!("${{{}.{}}}", self.resource, self.property)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.property)
    }
}

/// A possibly-deferred property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// String literal
    Str(String),
    /// List of values
    List(Vec<Value>),
    /// Nested record, in declaration order
    Object(IndexMap<String, Value>),
    /// Attribute of another resource, known after it is realized
    Ref(Reference),
    /// Secret taken from configuration
    Secret {
        /// Configuration key the engine reads the secret from
        key: String,
        /// The secret itself
        secret: Secret,
    },
    /// String built from the concatenation of its parts
    Interpolate(Vec<Value>),
}

impl Value {
    /// String literal
    #[must_use]
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Secret bound to a configuration key
    #[must_use]
    pub fn secret(key: impl Into<String>, secret: Secret) -> Self {
        Self::Secret {
            key: key.into(),
            secret,
        }
    }

    /// String interpolation
    #[must_use]
    pub fn interpolate(parts: impl IntoIterator<Item = Value>) -> Self {
        Self::Interpolate(parts.into_iter().collect())
    }

    /// Whether the value contains secret material anywhere
    #[must_use]
    pub fn is_secret(&self) -> bool {
        match self {
            Self::Secret { .. } => true,
            Self::List(items) | Self::Interpolate(items) => items.iter().any(Value::is_secret),
            Self::Object(fields) => fields.values().any(Value::is_secret),
            Self::Bool(_) | Self::Int(_) | Self::Str(_) | Self::Ref(_) => false,
        }
    }

    /// Whether the value is known without the engine realizing anything
    #[must_use]
    pub fn is_known(&self) -> bool {
        match self {
            Self::Ref(_) => false,
            Self::List(items) | Self::Interpolate(items) => items.iter().all(Value::is_known),
            Self::Object(fields) => fields.values().all(Value::is_known),
            Self::Bool(_) | Self::Int(_) | Self::Str(_) | Self::Secret { .. } => true,
        }
    }

    /// All references contained in the value, depth-first
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) | Self::Interpolate(items) => {
                items.iter().for_each(|v| v.collect_references(out));
            }
            Self::Object(fields) => fields.values().for_each(|v| v.collect_references(out)),
            Self::Bool(_) | Self::Int(_) | Self::Str(_) | Self::Secret { .. } => {}
        }
    }

    /// All secrets contained in the value
    #[must_use]
    pub fn secrets(&self) -> Vec<&Secret> {
        match self {
            Self::Secret { secret, .. } => vec![secret],
            Self::List(items) | Self::Interpolate(items) => {
                items.iter().flat_map(Value::secrets).collect()
            }
            Self::Object(fields) => fields.values().flat_map(Value::secrets).collect(),
            Self::Bool(_) | Self::Int(_) | Self::Str(_) | Self::Ref(_) => Vec::new(),
        }
    }

    /// Borrow a string literal
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow a nested field of an object value
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Object(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Content digest for comparisons within this process; secrets
    /// contribute a keyed digest, never plaintext
    #[must_use]
    pub fn digest(&self) -> Hash {
        self.digest_with(true)
    }

    /// Digest that is safe to print or log; a secret contributes only its
    /// configuration key
    #[must_use]
    pub fn public_digest(&self) -> Hash {
        self.digest_with(false)
    }

    fn digest_with(&self, secrets: bool) -> Hash {
        let mut fp = Fingerprinter::new("value");
        match self {
            Self::Bool(b) => fp.field("bool", &[u8::from(*b)]),
            Self::Int(i) => fp.field("int", &i.to_le_bytes()),
            Self::Str(s) => fp.field("str", s.as_bytes()),
            Self::List(items) => {
                fp.field("list", &(items.len() as u64).to_le_bytes());
                for item in items {
                    fp.hash_field("item", &item.digest_with(secrets));
                }
                &mut fp
            }
            Self::Object(fields) => {
                fp.field("object", &(fields.len() as u64).to_le_bytes());
                for (name, value) in fields {
                    fp.hash_field(name, &value.digest_with(secrets));
                }
                &mut fp
            }
            Self::Ref(r) => fp
                .field("ref", r.target.as_bytes())
                .field("property", r.property.as_bytes()),
            Self::Secret { key, secret } => {
                fp.field("secret", key.as_bytes());
                if secrets {
                    fp.hash_field("digest", &secret.digest());
                }
                &mut fp
            }
            Self::Interpolate(parts) => {
                fp.field("interpolate", &(parts.len() as u64).to_le_bytes());
                for part in parts {
                    fp.hash_field("part", &part.digest_with(secrets));
                }
                &mut fp
            }
        };
        fp.finish()
    }

    /// Human-readable form for previews; any secret value prints as `[secret]`
    #[must_use]
    pub fn display(&self) -> String {
        if self.is_secret() {
            return REDACTED.to_string();
        }
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Str(s) => s.clone(),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::display).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Object(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.display()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Self::Ref(r) => r.expression(),
            Self::Interpolate(parts) => parts.iter().map(Value::display).collect(),
            Self::Secret { .. } => REDACTED.to_string(),
        }
    }

    /// Fragment of an interpolated program string
    fn program_fragment(&self) -> String {
        match self {
            Self::Str(s) => escape_program_text(s),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Ref(r) => r.expression(),
            Self::Secret { key, .. } => format!("${{{}}}", key),
            Self::Interpolate(parts) => parts.iter().map(Value::program_fragment).collect(),
            // Not meaningful inside a string; the validator rejects these.
            Self::List(_) | Self::Object(_) => String::new(),
        }
    }
}

/// Literal `${` must be written `$${` in program text
fn escape_program_text(s: &str) -> String {
    s.replace("${", "$${")
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Str(_) | Self::Ref(_) | Self::Secret { .. } | Self::Interpolate(_) => {
                serializer.serialize_str(&self.program_fragment())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Reference> for Value {
    fn from(value: Reference) -> Self {
        Self::Ref(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A named value exported from the declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputValue {
    /// Export name
    pub name: String,
    /// The deferred value
    pub value: Value,
}

impl OutputValue {
    /// Create an output
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether the engine must treat the output as secret
    #[must_use]
    pub fn is_secret(&self) -> bool {
        self.value.is_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_ref(property: &str) -> Reference {
        Reference::new(
            ResourceId::from_name("gcp:sql:DatabaseInstance", "db"),
            "db",
            property,
        )
    }

    fn conn_string(password: &str) -> Value {
        Value::interpolate([
            Value::str("postgresql://admin:"),
            Value::secret("dbPassword", Secret::new(password)),
            Value::str("@"),
            Value::Ref(instance_ref("connectionName")),
            Value::str("/app"),
        ])
    }

    #[test]
    fn test_secret_propagates_through_interpolation() {
        assert!(conn_string("pw").is_secret());
        let plain = Value::interpolate([Value::str("a"), Value::Ref(instance_ref("name"))]);
        assert!(!plain.is_secret());
    }

    #[test]
    fn test_references_are_collected() {
        let v = conn_string("pw");
        let refs = v.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].property, "connectionName");
        assert!(!v.is_known());
    }

    #[test]
    fn test_display_redacts_secret_values() {
        let v = conn_string("hunter2");
        assert_eq!(v.display(), "[secret]");
        assert_eq!(Value::Ref(instance_ref("name")).display(), "${db.name}");
    }

    #[test]
    fn test_serialize_uses_config_key_not_plaintext() {
        let json = serde_json::to_string(&conn_string("hunter2")).unwrap();
        assert_eq!(
            json,
            "\"postgresql://admin:${dbPassword}@${db.connectionName}/app\""
        );
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_serialize_escapes_literal_interpolation_syntax() {
        let json = serde_json::to_string(&Value::str("cost ${x}")).unwrap();
        assert_eq!(json, "\"cost $${x}\"");
    }

    #[test]
    fn test_serialize_object_keeps_order() {
        let mut fields = IndexMap::new();
        fields.insert("tier".to_string(), Value::str("small"));
        fields.insert("diskSize".to_string(), Value::from(20u32));
        fields.insert("enabled".to_string(), Value::from(true));
        let json = serde_json::to_string(&Value::Object(fields)).unwrap();
        assert_eq!(json, r#"{"tier":"small","diskSize":20,"enabled":true}"#);
    }

    #[test]
    fn test_digest_tracks_secret_changes_without_plaintext() {
        assert_eq!(conn_string("a").digest(), conn_string("a").digest());
        assert_ne!(conn_string("a").digest(), conn_string("b").digest());
    }

    #[test]
    fn test_public_digest_ignores_secret_material() {
        assert_eq!(conn_string("a").public_digest(), conn_string("b").public_digest());
        assert_ne!(conn_string("a").public_digest(), conn_string("a").digest());
        let renamed = Value::secret("otherKey", Secret::new("a"));
        assert_ne!(
            renamed.public_digest(),
            Value::secret("dbPassword", Secret::new("a")).public_digest()
        );
    }

    #[test]
    fn test_output_value_secret_flag() {
        let out = OutputValue::new("dsn", conn_string("pw"));
        assert!(out.is_secret());
        let out = OutputValue::new("name", Value::Ref(instance_ref("connectionName")));
        assert!(!out.is_secret());
    }
}
