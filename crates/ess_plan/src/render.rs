//! Engine program rendering.
//!
//! A [`Program`] is the YAML-runtime program document the provisioning
//! engine consumes: a `config` block declaring the secret keys it must
//! supply, one entry per resource, and the exported outputs. Secret values
//! are written as `${key}` config references, and secret outputs are
//! wrapped in `fn::secret`, so the document never holds plaintext.

use crate::declare::Declaration;
use crate::value::Value;
use ess_core::{CoreError, CoreResult};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt::Write as _;

/// Program name
pub const PROGRAM_NAME: &str = "ess-infra";

/// Output document format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// YAML
    #[default]
    Yaml,
    /// Pretty-printed JSON
    Json,
}

/// Declared configuration key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigDecl {
    /// Value type
    #[serde(rename = "type")]
    pub value_type: String,
    /// Whether the engine stores the value encrypted
    pub secret: bool,
}

/// Resource entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramResource {
    /// Provider type token
    #[serde(rename = "type")]
    pub type_token: String,
    /// Input properties
    pub properties: IndexMap<String, Value>,
    /// Resource options
    #[serde(skip_serializing_if = "ResourceOptions::is_empty")]
    pub options: ResourceOptions,
}

/// Options of a resource entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceOptions {
    /// Explicit dependencies, as `${name}` expressions
    #[serde(rename = "dependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceOptions {
    fn is_empty(&self) -> bool {
        self.depends_on.is_empty()
    }
}

/// Exported value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProgramOutput {
    /// Exported as is
    Plain(Value),
    /// Exported as a secret
    Secret {
        /// Wrapped value
        #[serde(rename = "fn::secret")]
        value: Value,
    },
}

/// Engine program document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Program {
    /// Program name
    pub name: String,
    /// Engine runtime
    pub runtime: String,
    /// Keys the engine must supply
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub config: IndexMap<String, ConfigDecl>,
    /// Resources by logical name
    pub resources: IndexMap<String, ProgramResource>,
    /// Exported values
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, ProgramOutput>,
}

impl Program {
    /// Build the program for a declaration
    ///
    /// # Errors
    ///
    /// Returns error if an explicit dependency names an undeclared resource
    pub fn from_declaration(declaration: &Declaration) -> CoreResult<Self> {
        let mut secret_keys = IndexSet::new();
        let mut resources = IndexMap::new();

        for resource in declaration.resources() {
            let properties = resource.kind.properties();
            for value in properties.values() {
                collect_secret_keys(value, &mut secret_keys);
            }

            let mut depends_on = Vec::with_capacity(resource.depends_on.len());
            for dep in &resource.depends_on {
                let target = declaration.dag().get_node(*dep).ok_or_else(|| CoreError::NotFound {
                    kind: "Resource".to_string(),
                    id: dep.to_string(),
                })?;
                depends_on.push(format!("${{{}}}", target.name));
            }

            resources.insert(
                resource.name.clone(),
                ProgramResource {
                    type_token: resource.type_token().to_string(),
                    properties,
                    options: ResourceOptions { depends_on },
                },
            );
        }

        let mut outputs = IndexMap::new();
        for output in declaration.outputs() {
            collect_secret_keys(&output.value, &mut secret_keys);
            let entry = if output.is_secret() {
                ProgramOutput::Secret {
                    value: output.value.clone(),
                }
            } else {
                ProgramOutput::Plain(output.value.clone())
            };
            outputs.insert(output.name.clone(), entry);
        }

        let config = secret_keys
            .into_iter()
            .map(|key| {
                (
                    key,
                    ConfigDecl {
                        value_type: "String".to_string(),
                        secret: true,
                    },
                )
            })
            .collect();

        Ok(Self {
            name: PROGRAM_NAME.to_string(),
            runtime: "yaml".to_string(),
            config,
            resources,
            outputs,
        })
    }

    /// Serialize as YAML
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_yaml(&self) -> CoreResult<String> {
        serde_yaml::to_string(self).map_err(|e| CoreError::InvalidEncoding {
            reason: e.to_string(),
        })
    }

    /// Serialize as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize in `format`
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn render(&self, format: Format) -> CoreResult<String> {
        match format {
            Format::Yaml => self.to_yaml(),
            Format::Json => self.to_json(),
        }
    }
}

fn collect_secret_keys(value: &Value, keys: &mut IndexSet<String>) {
    match value {
        Value::Secret { key, .. } => {
            keys.insert(key.clone());
        }
        Value::List(items) | Value::Interpolate(items) => {
            items.iter().for_each(|v| collect_secret_keys(v, keys));
        }
        Value::Object(fields) => fields.values().for_each(|v| collect_secret_keys(v, keys)),
        Value::Bool(_) | Value::Int(_) | Value::Str(_) | Value::Ref(_) => {}
    }
}

/// Human-readable plan in apply order; secret values and sensitive
/// fields print as `[secret]`
///
/// # Errors
///
/// Returns error if the graph has a cycle
pub fn preview(declaration: &Declaration) -> CoreResult<String> {
    let order = declaration.apply_order()?;
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "{} ({} resources, {} outputs) fingerprint {}",
        PROGRAM_NAME,
        order.len(),
        declaration.outputs().count(),
        declaration.fingerprint().short()
    );
    let redactor = declaration.redactor();
    for resource in order {
        let _ = writeln!(out, "  + {} ({})", resource.name, resource.type_token());
        for (name, value) in resource.kind.properties() {
            let shown = redactor.redact_field(&name, &value.display());
            let _ = writeln!(out, "      {}: {}", name, shown.as_str());
        }
        if !resource.depends_on.is_empty() {
            let deps: Vec<String> = resource
                .depends_on
                .iter()
                .map(|id| declaration.dag().label(*id))
                .collect();
            let _ = writeln!(out, "      dependsOn: {}", deps.join(", "));
        }
    }
    let _ = writeln!(out, "Outputs:");
    for output in declaration.outputs() {
        let shown = redactor.redact(&output.value.display());
        let _ = writeln!(out, "  {}: {}", output.name, shown.as_str());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::declare::{CONNECTION, INSTANCE, NETWORK, declare};
    use ess_core::Secret;

    const PASSWORD: &str = "Tr0ub4dor&3";

    fn program() -> Program {
        let config = StackConfig::builder()
            .db_password(Secret::new(PASSWORD))
            .build()
            .unwrap();
        Program::from_declaration(&declare(&config).unwrap()).unwrap()
    }

    #[test]
    fn test_yaml_document_shape() {
        let yaml = program().to_yaml().unwrap();
        assert!(!yaml.contains(PASSWORD));

        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["name"].as_str(), Some("ess-infra"));
        assert_eq!(doc["runtime"].as_str(), Some("yaml"));
        assert_eq!(doc["config"]["dbPassword"]["secret"].as_bool(), Some(true));
        assert_eq!(doc["config"]["dbPassword"]["type"].as_str(), Some("String"));

        let instance = &doc["resources"][INSTANCE];
        assert_eq!(instance["type"].as_str(), Some("gcp:sql:DatabaseInstance"));
        assert_eq!(
            instance["properties"]["settings"]["ipConfiguration"]["privateNetwork"].as_str(),
            Some("${ess-network.id}")
        );
        assert_eq!(
            instance["options"]["dependsOn"][0].as_str(),
            Some("${ess-sql-conn}")
        );
        assert!(doc["resources"][NETWORK].get("options").is_none());
    }

    #[test]
    fn test_secret_output_is_wrapped() {
        let json = program().to_json().unwrap();
        assert!(!json.contains(PASSWORD));
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            doc["outputs"]["dbConnectionString"]["fn::secret"],
            "postgresql://essadmin:${dbPassword}@${ess-postgres-instance.connectionName}/essdb"
        );
        assert_eq!(
            doc["outputs"]["connectionName"],
            "${ess-postgres-instance.connectionName}"
        );
    }

    #[test]
    fn test_user_password_renders_as_config_reference() {
        let doc: serde_json::Value = serde_json::from_str(&program().to_json().unwrap()).unwrap();
        assert_eq!(doc["resources"]["ess-user"]["properties"]["password"], "${dbPassword}");
        assert_eq!(
            doc["resources"][CONNECTION]["properties"]["reservedPeeringRanges"][0],
            "10.10.0.0/24"
        );
    }

    #[test]
    fn test_render_format_dispatch() {
        let p = program();
        assert_eq!(p.render(Format::Json).unwrap(), p.to_json().unwrap());
        assert_eq!(p.render(Format::default()).unwrap(), p.to_yaml().unwrap());
    }

    #[test]
    fn test_preview_is_ordered_and_redacted() {
        let config = StackConfig::builder()
            .db_password(Secret::new(PASSWORD))
            .build()
            .unwrap();
        let text = preview(&declare(&config).unwrap()).unwrap();
        assert!(!text.contains(PASSWORD));
        assert!(text.contains("password: [secret]"));
        assert!(text.contains("dbConnectionString: [secret]"));
        assert!(text.contains("dependsOn: ess-sql-conn"));
        let net = text.find("+ ess-network").unwrap();
        let db = text.find("+ ess-database").unwrap();
        assert!(net < db);
    }

    #[test]
    fn test_preview_header_independent_of_password() {
        let header = |password: &str| {
            let config = StackConfig::builder()
                .db_password(Secret::new(password))
                .build()
                .unwrap();
            let text = preview(&declare(&config).unwrap()).unwrap();
            text.lines().next().unwrap().to_string()
        };
        assert!(header("letmein").contains("fingerprint "));
        assert_eq!(header("letmein"), header("hunter2"));
        assert_eq!(header("password"), header("123456"));
    }
}
