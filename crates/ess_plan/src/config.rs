//! Stack configuration.
//!
//! [`StackConfig`] is the immutable input of [`crate::declare`]: defaults are
//! resolved when it is built, and it cannot be built without a password.
//! [`ConfigLoader`] layers the sources with figment, lowest precedence
//! first: built-in defaults, a YAML stack file, `ESS_*` environment
//! variables, then explicit overrides (command-line flags). An empty value
//! in the environment or the overrides is treated as absent, so the layer
//! below it still applies.

use ess_core::{CoreError, CoreResult, Secret};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::value::{Dict, Map, Value};
use figment::{Figment, Metadata, Profile, Provider};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default logical database name
pub const DEFAULT_DB_NAME: &str = "essdb";
/// Default database user
pub const DEFAULT_DB_USER: &str = "essadmin";
/// Default region
pub const DEFAULT_REGION: &str = "us-central1";
/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "ESS_";

/// Configuration key of the database password
pub const DB_PASSWORD_KEY: &str = "dbPassword";

static REGION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]+(-[a-z]+)+[0-9]+$").expect("region pattern is valid")
});

/// Longest identifier PostgreSQL accepts
const MAX_IDENTIFIER_LEN: usize = 63;

/// Immutable, fully-resolved stack configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    db_name: String,
    db_user: String,
    db_password: Secret,
    region: String,
}

impl StackConfig {
    /// Start building a configuration
    #[must_use]
    pub fn builder() -> StackConfigBuilder {
        StackConfigBuilder::default()
    }

    /// Logical database name
    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Database user name
    #[must_use]
    pub fn db_user(&self) -> &str {
        &self.db_user
    }

    /// Database password
    #[must_use]
    pub fn db_password(&self) -> &Secret {
        &self.db_password
    }

    /// Region
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Builder for [`StackConfig`]; unset or empty values take their defaults
#[derive(Debug, Default, Clone)]
pub struct StackConfigBuilder {
    db_name: Option<String>,
    db_user: Option<String>,
    db_password: Option<Secret>,
    region: Option<String>,
}

impl StackConfigBuilder {
    /// Set the database name
    #[must_use]
    pub fn db_name(mut self, value: impl Into<String>) -> Self {
        self.db_name = Some(value.into());
        self
    }

    /// Set the database user
    #[must_use]
    pub fn db_user(mut self, value: impl Into<String>) -> Self {
        self.db_user = Some(value.into());
        self
    }

    /// Set the database password
    #[must_use]
    pub fn db_password(mut self, value: Secret) -> Self {
        self.db_password = Some(value);
        self
    }

    /// Set the region
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = Some(value.into());
        self
    }

    /// Resolve defaults and check every value
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingConfig`] if no password was supplied and
    /// [`CoreError::InvalidConfig`] for unusable values
    pub fn build(self) -> CoreResult<StackConfig> {
        let db_password = self
            .db_password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CoreError::MissingConfig {
                key: DB_PASSWORD_KEY.to_string(),
            })?;

        let db_name = non_empty(self.db_name).unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
        let db_user = non_empty(self.db_user).unwrap_or_else(|| DEFAULT_DB_USER.to_string());
        let region = non_empty(self.region).unwrap_or_else(|| DEFAULT_REGION.to_string());

        check_identifier("dbName", &db_name)?;
        check_identifier("dbUser", &db_user)?;
        if !REGION.is_match(&region) {
            return Err(CoreError::InvalidConfig {
                key: "region".to_string(),
                reason: format!("'{}' is not a region name like {}", region, DEFAULT_REGION),
            });
        }

        Ok(StackConfig {
            db_name,
            db_user,
            db_password,
            region,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn check_identifier(key: &str, value: &str) -> CoreResult<()> {
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(CoreError::InvalidConfig {
            key: key.to_string(),
            reason: format!("longer than {} bytes", MAX_IDENTIFIER_LEN),
        });
    }
    if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(CoreError::InvalidConfig {
            key: key.to_string(),
            reason: "contains whitespace or control characters".to_string(),
        });
    }
    Ok(())
}

/// Non-secret values that override every other source
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    /// Database name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    /// Database user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,
    /// Region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl ConfigOverrides {
    /// Copy with blank values removed
    #[must_use]
    pub fn non_empty(&self) -> Self {
        Self {
            db_name: non_empty(self.db_name.clone()),
            db_user: non_empty(self.db_user.clone()),
            region: non_empty(self.region.clone()),
        }
    }
}

/// Merged view of all sources before defaults are applied
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default, deserialize_with = "scalar_string")]
    db_name: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    db_user: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    db_password: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    region: Option<String>,
}

/// YAML values are typed; an unquoted `dbPassword: 123456` arrives as an
/// integer. Quote passwords with leading zeros or trailing decimal zeros.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Str(s) => s,
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::UInt(u) => u.to_string(),
        Scalar::Float(f) => f.to_string(),
    }))
}

/// Layered configuration loader
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    figment: Figment,
    stack_files: Vec<PathBuf>,
    sources: Vec<String>,
}

impl ConfigLoader {
    /// Loader with no sources; only defaults apply
    #[must_use]
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            stack_files: Vec::new(),
            sources: vec!["defaults".to_string()],
        }
    }

    /// Merge a YAML stack file with camelCase keys (`dbName`, `dbUser`,
    /// `dbPassword`, `region`); the file must exist at load time
    #[must_use]
    pub fn stack_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        self.figment = self.figment.merge(Yaml::file(&path));
        self.sources.push(format!("file:{}", path.display()));
        self.stack_files.push(path);
        self
    }

    /// Merge `ESS_*` environment variables (`ESS_DB_NAME`, `ESS_DB_USER`,
    /// `ESS_DB_PASSWORD`, `ESS_REGION`)
    #[must_use]
    pub fn env(mut self) -> Self {
        self.figment = self.figment.merge(RawEnv { prefix: ENV_PREFIX });
        self.sources.push(format!("env:{}*", ENV_PREFIX));
        self
    }

    /// Merge explicit overrides; blank fields are skipped
    #[must_use]
    pub fn overrides(mut self, overrides: &ConfigOverrides) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(overrides.non_empty()));
        self.sources.push("overrides".to_string());
        self
    }

    /// Sources in merge order
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Merge all sources and build the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a stack file is missing or malformed, if the
    /// password is absent, or if a value is invalid
    pub fn load(&self) -> CoreResult<StackConfig> {
        for path in &self.stack_files {
            if !path.is_file() {
                return Err(CoreError::Config {
                    message: format!("stack file not found: {}", path.display()),
                });
            }
        }

        debug!(sources = ?self.sources, "merging configuration sources");
        let raw: RawConfig = self.figment.extract().map_err(|e| CoreError::Config {
            message: e.to_string(),
        })?;

        let mut builder = StackConfig::builder();
        if let Some(v) = raw.db_name {
            builder = builder.db_name(v);
        }
        if let Some(v) = raw.db_user {
            builder = builder.db_user(v);
        }
        if let Some(v) = raw.region {
            builder = builder.region(v);
        }
        if let Some(v) = raw.db_password {
            builder = builder.db_password(Secret::new(v));
        }
        let config = builder.build()?;

        info!(
            db_name = config.db_name(),
            db_user = config.db_user(),
            region = config.region(),
            db_password = %config.db_password(),
            "stack configuration loaded"
        );
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefixed environment variables as untyped strings.
///
/// figment's `Env` trims and parses every value, which turns `007` into `7`;
/// this provider keeps each value byte for byte. Blank values are skipped.
struct RawEnv {
    prefix: &'static str,
}

impl Provider for RawEnv {
    fn metadata(&self) -> Metadata {
        Metadata::named(format!("`{}*` environment variable(s)", self.prefix))
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        let dict: Dict = Env::prefixed(self.prefix)
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(key, value)| (env_key_to_config_key(key.as_str()), Value::from(value)))
            .collect();
        Ok(Profile::Default.collect(dict))
    }
}

/// `DB_PASSWORD` -> `dbPassword`
fn env_key_to_config_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, part) in key.split('_').filter(|p| !p.is_empty()).enumerate() {
        let lower = part.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}
