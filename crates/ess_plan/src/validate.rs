//! Declaration validator.
//!
//! Collects every problem instead of stopping at the first, so a broken
//! declaration is reported in one pass.

use super::dag::Dag;
use crate::resource::{Cidr, ResourceKind, SubnetPurpose};
use crate::value::Value;
use ess_core::ResourceId;
use indexmap::IndexSet;
use tracing::warn;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Cycle detected in the dependency graph
    Cycle {
        /// Description from the graph check
        reason: String,
    },
    /// A property references a resource or attribute that is not declared
    DanglingReference {
        /// Referencing resource
        resource: String,
        /// Property holding the reference
        property: String,
        /// Missing target, as `name.attribute`
        target: String,
    },
    /// An explicit dependency names an undeclared resource
    UnknownDependency {
        /// Dependent resource
        resource: String,
        /// Identity that could not be found
        dependency: ResourceId,
    },
    /// Two resources share a logical name
    DuplicateName {
        /// The repeated name
        name: String,
    },
    /// A private subnet's range is not reserved by any peering connection
    PeeringRangeMismatch {
        /// Subnet name
        subnet: String,
        /// Subnet range
        range: Cidr,
    },
    /// A credential property holds a non-secret value
    PlaintextSecret {
        /// Resource name
        resource: String,
        /// Property name
        property: String,
    },
    /// A private-IP instance is not ordered after the peering connection
    MissingExplicitDependency {
        /// Instance name
        resource: String,
        /// Network whose connection it must wait for
        network: String,
    },
    /// A list or record was used inside a string interpolation
    InvalidInterpolation {
        /// Resource or output name
        owner: String,
        /// Property or output name
        property: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cycle { reason } => write!(f, "Dependency cycle: {}", reason),
            Self::DanglingReference {
                resource,
                property,
                target,
            } => write!(
                f,
                "{}.{} references undeclared {}",
                resource, property, target
            ),
            Self::UnknownDependency {
                resource,
                dependency,
            } => write!(f, "{} depends on undeclared {}", resource, dependency),
            Self::DuplicateName { name } => write!(f, "Duplicate resource name: {}", name),
            Self::PeeringRangeMismatch { subnet, range } => write!(
                f,
                "Private subnet {} range {} is not reserved for peering on its network",
                subnet, range
            ),
            Self::PlaintextSecret { resource, property } => {
                write!(f, "{}.{} must be a secret value", resource, property)
            }
            Self::MissingExplicitDependency { resource, network } => write!(
                f,
                "{} uses private networking on {} but does not depend on its service connection",
                resource, network
            ),
            Self::InvalidInterpolation { owner, property } => write!(
                f,
                "{}.{} interpolates a list or record into a string",
                owner, property
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validator for declaration properties
pub struct Validator {
    /// Require every private subnet's range to be reserved for peering
    pub require_peering_match: bool,
    /// Require credential properties to be secret values
    pub require_secret_credentials: bool,
}

impl Validator {
    /// Create a new validator with every rule enabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            require_peering_match: true,
            require_secret_credentials: true,
        }
    }

    /// Validate a resource graph and the outputs declared over it
    ///
    /// # Errors
    ///
    /// Returns every rule violation found
    pub fn validate<'a>(
        &self,
        dag: &Dag,
        outputs: impl IntoIterator<Item = (&'a str, &'a Value)>,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = dag.validate() {
            errors.push(ValidationError::Cycle {
                reason: e.to_string(),
            });
        }

        self.check_names(dag, &mut errors);
        self.check_references(dag, &mut errors);
        for (name, value) in outputs {
            check_value_references(dag, "outputs", name, value, &mut errors);
            check_interpolation("outputs", name, value, &mut errors);
        }

        if self.require_peering_match {
            self.check_peering_ranges(dag, &mut errors);
        }
        if self.require_secret_credentials {
            self.check_credentials(dag, &mut errors);
        }
        self.check_private_ip_ordering(dag, &mut errors);

        for e in &errors {
            warn!(error = %e, "declaration validation failed");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_names(&self, dag: &Dag, errors: &mut Vec<ValidationError>) {
        let mut seen = IndexSet::new();
        for resource in dag.nodes.values() {
            if !seen.insert(resource.name.as_str()) {
                errors.push(ValidationError::DuplicateName {
                    name: resource.name.clone(),
                });
            }
        }
    }

    fn check_references(&self, dag: &Dag, errors: &mut Vec<ValidationError>) {
        for resource in dag.nodes.values() {
            for (property, value) in resource.kind.properties() {
                check_value_references(dag, &resource.name, &property, &value, errors);
                check_interpolation(&resource.name, &property, &value, errors);
            }
            for dep in &resource.depends_on {
                if !dag.nodes.contains_key(dep) {
                    errors.push(ValidationError::UnknownDependency {
                        resource: resource.name.clone(),
                        dependency: *dep,
                    });
                }
            }
        }
    }

    /// Every private subnet must sit inside a reserved range of a
    /// connection on the same network
    fn check_peering_ranges(&self, dag: &Dag, errors: &mut Vec<ValidationError>) {
        for resource in dag.nodes.values() {
            let ResourceKind::Subnetwork(subnet) = &resource.kind else {
                continue;
            };
            if subnet.purpose != SubnetPurpose::Private {
                continue;
            }
            let covered = dag.nodes.values().any(|other| match &other.kind {
                ResourceKind::ServiceConnection(conn) => {
                    conn.network.target == subnet.network.target
                        && conn
                            .reserved_peering_ranges
                            .iter()
                            .any(|r| r.contains(&subnet.ip_cidr_range))
                }
                _ => false,
            });
            if !covered {
                errors.push(ValidationError::PeeringRangeMismatch {
                    subnet: resource.name.clone(),
                    range: subnet.ip_cidr_range,
                });
            }
        }
    }

    fn check_credentials(&self, dag: &Dag, errors: &mut Vec<ValidationError>) {
        for resource in dag.nodes.values() {
            if let ResourceKind::User(user) = &resource.kind {
                if !user.password.is_secret() {
                    errors.push(ValidationError::PlaintextSecret {
                        resource: resource.name.clone(),
                        property: "password".to_string(),
                    });
                }
            }
        }
    }

    /// A private-IP-only instance must explicitly wait for the peering
    /// connection on its network; the reference graph alone does not order them
    fn check_private_ip_ordering(&self, dag: &Dag, errors: &mut Vec<ValidationError>) {
        for resource in dag.nodes.values() {
            let ResourceKind::DatabaseInstance(instance) = &resource.kind else {
                continue;
            };
            let ip = &instance.settings.ip_configuration;
            if ip.ipv4_enabled {
                continue;
            }
            let ordered = resource.depends_on.iter().any(|dep| {
                matches!(
                    dag.get_node(*dep).map(|r| &r.kind),
                    Some(ResourceKind::ServiceConnection(conn))
                        if conn.network.target == ip.private_network.target
                )
            });
            if !ordered {
                errors.push(ValidationError::MissingExplicitDependency {
                    resource: resource.name.clone(),
                    network: ip.private_network.resource.clone(),
                });
            }
        }
    }

    /// Set whether private subnets must be covered by a peering range
    #[must_use]
    pub fn with_require_peering_match(mut self, require: bool) -> Self {
        self.require_peering_match = require;
        self
    }

    /// Set whether credentials must be secret
    #[must_use]
    pub fn with_require_secret_credentials(mut self, require: bool) -> Self {
        self.require_secret_credentials = require;
        self
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_value_references(
    dag: &Dag,
    owner: &str,
    property: &str,
    value: &Value,
    errors: &mut Vec<ValidationError>,
) {
    for reference in value.references() {
        let known = dag.get_node(reference.target).is_some_and(|target| {
            target.name == reference.resource
                && target.kind.output_attributes().contains(&reference.property.as_str())
        });
        if !known {
            errors.push(ValidationError::DanglingReference {
                resource: owner.to_string(),
                property: property.to_string(),
                target: reference.to_string(),
            });
        }
    }
}

fn check_interpolation(
    owner: &str,
    property: &str,
    value: &Value,
    errors: &mut Vec<ValidationError>,
) {
    fn interpolates_collection(value: &Value) -> bool {
        match value {
            Value::Interpolate(parts) => parts.iter().any(|p| {
                matches!(p, Value::List(_) | Value::Object(_)) || interpolates_collection(p)
            }),
            Value::List(items) => items.iter().any(interpolates_collection),
            Value::Object(fields) => fields.values().any(interpolates_collection),
            _ => false,
        }
    }

    if interpolates_collection(value) {
        errors.push(ValidationError::InvalidInterpolation {
            owner: owner.to_string(),
            property: property.to_string(),
        });
    }
}
