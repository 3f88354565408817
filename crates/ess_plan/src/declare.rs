//! The resource declaration set.
//!
//! [`declare`] turns a [`StackConfig`] into the six resources of a
//! private-network PostgreSQL deployment and its two exported values, then
//! validates the graph before handing it out.

use crate::config::{DB_PASSWORD_KEY, StackConfig};
use crate::dag::{Dag, Edge};
use crate::resource::{
    ActivationPolicy, AvailabilityType, BackupConfiguration, Cidr, Database, DatabaseInstance,
    DatabaseVersion, DiskType, InstanceSettings, IpConfiguration, Network, Resource, ResourceKind,
    ServiceConnection, SubnetPurpose, Subnetwork, User,
};
use crate::validate::Validator;
use crate::value::{OutputValue, Value};
use ess_core::{CoreError, CoreResult, Fingerprinter, Hash, Redactor};
use indexmap::IndexMap;
use tracing::{debug, info};

/// VPC network
pub const NETWORK: &str = "ess-network";
/// Private subnetwork
pub const SUBNET: &str = "ess-subnet";
/// Service-networking peering connection
pub const CONNECTION: &str = "ess-sql-conn";
/// Cloud SQL instance
pub const INSTANCE: &str = "ess-postgres-instance";
/// Logical database
pub const DATABASE: &str = "ess-database";
/// Database user
pub const USER: &str = "ess-user";

/// Export holding the instance connection name
pub const CONNECTION_NAME_OUTPUT: &str = "connectionName";
/// Export holding the full connection URI
pub const CONNECTION_STRING_OUTPUT: &str = "dbConnectionString";

/// Range of the private subnet, also the range reserved for peering
pub const PRIVATE_RANGE: &str = "10.10.0.0/24";
/// Producer service of the peering connection
pub const PEERING_SERVICE: &str = "servicenetworking.googleapis.com";

const INSTANCE_TIER: &str = "db-custom-1-3840";
const DISK_SIZE_GB: u32 = 20;

/// A validated set of resources and exported values
#[derive(Debug, Clone)]
pub struct Declaration {
    dag: Dag,
    outputs: IndexMap<String, OutputValue>,
    redactor: Redactor,
}

impl Declaration {
    /// Empty declaration
    #[must_use]
    pub fn new() -> Self {
        Self {
            dag: Dag::new(),
            outputs: IndexMap::new(),
            redactor: Redactor::new().with_uri_credentials(),
        }
    }

    /// Add a resource with edges for every reference it holds and every
    /// explicit dependency
    ///
    /// # Errors
    ///
    /// Returns error on a duplicate resource or an edge that closes a cycle
    pub fn add_resource(&mut self, resource: Resource) -> CoreResult<()> {
        let mut edges = Vec::new();
        for (property, value) in resource.kind.properties() {
            for reference in value.references() {
                edges.push(Edge::reference(reference.target, resource.id, property.clone()));
            }
            for secret in value.secrets() {
                self.redactor = std::mem::take(&mut self.redactor).with_secret(secret);
            }
        }
        for dep in &resource.depends_on {
            edges.push(Edge::explicit(*dep, resource.id));
        }

        debug!(
            resource = %resource.name,
            type_token = resource.type_token(),
            id = %resource.id,
            edges = edges.len(),
            "declared resource"
        );
        self.dag.add_node(resource)?;
        for edge in edges {
            self.dag.add_edge(edge)?;
        }
        Ok(())
    }

    /// Add an exported value
    ///
    /// # Errors
    ///
    /// Returns error if an output with the same name exists
    pub fn add_output(&mut self, output: OutputValue) -> CoreResult<()> {
        if self.outputs.contains_key(&output.name) {
            return Err(CoreError::AlreadyExists {
                kind: "Output".to_string(),
                id: output.name,
            });
        }
        for secret in output.value.secrets() {
            self.redactor = std::mem::take(&mut self.redactor).with_secret(secret);
        }
        debug!(output = %output.name, secret = output.is_secret(), "declared output");
        self.outputs.insert(output.name.clone(), output);
        Ok(())
    }

    /// Check the declaration against `validator`
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] listing every violation
    pub fn validate(&self, validator: &Validator) -> CoreResult<()> {
        let outputs = self.outputs.values().map(|o| (o.name.as_str(), &o.value));
        validator.validate(&self.dag, outputs).map_err(|errors| {
            let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
            CoreError::Validation {
                field: "declaration".to_string(),
                reason: reasons.join("; "),
            }
        })
    }

    /// Resources in declaration order
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.dag.nodes.values()
    }

    /// Exported values in declaration order
    pub fn outputs(&self) -> impl Iterator<Item = &OutputValue> {
        self.outputs.values()
    }

    /// Resource by logical name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.dag.get_by_name(name)
    }

    /// Exported value by name
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputValue> {
        self.outputs.get(name)
    }

    /// Underlying graph
    #[must_use]
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Resources in an order where each follows everything it depends on
    ///
    /// # Errors
    ///
    /// Returns error if the graph has a cycle
    pub fn apply_order(&self) -> CoreResult<Vec<&Resource>> {
        Ok(self
            .dag
            .topological_order()?
            .into_iter()
            .filter_map(|id| self.dag.get_node(id))
            .collect())
    }

    /// Apply waves; resources within a wave are independent
    ///
    /// # Errors
    ///
    /// Returns error if the graph has a cycle
    pub fn levels(&self) -> CoreResult<Vec<Vec<&Resource>>> {
        Ok(self
            .dag
            .levels()?
            .into_iter()
            .map(|wave| wave.into_iter().filter_map(|id| self.dag.get_node(id)).collect())
            .collect())
    }

    /// Redactor primed with every secret in the declaration
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Fingerprint over all resources and outputs; independent of secret
    /// values
    #[must_use]
    pub fn fingerprint(&self) -> Hash {
        let mut fp = Fingerprinter::new("declaration");
        for resource in self.resources() {
            fp.hash_field(&resource.name, &resource.fingerprint());
        }
        for output in self.outputs() {
            fp.hash_field(&output.name, &output.value.public_digest());
        }
        fp.finish()
    }
}

impl Default for Declaration {
    fn default() -> Self {
        Self::new()
    }
}

/// Build and validate the declaration for one stack
///
/// # Errors
///
/// Returns error if the resulting graph fails validation
pub fn declare(config: &StackConfig) -> CoreResult<Declaration> {
    let private_range: Cidr = PRIVATE_RANGE.parse()?;
    let password = Value::secret(DB_PASSWORD_KEY, config.db_password().clone());

    let network = Resource::new(
        NETWORK,
        ResourceKind::Network(Network {
            auto_create_subnetworks: false,
        }),
    );

    let subnet = Resource::new(
        SUBNET,
        ResourceKind::Subnetwork(Subnetwork {
            ip_cidr_range: private_range,
            region: config.region().to_string(),
            network: network.output("id"),
            purpose: SubnetPurpose::Private,
        }),
    );

    // The connection reserves the subnet's range, so it waits for the subnet.
    let connection = Resource::new(
        CONNECTION,
        ResourceKind::ServiceConnection(ServiceConnection {
            network: network.output("id"),
            service: PEERING_SERVICE.to_string(),
            reserved_peering_ranges: vec![private_range],
        }),
    )
    .depends_on(&subnet);

    let instance = Resource::new(
        INSTANCE,
        ResourceKind::DatabaseInstance(DatabaseInstance {
            database_version: DatabaseVersion::Postgres15,
            region: config.region().to_string(),
            settings: InstanceSettings {
                tier: INSTANCE_TIER.to_string(),
                ip_configuration: IpConfiguration {
                    ipv4_enabled: false,
                    private_network: network.output("id"),
                },
                availability_type: AvailabilityType::Regional,
                backup_configuration: BackupConfiguration { enabled: true },
                activation_policy: ActivationPolicy::Always,
                disk_size_gb: DISK_SIZE_GB,
                disk_type: DiskType::PdSsd,
            },
            deletion_protection: false,
        }),
    )
    .depends_on(&connection);

    let database = Resource::new(
        DATABASE,
        ResourceKind::Database(Database {
            name: config.db_name().to_string(),
            instance: instance.output("name"),
        }),
    );

    let user = Resource::new(
        USER,
        ResourceKind::User(User {
            name: config.db_user().to_string(),
            password: password.clone(),
            instance: instance.output("name"),
        }),
    );

    let connection_name =
        OutputValue::new(CONNECTION_NAME_OUTPUT, instance.output("connectionName"));
    let connection_string = OutputValue::new(
        CONNECTION_STRING_OUTPUT,
        Value::interpolate([
            Value::str("postgresql://"),
            Value::str(config.db_user()),
            Value::str(":"),
            password,
            Value::str("@"),
            Value::Ref(instance.output("connectionName")),
            Value::str("/"),
            Value::str(config.db_name()),
        ]),
    );

    let mut declaration = Declaration::new();
    for resource in [network, subnet, connection, instance, database, user] {
        declaration.add_resource(resource)?;
    }
    declaration.add_output(connection_name)?;
    declaration.add_output(connection_string)?;
    declaration.validate(&Validator::new())?;

    info!(
        resources = declaration.dag.node_count(),
        edges = declaration.dag.edge_count(),
        outputs = declaration.outputs.len(),
        region = config.region(),
        fingerprint = %declaration.fingerprint().short(),
        "declaration evaluated"
    );
    Ok(declaration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::EdgeKind;
    use crate::render::{Program, preview};
    use ess_core::Secret;
    use proptest::prelude::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn config(password: &str) -> StackConfig {
        StackConfig::builder()
            .db_password(Secret::new(password))
            .build()
            .unwrap()
    }

    fn names(resources: &[&Resource]) -> Vec<String> {
        resources.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_defaults_produce_six_resources_and_two_outputs() {
        let decl = declare(&config("pw")).unwrap();
        let resources: Vec<&str> = decl.resources().map(|r| r.name.as_str()).collect();
        assert_eq!(resources, [NETWORK, SUBNET, CONNECTION, INSTANCE, DATABASE, USER]);
        let outputs: Vec<&str> = decl.outputs().map(|o| o.name.as_str()).collect();
        assert_eq!(outputs, [CONNECTION_NAME_OUTPUT, CONNECTION_STRING_OUTPUT]);
    }

    #[test]
    fn test_default_attribute_values() {
        let decl = declare(&config("pw")).unwrap();

        let ResourceKind::DatabaseInstance(instance) = &decl.get(INSTANCE).unwrap().kind else {
            panic!("instance has wrong kind");
        };
        assert_eq!(instance.region, "us-central1");
        assert_eq!(instance.database_version, DatabaseVersion::Postgres15);
        assert_eq!(instance.settings.tier, "db-custom-1-3840");
        assert_eq!(instance.settings.disk_size_gb, 20);
        assert_eq!(instance.settings.availability_type, AvailabilityType::Regional);
        assert!(instance.settings.backup_configuration.enabled);
        assert!(!instance.settings.ip_configuration.ipv4_enabled);
        assert!(!instance.deletion_protection);

        let ResourceKind::Database(db) = &decl.get(DATABASE).unwrap().kind else {
            panic!("database has wrong kind");
        };
        assert_eq!(db.name, "essdb");
        assert_eq!(db.instance.property, "name");

        let ResourceKind::User(user) = &decl.get(USER).unwrap().kind else {
            panic!("user has wrong kind");
        };
        assert_eq!(user.name, "essadmin");
        assert!(user.password.is_secret());
    }

    #[test]
    fn test_instance_waits_for_connection_explicitly() {
        let decl = declare(&config("pw")).unwrap();
        let conn = decl.get(CONNECTION).unwrap();
        let instance = decl.get(INSTANCE).unwrap();
        assert!(instance.depends_on.contains(&conn.id));
        assert!(decl.dag().edges.iter().any(|e| {
            e.from == conn.id && e.to == instance.id && e.kind == EdgeKind::Explicit
        }));
    }

    #[test]
    fn test_apply_order() {
        let decl = declare(&config("pw")).unwrap();
        let order = names(&decl.apply_order().unwrap());
        assert_eq!(order[0], NETWORK);
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos(SUBNET) < pos(CONNECTION));
        assert!(pos(CONNECTION) < pos(INSTANCE));
        assert!(pos(INSTANCE) < pos(DATABASE));
        assert!(pos(INSTANCE) < pos(USER));
    }

    #[test]
    fn test_levels_group_database_and_user() {
        let decl = declare(&config("pw")).unwrap();
        let waves: Vec<Vec<String>> = decl.levels().unwrap().iter().map(|w| names(w)).collect();
        assert_eq!(waves.len(), 5);
        assert_eq!(waves[0], [NETWORK]);
        assert_eq!(waves[3], [INSTANCE]);
        assert_eq!(waves[4], [DATABASE, USER]);
    }

    #[test]
    fn test_connection_string_output_is_secret() {
        let decl = declare(&config("pw")).unwrap();
        assert!(decl.output(CONNECTION_STRING_OUTPUT).unwrap().is_secret());
        assert!(!decl.output(CONNECTION_NAME_OUTPUT).unwrap().is_secret());
    }

    #[test]
    fn test_custom_values_flow_through() {
        let cfg = StackConfig::builder()
            .db_name("orders")
            .db_user("svc")
            .region("europe-west4")
            .db_password(Secret::new("pw"))
            .build()
            .unwrap();
        let decl = declare(&cfg).unwrap();
        let value = &decl.output(CONNECTION_STRING_OUTPUT).unwrap().value;
        let rendered = serde_json::to_string(value).unwrap();
        assert_eq!(
            rendered,
            "\"postgresql://svc:${dbPassword}@${ess-postgres-instance.connectionName}/orders\""
        );
        let ResourceKind::Subnetwork(subnet) = &decl.get(SUBNET).unwrap().kind else {
            panic!("subnet has wrong kind");
        };
        assert_eq!(subnet.region, "europe-west4");
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut decl = Declaration::new();
        decl.add_output(OutputValue::new("a", Value::str("x"))).unwrap();
        let err = decl.add_output(OutputValue::new("a", Value::str("y"))).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_validate_folds_all_errors() {
        let mut decl = Declaration::new();
        let net = Resource::new(
            "net",
            ResourceKind::Network(Network {
                auto_create_subnetworks: false,
            }),
        );
        let user = Resource::new(
            "user",
            ResourceKind::User(User {
                name: "u".to_string(),
                password: Value::str("plain"),
                instance: net.output("connectionName"),
            }),
        );
        decl.add_resource(net).unwrap();
        decl.add_resource(user).unwrap();
        let err = decl.validate(&Validator::new()).unwrap_err();
        let CoreError::Validation { reason, .. } = err else {
            panic!("unexpected error kind");
        };
        assert!(reason.contains("net.connectionName"));
        assert!(reason.contains("password"));
    }

    #[test]
    fn test_redactor_knows_the_password() {
        let decl = declare(&config("hunter2")).unwrap();
        let view = decl.redactor().redact("auth failed for hunter2");
        assert!(!view.as_str().contains("hunter2"));
        assert!(view.is_redacted());
    }

    #[test]
    fn test_fingerprint_ignores_password() {
        let a = declare(&config("letmein")).unwrap();
        let b = declare(&config("hunter2")).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.get(USER).unwrap().fingerprint(), b.get(USER).unwrap().fingerprint());

        let renamed = StackConfig::builder()
            .db_name("orders")
            .db_password(Secret::new("letmein"))
            .build()
            .unwrap();
        assert_ne!(a.fingerprint(), declare(&renamed).unwrap().fingerprint());
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_logs_never_contain_password_or_connection_string() {
        let password = "s3cr3t-Pa55";
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let decl = declare(&config(password)).unwrap();
            let program = Program::from_declaration(&decl).unwrap();
            tracing::info!(program = ?program, "rendered");
            tracing::info!(preview = %preview(&decl).unwrap(), "preview");
        });

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("declaration evaluated"));
        assert!(!logs.contains(password));
        assert!(!logs.contains("postgresql://essadmin:s3"));
    }

    proptest! {
        #[test]
        fn prop_peering_range_equals_subnet_range(
            db_name in "[a-z][a-z0-9_]{0,20}",
            db_user in "[a-z][a-z0-9_]{0,20}",
            region in prop::sample::select(vec!["us-central1", "europe-west1", "asia-east1"]),
            password in "[!-~]{1,40}",
        ) {
            let cfg = StackConfig::builder()
                .db_name(db_name)
                .db_user(db_user)
                .region(region)
                .db_password(Secret::new(password))
                .build()
                .unwrap();
            let decl = declare(&cfg).unwrap();

            let ResourceKind::Subnetwork(subnet) = &decl.get(SUBNET).unwrap().kind else {
                panic!("subnet has wrong kind");
            };
            let ResourceKind::ServiceConnection(conn) = &decl.get(CONNECTION).unwrap().kind else {
                panic!("connection has wrong kind");
            };
            prop_assert_eq!(&conn.reserved_peering_ranges, &vec![subnet.ip_cidr_range]);

            let network_id = decl.get(NETWORK).unwrap().id;
            let ResourceKind::DatabaseInstance(instance) = &decl.get(INSTANCE).unwrap().kind else {
                panic!("instance has wrong kind");
            };
            prop_assert_eq!(instance.settings.ip_configuration.private_network.target, network_id);
        }
    }
}
