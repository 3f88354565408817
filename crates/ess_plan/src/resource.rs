//! Resource descriptors.
//!
//! Each descriptor is a flat, typed record of the attributes the engine
//! should converge one cloud object to. [`ResourceKind::properties`] turns a
//! descriptor into the engine's property map.

use crate::value::{Reference, Value};
use ess_core::{CoreError, CoreResult, Fingerprinter, Hash, ResourceId};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 CIDR block, e.g. `10.10.0.0/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    /// Create a CIDR block; host bits must be zero
    ///
    /// # Errors
    ///
    /// Returns error if the prefix exceeds 32 or host bits are set
    pub fn new(network: Ipv4Addr, prefix: u8) -> CoreResult<Self> {
        if prefix > 32 {
            return Err(CoreError::Validation {
                field: "cidr".to_string(),
                reason: format!("prefix /{} exceeds 32", prefix),
            });
        }
        let cidr = Self { network, prefix };
        if u32::from(network) & !cidr.mask() != 0 {
            return Err(CoreError::Validation {
                field: "cidr".to_string(),
                reason: format!("{}/{} has host bits set", network, prefix),
            });
        }
        Ok(cidr)
    }

    /// Network address
    #[must_use]
    pub const fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// Whether `other` lies entirely within this block
    #[must_use]
    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix
            && (u32::from(other.network) & self.mask()) == u32::from(self.network)
    }
}

impl FromStr for Cidr {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Validation {
            field: "cidr".to_string(),
            reason: format!("'{}' is not an IPv4 CIDR block", s),
        };
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let network: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(network, prefix)
    }
}

impl TryFrom<String> for Cidr {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

macro_rules! provider_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Provider wire string
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for Value {
            fn from(value: $name) -> Self {
                Value::str(value.as_str())
            }
        }
    };
}

provider_enum! {
    /// Purpose tag of a subnetwork
    SubnetPurpose {
        /// Reserved for private service access
        Private => "PRIVATE",
        /// Regular VM subnetwork
        Regular => "REGULAR",
        /// Proxy-only subnetwork for regional load balancers
        RegionalManagedProxy => "REGIONAL_MANAGED_PROXY",
    }
}

provider_enum! {
    /// Managed database engine version
    DatabaseVersion {
        /// PostgreSQL 14
        Postgres14 => "POSTGRES_14",
        /// PostgreSQL 15
        Postgres15 => "POSTGRES_15",
        /// PostgreSQL 16
        Postgres16 => "POSTGRES_16",
    }
}

provider_enum! {
    /// Instance availability mode
    AvailabilityType {
        /// Single zone
        Zonal => "ZONAL",
        /// High availability across zones
        Regional => "REGIONAL",
    }
}

provider_enum! {
    /// When the instance should be running
    ActivationPolicy {
        /// Always running
        Always => "ALWAYS",
        /// Stopped
        Never => "NEVER",
        /// Started on demand
        OnDemand => "ON_DEMAND",
    }
}

provider_enum! {
    /// Data disk type
    DiskType {
        /// SSD persistent disk
        PdSsd => "PD_SSD",
        /// Standard persistent disk
        PdHdd => "PD_HDD",
    }
}

/// VPC network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Create one subnet per region automatically
    pub auto_create_subnetworks: bool,
}

/// Subnetwork inside a [`Network`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnetwork {
    /// Primary address range
    pub ip_cidr_range: Cidr,
    /// Region
    pub region: String,
    /// Owning network (its `id`)
    pub network: Reference,
    /// Purpose tag
    pub purpose: SubnetPurpose,
}

/// Private service-networking peering connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConnection {
    /// Peered network (its `id`)
    pub network: Reference,
    /// Producer service
    pub service: String,
    /// Address ranges reserved for the peering
    pub reserved_peering_ranges: Vec<Cidr>,
}

/// Private-IP networking of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfiguration {
    /// Assign a public IPv4 address
    pub ipv4_enabled: bool,
    /// VPC the instance is reachable from (its `id`)
    pub private_network: Reference,
}

/// Backup settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupConfiguration {
    /// Automated backups
    pub enabled: bool,
}

/// Settings sub-record of a [`DatabaseInstance`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSettings {
    /// Machine tier, e.g. `db-custom-1-3840`
    pub tier: String,
    /// Networking
    pub ip_configuration: IpConfiguration,
    /// Availability mode
    pub availability_type: AvailabilityType,
    /// Backups
    pub backup_configuration: BackupConfiguration,
    /// Activation policy
    pub activation_policy: ActivationPolicy,
    /// Data disk size in GB
    pub disk_size_gb: u32,
    /// Data disk type
    pub disk_type: DiskType,
}

impl InstanceSettings {
    fn to_value(&self) -> Value {
        let mut ip = IndexMap::new();
        ip.insert("ipv4Enabled".to_string(), Value::from(self.ip_configuration.ipv4_enabled));
        ip.insert(
            "privateNetwork".to_string(),
            Value::Ref(self.ip_configuration.private_network.clone()),
        );

        let mut backup = IndexMap::new();
        backup.insert("enabled".to_string(), Value::from(self.backup_configuration.enabled));

        let mut fields = IndexMap::new();
        fields.insert("tier".to_string(), Value::str(&self.tier));
        fields.insert("ipConfiguration".to_string(), Value::Object(ip));
        fields.insert("availabilityType".to_string(), self.availability_type.into());
        fields.insert("backupConfiguration".to_string(), Value::Object(backup));
        fields.insert("activationPolicy".to_string(), self.activation_policy.into());
        fields.insert("diskSize".to_string(), Value::from(self.disk_size_gb));
        fields.insert("diskType".to_string(), self.disk_type.into());
        Value::Object(fields)
    }
}

/// Managed database instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInstance {
    /// Engine version
    pub database_version: DatabaseVersion,
    /// Region
    pub region: String,
    /// Settings
    pub settings: InstanceSettings,
    /// Refuse deletion until unlocked
    pub deletion_protection: bool,
}

/// Logical database (schema) inside an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    /// Database name
    pub name: String,
    /// Owning instance (its `name`)
    pub instance: Reference,
}

/// Database user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User name
    pub name: String,
    /// Password; must be a secret value
    pub password: Value,
    /// Owning instance (its `name`)
    pub instance: Reference,
}

/// Kind of resource with its descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// VPC network
    Network(Network),
    /// Subnetwork
    Subnetwork(Subnetwork),
    /// Private service connection
    ServiceConnection(ServiceConnection),
    /// Database instance
    DatabaseInstance(DatabaseInstance),
    /// Logical database
    Database(Database),
    /// Database user
    User(User),
}

impl ResourceKind {
    /// Provider type token
    #[must_use]
    pub const fn type_token(&self) -> &'static str {
        match self {
            Self::Network(_) => "gcp:compute:Network",
            Self::Subnetwork(_) => "gcp:compute:Subnetwork",
            Self::ServiceConnection(_) => "gcp:servicenetworking:Connection",
            Self::DatabaseInstance(_) => "gcp:sql:DatabaseInstance",
            Self::Database(_) => "gcp:sql:Database",
            Self::User(_) => "gcp:sql:User",
        }
    }

    /// Attributes the provider assigns once the resource exists
    #[must_use]
    pub const fn output_attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Network(_) | Self::Subnetwork(_) => &["id", "name", "selfLink"],
            Self::ServiceConnection(_) => &["id", "peering"],
            Self::DatabaseInstance(_) => {
                &["id", "name", "connectionName", "privateIpAddress", "selfLink"]
            }
            Self::Database(_) | Self::User(_) => &["id", "name"],
        }
    }

    /// Property map in the provider's input naming
    #[must_use]
    pub fn properties(&self) -> IndexMap<String, Value> {
        let mut props = IndexMap::new();
        match self {
            Self::Network(n) => {
                props.insert("autoCreateSubnetworks".to_string(), n.auto_create_subnetworks.into());
            }
            Self::Subnetwork(s) => {
                props.insert("ipCidrRange".to_string(), Value::str(s.ip_cidr_range.to_string()));
                props.insert("region".to_string(), Value::str(&s.region));
                props.insert("network".to_string(), Value::Ref(s.network.clone()));
                props.insert("purpose".to_string(), s.purpose.into());
            }
            Self::ServiceConnection(c) => {
                props.insert("network".to_string(), Value::Ref(c.network.clone()));
                props.insert("service".to_string(), Value::str(&c.service));
                let ranges: Vec<String> =
                    c.reserved_peering_ranges.iter().map(Cidr::to_string).collect();
                props.insert("reservedPeeringRanges".to_string(), ranges.into());
            }
            Self::DatabaseInstance(i) => {
                props.insert("databaseVersion".to_string(), i.database_version.into());
                props.insert("region".to_string(), Value::str(&i.region));
                props.insert("settings".to_string(), i.settings.to_value());
                props.insert("deletionProtection".to_string(), i.deletion_protection.into());
            }
            Self::Database(d) => {
                props.insert("name".to_string(), Value::str(&d.name));
                props.insert("instance".to_string(), Value::Ref(d.instance.clone()));
            }
            Self::User(u) => {
                props.insert("instance".to_string(), Value::Ref(u.instance.clone()));
                props.insert("name".to_string(), Value::str(&u.name));
                props.insert("password".to_string(), u.password.clone());
            }
        }
        props
    }
}

/// A declared resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Identity derived from type and logical name
    pub id: ResourceId,
    /// Logical name, unique within a declaration
    pub name: String,
    /// Descriptor
    pub kind: ResourceKind,
    /// Explicit ordering dependencies beyond the reference graph
    pub depends_on: IndexSet<ResourceId>,
}

impl Resource {
    /// Declare a resource
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        let name = name.into();
        Self {
            id: ResourceId::from_name(kind.type_token(), &name),
            name,
            kind,
            depends_on: IndexSet::new(),
        }
    }

    /// Add an explicit dependency
    #[must_use]
    pub fn depends_on(mut self, other: &Resource) -> Self {
        self.depends_on.insert(other.id);
        self
    }

    /// Reference to one of this resource's attributes
    #[must_use]
    pub fn output(&self, property: &str) -> Reference {
        Reference::new(self.id, self.name.clone(), property)
    }

    /// Provider type token
    #[must_use]
    pub fn type_token(&self) -> &'static str {
        self.kind.type_token()
    }

    /// Per-property digests, in declaration order; secret material is
    /// included, so these never leave the process
    #[must_use]
    pub fn property_digests(&self) -> IndexMap<String, Hash> {
        self.kind
            .properties()
            .into_iter()
            .map(|(name, value)| (name, value.digest()))
            .collect()
    }

    /// Fingerprint over type, name, properties and explicit dependencies.
    /// Secret properties contribute only their configuration key.
    #[must_use]
    pub fn fingerprint(&self) -> Hash {
        let mut fp = Fingerprinter::new(self.type_token());
        fp.field("name", self.name.as_bytes());
        for (name, value) in self.kind.properties() {
            fp.hash_field(&name, &value.public_digest());
        }
        for dep in &self.depends_on {
            fp.field("dependsOn", dep.as_bytes());
        }
        fp.finish()
    }
}
