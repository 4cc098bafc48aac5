//! The names module maps a resource kind and a logical id onto the identifier the cloud sees.
//!
//! Both the kinds and the logical ids are closed enumerations, so resolution is a pure, total
//! function of `(Kind, LogicalId, Bosslet)`.

use crate::{render_external, Bosslet, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of cloud resource a name is being built for.  Each kind has its own formatting
/// rules, since the services disagree on which characters they allow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Stack,
    Subnet,
    Dns,
    Lambda,
    Rds,
    Sns,
    Sqs,
    Sg,
    Rt,
    Gw,
    Ami,
    Redis,
    Ddb,
    S3,
    Sfn,
    Cw,
    Key,
}

impl Kind {
    pub const ALL: [Kind; 17] = [
        Kind::Stack,
        Kind::Subnet,
        Kind::Dns,
        Kind::Lambda,
        Kind::Rds,
        Kind::Sns,
        Kind::Sqs,
        Kind::Sg,
        Kind::Rt,
        Kind::Gw,
        Kind::Ami,
        Kind::Redis,
        Kind::Ddb,
        Kind::S3,
        Kind::Sfn,
        Kind::Cw,
        Kind::Key,
    ];

    fn format(self) -> Format {
        match self {
            Kind::Stack | Kind::Sqs | Kind::Sfn => Format::Capitalize,
            Kind::Lambda | Kind::Cw => Format::Dash,
            Kind::Ami => Format::AmiSuffix,
            _ => Format::Domain,
        }
    }
}

/// How a `logical_id.internal_domain` string is turned into the final identifier
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Format {
    /// `api.bosslet.a` -> `ApiBossletA`
    Capitalize,
    /// `api.bosslet.a` -> `api-bosslet-a`
    Dash,
    /// `vault` -> `vault.boss`
    AmiSuffix,
    /// `api.bosslet.a`, unchanged
    Domain,
}

/// Generates the LogicalId enum along with its string forms, so the list of ids only lives in
/// one place.
macro_rules! logical_ids {
    ($($variant:ident => $name:literal,)+) => {
        /// A handle for every resource the system manages.  The string form is the base name the
        /// kind-specific formats are applied to.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum LogicalId {
            $($variant,)+
        }

        impl LogicalId {
            pub const ALL: &'static [LogicalId] = &[$(LogicalId::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(LogicalId::$variant => $name,)+
                }
            }
        }

        impl FromStr for LogicalId {
            type Err = UnknownLogicalId;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($name => Ok(LogicalId::$variant),)+
                    other => Err(UnknownLogicalId(other.to_string())),
                }
            }
        }
    };
}

logical_ids! {
    // Configuration modules; each expands to one stack.
    Core => "core",
    Redis => "redis",
    Api => "api",
    CacheDb => "cachedb",
    Activities => "activities",
    Cloudwatch => "cloudwatch",
    IdIndexing => "idindexing",
    CopyCuboid => "copycuboid",
    DynamoLambda => "dynamolambda",
    Backup => "backup",

    // Hosts and clusters
    Vpc => "vpc",
    Bastion => "bastion",
    Vault => "vault",
    Auth => "auth",
    Endpoint => "endpoint",
    EndpointDb => "endpoint-db",
    EndpointElb => "elb",
    CacheManager => "cachemanager",
    Cache => "cache",
    CacheState => "cache-state",
    CacheThrottle => "cache-throttle",
    CacheSession => "cache-session",

    // Networking
    Internal => "internal",
    External => "external",
    Ssh => "ssh",
    Https => "https",
    Http => "http",
    InternetGateway => "internet",
    NatGateway => "nat",

    // Functions
    MultiLambda => "multiLambda",
    DownsampleVolume => "downsampleVolume",
    DeleteLambda => "deleteLambda",
    IndexFindCuboids => "indexFindCuboids",
    IndexBatchEnqueue => "indexBatchEnqueueCuboids",
    IndexWriteId => "indexWriteId",
    CopyCuboidLambda => "copyCuboidLambda",
    DynamoAutoscale => "dynamoAutoscale",
    VaultMonitor => "vaultMonitor",

    // Queues and topics
    DeadLetter => "deadletter",
    IndexIdsQueue => "indexIdsQueue",
    IndexDeadLetter => "indexDeadletter",
    CopyCuboidQueue => "copyCuboidQueue",
    CopyCuboidDeadLetter => "copyCuboidDeadletter",
    DownsampleQueue => "downsampleQueue",
    DownsampleDeadLetter => "downsampleDeadletter",
    Alarms => "alarms",
    DynamoAlerts => "dynamoAlerts",

    // Buckets and tables
    CuboidBucket => "cuboids",
    TileBucket => "tiles",
    IngestBucket => "ingest",
    DeleteBucket => "delete",
    S3Index => "s3index",
    TileIndex => "tileindex",
    IdIndex => "idIndex",
    IdCountIndex => "idCount",
    Meta => "bossmeta",

    // Workflows and rules
    IndexCuboidSupervisor => "index.cuboidSupervisor",
    ResolutionHierarchy => "resolution.hierarchy",
    VaultCheck => "vaultCheck",
    DynamoScaling => "dynamoScaling",
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a string doesn't match any logical id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLogicalId(pub String);

impl fmt::Display for UnknownLogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown logical id '{}'", self.0)
    }
}

impl std::error::Error for UnknownLogicalId {}

/// Resolves a logical id of the given kind into the identifier used by the cloud.
pub fn resolve(kind: Kind, id: LogicalId, internal_domain: &str, ami_suffix: &str) -> String {
    let dotted = format!("{}.{}", id.as_str(), internal_domain);
    match kind.format() {
        Format::Capitalize => dotted.split('.').map(capitalize).collect(),
        Format::Dash => dotted.replace('.', "-"),
        Format::AmiSuffix => format!("{}{}", id.as_str(), ami_suffix),
        Format::Domain => dotted,
    }
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The name service for one bosslet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    internal_domain: String,
    external_domain: String,
    external_format: String,
    ami_suffix: String,
}

impl Names {
    pub fn new(bosslet: &Bosslet) -> Self {
        Self {
            internal_domain: bosslet.internal_domain.clone(),
            external_domain: bosslet.external_domain.clone(),
            external_format: bosslet.external_format.clone(),
            ami_suffix: bosslet.ami_suffix.clone(),
        }
    }

    pub fn resolve(&self, kind: Kind, id: LogicalId) -> String {
        resolve(kind, id, &self.internal_domain, &self.ami_suffix)
    }

    pub fn stack(&self, id: LogicalId) -> String {
        self.resolve(Kind::Stack, id)
    }

    pub fn dns(&self, id: LogicalId) -> String {
        self.resolve(Kind::Dns, id)
    }

    pub fn subnet(&self, id: LogicalId) -> String {
        self.resolve(Kind::Subnet, id)
    }

    /// Subnet name scoped to one availability zone, e.g. `a-internal.bosslet.a`
    pub fn az_subnet(&self, az: &str, id: LogicalId) -> String {
        format!("{}-{}", az_letter(az), self.subnet(id))
    }

    pub fn lambda(&self, id: LogicalId) -> String {
        self.resolve(Kind::Lambda, id)
    }

    pub fn sqs(&self, id: LogicalId) -> String {
        self.resolve(Kind::Sqs, id)
    }

    pub fn ami(&self, id: LogicalId) -> String {
        self.resolve(Kind::Ami, id)
    }

    pub fn internal_domain(&self) -> &str {
        &self.internal_domain
    }

    pub fn external_domain(&self) -> &str {
        &self.external_domain
    }

    /// The public name of a machine: the external format is applied, then the external domain
    /// is appended.
    pub fn public_dns(&self, machine: &str) -> Result<String> {
        let host = render_external(&self.external_format, machine)?;
        Ok(format!("{}.{}", host, self.external_domain))
    }
}

/// Availability zones are given as full names (`us-east-1a`); subnets only use the trailing
/// letter.
pub fn az_letter(az: &str) -> &str {
    az.get(az.len().saturating_sub(1)..).unwrap_or(az)
}

#[cfg(test)]
mod test {
    use super::{az_letter, resolve, Kind, LogicalId, Names};
    use crate::BossletProfile;
    use std::collections::HashSet;
    use std::str::FromStr;

    fn names() -> Names {
        let profile: BossletProfile = toml::from_str(
            r#"
region = "us-east-1"
account_id = "123456789012"
internal_domain = "bosslet.a"
external_domain = "theboss.io"
external_format = "{machine}-a"
vpc_cidr = "10.10.0.0/16"
ssh_key = "bosslet-a"
ami_suffix = ".boss"
"#,
        )
        .unwrap();
        profile.build("bosslet.a").unwrap().names()
    }

    #[test]
    fn per_kind_formats() {
        let names = names();
        assert_eq!(names.stack(LogicalId::Core), "CoreBossletA");
        assert_eq!(names.stack(LogicalId::CacheDb), "CachedbBossletA");
        assert_eq!(
            names.resolve(Kind::Sfn, LogicalId::IndexCuboidSupervisor),
            "IndexCuboidSupervisorBossletA"
        );
        assert_eq!(
            names.lambda(LogicalId::MultiLambda),
            "multiLambda-bosslet-a"
        );
        assert_eq!(
            names.resolve(Kind::Cw, LogicalId::VaultCheck),
            "vaultCheck-bosslet-a"
        );
        assert_eq!(names.ami(LogicalId::Vault), "vault.boss");
        assert_eq!(names.dns(LogicalId::Vault), "vault.bosslet.a");
        assert_eq!(names.az_subnet("us-east-1b", LogicalId::Internal), "b-internal.bosslet.a");
        assert_eq!(names.public_dns("api").unwrap(), "api-a.theboss.io");
    }

    #[test]
    fn resolution_is_pure() {
        let names = names();
        for kind in Kind::ALL {
            for id in LogicalId::ALL {
                assert_eq!(names.resolve(kind, *id), names.resolve(kind, *id));
            }
        }
    }

    #[test]
    fn resolution_is_injective_within_a_kind() {
        for kind in Kind::ALL {
            let resolved: HashSet<String> = LogicalId::ALL
                .iter()
                .map(|id| resolve(kind, *id, "bosslet.a", ".boss"))
                .collect();
            assert_eq!(resolved.len(), LogicalId::ALL.len(), "collision in {:?}", kind);
        }
    }

    #[test]
    fn logical_ids_parse_back() {
        for id in LogicalId::ALL {
            assert_eq!(LogicalId::from_str(id.as_str()), Ok(*id));
        }
        assert!(LogicalId::from_str("nope").is_err());
    }

    #[test]
    fn az_letters() {
        assert_eq!(az_letter("us-east-1a"), "a");
        assert_eq!(az_letter(""), "");
    }
}
