//! Everything one invocation works with: the bosslet, its names and scenario, the on-disk layout,
//! the commit being deployed, and cloud lookups.

use crate::aws::{CloudLookup, InstanceAddress};
use crate::ssh::{Connection, Hop};
use bosslet_config::{Bosslet, LogicalId, Names, Scenario};
use log::{debug, trace};
use snafu::{ensure, OptionExt, ResultExt};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Login user on the system's own hosts
const HOST_USER: &str = "ubuntu";

/// Commit recorded on stacks when the working tree isn't a git checkout
pub(crate) const UNKNOWN_COMMIT: &str = "unknown";

/// Where boss-manage finds and writes its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Paths {
    pub(crate) root: PathBuf,
    pub(crate) config: PathBuf,
}

impl Paths {
    pub(crate) fn new<P1, P2>(root: P1, config: P2) -> Self
    where
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
    {
        Self {
            root: root.into(),
            config: config.into(),
        }
    }

    pub(crate) fn scenarios(&self) -> PathBuf {
        self.root.join("scenarios")
    }

    pub(crate) fn migrations(&self) -> PathBuf {
        self.root.join("migrations")
    }

    pub(crate) fn templates(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub(crate) fn vault(&self) -> PathBuf {
        self.root.join("vault")
    }

    pub(crate) fn policies(&self) -> PathBuf {
        self.vault().join("policies")
    }

    /// Table schemas and inline function sources
    pub(crate) fn resources(&self) -> PathBuf {
        self.root.join("resources")
    }
}

/// The commit of the checkout at `dir`, or `unknown`
pub(crate) fn current_commit(dir: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .current_dir(dir)
        .output();
    match output {
        Ok(output) if output.status.success() => {
            let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
            trace!("Deploying commit {}", commit);
            commit
        }
        _ => {
            debug!("Not a git checkout, recording commit as '{}'", UNKNOWN_COMMIT);
            UNKNOWN_COMMIT.to_string()
        }
    }
}

pub(crate) struct Context {
    pub(crate) bosslet: Bosslet,
    pub(crate) names: Names,
    pub(crate) scenario: Scenario,
    pub(crate) paths: Paths,
    pub(crate) commit: String,
    lookup: Box<dyn CloudLookup>,
}

impl Context {
    pub(crate) fn new(
        bosslet: Bosslet,
        scenario: Scenario,
        paths: Paths,
        commit: String,
        lookup: Box<dyn CloudLookup>,
    ) -> Self {
        Self {
            names: bosslet.names(),
            bosslet,
            scenario,
            paths,
            commit,
            lookup,
        }
    }

    /// Id of the image for `id` at the bosslet's AMI version; `None` if there isn't one, which
    /// leaves the template parameter without a value.
    pub(crate) async fn ami(&self, id: LogicalId) -> Result<Option<String>> {
        let base = self.names.ami(id);
        self.lookup
            .ami(&base, &self.bosslet.ami_version)
            .await
            .context(error::LookupSnafu)
    }

    /// Zones to spread subnets over: the bosslet's own list, or every available zone
    pub(crate) async fn availability_zones(&self) -> Result<Vec<String>> {
        if let Some(zones) = &self.bosslet.availability_zones {
            return Ok(zones.clone());
        }
        let zones = self
            .lookup
            .availability_zones()
            .await
            .context(error::LookupSnafu)?;
        ensure!(
            !zones.is_empty(),
            error::NoZonesSnafu {
                region: &self.bosslet.region
            }
        );
        Ok(zones)
    }

    /// Addresses of a running host.  A host that isn't running is an error, not a blank value.
    pub(crate) async fn address(&self, id: LogicalId) -> Result<InstanceAddress> {
        let hostname = self.names.dns(id);
        self.lookup
            .instance(&hostname)
            .await
            .context(error::LookupSnafu)?
            .context(error::MissingHostSnafu { hostname })
    }

    pub(crate) fn key_path(&self) -> PathBuf {
        if let Some(path) = &self.bosslet.ssh_key_path {
            return path.clone();
        }
        let home = env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        home.join(".ssh")
            .join(format!("{}.pem", self.bosslet.ssh_key))
    }

    /// A connection to `id` through the bastion, and through the outbound jump host first when
    /// the bosslet has one.
    pub(crate) async fn connection(&self, id: LogicalId) -> Result<Connection> {
        let bastion_name = self.names.dns(LogicalId::Bastion);
        let bastion = self.address(LogicalId::Bastion).await?;
        let bastion_ip = bastion
            .public_ip
            .context(error::NoPublicIpSnafu {
                hostname: &bastion_name,
            })?;
        let target = self.address(id).await?;

        let key = self.key_path();
        let mut jumps = Vec::new();
        if let Some(outbound) = &self.bosslet.outbound_bastion {
            jumps.push(Hop::from(outbound));
        }
        jumps.push(Hop::new(bastion_ip, HOST_USER, &key));
        debug!(
            "Reaching {} ({}) through {} jump host(s)",
            self.names.dns(id),
            target.private_ip,
            jumps.len()
        );
        Ok(Connection::new(
            Hop::new(target.private_ip, HOST_USER, &key),
            jumps,
        ))
    }
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("{}", source))]
        Lookup { source: crate::aws::Error },

        #[snafu(display("Host {} isn't running, or doesn't exist", hostname))]
        MissingHost { hostname: String },

        #[snafu(display("Host {} has no public address", hostname))]
        NoPublicIp { hostname: String },

        #[snafu(display("No availability zones available in {}", region))]
        NoZones { region: String },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Context, Paths};
    use crate::aws::{InstanceAddress, StaticLookup};
    use bosslet_config::{BossletProfile, Scenario};

    pub(crate) const PROFILE: &str = r#"
region = "us-east-1"
account_id = "123456789012"
internal_domain = "bosslet.a"
external_domain = "theboss.io"
external_format = "{machine}-a"
vpc_cidr = "10.10.0.0/16"
ssh_key = "bosslet-a"
ssh_key_path = "/keys/bosslet-a.pem"
ami_suffix = ".boss"
ami_version = "h1"
lambda_bucket = "boss-lambdas"
certificate_arn = "arn:aws:acm:us-east-1:123456789012:certificate/abc"
availability_zones = ["us-east-1a", "us-east-1b"]
"#;

    pub(crate) fn lookup() -> StaticLookup {
        let mut lookup = StaticLookup::default();
        for host in ["bastion", "vault", "auth", "endpoint", "cachemanager", "activities"] {
            lookup
                .amis
                .insert(format!("{}.boss", host), format!("ami-{}", host));
        }
        lookup.instances.insert(
            "bastion.bosslet.a".to_string(),
            InstanceAddress {
                private_ip: "10.10.0.5".to_string(),
                public_ip: Some("54.1.2.3".to_string()),
            },
        );
        lookup.instances.insert(
            "vault.bosslet.a".to_string(),
            InstanceAddress {
                private_ip: "10.10.1.20".to_string(),
                public_ip: None,
            },
        );
        lookup
    }

    pub(crate) fn context_with(profile: &str, lookup: StaticLookup) -> Context {
        let profile: BossletProfile = toml::from_str(profile).unwrap();
        let bosslet = profile.build("bosslet.a").unwrap();
        Context::new(
            bosslet,
            Scenario::default(),
            Paths::new("/nonexistent", "/nonexistent/config"),
            "abc1234".to_string(),
            Box::new(lookup),
        )
    }

    pub(crate) fn context() -> Context {
        context_with(PROFILE, lookup())
    }
}
