//! The config module owns the definition and loading process for bosslet profiles: the named
//! deployment profiles that every boss-manage action runs against.
//!
//! A catalog is a directory of `<name>.toml` files.  Each file is deserialized into a
//! `BossletProfile`, where most fields are optional, and then built into a `Bosslet`, which
//! guarantees every required attribute is present.
pub mod names;
pub mod scenario;

pub use crate::names::{Kind, LogicalId, Names};
pub use crate::scenario::Scenario;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tinytemplate::TinyTemplate;

/// Extension used by bosslet profiles inside the catalog directory
const PROFILE_EXTENSION: &str = "toml";

/// Default template used to build public DNS names when a profile doesn't give one
const DEFAULT_EXTERNAL_FORMAT: &str = "{machine}";

/// A jump host reachable from the operator's workstation, used before the in-VPC bastion
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JumpHost {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub key: PathBuf,
}

fn default_ssh_port() -> u16 {
    22
}

/// Bosslet profile as written in the catalog.
///
/// Fields are optional here so that a missing attribute is reported by name when the profile is
/// built, instead of as a generic deserialization failure.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct BossletProfile {
    pub region: Option<String>,
    pub account_id: Option<String>,
    pub aws_profile: Option<String>,
    pub internal_domain: Option<String>,
    pub external_domain: Option<String>,
    pub external_format: Option<String>,
    pub vpc_cidr: Option<String>,
    pub subnet_cidr_bits: Option<u8>,
    pub lambda_subnets: Option<u8>,
    pub availability_zones: Option<Vec<String>>,
    pub ssh_key: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    pub outbound_bastion: Option<JumpHost>,
    pub ami_suffix: Option<String>,
    pub ami_version: Option<String>,
    pub scenario: Option<String>,
    pub lambda_bucket: Option<String>,
    pub certificate_arn: Option<String>,
    #[serde(default)]
    pub disable_preview: bool,
    pub verify_ssl: Option<bool>,
}

impl BossletProfile {
    /// Deserializes a BossletProfile from a given path
    pub fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let profile_str = fs::read_to_string(path).context(error::FileSnafu { path })?;
        toml::from_str(&profile_str).context(error::InvalidTomlSnafu { path })
    }

    /// Attempts to create a `Bosslet`, consuming `self` and ensuring that each required field
    /// contains a value.
    pub fn build(self, name: &str) -> Result<Bosslet> {
        let get_or_err = |opt: Option<String>, what: &str| {
            opt.context(error::MissingConfigSnafu {
                bosslet: name,
                what,
            })
        };

        let external_format = self
            .external_format
            .unwrap_or_else(|| DEFAULT_EXTERNAL_FORMAT.to_string());
        // Render once so a broken template is a configuration error, not a failure halfway
        // through a deployment.
        render_external(&external_format, "probe")?;

        let bosslet = Bosslet {
            name: name.to_string(),
            region: get_or_err(self.region, "region")?,
            account_id: get_or_err(self.account_id, "account_id")?,
            aws_profile: self.aws_profile,
            internal_domain: get_or_err(self.internal_domain, "internal_domain")?,
            external_domain: get_or_err(self.external_domain, "external_domain")?,
            external_format,
            vpc_cidr: get_or_err(self.vpc_cidr, "vpc_cidr")?,
            subnet_cidr_bits: self.subnet_cidr_bits.unwrap_or(8),
            lambda_subnets: self.lambda_subnets.unwrap_or(2),
            availability_zones: self.availability_zones,
            ssh_key: get_or_err(self.ssh_key, "ssh_key")?,
            ssh_key_path: self.ssh_key_path,
            outbound_bastion: self.outbound_bastion,
            ami_suffix: get_or_err(self.ami_suffix, "ami_suffix")?,
            ami_version: self.ami_version.unwrap_or_else(|| "latest".to_string()),
            scenario: self.scenario,
            lambda_bucket: self.lambda_bucket,
            certificate_arn: self.certificate_arn,
            disable_preview: self.disable_preview,
            verify_ssl: self.verify_ssl.unwrap_or(true),
        };
        ensure!(
            bosslet.vpc_cidr.split('/').count() == 2,
            error::InvalidValueSnafu {
                bosslet: name,
                what: "vpc_cidr",
                value: &bosslet.vpc_cidr,
            }
        );
        Ok(bosslet)
    }
}

/// A fully configured bosslet, i.e. no optional required fields.  Immutable for the lifetime of
/// one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bosslet {
    pub name: String,
    pub region: String,
    pub account_id: String,
    pub aws_profile: Option<String>,
    pub internal_domain: String,
    pub external_domain: String,
    pub external_format: String,
    pub vpc_cidr: String,
    pub subnet_cidr_bits: u8,
    pub lambda_subnets: u8,
    pub availability_zones: Option<Vec<String>>,
    pub ssh_key: String,
    pub ssh_key_path: Option<PathBuf>,
    pub outbound_bastion: Option<JumpHost>,
    pub ami_suffix: String,
    pub ami_version: String,
    pub scenario: Option<String>,
    pub lambda_bucket: Option<String>,
    pub certificate_arn: Option<String>,
    pub disable_preview: bool,
    pub verify_ssl: bool,
}

impl Bosslet {
    /// The name service bound to this bosslet's domains and AMI suffix
    pub fn names(&self) -> Names {
        Names::new(self)
    }

    /// Returns a copy of this bosslet with the AMI version replaced, as requested by
    /// `--ami-version` on the command line.
    pub fn with_ami_version<S: Into<String>>(&self, version: S) -> Self {
        Self {
            ami_version: version.into(),
            ..self.clone()
        }
    }

    /// Returns a copy of this bosslet with change-set previews disabled.
    pub fn without_preview(&self) -> Self {
        Self {
            disable_preview: true,
            ..self.clone()
        }
    }

    /// ARN of the account root principal, used in key policies.
    pub fn account_root_arn(&self) -> String {
        format!("arn:aws:iam::{}:root", self.account_id)
    }
}

/// Renders the external-name template for the given machine name.
pub(crate) fn render_external(format: &str, machine: &str) -> Result<String> {
    #[derive(Serialize)]
    struct ExternalContext<'a> {
        machine: &'a str,
    }

    let mut tt = TinyTemplate::new();
    tt.add_template("external", format)
        .context(error::AddTemplateSnafu { template: format })?;
    tt.render("external", &ExternalContext { machine })
        .context(error::RenderTemplateSnafu { template: format })
}

/// All bosslet profiles found in a catalog directory, keyed by bosslet name.
#[derive(Debug, Default)]
pub struct Catalog {
    dir: PathBuf,
    profiles: BTreeMap<String, BossletProfile>,
}

impl Catalog {
    /// Loads every `*.toml` profile in the given directory, checking that internal domains are
    /// unique across the catalog.
    pub fn load<P>(dir: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let dir = dir.as_ref();
        let mut profiles = BTreeMap::new();
        let entries = fs::read_dir(dir).context(error::ReadDirSnafu { path: dir })?;
        for entry in entries {
            let path = entry.context(error::ReadDirSnafu { path: dir })?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PROFILE_EXTENSION) {
                trace!("Skipping non-profile '{}' in catalog", path.display());
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .context(error::ProfileNameSnafu { path: &path })?
                .to_string();
            debug!("Found bosslet profile '{}' at {}", name, path.display());
            profiles.insert(name, BossletProfile::from_path(&path)?);
        }

        let catalog = Self {
            dir: dir.to_path_buf(),
            profiles,
        };
        catalog.check_unique_domains()?;
        Ok(catalog)
    }

    /// Builds the named bosslet from the catalog.
    pub fn bosslet(&self, name: &str) -> Result<Bosslet> {
        let profile = self
            .profiles
            .get(name)
            .context(error::UnknownBossletSnafu {
                name,
                dir: &self.dir,
            })?;
        profile.clone().build(name)
    }

    /// Names of all bosslets in the catalog, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    fn check_unique_domains(&self) -> Result<()> {
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, profile) in &self.profiles {
            if let Some(domain) = profile.internal_domain.as_deref() {
                if let Some(first) = seen.insert(domain, name) {
                    return error::DuplicateDomainSnafu {
                        domain,
                        first,
                        second: name,
                    }
                    .fail();
                }
            }
        }
        Ok(())
    }
}

mod error {
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Error building template from '{}': {}", template, source))]
        AddTemplate {
            template: String,
            source: tinytemplate::error::Error,
        },

        #[snafu(display(
            "Internal domain '{}' is used by both bosslet '{}' and bosslet '{}'",
            domain,
            first,
            second
        ))]
        DuplicateDomain {
            domain: String,
            first: String,
            second: String,
        },

        #[snafu(display("Failed to read '{}': {}", path.display(), source))]
        File { path: PathBuf, source: io::Error },

        #[snafu(display("Invalid bosslet profile at '{}': {}", path.display(), source))]
        InvalidToml {
            path: PathBuf,
            source: toml::de::Error,
        },

        #[snafu(display("Invalid value '{}' for '{}' in bosslet '{}'", value, what, bosslet))]
        InvalidValue {
            bosslet: String,
            what: String,
            value: String,
        },

        #[snafu(display("Invalid scenario overlay at '{}': {}", path.display(), source))]
        InvalidYaml {
            path: PathBuf,
            source: serde_yaml::Error,
        },

        #[snafu(display("Bosslet '{}' is missing '{}'", bosslet, what))]
        MissingConfig { bosslet: String, what: String },

        #[snafu(display("Profile path '{}' has no usable name", path.display()))]
        ProfileName { path: PathBuf },

        #[snafu(display("Failed to list '{}': {}", path.display(), source))]
        ReadDir { path: PathBuf, source: io::Error },

        #[snafu(display("Error rendering template from '{}': {}", template, source))]
        RenderTemplate {
            template: String,
            source: tinytemplate::error::Error,
        },

        #[snafu(display("Scenario '{}' not found at '{}'", name, path.display()))]
        UnknownScenario { name: String, path: PathBuf },

        #[snafu(display("Bosslet '{}' not found in catalog '{}'", name, dir.display()))]
        UnknownBosslet { name: String, dir: PathBuf },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{BossletProfile, Catalog, Error};
    use std::fs;

    const PROFILE: &str = r#"
region = "us-east-1"
account_id = "123456789012"
internal_domain = "bosslet.a"
external_domain = "theboss.io"
external_format = "{machine}-a"
vpc_cidr = "10.10.0.0/16"
ssh_key = "bosslet-a"
ami_suffix = ".boss"
"#;

    #[test]
    fn builds_profile_with_defaults() {
        let profile: BossletProfile = toml::from_str(PROFILE).unwrap();
        let bosslet = profile.build("bosslet.a").unwrap();
        assert_eq!(bosslet.region, "us-east-1");
        assert_eq!(bosslet.ami_version, "latest");
        assert_eq!(bosslet.lambda_subnets, 2);
        assert!(bosslet.verify_ssl);
        assert!(!bosslet.disable_preview);
        assert_eq!(bosslet.account_root_arn(), "arn:aws:iam::123456789012:root");
    }

    #[test]
    fn missing_attribute_is_named() {
        let profile: BossletProfile = toml::from_str("region = \"us-east-1\"").unwrap();
        let err = profile.build("bosslet.a").unwrap_err();
        assert!(matches!(err, Error::MissingConfig { ref what, .. } if what == "account_id"));
    }

    #[test]
    fn unknown_fields_rejected() {
        let profile: Result<BossletProfile, _> = toml::from_str("colour = \"red\"");
        assert!(profile.is_err());
    }

    #[test]
    fn catalog_lookup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bosslet.a.toml"), PROFILE).unwrap();
        fs::write(dir.path().join("README.md"), "not a profile").unwrap();

        let catalog = Catalog::load(dir.path()).unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["bosslet.a"]);
        assert_eq!(catalog.bosslet("bosslet.a").unwrap().name, "bosslet.a");
        assert!(matches!(
            catalog.bosslet("bosslet.b"),
            Err(Error::UnknownBosslet { .. })
        ));
    }

    #[test]
    fn catalog_rejects_duplicate_domains() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bosslet.a.toml"), PROFILE).unwrap();
        fs::write(dir.path().join("bosslet.copy.toml"), PROFILE).unwrap();

        assert!(matches!(
            Catalog::load(dir.path()),
            Err(Error::DuplicateDomain { .. })
        ));
    }
}
