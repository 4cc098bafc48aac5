//! The scenario module owns the tuning constants used when building templates and waiting on
//! services.  A scenario overlay is a YAML file of `KEY: value` pairs; applying one returns a new
//! `Scenario`, nothing is changed in place.

use crate::{error, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::fs;
use std::path::Path;

/// Tuning constants for one invocation: cluster sizes, instance sizes, retention windows and
/// timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct Scenario {
    pub bastion_type: String,

    pub vault_cluster_size: u32,
    pub vault_type: String,

    pub auth_cluster_size: u32,
    pub auth_type: String,

    pub endpoint_cluster_size: u32,
    pub endpoint_type: String,
    pub endpoint_db_type: String,
    pub endpoint_db_storage_gb: u32,
    pub endpoint_db_multi_az: bool,

    pub cache_manager_type: String,
    pub activities_type: String,

    pub redis_engine_version: String,
    pub redis_cluster_size: u32,
    pub redis_cache_type: String,
    pub redis_state_type: String,
    pub redis_throttle_type: String,
    /// `None` means the optional session cluster is not created.
    pub redis_session_type: Option<String>,
    pub redis_reserved_memory_percent: Option<u32>,

    pub lambda_memory: u32,
    pub multi_lambda_memory: u32,
    pub lambda_timeout: u32,
    pub index_lambda_reserved_concurrency: Option<u32>,

    pub dynamo_on_demand: bool,
    pub dynamo_read_capacity: u32,
    pub dynamo_write_capacity: u32,

    pub queue_retention_seconds: u32,
    pub queue_visibility_seconds: u32,
    pub dead_letter_max_receive: u32,

    pub delete_bucket_expiration_days: u32,
    pub backup_retention_days: u32,

    pub stack_poll_seconds: u64,
    pub service_poll_seconds: u64,
    pub vault_settle_seconds: u64,
    pub vault_timeout_seconds: u64,
    pub keycloak_timeout_seconds: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            bastion_type: "t3.micro".to_string(),
            vault_cluster_size: 1,
            vault_type: "t3.micro".to_string(),
            auth_cluster_size: 1,
            auth_type: "t3.medium".to_string(),
            endpoint_cluster_size: 1,
            endpoint_type: "t3.small".to_string(),
            endpoint_db_type: "db.t3.micro".to_string(),
            endpoint_db_storage_gb: 20,
            endpoint_db_multi_az: false,
            cache_manager_type: "t3.micro".to_string(),
            activities_type: "t3.micro".to_string(),
            redis_engine_version: "5.0.6".to_string(),
            redis_cluster_size: 1,
            redis_cache_type: "cache.t3.small".to_string(),
            redis_state_type: "cache.t3.small".to_string(),
            redis_throttle_type: "cache.t3.micro".to_string(),
            redis_session_type: Some("cache.t3.micro".to_string()),
            redis_reserved_memory_percent: None,
            lambda_memory: 1024,
            multi_lambda_memory: 1536,
            lambda_timeout: 120,
            index_lambda_reserved_concurrency: None,
            dynamo_on_demand: true,
            dynamo_read_capacity: 10,
            dynamo_write_capacity: 10,
            queue_retention_seconds: 14 * 24 * 60 * 60,
            queue_visibility_seconds: 120,
            dead_letter_max_receive: 3,
            delete_bucket_expiration_days: 21,
            backup_retention_days: 7,
            stack_poll_seconds: 5,
            service_poll_seconds: 15,
            vault_settle_seconds: 30,
            vault_timeout_seconds: 120,
            keycloak_timeout_seconds: 150,
        }
    }
}

impl Scenario {
    /// Loads the named overlay from the scenario directory and applies it to the defaults.
    pub fn load<P>(dir: P, name: &str) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = dir.as_ref().join(format!("{}.yml", name));
        ensure!(
            path.is_file(),
            error::UnknownScenarioSnafu { name, path: &path }
        );
        info!("Applying scenario '{}' from {}", name, path.display());
        Self::default().overlay_path(&path)
    }

    /// Applies the YAML overlay at `path` on top of `self`.
    pub fn overlay_path(&self, path: &Path) -> Result<Self> {
        let overlay_str = fs::read_to_string(path).context(error::FileSnafu { path })?;
        let overlay: Option<serde_yaml::Mapping> =
            serde_yaml::from_str(&overlay_str).context(error::InvalidYamlSnafu { path })?;
        self.overlay(overlay.unwrap_or_default())
            .context(error::InvalidYamlSnafu { path })
    }

    /// Returns a new scenario with the keys from `overlay` replacing the values in `self`.
    /// Keys that don't name a tuning constant are skipped with a warning.
    pub fn overlay(
        &self,
        overlay: serde_yaml::Mapping,
    ) -> std::result::Result<Self, serde_yaml::Error> {
        let mut merged = match serde_yaml::to_value(self)? {
            serde_yaml::Value::Mapping(mapping) => mapping,
            _ => serde_yaml::Mapping::new(),
        };
        for (key, value) in overlay {
            if merged.contains_key(&key) {
                merged.insert(key, value);
            } else {
                warn!(
                    "Ignoring unknown scenario key '{}'",
                    key.as_str().unwrap_or("<non-string key>")
                );
            }
        }
        serde_yaml::from_value(serde_yaml::Value::Mapping(merged))
    }
}

#[cfg(test)]
mod test {
    use super::Scenario;
    use crate::Error;
    use std::fs;

    #[test]
    fn overlay_replaces_known_keys() {
        let overlay: serde_yaml::Mapping = serde_yaml::from_str(
            "ENDPOINT_CLUSTER_SIZE: 3\nREDIS_SESSION_TYPE: null\nNOT_A_KEY: 12\n",
        )
        .unwrap();
        let base = Scenario::default();
        let scenario = base.overlay(overlay).unwrap();

        assert_eq!(scenario.endpoint_cluster_size, 3);
        assert_eq!(scenario.redis_session_type, None);
        // The original value is untouched
        assert_eq!(base.endpoint_cluster_size, 1);
        assert!(base.redis_session_type.is_some());
    }

    #[test]
    fn overlay_rejects_bad_values() {
        let overlay: serde_yaml::Mapping =
            serde_yaml::from_str("ENDPOINT_CLUSTER_SIZE: lots\n").unwrap();
        assert!(Scenario::default().overlay(overlay).is_err());
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("production.yml"), "VAULT_CLUSTER_SIZE: 3\n").unwrap();
        fs::write(dir.path().join("empty.yml"), "").unwrap();

        let production = Scenario::load(dir.path(), "production").unwrap();
        assert_eq!(production.vault_cluster_size, 3);
        assert_eq!(Scenario::load(dir.path(), "empty").unwrap(), Scenario::default());
        assert!(matches!(
            Scenario::load(dir.path(), "missing"),
            Err(Error::UnknownScenario { .. })
        ));
    }
}
