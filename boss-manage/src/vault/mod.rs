//! The secret store: the contract boss-manage needs from it, split by concern, and the
//! bootstrap workflows built on that contract (initialize, configure, export, import).

pub(crate) mod cli;
pub(crate) mod client;
pub(crate) mod private;

pub(crate) use client::VaultClient;
pub(crate) use private::PrivateStore;

use crate::poll::poll;
use async_trait::async_trait;
use bosslet_config::Scenario;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port the secret store listens on inside the VPC
pub(crate) const VAULT_PORT: u16 = 8200;

/// One secret: a flat JSON object
pub(crate) type Secret = serde_json::Map<String, serde_json::Value>;

/// Where audit records are written on the secret store hosts
const AUDIT_LOG: &str = "/var/log/vault/audit.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub(crate) struct VaultStatus {
    pub(crate) initialized: bool,
    pub(crate) sealed: bool,
    #[serde(default)]
    pub(crate) standby: bool,
}

impl VaultStatus {
    /// Ready to serve requests
    pub(crate) fn is_active(&self) -> bool {
        self.initialized && !self.sealed && !self.standby
    }
}

/// Material returned once, when the store is initialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InitKeys {
    pub(crate) root_token: String,
    pub(crate) recovery_keys: Vec<String>,
}

#[async_trait]
pub(crate) trait SecretInit: Send + Sync {
    /// `None` when the store can't be reached yet
    async fn status(&self) -> Result<Option<VaultStatus>>;

    /// Initializes the store with one stored key share and `recovery_shares` recovery keys, of
    /// which `recovery_threshold` are needed to recover.
    async fn init(&self, recovery_shares: u32, recovery_threshold: u32) -> Result<InitKeys>;
}

#[async_trait]
pub(crate) trait SecretUnseal: Send + Sync {
    /// Submits one key share; returns true while the store is still sealed.
    async fn unseal(&self, key: &str) -> Result<bool>;

    async fn seal(&self) -> Result<()>;
}

/// Key/value access.  Paths are full logical paths, e.g. `secret/endpoint/auth`.
#[async_trait]
pub(crate) trait SecretKv: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Secret>>;

    async fn write(&self, path: &str, data: &Secret) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Children of `path`; sub-directories end with `/`.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Merges `data` into whatever is already stored at `path`.
    async fn update(&self, path: &str, data: &Secret) -> Result<()> {
        let mut merged = self.read(path).await?.unwrap_or_default();
        merged.extend(data.clone());
        self.write(path, &merged).await
    }
}

/// Policies, mounts and tokens
#[async_trait]
pub(crate) trait SecretPolicy: Send + Sync {
    async fn write_policy(&self, name: &str, rules: &str) -> Result<()>;

    /// Mount paths of the enabled audit devices, e.g. `file/`
    async fn audit_devices(&self) -> Result<Vec<String>>;

    async fn enable_audit(&self, path: &str, kind: &str, options: &Secret) -> Result<()>;

    /// Mount paths of the enabled auth backends
    async fn auth_backends(&self) -> Result<Vec<String>>;

    async fn enable_auth(&self, path: &str, kind: &str) -> Result<()>;

    /// Mount paths of the enabled secrets engines
    async fn secrets_engines(&self) -> Result<Vec<String>>;

    async fn enable_secrets(&self, path: &str, kind: &str) -> Result<()>;

    /// Issues a token carrying `policy`.
    async fn provision(&self, policy: &str) -> Result<String>;

    async fn revoke(&self, token: &str) -> Result<()>;
}

/// Everything the bootstrap workflows use
pub(crate) trait SecretStore: SecretInit + SecretUnseal + SecretKv + SecretPolicy {}

impl<T> SecretStore for T where T: SecretInit + SecretUnseal + SecretKv + SecretPolicy {}

/// Polling periods and the overall bound for secret store waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Waits {
    pub(crate) interval: Duration,
    pub(crate) settle: Duration,
    pub(crate) timeout: Duration,
}

impl Waits {
    pub(crate) fn from_scenario(scenario: &Scenario) -> Self {
        Self {
            interval: Duration::from_secs(scenario.service_poll_seconds),
            settle: Duration::from_secs(scenario.vault_settle_seconds),
            timeout: Duration::from_secs(scenario.vault_timeout_seconds),
        }
    }
}

/// Waits until the store answers at all.
pub(crate) async fn wait_reachable<S>(store: &S, waits: Waits) -> Result<VaultStatus>
where
    S: SecretInit + ?Sized,
{
    poll("secret store", waits.interval, Some(waits.timeout), move || async move {
        match store.status().await {
            Ok(status) => Ok(status),
            Err(e) if e.is_not_ready() => Ok(None),
            Err(e) => Err(e),
        }
    })
    .await?
    .context(error::TimeoutSnafu {
        what: "secret store to answer",
    })
}

/// Waits until the store is initialized, unsealed and the active node.
pub(crate) async fn wait_active<S>(store: &S, waits: Waits) -> Result<()>
where
    S: SecretInit + ?Sized,
{
    poll("secret store to settle", waits.settle, Some(waits.timeout), move || async move {
        match store.status().await {
            Ok(Some(status)) if status.is_active() => Ok(Some(())),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_ready() => Ok(None),
            Err(e) => Err(e),
        }
    })
    .await?
    .context(error::TimeoutSnafu {
        what: "secret store to become active",
    })
}

/// Brings the store to an initialized, unsealed state.  A store that is already initialized is
/// only unsealed, using the keys saved when it was initialized.  Returns true when this call
/// initialized it.
pub(crate) async fn initialize<S>(
    store: &S,
    private: &PrivateStore,
    recovery_shares: u32,
    recovery_threshold: u32,
    waits: Waits,
) -> Result<bool>
where
    S: SecretInit + SecretUnseal + ?Sized,
{
    let status = wait_reachable(store, waits).await?;
    let initialized = if status.initialized {
        info!("Secret store already initialized");
        if status.sealed {
            unseal(store, private).await?;
        }
        false
    } else {
        info!(
            "Initializing secret store with {} recovery keys (threshold {})",
            recovery_shares, recovery_threshold
        );
        let keys = store.init(recovery_shares, recovery_threshold).await?;
        private.save(&keys)?;
        true
    };

    wait_active(store, waits).await?;
    Ok(initialized)
}

/// Unseals the store with the keys saved when it was initialized
pub(crate) async fn unseal<S>(store: &S, private: &PrivateStore) -> Result<()>
where
    S: SecretUnseal + ?Sized,
{
    let keys = if private.exists() {
        private.keys()?
    } else {
        Vec::new()
    };
    ensure!(
        !keys.is_empty(),
        error::NoKeysSnafu {
            path: private.dir()
        }
    );

    info!("Unsealing secret store");
    for key in &keys {
        if !store.unseal(key).await? {
            return Ok(());
        }
    }
    error::StillSealedSnafu {
        path: private.dir(),
    }
    .fail()
}

/// Policy documents found in `dir`, by name.  `extension` selects the kind of document.
fn documents(dir: &Path, extension: &str) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut documents = Vec::new();
    for entry in fs::read_dir(dir).context(error::PoliciesSnafu { path: dir })? {
        let path = entry.context(error::PoliciesSnafu { path: dir })?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
            continue;
        }
        if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
            documents.push((name.to_string(), path.clone()));
        }
    }
    documents.sort();
    Ok(documents)
}

fn object(value: serde_json::Value) -> Secret {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Secret::new(),
    }
}

/// Enables auditing, loads the policies from `policies_dir`, and sets up the cloud auth backend
/// and secrets engine so instances can log in with their instance profile.
pub(crate) async fn configure<S>(store: &S, account_id: &str, policies_dir: &Path) -> Result<()>
where
    S: SecretKv + SecretPolicy + ?Sized,
{
    if !store
        .audit_devices()
        .await?
        .iter()
        .any(|device| device == "file/")
    {
        info!("Enabling file audit device");
        let options = object(serde_json::json!({ "file_path": AUDIT_LOG }));
        store.enable_audit("file", "file", &options).await?;
    }

    let policies = documents(policies_dir, "hcl")?;
    for (name, path) in &policies {
        let rules = fs::read_to_string(path).context(error::PolicyFileSnafu { path })?;
        info!("Writing policy '{}'", name);
        store.write_policy(name, &rules).await?;
    }

    if !store.auth_backends().await?.iter().any(|mount| mount == "aws/") {
        info!("Enabling aws auth backend");
        store.enable_auth("aws", "aws").await?;
    }
    for (name, _) in &policies {
        let arn = format!("arn:aws:iam::{}:instance-profile/{}", account_id, name);
        debug!("Binding policy '{}' to {}", name, arn);
        let role = object(serde_json::json!({
            "auth_type": "ec2",
            "policies": [name],
            "bound_iam_instance_profile_arn": arn,
        }));
        store.write(&format!("auth/aws/role/{}", name), &role).await?;
    }

    let roles = documents(policies_dir, "iam")?;
    if !roles.is_empty()
        && !store
            .secrets_engines()
            .await?
            .iter()
            .any(|mount| mount == "aws/")
    {
        info!("Enabling aws secrets engine");
        store.enable_secrets("aws", "aws").await?;
    }
    for (name, path) in &roles {
        let document = fs::read_to_string(path).context(error::PolicyFileSnafu { path })?;
        info!("Writing aws role '{}'", name);
        let role = object(serde_json::json!({
            "credential_type": "iam_user",
            "policy_document": document,
        }));
        store.write(&format!("aws/roles/{}", name), &role).await?;
    }
    Ok(())
}

/// A secrets dump: full path to secret
pub(crate) type Dump = BTreeMap<String, Secret>;

/// Reads every secret under `prefix`.
pub(crate) async fn export<S>(store: &S, prefix: &str) -> Result<Dump>
where
    S: SecretKv + ?Sized,
{
    let mut dump = Dump::new();
    let mut pending = vec![prefix.trim_end_matches('/').to_string()];
    while let Some(dir) = pending.pop() {
        for child in store.list(&dir).await? {
            let path = format!("{}/{}", dir, child.trim_end_matches('/'));
            if child.ends_with('/') {
                pending.push(path);
            } else if let Some(secret) = store.read(&path).await? {
                dump.insert(path, secret);
            }
        }
    }
    info!("Exported {} secrets from {}", dump.len(), prefix);
    Ok(dump)
}

/// Writes every secret in `dump`.  With `update`, existing keys not in the dump are kept.
pub(crate) async fn import<S>(store: &S, dump: &Dump, update: bool) -> Result<()>
where
    S: SecretKv + ?Sized,
{
    for (path, secret) in dump {
        debug!("Importing {}", path);
        if update {
            store.update(path, secret).await?;
        } else {
            store.write(path, secret).await?;
        }
    }
    info!("Imported {} secrets", dump.len());
    Ok(())
}

pub(crate) fn write_dump(path: &Path, dump: &Dump) -> Result<()> {
    let json = serde_json::to_string_pretty(dump).context(error::DumpJsonSnafu { path })?;
    fs::write(path, json).context(error::DumpFileSnafu { path })
}

pub(crate) fn read_dump(path: &Path) -> Result<Dump> {
    let json = fs::read_to_string(path).context(error::DumpFileSnafu { path })?;
    serde_json::from_str(&json).context(error::DumpJsonSnafu { path })
}

/// Credentials the bootstrap writes for services
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct DbCredentials {
    pub(crate) name: String,
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl DbCredentials {
    pub(crate) fn to_secret(&self) -> Secret {
        match serde_json::to_value(self) {
            Ok(value) => object(value),
            Err(e) => {
                warn!("Failed to serialize database credentials: {}", e);
                Secret::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory secret store for tests

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub(crate) struct State {
        pub(crate) reachable_after: u32,
        pub(crate) initialized: bool,
        pub(crate) sealed: bool,
        pub(crate) keys: Vec<String>,
        pub(crate) init_calls: u32,
        pub(crate) unseal_calls: u32,
        pub(crate) kv: BTreeMap<String, Secret>,
        pub(crate) policies: BTreeMap<String, String>,
        pub(crate) audit: Vec<String>,
        pub(crate) auth: Vec<String>,
        pub(crate) engines: Vec<String>,
        pub(crate) tokens: Vec<String>,
    }

    #[derive(Debug, Default)]
    pub(crate) struct MemoryVault {
        pub(crate) state: Mutex<State>,
    }

    impl MemoryVault {
        pub(crate) fn sealed_with(keys: &[&str]) -> Self {
            let vault = Self::default();
            {
                let mut state = vault.state.lock().unwrap();
                state.initialized = true;
                state.sealed = true;
                state.keys = keys.iter().map(|k| k.to_string()).collect();
            }
            vault
        }
    }

    #[async_trait]
    impl SecretInit for MemoryVault {
        async fn status(&self) -> Result<Option<VaultStatus>> {
            let mut state = self.state.lock().unwrap();
            if state.reachable_after > 0 {
                state.reachable_after -= 1;
                return Ok(None);
            }
            Ok(Some(VaultStatus {
                initialized: state.initialized,
                sealed: state.sealed,
                standby: false,
            }))
        }

        async fn init(&self, shares: u32, _threshold: u32) -> Result<InitKeys> {
            let mut state = self.state.lock().unwrap();
            state.init_calls += 1;
            state.initialized = true;
            state.sealed = false;
            state.keys = (1..=shares).map(|n| format!("key-{}", n)).collect();
            Ok(InitKeys {
                root_token: "s.root".to_string(),
                recovery_keys: state.keys.clone(),
            })
        }
    }

    #[async_trait]
    impl SecretUnseal for MemoryVault {
        async fn unseal(&self, key: &str) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            state.unseal_calls += 1;
            if state.keys.iter().any(|k| k == key) {
                state.sealed = false;
            }
            Ok(state.sealed)
        }

        async fn seal(&self) -> Result<()> {
            self.state.lock().unwrap().sealed = true;
            Ok(())
        }
    }

    #[async_trait]
    impl SecretKv for MemoryVault {
        async fn read(&self, path: &str) -> Result<Option<Secret>> {
            Ok(self.state.lock().unwrap().kv.get(path).cloned())
        }

        async fn write(&self, path: &str, data: &Secret) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.kv.insert(path.to_string(), data.clone());
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.state.lock().unwrap().kv.remove(path);
            Ok(())
        }

        async fn list(&self, path: &str) -> Result<Vec<String>> {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            let state = self.state.lock().unwrap();
            let mut children: Vec<String> = state
                .kv
                .keys()
                .filter_map(|key| key.strip_prefix(&prefix))
                .map(|rest| match rest.split_once('/') {
                    Some((dir, _)) => format!("{}/", dir),
                    None => rest.to_string(),
                })
                .collect();
            children.dedup();
            Ok(children)
        }
    }

    #[async_trait]
    impl SecretPolicy for MemoryVault {
        async fn write_policy(&self, name: &str, rules: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.policies.insert(name.to_string(), rules.to_string());
            Ok(())
        }

        async fn audit_devices(&self) -> Result<Vec<String>> {
            Ok(self.state.lock().unwrap().audit.clone())
        }

        async fn enable_audit(&self, path: &str, _kind: &str, _options: &Secret) -> Result<()> {
            self.state.lock().unwrap().audit.push(format!("{}/", path));
            Ok(())
        }

        async fn auth_backends(&self) -> Result<Vec<String>> {
            Ok(self.state.lock().unwrap().auth.clone())
        }

        async fn enable_auth(&self, path: &str, _kind: &str) -> Result<()> {
            self.state.lock().unwrap().auth.push(format!("{}/", path));
            Ok(())
        }

        async fn secrets_engines(&self) -> Result<Vec<String>> {
            Ok(self.state.lock().unwrap().engines.clone())
        }

        async fn enable_secrets(&self, path: &str, _kind: &str) -> Result<()> {
            self.state.lock().unwrap().engines.push(format!("{}/", path));
            Ok(())
        }

        async fn provision(&self, policy: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            let token = format!("s.{}.{}", policy, state.tokens.len());
            state.tokens.push(token.clone());
            Ok(token)
        }

        async fn revoke(&self, token: &str) -> Result<()> {
            self.state.lock().unwrap().tokens.retain(|t| t != token);
            Ok(())
        }
    }
}

mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Failed to write secrets dump {}: {}", path.display(), source))]
        DumpFile {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Invalid secrets dump {}: {}", path.display(), source))]
        DumpJson {
            path: PathBuf,
            source: serde_json::Error,
        },

        #[snafu(display("Request to {} failed: {}", url, source))]
        Http { url: String, source: reqwest::Error },

        #[snafu(display("Invalid response from {}: {}", url, source))]
        InvalidResponse {
            url: String,
            source: serde_json::Error,
        },

        #[snafu(display("Response from {} is missing '{}'", url, field))]
        MissingField { url: String, field: String },

        #[snafu(display(
            "Secret store is sealed and no recovery keys were found in {}",
            path.display()
        ))]
        NoKeys { path: PathBuf },

        #[snafu(display("{} answered from a node that is not active", url))]
        NotActive { url: String },

        #[snafu(display("Failed to read policy directory {}: {}", path.display(), source))]
        Policies {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Failed to read policy {}: {}", path.display(), source))]
        PolicyFile {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Failed to create {}: {}", path.display(), source))]
        PrivateDir {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display(
            "Refusing to overwrite saved secret store material in {}",
            path.display()
        ))]
        PrivateExists { path: PathBuf },

        #[snafu(display("Failed to access {}: {}", path.display(), source))]
        PrivateFile {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Secret store returned {} for {}: {}", code, url, body))]
        Status {
            url: String,
            code: reqwest::StatusCode,
            body: String,
        },

        #[snafu(display(
            "Secret store is still sealed after submitting every key in {}",
            path.display()
        ))]
        StillSealed { path: PathBuf },

        #[snafu(display("Timed out waiting for {}", what))]
        Timeout { what: String },

        #[snafu(display("Invalid secret store URL {}: {}", url, source))]
        Url {
            url: String,
            source: url::ParseError,
        },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;

impl Error {
    /// Errors that mean "try again later" while waiting for the store to come up
    pub(crate) fn is_not_ready(&self) -> bool {
        match self {
            Error::NotActive { .. } => true,
            Error::Http { source, .. } => source.is_connect() || source.is_timeout(),
            Error::Status { code, .. } => code.is_server_error(),
            _ => false,
        }
    }

    /// True for timeouts, which the caller reports as a status check failure
    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

#[cfg(test)]
mod test {
    use super::memory::MemoryVault;
    use super::*;
    use std::time::Duration;

    fn waits() -> Waits {
        Waits {
            interval: Duration::from_secs(15),
            settle: Duration::from_secs(30),
            timeout: Duration::from_secs(120),
        }
    }

    fn secret(pairs: &[(&str, &str)]) -> Secret {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn initializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let private = PrivateStore::new(dir.path(), "vault.bosslet.a");
        let vault = MemoryVault::default();
        vault.state.lock().unwrap().reachable_after = 2;

        assert!(initialize(&vault, &private, 5, 3, waits()).await.unwrap());
        assert!(private.exists());
        assert_eq!(private.keys().unwrap().len(), 5);

        // Second run only checks; nothing new is written
        assert!(!initialize(&vault, &private, 5, 3, waits()).await.unwrap());
        assert_eq!(vault.state.lock().unwrap().init_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unseals_with_saved_keys() {
        let dir = tempfile::tempdir().unwrap();
        let private = PrivateStore::new(dir.path(), "vault.bosslet.a");
        private
            .save(&InitKeys {
                root_token: "s.root".to_string(),
                recovery_keys: vec!["wrong".to_string(), "right".to_string()],
            })
            .unwrap();
        let vault = MemoryVault::sealed_with(&["right"]);

        assert!(!initialize(&vault, &private, 5, 3, waits()).await.unwrap());
        let state = vault.state.lock().unwrap();
        assert!(!state.sealed);
        assert_eq!(state.unseal_calls, 2);
        assert_eq!(state.init_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sealed_without_keys_fails() {
        let dir = tempfile::tempdir().unwrap();
        let private = PrivateStore::new(dir.path(), "vault.bosslet.a");
        let vault = MemoryVault::sealed_with(&["right"]);
        let err = initialize(&vault, &private, 5, 3, waits())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoKeys { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let private = PrivateStore::new(dir.path(), "vault.bosslet.a");
        let vault = MemoryVault::default();
        vault.state.lock().unwrap().reachable_after = u32::MAX;
        let err = initialize(&vault, &private, 5, 3, waits())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn configure_loads_policies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("endpoint.hcl"), "path \"secret/endpoint/*\" {}").unwrap();
        fs::write(dir.path().join("activities.hcl"), "path \"secret/activities/*\" {}").unwrap();
        fs::write(dir.path().join("ingest.iam"), "{\"Version\": \"2012-10-17\"}").unwrap();
        fs::write(dir.path().join("README"), "ignored").unwrap();

        let vault = MemoryVault::default();
        configure(&vault, "123456789012", dir.path()).await.unwrap();
        // Running twice doesn't enable anything a second time
        configure(&vault, "123456789012", dir.path()).await.unwrap();

        let state = vault.state.lock().unwrap();
        assert_eq!(
            state.policies.keys().collect::<Vec<_>>(),
            vec!["activities", "endpoint"]
        );
        assert_eq!(state.audit, vec!["file/"]);
        assert_eq!(state.auth, vec!["aws/"]);
        assert_eq!(state.engines, vec!["aws/"]);
        assert_eq!(
            state.kv["auth/aws/role/endpoint"]["bound_iam_instance_profile_arn"],
            "arn:aws:iam::123456789012:instance-profile/endpoint"
        );
        assert!(state.kv.contains_key("aws/roles/ingest"));
    }

    #[tokio::test]
    async fn export_then_import() {
        let source = MemoryVault::default();
        source
            .write("secret/endpoint/auth", &secret(&[("client_id", "endpoint")]))
            .await
            .unwrap();
        source
            .write("secret/endpoint/django/db", &secret(&[("user", "boss")]))
            .await
            .unwrap();
        source
            .write("other/ignored", &secret(&[("x", "y")]))
            .await
            .unwrap();

        let dump = export(&source, "secret/").await.unwrap();
        assert_eq!(
            dump.keys().collect::<Vec<_>>(),
            vec!["secret/endpoint/auth", "secret/endpoint/django/db"]
        );

        let target = MemoryVault::default();
        target
            .write(
                "secret/endpoint/auth",
                &secret(&[("client_id", "old"), ("secret", "kept")]),
            )
            .await
            .unwrap();
        import(&target, &dump, true).await.unwrap();
        let auth = target.read("secret/endpoint/auth").await.unwrap().unwrap();
        assert_eq!(auth["client_id"], "endpoint");
        assert_eq!(auth["secret"], "kept");

        import(&target, &dump, false).await.unwrap();
        let auth = target.read("secret/endpoint/auth").await.unwrap().unwrap();
        assert!(!auth.contains_key("secret"));
    }

    #[test]
    fn dump_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let mut dump = Dump::new();
        dump.insert("secret/a".to_string(), secret(&[("k", "v")]));
        write_dump(&path, &dump).unwrap();
        assert_eq!(read_dump(&path).unwrap(), dump);
    }
}
