//! Post-deployment bootstrap: bring the secret store up, then register the API with the identity
//! provider.  Both are only reachable inside the VPC, so everything here goes through a tunnel.

use crate::context::Context;
use crate::keycloak::{self, Keycloak};
use crate::ssh::Connection;
use crate::vault::{self, DbCredentials, PrivateStore, SecretKv, VaultClient, Waits};
use bosslet_config::LogicalId;
use log::{debug, info, warn};
use snafu::{OptionExt, ResultExt};
use std::time::Duration;

/// Recovery key shares created when the secret store is initialized
pub(crate) const RECOVERY_SHARES: u32 = 5;
pub(crate) const RECOVERY_THRESHOLD: u32 = 3;

const KEYCLOAK_PORT: u16 = 8080;
const REALM: &str = "BOSS";
const ENDPOINT_CLIENT: &str = "endpoint";
const CLIENT_SCOPES: &[&str] = &["boss-roles", "boss-groups"];

/// Admin login for the identity provider
pub(crate) const KEYCLOAK_SECRET: &str = "secret/keycloak";
/// A realm user used to check the API after deployment
pub(crate) const REALM_USER_SECRET: &str = "secret/auth/realm";
/// Database credentials the endpoint reads at startup
pub(crate) const DB_SECRET: &str = "secret/endpoint/django/db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub(crate) username: String,
    pub(crate) password: String,
}

/// Reads a `{username, password}` secret.
pub(crate) async fn credentials<S>(store: &S, path: &str) -> Result<Credentials>
where
    S: SecretKv + ?Sized,
{
    let secret = store
        .read(path)
        .await
        .context(error::VaultSnafu)?
        .context(error::MissingSecretSnafu { path })?;
    let field = |field: &str| {
        secret
            .get(field)
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .context(error::MissingFieldSnafu { path, field })
    };
    Ok(Credentials {
        username: field("username")?,
        password: field("password")?,
    })
}

/// Stores the endpoint's database credentials, keeping any other settings at the same path.
pub(crate) async fn write_db_credentials<S>(store: &S, db: &DbCredentials) -> Result<()>
where
    S: SecretKv + ?Sized,
{
    info!("Writing database credentials for {} to {}", db.host, DB_SECRET);
    store
        .update(DB_SECRET, &db.to_secret())
        .await
        .context(error::VaultSnafu)
}

/// Where the secret store's root token and recovery keys are kept for this bosslet
pub(crate) fn private_store(ctx: &Context) -> PrivateStore {
    PrivateStore::new(ctx.paths.vault(), &ctx.names.dns(LogicalId::Vault))
}

/// A secret store client and the tunnel it talks through.  The tunnel closes when this is
/// dropped.
pub(crate) struct VaultSession {
    _connection: Connection,
    pub(crate) client: VaultClient,
}

/// Opens a tunnel to the secret store.  The client carries the root token when one has been
/// saved for this bosslet.
pub(crate) async fn open_vault(ctx: &Context) -> Result<VaultSession> {
    let mut connection = ctx
        .connection(LogicalId::Vault)
        .await
        .context(error::ContextSnafu)?;
    let port = connection.vault_tunnel().await.context(error::SshSnafu {
        host: ctx.names.dns(LogicalId::Vault),
    })?;
    let mut client =
        VaultClient::local(port, ctx.bosslet.verify_ssl).context(error::VaultSnafu)?;
    let private = private_store(ctx);
    if private.exists() {
        client = client.with_token(private.root_token().context(error::VaultSnafu)?);
    } else {
        debug!("No saved root token in {}", private.dir().display());
    }
    Ok(VaultSession {
        _connection: connection,
        client,
    })
}

fn vault_error(source: vault::Error) -> Error {
    if source.is_timeout() {
        Error::StatusCheck {
            service: "secret store".to_string(),
            reason: source.to_string(),
        }
    } else {
        Error::Vault { source }
    }
}

fn keycloak_error(source: keycloak::Error) -> Error {
    match source {
        keycloak::Error::Timeout { .. } => Error::StatusCheck {
            service: "identity provider".to_string(),
            reason: source.to_string(),
        },
        keycloak::Error::Login { .. } => Error::Login { source },
        source => Error::Keycloak { source },
    }
}

/// Initializes (or unseals) the secret store and loads its policies and auth backends.
pub(crate) async fn secret_store(ctx: &Context) -> Result<()> {
    let session = open_vault(ctx).await?;
    let private = private_store(ctx);
    let waits = Waits::from_scenario(&ctx.scenario);
    let initialized = vault::initialize(
        &session.client,
        &private,
        RECOVERY_SHARES,
        RECOVERY_THRESHOLD,
        waits,
    )
    .await
    .map_err(vault_error)?;
    if initialized {
        info!("Secret store initialized");
    }

    let root = private.root_token().context(error::VaultSnafu)?;
    let client = session.client.clone().with_token(root);
    vault::configure(&client, &ctx.bosslet.account_id, &ctx.paths.policies())
        .await
        .map_err(vault_error)
}

/// An identity provider admin session and the tunnel it talks through
struct KeycloakSession {
    _connection: Connection,
    keycloak: Keycloak,
}

async fn open_keycloak<S>(ctx: &Context, store: &S) -> Result<KeycloakSession>
where
    S: SecretKv + ?Sized,
{
    let admin = credentials(store, KEYCLOAK_SECRET).await?;
    let mut connection = ctx
        .connection(LogicalId::Auth)
        .await
        .context(error::ContextSnafu)?;
    let port = connection
        .tunnel(KEYCLOAK_PORT)
        .await
        .context(error::SshSnafu {
            host: ctx.names.dns(LogicalId::Auth),
        })?;
    let mut keycloak = Keycloak::local(port, ctx.bosslet.verify_ssl).map_err(keycloak_error)?;
    keycloak
        .wait_ready(
            Duration::from_secs(ctx.scenario.service_poll_seconds),
            Duration::from_secs(ctx.scenario.keycloak_timeout_seconds),
        )
        .await
        .map_err(keycloak_error)?;
    keycloak
        .login(&admin.username, &admin.password)
        .await
        .map_err(keycloak_error)?;
    Ok(KeycloakSession {
        _connection: connection,
        keycloak,
    })
}

/// Creates the client scopes the realm's clients share.
pub(crate) async fn identity_provider<S>(ctx: &Context, store: &S) -> Result<()>
where
    S: SecretKv + ?Sized,
{
    let mut session = open_keycloak(ctx, store).await?;
    let result = session
        .keycloak
        .ensure_client_scopes(REALM, CLIENT_SCOPES)
        .await;
    session.keycloak.logout().await.map_err(keycloak_error)?;
    let created = result.map_err(keycloak_error)?;
    if !created.is_empty() {
        info!("Created client scopes: {}", created.join(", "));
    }
    Ok(())
}

/// Lets the identity provider redirect back to this bosslet's public API, then checks that the
/// API answers with a realm user's token.
pub(crate) async fn register_endpoint<S>(ctx: &Context, store: &S) -> Result<()>
where
    S: SecretKv + ?Sized,
{
    let api = ctx
        .names
        .public_dns("api")
        .context(error::NamesSnafu { machine: "api" })?;
    let redirect = format!("https://{}/*", api);

    let mut session = open_keycloak(ctx, store).await?;
    let result = session
        .keycloak
        .append_redirect_uri(REALM, ENDPOINT_CLIENT, &redirect)
        .await;
    if let Ok(client_config) = session
        .keycloak
        .installation_url(REALM, ENDPOINT_CLIENT)
        .await
    {
        debug!("Endpoint client installation: {}", client_config);
    }
    session.keycloak.logout().await.map_err(keycloak_error)?;
    if result.map_err(keycloak_error)? {
        info!("Added {} to the {} client's redirect URIs", redirect, ENDPOINT_CLIENT);
    }

    ping(ctx, &session.keycloak, store, &api).await
}

/// Probes `/ping` with a realm user's token.  Skipped when no realm user is stored; a failed
/// probe is only reported.
async fn ping<S>(ctx: &Context, keycloak: &Keycloak, store: &S, api: &str) -> Result<()>
where
    S: SecretKv + ?Sized,
{
    let user = match credentials(store, REALM_USER_SECRET).await {
        Ok(user) => user,
        Err(Error::MissingSecret { .. }) => {
            debug!("No realm user in {}, not checking the API", REALM_USER_SECRET);
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let token = keycloak
        .user_token(REALM, ENDPOINT_CLIENT, &user.username, &user.password)
        .await
        .map_err(keycloak_error)?;

    let url = format!("https://{}/v1/ping/", api);
    let http = reqwest::Client::builder()
        .danger_accept_invalid_certs(!ctx.bosslet.verify_ssl)
        .build()
        .context(error::PingSnafu { url: &url })?;
    match http.get(&url).bearer_auth(token).send().await {
        Ok(response) if response.status().is_success() => info!("{} is answering", url),
        Ok(response) => warn!("{} answered {}", url, response.status()),
        Err(e) => warn!("{} isn't answering: {}", url, e),
    }
    Ok(())
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("{}", source))]
        Context { source: crate::context::Error },

        #[snafu(display("{}", source))]
        Keycloak { source: crate::keycloak::Error },

        #[snafu(display("{}", source))]
        Login { source: crate::keycloak::Error },

        #[snafu(display("Secret {} has no '{}'", path, field))]
        MissingField { path: String, field: String },

        #[snafu(display("Secret {} doesn't exist", path))]
        MissingSecret { path: String },

        #[snafu(display("Invalid public name for {}: {}", machine, source))]
        Names {
            machine: String,
            source: bosslet_config::Error,
        },

        #[snafu(display("Failed to set up client for {}: {}", url, source))]
        Ping { url: String, source: reqwest::Error },

        #[snafu(display("Failed to reach {}: {}", host, source))]
        Ssh {
            host: String,
            source: crate::ssh::Error,
        },

        #[snafu(display("The {} isn't healthy: {}", service, reason))]
        StatusCheck { service: String, reason: String },

        #[snafu(display("{}", source))]
        Vault { source: crate::vault::Error },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{credentials, write_db_credentials, vault_error, Error, DB_SECRET, KEYCLOAK_SECRET};
    use crate::vault::memory::MemoryVault;
    use crate::vault::{self, DbCredentials, SecretKv};
    use serde_json::json;

    fn secret(value: serde_json::Value) -> vault::Secret {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn reads_credentials() {
        let store = MemoryVault::default();
        assert!(matches!(
            credentials(&store, KEYCLOAK_SECRET).await,
            Err(Error::MissingSecret { .. })
        ));

        store
            .write(KEYCLOAK_SECRET, &secret(json!({ "username": "admin" })))
            .await
            .unwrap();
        assert!(matches!(
            credentials(&store, KEYCLOAK_SECRET).await,
            Err(Error::MissingField { ref field, .. }) if field == "password"
        ));

        store
            .update(KEYCLOAK_SECRET, &secret(json!({ "password": "hunter2" })))
            .await
            .unwrap();
        let admin = credentials(&store, KEYCLOAK_SECRET).await.unwrap();
        assert_eq!(admin.username, "admin");
        assert_eq!(admin.password, "hunter2");
    }

    #[tokio::test]
    async fn db_credentials_keep_other_settings() {
        let store = MemoryVault::default();
        store
            .write(DB_SECRET, &secret(json!({ "engine": "mysql", "password": "old" })))
            .await
            .unwrap();
        let db = DbCredentials {
            name: "boss".into(),
            user: "testuser".into(),
            password: "new".into(),
            host: "endpoint-db.bosslet.a".into(),
            port: 3306,
        };
        write_db_credentials(&store, &db).await.unwrap();

        let stored = store.read(DB_SECRET).await.unwrap().unwrap();
        assert_eq!(stored["engine"], "mysql");
        assert_eq!(stored["password"], "new");
        assert_eq!(stored["host"], "endpoint-db.bosslet.a");
    }

    #[test]
    fn timeouts_are_status_checks() {
        let timeout = vault::Error::Timeout {
            what: "secret store to answer".into(),
        };
        assert!(matches!(vault_error(timeout), Error::StatusCheck { .. }));
        let other = vault::Error::NoKeys {
            path: "/tmp/keys".into(),
        };
        assert!(matches!(vault_error(other), Error::Vault { .. }));
    }
}
