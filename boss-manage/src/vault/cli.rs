//! The `vault` subcommand: day-to-day operations on a bosslet's secret store.

use super::{PrivateStore, SecretStore};
use clap::{Parser, ValueEnum};
use log::info;
use snafu::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};

/// Where `export` starts when no path is given
const DEFAULT_PREFIX: &str = "secret";

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum VaultOp {
    Status,
    Unseal,
    Seal,
    Read,
    Delete,
    List,
    Provision,
    Revoke,
    Export,
    Import,
}

/// Runs an operation against a bosslet's secret store
#[derive(Debug, Parser)]
pub(crate) struct VaultArgs {
    /// Bosslet to connect to
    pub(crate) bosslet: String,

    #[arg(value_enum)]
    pub(crate) op: VaultOp,

    /// Secret path, policy name or token, depending on the operation
    pub(crate) arg: Option<String>,

    #[arg(long)]
    /// Dump file written by export and read by import
    pub(crate) file: Option<PathBuf>,

    #[arg(long)]
    /// Import into existing secrets instead of replacing them
    pub(crate) update: bool,
}

/// Runs `args.op`, returning what should be shown to the operator.
pub(crate) async fn run<S>(store: &S, private: &PrivateStore, args: &VaultArgs) -> Result<String>
where
    S: SecretStore + ?Sized,
{
    let op = args.op;
    let arg = move || {
        args.arg.as_deref().context(error::MissingArgSnafu {
            op: format!("{:?}", op),
        })
    };
    let file = move || {
        args.file.as_deref().context(error::MissingFileSnafu {
            op: format!("{:?}", op),
        })
    };

    let output = match op {
        VaultOp::Status => match store.status().await.context(error::VaultSnafu)? {
            Some(status) => format!(
                "initialized: {}, sealed: {}, standby: {}",
                status.initialized, status.sealed, status.standby
            ),
            None => "unreachable".to_string(),
        },
        VaultOp::Unseal => {
            super::unseal(store, private).await.context(error::VaultSnafu)?;
            "unsealed".to_string()
        }
        VaultOp::Seal => {
            store.seal().await.context(error::VaultSnafu)?;
            "sealed".to_string()
        }
        VaultOp::Read => {
            let path = arg()?;
            let secret = store
                .read(path)
                .await
                .context(error::VaultSnafu)?
                .context(error::NoSecretSnafu { path })?;
            render(&secret)?
        }
        VaultOp::Delete => {
            let path = arg()?;
            store.delete(path).await.context(error::VaultSnafu)?;
            format!("deleted {}", path)
        }
        VaultOp::List => store
            .list(arg()?)
            .await
            .context(error::VaultSnafu)?
            .join("\n"),
        VaultOp::Provision => store.provision(arg()?).await.context(error::VaultSnafu)?,
        VaultOp::Revoke => {
            store.revoke(arg()?).await.context(error::VaultSnafu)?;
            "revoked".to_string()
        }
        VaultOp::Export => {
            let prefix = args.arg.as_deref().unwrap_or(DEFAULT_PREFIX);
            let dump = super::export(store, prefix).await.context(error::VaultSnafu)?;
            write_or_render(file().ok(), &dump)?
        }
        VaultOp::Import => {
            let path = file()?;
            let dump = super::read_dump(path).context(error::VaultSnafu)?;
            super::import(store, &dump, args.update)
                .await
                .context(error::VaultSnafu)?;
            format!("imported {} secrets from {}", dump.len(), path.display())
        }
    };
    Ok(output)
}

fn render<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context(error::RenderSnafu)
}

fn write_or_render(path: Option<&Path>, dump: &super::Dump) -> Result<String> {
    match path {
        Some(path) => {
            super::write_dump(path, dump).context(error::VaultSnafu)?;
            info!("Wrote {} secrets to {}", dump.len(), path.display());
            Ok(format!("exported {} secrets", dump.len()))
        }
        None => render(dump),
    }
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("{} needs a path, policy or token argument", op))]
        MissingArg { op: String },

        #[snafu(display("{} needs --file", op))]
        MissingFile { op: String },

        #[snafu(display("No secret at {}", path))]
        NoSecret { path: String },

        #[snafu(display("Failed to render secret: {}", source))]
        Render { source: serde_json::Error },

        #[snafu(display("{}", source))]
        Vault { source: crate::vault::Error },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{run, Error, VaultArgs, VaultOp};
    use crate::vault::memory::MemoryVault;
    use crate::vault::{InitKeys, PrivateStore, Secret, SecretKv};

    fn secret(pairs: &[(&str, &str)]) -> Secret {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect()
    }

    fn args(op: VaultOp, arg: Option<&str>) -> VaultArgs {
        VaultArgs {
            bosslet: "bosslet.a".to_string(),
            op,
            arg: arg.map(str::to_string),
            file: None,
            update: false,
        }
    }

    fn private() -> (tempfile::TempDir, PrivateStore) {
        let dir = tempfile::tempdir().unwrap();
        let private = PrivateStore::new(dir.path(), "vault.bosslet.a");
        (dir, private)
    }

    #[tokio::test]
    async fn reads_and_deletes_secrets() {
        let store = MemoryVault::default();
        store
            .write("secret/auth/realm", &secret(&[("username", "bossadmin")]))
            .await
            .unwrap();
        let (_dir, private) = private();

        let shown = run(&store, &private, &args(VaultOp::Read, Some("secret/auth/realm")))
            .await
            .unwrap();
        assert!(shown.contains("bossadmin"));

        run(&store, &private, &args(VaultOp::Delete, Some("secret/auth/realm")))
            .await
            .unwrap();
        let err = run(&store, &private, &args(VaultOp::Read, Some("secret/auth/realm")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSecret { .. }));
    }

    #[tokio::test]
    async fn operations_need_their_argument() {
        let store = MemoryVault::default();
        let (_dir, private) = private();
        let err = run(&store, &private, &args(VaultOp::Provision, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingArg { .. }));
        let err = run(&store, &private, &args(VaultOp::Import, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingFile { .. }));
    }

    #[tokio::test]
    async fn unseals_with_saved_keys() {
        let store = MemoryVault::sealed_with(&["key-2"]);
        let (_dir, private) = private();
        private
            .save(&InitKeys {
                root_token: "s.root".to_string(),
                recovery_keys: vec!["key-1".to_string(), "key-2".to_string()],
            })
            .unwrap();

        run(&store, &private, &args(VaultOp::Unseal, None))
            .await
            .unwrap();
        assert!(!store.state.lock().unwrap().sealed);
    }

    #[tokio::test]
    async fn export_then_import_into_another_store() {
        let source = MemoryVault::default();
        source
            .write("secret/keycloak", &secret(&[("password", "hunter2")]))
            .await
            .unwrap();
        let (dir, private) = private();
        let dump = dir.path().join("dump.json");

        let mut export = args(VaultOp::Export, None);
        export.file = Some(dump.clone());
        run(&source, &private, &export).await.unwrap();

        let target = MemoryVault::default();
        let mut import = args(VaultOp::Import, None);
        import.file = Some(dump);
        run(&target, &private, &import).await.unwrap();
        assert_eq!(
            target.read("secret/keycloak").await.unwrap(),
            source.read("secret/keycloak").await.unwrap()
        );
    }
}
