//! The `ssh` and `scp` subcommands: reach a bosslet's hosts through its bastion.

use crate::context::Context;
use bosslet_config::LogicalId;
use clap::Parser;
use snafu::ResultExt;
use std::path::PathBuf;

/// Opens a shell on a host, or runs one command there
#[derive(Debug, Parser)]
pub(crate) struct SshArgs {
    /// Bosslet the host belongs to
    pub(crate) bosslet: String,

    /// Host to log into, e.g. `vault` or `endpoint`
    pub(crate) machine: LogicalId,

    #[arg(long, short)]
    /// Command to run instead of a shell
    pub(crate) command: Option<String>,
}

/// Copies a file to or from a host
#[derive(Debug, Parser)]
pub(crate) struct ScpArgs {
    /// Bosslet the host belongs to
    pub(crate) bosslet: String,

    /// Host to copy to or from
    pub(crate) machine: LogicalId,

    /// Local file
    pub(crate) local: PathBuf,

    /// Path on the host
    pub(crate) remote: String,

    #[arg(long)]
    /// Copy from the host instead of to it
    pub(crate) download: bool,
}

pub(crate) async fn ssh(ctx: &Context, args: &SshArgs) -> Result<()> {
    let host = ctx.names.dns(args.machine);
    let mut connection = ctx
        .connection(args.machine)
        .await
        .context(error::ContextSnafu)?;
    connection
        .open()
        .await
        .context(error::SshSnafu { host: &host })?;
    match &args.command {
        Some(command) => connection.cmd(command),
        None => connection.shell(),
    }
    .context(error::SshSnafu { host })
}

pub(crate) async fn scp(ctx: &Context, args: &ScpArgs) -> Result<()> {
    let host = ctx.names.dns(args.machine);
    let mut connection = ctx
        .connection(args.machine)
        .await
        .context(error::ContextSnafu)?;
    connection
        .open()
        .await
        .context(error::SshSnafu { host: &host })?;
    connection
        .scp(&args.local, &args.remote, !args.download)
        .context(error::SshSnafu { host })
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("{}", source))]
        Context { source: crate::context::Error },

        #[snafu(display("Failed to reach {}: {}", host, source))]
        Ssh {
            host: String,
            source: crate::ssh::Error,
        },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{ssh, Error, SshArgs};
    use crate::context::test_support::context;
    use bosslet_config::LogicalId;
    use clap::Parser;

    #[test]
    fn machines_are_logical_ids() {
        let args = SshArgs::parse_from(["ssh", "bosslet.a", "vault", "-c", "uptime"]);
        assert_eq!(args.machine, LogicalId::Vault);
        assert_eq!(args.command.as_deref(), Some("uptime"));
        assert!(SshArgs::try_parse_from(["ssh", "bosslet.a", "nowhere"]).is_err());
    }

    #[tokio::test]
    async fn hosts_must_be_running() {
        let args = SshArgs::parse_from(["ssh", "bosslet.a", "endpoint"]);
        let err = ssh(&context(), &args).await.unwrap_err();
        assert!(matches!(err, Error::Context { .. }));
    }
}
