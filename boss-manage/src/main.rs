/*!
`boss-manage` builds, deploys and bootstraps the stacks that make up a bosslet.

A bosslet is one named deployment, described by a profile in the bosslet catalog.  Its stacks
come from configuration modules (`core`, `redis`, `api`, ...) which declare what they depend on;
every action is planned across the selected modules before anything is changed.

Actions:
* create, update and delete stacks, previewing updates as change sets
* generate templates without deploying them
* run a module's pre-init or post-init bootstrap on its own
* finish an interrupted migration with update-migrate

Helpers:
* ssh and scp to hosts inside the VPC through the bastion
* secret store operations (status, unseal, read, export, ...)
*/

mod actions;
mod aws;
mod bootstrap;
mod configs;
mod context;
mod keycloak;
mod machine;
mod migrations;
mod poll;
mod prompt;
mod resolver;
mod ssh;
mod stack;
mod vault;

use actions::{Action, Deployment};
use aws::Ec2Lookup;
use aws_config::SdkConfig;
use bosslet_config::{Catalog, Scenario};
use clap::Parser;
use context::{Context, Paths};
use log::info;
use prompt::TerminalPrompt;
use simplelog::{CombinedLogger, Config as LogConfig, ConfigBuilder, LevelFilter, SimpleLogger};
use snafu::ResultExt;
use stack::cloudformation::CloudFormation;
use std::path::PathBuf;
use std::process;
use tokio::runtime::Runtime;

fn run(args: &Args) -> Result<()> {
    // SimpleLogger will send errors to stderr and anything less to stdout.
    // The AWS SDK is chatty at INFO, so it gets its own logger at WARN.
    match args.log_level {
        LevelFilter::Info => {
            CombinedLogger::init(vec![
                SimpleLogger::new(
                    LevelFilter::Info,
                    ConfigBuilder::new()
                        .add_filter_ignore_str("aws_config")
                        .add_filter_ignore_str("aws_credential_types")
                        .add_filter_ignore_str("aws_smithy")
                        .add_filter_ignore_str("tracing::span")
                        .build(),
                ),
                SimpleLogger::new(
                    LevelFilter::Warn,
                    ConfigBuilder::new()
                        .add_filter_allow_str("aws_config")
                        .add_filter_allow_str("aws_credential_types")
                        .add_filter_allow_str("aws_smithy")
                        .add_filter_allow_str("tracing::span")
                        .build(),
                ),
            ])
            .context(error::LoggerSnafu)?;
        }
        _ => {
            SimpleLogger::init(args.log_level, LogConfig::default()).context(error::LoggerSnafu)?
        }
    }

    let paths = Paths::new(&args.root_dir, &args.config_dir);
    if let SubCommands::List = args.subcommand {
        let catalog = Catalog::load(&paths.config).context(error::ConfigSnafu)?;
        for name in catalog.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let rt = Runtime::new().context(error::RuntimeSnafu)?;
    rt.block_on(async {
        match &args.subcommand {
            SubCommands::Create(deploy) => deploy_action(paths, Action::Create, deploy).await,
            SubCommands::Update(deploy) => deploy_action(paths, Action::Update, deploy).await,
            SubCommands::Delete(deploy) => deploy_action(paths, Action::Delete, deploy).await,
            SubCommands::Generate(deploy) => deploy_action(paths, Action::Generate, deploy).await,
            SubCommands::PreInit(deploy) => deploy_action(paths, Action::PreInit, deploy).await,
            SubCommands::PostInit(deploy) => deploy_action(paths, Action::PostInit, deploy).await,
            SubCommands::UpdateMigrate(deploy) => {
                deploy_action(paths, Action::UpdateMigrate, deploy).await
            }
            SubCommands::Ssh(ssh_args) => {
                let (ctx, _) = load(paths, &ssh_args.bosslet, &Overrides::default()).await?;
                machine::ssh(&ctx, ssh_args)
                    .await
                    .context(error::MachineSnafu)
            }
            SubCommands::Scp(scp_args) => {
                let (ctx, _) = load(paths, &scp_args.bosslet, &Overrides::default()).await?;
                machine::scp(&ctx, scp_args)
                    .await
                    .context(error::MachineSnafu)
            }
            SubCommands::Vault(vault_args) => {
                let (ctx, _) = load(paths, &vault_args.bosslet, &Overrides::default()).await?;
                let session = bootstrap::open_vault(&ctx)
                    .await
                    .context(error::VaultSessionSnafu)?;
                let private = bootstrap::private_store(&ctx);
                let output = vault::cli::run(&session.client, &private, vault_args)
                    .await
                    .context(error::VaultSnafu)?;
                println!("{}", output);
                Ok(())
            }
            SubCommands::List => Ok(()),
        }
    })
}

async fn deploy_action(paths: Paths, action: Action, deploy: &DeployArgs) -> Result<()> {
    let (ctx, sdk) = load(paths, &deploy.bosslet, &deploy.overrides).await?;
    let service = CloudFormation::new(&sdk);
    let prompt = TerminalPrompt;
    Deployment::new(&ctx, &service, &prompt)
        .run(action, &deploy.modules)
        .await
        .context(error::ActionSnafu {
            bosslet: &deploy.bosslet,
        })
}

/// Builds the context for `bosslet` from the catalog, its scenario and the command line.
async fn load(paths: Paths, bosslet: &str, overrides: &Overrides) -> Result<(Context, SdkConfig)> {
    let catalog = Catalog::load(&paths.config).context(error::ConfigSnafu)?;
    let mut bosslet = catalog.bosslet(bosslet).context(error::ConfigSnafu)?;
    if let Some(version) = &overrides.ami_version {
        bosslet = bosslet.with_ami_version(version.as_str());
    }
    if overrides.disable_preview {
        bosslet = bosslet.without_preview();
    }

    let scenario = match overrides.scenario.as_ref().or(bosslet.scenario.as_ref()) {
        Some(name) => Scenario::load(paths.scenarios(), name).context(error::ConfigSnafu)?,
        None => Scenario::default(),
    };

    info!("Using bosslet {} in {}", bosslet.name, bosslet.region);
    let sdk = aws::sdk_config(&bosslet).await;
    let lookup = Ec2Lookup::new(&sdk);
    let commit = context::current_commit(&paths.root);
    let ctx = Context::new(bosslet, scenario, paths, commit, Box::new(lookup));
    Ok((ctx, sdk))
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        for cause in e.causes() {
            eprintln!("    {}", cause);
        }
        if let Some(command) = e.remediation() {
            eprintln!("To continue, run: {}", command);
        }
        process::exit(e.exit_code());
    }
}

/// Builds, deploys and bootstraps the stacks of a bosslet
#[derive(Debug, Parser)]
struct Args {
    #[arg(global = true, long, default_value = "INFO")]
    /// How much detail to log; from least to most: ERROR, WARN, INFO, DEBUG, TRACE
    log_level: LevelFilter,

    #[arg(global = true, long, env = "BOSS_CONFIG_DIR", default_value = "config")]
    /// Directory holding the bosslet profiles
    config_dir: PathBuf,

    #[arg(global = true, long, env = "BOSS_ROOT", default_value = ".")]
    /// Directory holding scenarios, migrations, templates, resources and vault material
    root_dir: PathBuf,

    #[command(subcommand)]
    subcommand: SubCommands,
}

#[derive(Debug, Parser)]
enum SubCommands {
    /// Create the stacks of modules that aren't deployed yet
    Create(DeployArgs),
    /// Update deployed stacks, running any migrations between versions
    Update(DeployArgs),
    /// Delete deployed stacks, dependents first
    Delete(DeployArgs),
    /// Write templates and their arguments without deploying
    Generate(DeployArgs),
    /// Run the checks that precede create and update
    PreInit(DeployArgs),
    /// Run the bootstrap that follows create and update
    PostInit(DeployArgs),
    /// Finish the post-update hooks of an interrupted migration
    UpdateMigrate(DeployArgs),

    Ssh(machine::SshArgs),
    Scp(machine::ScpArgs),
    Vault(vault::cli::VaultArgs),

    /// List the bosslets in the catalog
    List,
}

#[derive(Debug, Parser)]
struct DeployArgs {
    /// Bosslet to act on
    bosslet: String,

    /// Modules to act on, or `all`
    #[arg(required = true)]
    modules: Vec<String>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Debug, Default, clap::Args)]
struct Overrides {
    #[arg(long)]
    /// Scenario to apply instead of the bosslet's own
    scenario: Option<String>,

    #[arg(long)]
    /// Image version to deploy; `latest` picks the newest image
    ami_version: Option<String>,

    #[arg(long)]
    /// Apply updates without previewing them as change sets
    disable_preview: bool,
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(super) enum Error {
        #[snafu(display("{}", source))]
        Action {
            bosslet: String,
            source: crate::actions::Error,
        },

        #[snafu(display("Configuration error: {}", source))]
        Config { source: bosslet_config::Error },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },

        #[snafu(display("{}", source))]
        Machine { source: crate::machine::Error },

        #[snafu(display("Failed to create async runtime: {}", source))]
        Runtime { source: std::io::Error },

        #[snafu(display("Secret store operation failed: {}", source))]
        Vault { source: crate::vault::cli::Error },

        #[snafu(display("Failed to reach the secret store: {}", source))]
        VaultSession { source: crate::bootstrap::Error },
    }

    impl Error {
        pub(crate) fn exit_code(&self) -> i32 {
            match self {
                Error::Action { source, .. } => source.exit_code(),
                _ => 1,
            }
        }

        pub(crate) fn causes(&self) -> Vec<String> {
            match self {
                Error::Action { source, .. } => source.causes(),
                _ => Vec::new(),
            }
        }

        pub(crate) fn remediation(&self) -> Option<String> {
            match self {
                Error::Action { bosslet, source } => source.remediation(bosslet),
                _ => None,
            }
        }
    }
}
type Result<T> = std::result::Result<T, error::Error>;
