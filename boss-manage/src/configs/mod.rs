//! Configuration modules.  Each module expands to exactly one stack: it declares the modules it
//! depends on, the version of the template it builds, and the hooks run around deployment.
//!
//! `core` owns the network.  It exports the VPC, the internal zone, the subnets and the internal
//! security group, and every other module imports them instead of looking them up.

mod activities;
mod api;
mod backup;
mod cachedb;
mod cloudwatch;
mod copycuboid;
mod core_services;
mod dynamolambda;
mod idindexing;
mod redis;

use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::names::az_letter;
use bosslet_config::LogicalId;
use cfn_template::{Billing, Function, LambdaCode, Template, Value};
use log::debug;
use snafu::{ensure, OptionExt, ResultExt};

/// What `<module…>` expands to on the command line
pub(crate) const ALL: &str = "all";

/// Role the stack's functions run as; managed outside of the stacks
const LAMBDA_ROLE: &str = "lambda_cache_execution";
const LAMBDA_RUNTIME: &str = "python3.7";

#[async_trait]
pub(crate) trait Module: Send + Sync {
    fn id(&self) -> LogicalId;

    /// Modules that must be deployed before this one
    fn dependencies(&self) -> &'static [LogicalId] {
        &[]
    }

    /// Version of the template this module builds.  Bumped together with a migration.
    fn version(&self) -> u32 {
        1
    }

    async fn template(&self, ctx: &Context) -> Result<Template>;

    /// Checks run before the stack is created or updated
    async fn pre_init(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Bootstrap run once the stack is created or updated
    async fn post_init(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}

/// Every module, in deployment order
pub(crate) fn catalog() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(core_services::Core),
        Box::new(redis::Redis),
        Box::new(api::Api::default()),
        Box::new(cachedb::CacheDb),
        Box::new(activities::Activities),
        Box::new(cloudwatch::Cloudwatch),
        Box::new(idindexing::IdIndexing),
        Box::new(copycuboid::CopyCuboid),
        Box::new(dynamolambda::DynamoLambda),
        Box::new(backup::Backup),
    ]
}

/// The modules named on the command line.  `all` selects the whole catalog.
pub(crate) fn select(names: &[String]) -> Result<Vec<Box<dyn Module>>> {
    if names.iter().any(|name| name == ALL) {
        return Ok(catalog());
    }
    let mut selected: Vec<Box<dyn Module>> = Vec::new();
    for name in names {
        let module = catalog()
            .into_iter()
            .find(|module| module.id().as_str() == name);
        let module = match module {
            Some(module) => module,
            None => return error::UnknownModuleSnafu { name }.fail(),
        };
        if !selected.iter().any(|existing| existing.id() == module.id()) {
            selected.push(module);
        }
    }
    ensure!(!selected.is_empty(), error::NoModulesSnafu);
    debug!(
        "Selected modules: {}",
        selected
            .iter()
            .map(|module| module.id().as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(selected)
}

fn description(ctx: &Context, id: LogicalId) -> String {
    format!("{} configuration for {}", id, ctx.bosslet.name)
}

/// Name a `core` output is exported under
fn export_name(ctx: &Context, output: &str) -> String {
    format!("{}-{}", ctx.names.stack(LogicalId::Core), output)
}

fn core_import(ctx: &Context, output: &str) -> Value {
    Value::import(export_name(ctx, output))
}

fn subnet_output(zone: &str, id: LogicalId) -> String {
    let kind = match id {
        LogicalId::External => "External",
        _ => "Internal",
    };
    format!("{}Subnet{}", kind, az_letter(zone).to_uppercase())
}

fn lambda_subnet_output(index: u8) -> String {
    format!("LambdaSubnet{}", index)
}

/// The parts of the `core` network other stacks attach to
pub(crate) struct Network {
    pub(crate) vpc: Value,
    pub(crate) zone: Value,
    pub(crate) internal_security_group: Value,
    pub(crate) internal_subnets: Vec<Value>,
    pub(crate) external_subnets: Vec<Value>,
    pub(crate) lambda_subnets: Vec<Value>,
}

impl Network {
    async fn import(ctx: &Context) -> Result<Self> {
        let zones = ctx.availability_zones().await.context(error::ContextSnafu)?;
        let subnets = |id: LogicalId| -> Vec<Value> {
            zones
                .iter()
                .map(|zone| core_import(ctx, &subnet_output(zone, id)))
                .collect()
        };
        Ok(Self {
            vpc: core_import(ctx, "VPC"),
            zone: core_import(ctx, "InternalHostedZone"),
            internal_security_group: core_import(ctx, "InternalSecurityGroup"),
            internal_subnets: subnets(LogicalId::Internal),
            external_subnets: subnets(LogicalId::External),
            lambda_subnets: (0..ctx.bosslet.lambda_subnets)
                .map(|index| core_import(ctx, &lambda_subnet_output(index)))
                .collect(),
        })
    }
}

fn lambda_role(ctx: &Context) -> Value {
    Value::from(format!(
        "arn:aws:iam::{}:role/{}",
        ctx.bosslet.account_id, LAMBDA_ROLE
    ))
}

async fn ami(ctx: &Context, id: LogicalId) -> Result<Option<String>> {
    ctx.ami(id).await.context(error::ContextSnafu)
}

fn public_dns(ctx: &Context, machine: &str) -> Result<String> {
    ctx.names
        .public_dns(machine)
        .context(error::NamesSnafu { machine })
}

/// Boot configuration read by the images: host name and the services the host looks up.
fn user_data(ctx: &Context, id: LogicalId, extra: &[(&str, String)]) -> String {
    let mut data = format!(
        "[system]\nfqdn = {}\nmanage_etc_hosts = true\n\n[aws]\nregion = {}\nvault = {}\n",
        ctx.names.dns(id),
        ctx.bosslet.region,
        ctx.names.dns(LogicalId::Vault),
    );
    for (key, value) in extra {
        data.push_str(&format!("{} = {}\n", key, value));
    }
    data
}

/// A function built by the deployment helper, attached to the function subnets
fn vpc_function(ctx: &Context, network: &Network, id: LogicalId, handler: &str) -> Result<Function> {
    let name = ctx.names.lambda(id);
    let code = LambdaCode::built(lambda_bucket(ctx)?, &name);
    let mut function = Function::new(name, lambda_role(ctx), handler, LAMBDA_RUNTIME, code);
    function.memory = ctx.scenario.lambda_memory;
    function.timeout = ctx.scenario.lambda_timeout;
    function.security_groups = vec![network.internal_security_group.clone()];
    function.subnets = network.lambda_subnets.clone();
    function
        .environment
        .insert("BOSSLET".to_string(), Value::from(ctx.bosslet.name.as_str()));
    Ok(function)
}

fn billing(ctx: &Context) -> Billing {
    if ctx.scenario.dynamo_on_demand {
        Billing::OnDemand
    } else {
        Billing::Provisioned {
            read: ctx.scenario.dynamo_read_capacity,
            write: ctx.scenario.dynamo_write_capacity,
        }
    }
}

/// Bucket the deployment helper uploads function archives to
fn lambda_bucket(ctx: &Context) -> Result<&str> {
    ctx.bosslet
        .lambda_bucket
        .as_deref()
        .context(error::MissingSettingSnafu {
            bosslet: &ctx.bosslet.name,
            setting: "lambda_bucket",
        })
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("{}", source))]
        Bootstrap { source: crate::bootstrap::Error },

        #[snafu(display("{}", source))]
        Context { source: crate::context::Error },

        #[snafu(display("Bosslet {} has no '{}' setting", bosslet, setting))]
        MissingSetting { bosslet: String, setting: String },

        #[snafu(display("Invalid public name for {}: {}", machine, source))]
        Names {
            machine: String,
            source: bosslet_config::Error,
        },

        #[snafu(display("No modules selected"))]
        NoModules,

        #[snafu(display("Failed to build template for {}: {}", module, source))]
        Template {
            module: String,
            source: cfn_template::Error,
        },

        #[snafu(display("Unknown module '{}'", name))]
        UnknownModule { name: String },

        #[snafu(display("{} has no room for {} subnets of /{}", cidr, needed, prefix))]
        SubnetSpace {
            cidr: String,
            prefix: u8,
            needed: usize,
        },

        #[snafu(display("Failed to reach {}: {}", host, source))]
        Ssh {
            host: String,
            source: crate::ssh::Error,
        },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{catalog, select, subnet_output, Error};
    use crate::resolver::{check_acyclic, Selected};
    use bosslet_config::LogicalId;
    use std::collections::HashSet;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn catalog_dependencies_are_acyclic() {
        let declared: Vec<Selected> = catalog()
            .iter()
            .map(|module| Selected::new(module.id(), module.dependencies().to_vec()))
            .collect();
        check_acyclic(&declared).unwrap();

        // Every dependency is itself a known module
        let known: HashSet<LogicalId> = declared.iter().map(|entry| entry.module).collect();
        for entry in &declared {
            assert!(entry.dependencies.iter().all(|d| known.contains(d)));
        }
    }

    #[test]
    fn all_selects_catalog() {
        let selected = select(&names(&["api", "all"])).unwrap();
        assert_eq!(selected.len(), catalog().len());
    }

    #[test]
    fn selection_keeps_order_and_drops_repeats() {
        let selected = select(&names(&["api", "core", "api"])).unwrap();
        let ids: Vec<_> = selected.iter().map(|module| module.id()).collect();
        assert_eq!(ids, vec![LogicalId::Api, LogicalId::Core]);
        assert!(matches!(
            select(&names(&["proofreader"])),
            Err(Error::UnknownModule { .. })
        ));
        assert!(matches!(select(&[]), Err(Error::NoModules)));
    }

    #[test]
    fn dependencies_are_known_modules() {
        let modules: HashSet<_> = catalog().iter().map(|module| module.id()).collect();
        for module in catalog() {
            for dependency in module.dependencies() {
                assert!(modules.contains(dependency), "{} -> {}", module.id(), dependency);
            }
        }
    }

    #[test]
    fn subnet_outputs() {
        assert_eq!(subnet_output("us-east-1a", LogicalId::Internal), "InternalSubnetA");
        assert_eq!(subnet_output("us-east-1c", LogicalId::External), "ExternalSubnetC");
    }
}
