//! The cache manager, the cuboid index tables, and the functions that write cuboids and
//! downsample them.

use super::{
    ami, billing, description, error, user_data, vpc_function, Module, Network, Result,
};
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{Arg, DeadLetter, DnsTarget, Instance, KeyType, Template, Value};
use snafu::{OptionExt, ResultExt};

const MODULE: &str = "cachedb";

/// `(key, table, attributes, key schema)` of the index tables
type TableSpec = (
    &'static str,
    LogicalId,
    &'static [(&'static str, &'static str)],
    &'static [(&'static str, KeyType)],
);

const TABLES: &[TableSpec] = &[
    (
        "S3IndexTable",
        LogicalId::S3Index,
        &[("object-key", "S"), ("version-node", "N")],
        &[("object-key", KeyType::Hash), ("version-node", KeyType::Range)],
    ),
    (
        "TileIndexTable",
        LogicalId::TileIndex,
        &[("chunk_key", "S"), ("task_id", "N")],
        &[("chunk_key", KeyType::Hash), ("task_id", KeyType::Range)],
    ),
];

pub(super) struct CacheDb;

#[async_trait]
impl Module for CacheDb {
    fn id(&self) -> LogicalId {
        LogicalId::CacheDb
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core, LogicalId::Redis, LogicalId::Api]
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let scenario = &ctx.scenario;
        let network = Network::import(ctx).await?;
        let mut template = Template::new(description(ctx, LogicalId::CacheDb));

        template.add_arg(Arg::keypair(
            "KeyName",
            ctx.bosslet.ssh_key.clone(),
            "Key pair for the cache manager",
        ));
        template.add_arg(Arg::ami(
            "CacheManagerAMI",
            ami(ctx, LogicalId::CacheManager).await?,
            "Image for the cache manager",
        ));

        for (key, id, attributes, key_schema) in TABLES {
            template.add_dynamo_table(
                key,
                &names.resolve(Kind::Ddb, *id),
                attributes,
                key_schema,
                billing(ctx),
            );
        }

        let subnet = network
            .internal_subnets
            .first()
            .cloned()
            .context(error::MissingSettingSnafu {
                bosslet: &ctx.bosslet.name,
                setting: "availability_zones",
            })?;
        let mut manager = Instance::new(
            names.dns(LogicalId::CacheManager),
            Value::reference("CacheManagerAMI"),
            Value::reference("KeyName"),
            subnet,
            scenario.cache_manager_type.as_str(),
        );
        manager.security_groups = vec![network.internal_security_group.clone()];
        manager.instance_profile = Some("cachemanager".to_string());
        manager.user_data = Some(user_data(
            ctx,
            LogicalId::CacheManager,
            &[
                ("cache", names.dns(LogicalId::Cache)),
                ("cache_state", names.dns(LogicalId::CacheState)),
                ("s3_index", names.resolve(Kind::Ddb, LogicalId::S3Index)),
                ("cuboid_bucket", names.resolve(Kind::S3, LogicalId::CuboidBucket)),
            ],
        ));
        template.add_ec2_instance("CacheManager", &manager);
        template.add_route53_record(
            "CacheManagerDNS",
            &names.dns(LogicalId::CacheManager),
            network.zone.clone(),
            DnsTarget::Ec2("CacheManager".to_string()),
        );

        template
            .add_sqs_queue(
                "DownsampleDeadLetterQueue",
                &names.sqs(LogicalId::DownsampleDeadLetter),
                scenario.queue_retention_seconds,
                scenario.queue_visibility_seconds,
                None,
            )
            .context(error::TemplateSnafu { module: MODULE })?;
        template
            .add_sqs_queue(
                "DownsampleQueue",
                &names.sqs(LogicalId::DownsampleQueue),
                scenario.queue_retention_seconds,
                scenario.queue_visibility_seconds,
                Some(DeadLetter {
                    queue_arn: Value::arn("DownsampleDeadLetterQueue"),
                    max_receive: scenario.dead_letter_max_receive,
                }),
            )
            .context(error::TemplateSnafu { module: MODULE })?;

        let cache_env = [
            ("CACHE", names.dns(LogicalId::Cache)),
            ("CACHE_STATE", names.dns(LogicalId::CacheState)),
            ("S3_INDEX", names.resolve(Kind::Ddb, LogicalId::S3Index)),
            ("CUBOID_BUCKET", names.resolve(Kind::S3, LogicalId::CuboidBucket)),
        ];

        let mut multi = vpc_function(ctx, &network, LogicalId::MultiLambda, "lambda_loader.handler")?;
        multi.memory = scenario.multi_lambda_memory;
        for (name, value) in &cache_env {
            multi
                .environment
                .insert(name.to_string(), Value::from(value.as_str()));
        }
        template
            .add_lambda("MultiLambda", &multi)
            .context(error::TemplateSnafu { module: MODULE })?;

        let mut downsample = vpc_function(
            ctx,
            &network,
            LogicalId::DownsampleVolume,
            "downsample_volume.handler",
        )?;
        downsample.memory = scenario.multi_lambda_memory;
        downsample
            .environment
            .insert("DOWNSAMPLE_QUEUE".to_string(), Value::reference("DownsampleQueue"));
        downsample.dead_letter = Some(Value::arn("DownsampleDeadLetterQueue"));
        for (name, value) in &cache_env {
            downsample
                .environment
                .insert(name.to_string(), Value::from(value.as_str()));
        }
        template
            .add_lambda("DownsampleVolumeLambda", &downsample)
            .context(error::TemplateSnafu { module: MODULE })?;

        Ok(template)
    }
}
