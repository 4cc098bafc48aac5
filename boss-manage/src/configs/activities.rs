//! The activities host, which runs the ingest and downsample workers.

use super::{ami, description, error, user_data, Module, Network, Result};
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{Arg, DnsTarget, Instance, Template, Value};
use log::info;
use snafu::{OptionExt, ResultExt};

/// Restarted after each deployment so the workers pick up new stack outputs
const RESTART: &str = "sudo systemctl restart activities";

pub(super) struct Activities;

#[async_trait]
impl Module for Activities {
    fn id(&self) -> LogicalId {
        LogicalId::Activities
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core, LogicalId::CacheDb]
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let network = Network::import(ctx).await?;
        let mut template = Template::new(description(ctx, LogicalId::Activities));

        template.add_arg(Arg::keypair(
            "KeyName",
            ctx.bosslet.ssh_key.clone(),
            "Key pair for the activities host",
        ));
        template.add_arg(Arg::ami(
            "ActivitiesAMI",
            ami(ctx, LogicalId::Activities).await?,
            "Image for the activities host",
        ));

        let subnet = network
            .internal_subnets
            .first()
            .cloned()
            .context(error::MissingSettingSnafu {
                bosslet: &ctx.bosslet.name,
                setting: "availability_zones",
            })?;
        let mut host = Instance::new(
            names.dns(LogicalId::Activities),
            Value::reference("ActivitiesAMI"),
            Value::reference("KeyName"),
            subnet,
            ctx.scenario.activities_type.as_str(),
        );
        host.security_groups = vec![network.internal_security_group];
        host.instance_profile = Some("activities".to_string());
        host.user_data = Some(user_data(
            ctx,
            LogicalId::Activities,
            &[
                ("downsample_queue", names.sqs(LogicalId::DownsampleQueue)),
                ("tile_index", names.resolve(Kind::Ddb, LogicalId::TileIndex)),
                ("ingest_bucket", names.resolve(Kind::S3, LogicalId::IngestBucket)),
            ],
        ));
        template.add_ec2_instance("Activities", &host);
        template.add_route53_record(
            "ActivitiesDNS",
            &names.dns(LogicalId::Activities),
            network.zone,
            DnsTarget::Ec2("Activities".to_string()),
        );

        Ok(template)
    }

    async fn post_init(&self, ctx: &Context) -> Result<()> {
        let host = ctx.names.dns(LogicalId::Activities);
        let mut connection = ctx
            .connection(LogicalId::Activities)
            .await
            .context(error::ContextSnafu)?;
        connection
            .open()
            .await
            .context(error::SshSnafu { host: &host })?;
        connection
            .cmd(RESTART)
            .context(error::SshSnafu { host: &host })?;
        info!("Restarted the workers on {}", host);
        Ok(())
    }
}
