//! Nightly backups of the endpoint database and the secret store into a bucket that expires them.

use super::{description, error, Module, Network, Result};
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{LifecycleRule, PipelineObject, Template, Value};
use snafu::OptionExt;

const PIPELINE_ROLE: &str = "DataPipelineDefaultRole";
const RESOURCE_ROLE: &str = "backup";
const BACKUP_INSTANCE_TYPE: &str = "t3.micro";

pub(super) struct Backup;

#[async_trait]
impl Module for Backup {
    fn id(&self) -> LogicalId {
        LogicalId::Backup
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core, LogicalId::Api]
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let network = Network::import(ctx).await?;
        let mut template = Template::new(description(ctx, LogicalId::Backup));

        let bucket = names.resolve(Kind::S3, LogicalId::Backup);
        template.add_s3_bucket(
            "BackupBucket",
            &bucket,
            &[LifecycleRule::Expiration {
                id: "expire-backups".to_string(),
                days: ctx.scenario.backup_retention_days,
                prefix: None,
            }],
        );
        template.add_security_group(
            "BackupSecurityGroup",
            &names.resolve(Kind::Sg, LogicalId::Backup),
            "Backup workers; outbound only",
            network.vpc.clone(),
            &[],
        );

        let subnet = network
            .internal_subnets
            .first()
            .cloned()
            .context(error::MissingSettingSnafu {
                bosslet: &ctx.bosslet.name,
                setting: "availability_zones",
            })?;
        let db_host = names.dns(LogicalId::EndpointDb);
        let vault_host = names.dns(LogicalId::Vault);
        let objects = [
            PipelineObject::new("Default", "Default")
                .field("scheduleType", Value::from("cron"))
                .field("failureAndRerunMode", Value::from("CASCADE"))
                .field("role", Value::from(PIPELINE_ROLE))
                .field("resourceRole", Value::from(RESOURCE_ROLE))
                .field(
                    "pipelineLogUri",
                    Value::join(
                        "",
                        vec![
                            Value::from("s3://"),
                            Value::reference("BackupBucket"),
                            Value::from("/logs/"),
                        ],
                    ),
                )
                .reference("schedule", "Nightly"),
            PipelineObject::new("Nightly", "Nightly")
                .field("type", Value::from("Schedule"))
                .field("period", Value::from("1 day"))
                .field("startAt", Value::from("FIRST_ACTIVATION_DATE_TIME")),
            PipelineObject::new("BackupInstance", "BackupInstance")
                .field("type", Value::from("Ec2Resource"))
                .field("instanceType", Value::from(BACKUP_INSTANCE_TYPE))
                .field("subnetId", subnet)
                .field("securityGroupIds", network.internal_security_group.clone())
                .field("securityGroupIds", Value::reference("BackupSecurityGroup"))
                .field("terminateAfter", Value::from("2 Hours")),
            PipelineObject::new("EndpointDbBackup", "EndpointDbBackup")
                .field("type", Value::from("ShellCommandActivity"))
                .field(
                    "command",
                    Value::from(format!(
                        "backup-rds {} s3://{}/endpoint-db/",
                        db_host, bucket
                    )),
                )
                .reference("runsOn", "BackupInstance"),
            PipelineObject::new("VaultBackup", "VaultBackup")
                .field("type", Value::from("ShellCommandActivity"))
                .field(
                    "command",
                    Value::from(format!("backup-vault {} s3://{}/vault/", vault_host, bucket)),
                )
                .reference("runsOn", "BackupInstance"),
        ];
        template.add_data_pipeline(
            "BackupPipeline",
            &names.resolve(Kind::Dns, LogicalId::Backup),
            &objects,
        );

        Ok(template)
    }
}
