//! The public API: the endpoint cluster behind an application load balancer, its database, and
//! the buckets it stores data in.

use super::{
    ami, description, error, public_dns, user_data, Module, Network, Result,
};
use crate::bootstrap::{self, KEYCLOAK_SECRET};
use crate::context::Context;
use crate::vault::DbCredentials;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{
    Alarm, AppListener, Arg, AutoScaleGroup, DnsTarget, Ingress, LifecycleRule, RdsInstance,
    StepAdjustment, Template, Value,
};
use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::Rng;
use snafu::ResultExt;
use std::sync::Mutex;

const MODULE: &str = "api";

const DB_ENGINE: &str = "mysql";
const DB_ENGINE_VERSION: &str = "5.7";
const DB_NAME: &str = "boss";
const DB_USER: &str = "django";
const DB_PORT: u16 = 3306;
const DB_PASSWORD_LENGTH: usize = 24;

const ENDPOINT_PORT: u16 = 80;
/// Target group the load balancer's HTTPS listener forwards to
const TARGET_GROUP: &str = "EndpointElbTargetGroup443";
/// Objects tagged this way are expired from the delete bucket
const DELETE_TAG: (&str, &str) = ("delete", "true");

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DB_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// The database password is generated with the template, so it's only known to the invocation
/// that built one.
#[derive(Default)]
pub(super) struct Api {
    db_password: Mutex<Option<String>>,
}

impl Api {
    fn remember_password(&self, password: &str) {
        if let Ok(mut stored) = self.db_password.lock() {
            *stored = Some(password.to_string());
        }
    }

    fn password(&self) -> Option<String> {
        self.db_password
            .lock()
            .ok()
            .and_then(|stored| stored.clone())
    }
}

#[async_trait]
impl Module for Api {
    fn id(&self) -> LogicalId {
        LogicalId::Api
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core, LogicalId::Redis]
    }

    fn version(&self) -> u32 {
        2
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let scenario = &ctx.scenario;
        let network = Network::import(ctx).await?;
        let mut template = Template::new(description(ctx, LogicalId::Api));

        let password = generate_password();
        self.remember_password(&password);

        template.add_arg(Arg::keypair(
            "KeyName",
            ctx.bosslet.ssh_key.clone(),
            "Key pair for the endpoint hosts",
        ));
        template.add_arg(Arg::ami(
            "EndpointAMI",
            ami(ctx, LogicalId::Endpoint).await?,
            "Image for the endpoint",
        ));
        template.add_arg(Arg::certificate(
            "Certificate",
            ctx.bosslet.certificate_arn.clone(),
            "Certificate for the public API",
        ));
        template.add_arg(Arg::password(
            "DbPassword",
            password,
            "Password of the endpoint's database user",
        ));

        template.add_security_group(
            "EndpointHttpsSecurityGroup",
            &names.resolve(Kind::Sg, LogicalId::Https),
            "HTTPS from anywhere",
            network.vpc.clone(),
            &[Ingress::tcp(443, "0.0.0.0/0"), Ingress::tcp(80, "0.0.0.0/0")],
        );

        let db = RdsInstance {
            hostname: names.dns(LogicalId::EndpointDb),
            engine: DB_ENGINE.to_string(),
            engine_version: DB_ENGINE_VERSION.to_string(),
            instance_class: scenario.endpoint_db_type.clone(),
            storage_gb: scenario.endpoint_db_storage_gb,
            db_name: DB_NAME.to_string(),
            username: Value::from(DB_USER),
            password: Value::reference("DbPassword"),
            port: DB_PORT,
            subnets: network.internal_subnets.clone(),
            security_groups: vec![network.internal_security_group.clone()],
            multi_az: scenario.endpoint_db_multi_az,
            backup_retention_days: scenario.backup_retention_days,
        };
        template.add_rds("EndpointDb", &db);
        template.add_route53_record(
            "EndpointDbDNS",
            &names.dns(LogicalId::EndpointDb),
            network.zone.clone(),
            DnsTarget::Rds("EndpointDb".to_string()),
        );

        template
            .add_app_loadbalancer(
                "EndpointElb",
                &names.dns(LogicalId::EndpointElb),
                &[AppListener::https(
                    443,
                    ENDPOINT_PORT,
                    Value::reference("Certificate"),
                )],
                network.vpc.clone(),
                network.external_subnets.clone(),
                vec![
                    network.internal_security_group.clone(),
                    Value::reference("EndpointHttpsSecurityGroup"),
                ],
                "/ping/",
                true,
            )
            .context(error::TemplateSnafu { module: MODULE })?;

        let cuboids = names.resolve(Kind::S3, LogicalId::CuboidBucket);
        let mut endpoint = AutoScaleGroup::new(
            names.dns(LogicalId::Endpoint),
            Value::reference("EndpointAMI"),
            Value::reference("KeyName"),
            network.internal_subnets.clone(),
            scenario.endpoint_type.as_str(),
            scenario.endpoint_cluster_size,
        );
        endpoint.security_groups = vec![network.internal_security_group.clone()];
        endpoint.instance_profile = Some("endpoint".to_string());
        endpoint.target_group = Some(Value::reference(TARGET_GROUP));
        endpoint.health_check_grace_period = 300;
        endpoint.depends_on = vec!["EndpointDb".to_string()];
        endpoint.user_data = Some(user_data(
            ctx,
            LogicalId::Endpoint,
            &[
                ("db", names.dns(LogicalId::EndpointDb)),
                ("cache", names.dns(LogicalId::Cache)),
                ("cache_state", names.dns(LogicalId::CacheState)),
                ("cuboid_bucket", cuboids.clone()),
                ("auth", public_dns(ctx, "auth")?),
            ],
        ));
        template.add_autoscale_group("Endpoint", &endpoint);

        let mut cpu = Alarm::new(
            format!("{}-cpu-high", names.dns(LogicalId::Endpoint)),
            "AWS/EC2",
            "CPUUtilization",
        );
        cpu.description = "Scale the endpoint out when it's busy".to_string();
        cpu.threshold = 70;
        cpu.period = 300;
        cpu.evaluation_periods = 2;
        cpu.dimensions = vec![(
            "AutoScalingGroupName".to_string(),
            Value::reference("Endpoint"),
        )];
        template.add_autoscale_policy(
            "EndpointScaleOut",
            Value::reference("Endpoint"),
            &[StepAdjustment::new(Some(0), None, 1)],
            &[("EndpointCpuHigh".to_string(), cpu)],
        );

        template.add_s3_bucket("CuboidBucket", &cuboids, &[]);
        template.add_s3_bucket(
            "TileBucket",
            &names.resolve(Kind::S3, LogicalId::TileBucket),
            &[],
        );
        template.add_s3_bucket(
            "IngestBucket",
            &names.resolve(Kind::S3, LogicalId::IngestBucket),
            &[],
        );
        template.add_s3_bucket(
            "DeleteBucket",
            &names.resolve(Kind::S3, LogicalId::DeleteBucket),
            &[LifecycleRule::DeleteTag {
                id: "expire-deleted".to_string(),
                days: scenario.delete_bucket_expiration_days,
                tag_key: DELETE_TAG.0.to_string(),
                tag_value: DELETE_TAG.1.to_string(),
            }],
        );
        template
            .add_sqs_queue(
                "DeadLetterQueue",
                &names.sqs(LogicalId::DeadLetter),
                scenario.queue_retention_seconds,
                scenario.queue_visibility_seconds,
                None,
            )
            .context(error::TemplateSnafu { module: MODULE })?;

        template.add_public_dns(
            "EndpointPublicDNS",
            &public_dns(ctx, "api")?,
            names.external_domain(),
            Value::get_att("EndpointElb", "DNSName"),
        );

        Ok(template)
    }

    /// The endpoint logs in to the identity provider at boot, so its admin login must exist.
    async fn pre_init(&self, ctx: &Context) -> Result<()> {
        let session = bootstrap::open_vault(ctx)
            .await
            .context(error::BootstrapSnafu)?;
        bootstrap::credentials(&session.client, KEYCLOAK_SECRET)
            .await
            .context(error::BootstrapSnafu)?;
        debug!("Found identity provider login in {}", KEYCLOAK_SECRET);
        Ok(())
    }

    async fn post_init(&self, ctx: &Context) -> Result<()> {
        let session = bootstrap::open_vault(ctx)
            .await
            .context(error::BootstrapSnafu)?;
        match self.password() {
            Some(password) => {
                let db = DbCredentials {
                    name: DB_NAME.to_string(),
                    user: DB_USER.to_string(),
                    password,
                    host: ctx.names.dns(LogicalId::EndpointDb),
                    port: DB_PORT,
                };
                bootstrap::write_db_credentials(&session.client, &db)
                    .await
                    .context(error::BootstrapSnafu)?;
            }
            None => info!("No template built in this run, leaving database credentials as they are"),
        }
        bootstrap::register_endpoint(ctx, &session.client)
            .await
            .context(error::BootstrapSnafu)
    }
}

#[cfg(test)]
mod test {
    use super::{Api, DB_PASSWORD_LENGTH};
    use crate::configs::Module;
    use crate::context::test_support::context;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[tokio::test]
    async fn endpoint_sits_behind_load_balancer() {
        let template = Api::default().template(&context()).await.unwrap();
        template.validate().unwrap();
        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": {
                    "Endpoint": {
                        "Properties": {
                            "TargetGroupARNs": [{ "Ref": "EndpointElbTargetGroup443" }]
                        }
                    },
                    "EndpointDb": {
                        "Properties": { "MasterUserPassword": { "Ref": "DbPassword" } }
                    },
                    "EndpointPublicDNS": {
                        "Properties": { "Name": "api-a.theboss.io." }
                    },
                    "DeleteBucket": {
                        "Properties": {
                            "BucketName": "delete.bosslet.a",
                            "LifecycleConfiguration": {
                                "Rules": [{ "TagFilters": [{ "Key": "delete", "Value": "true" }] }]
                            }
                        }
                    },
                }
            })
        );
    }

    #[tokio::test]
    async fn password_is_remembered_for_post_init() {
        let api = Api::default();
        assert_eq!(api.password(), None);

        let template = api.template(&context()).await.unwrap();
        let password = api.password().unwrap();
        assert_eq!(password.len(), DB_PASSWORD_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        let argument = template
            .arguments()
            .find(|(key, _)| *key == "DbPassword")
            .and_then(|(_, value)| value);
        assert_eq!(argument, Some(password.as_str()));

        api.template(&context()).await.unwrap();
        assert_ne!(api.password(), Some(password));
    }
}
