//! Alarms on the public load balancers and the database, and a scheduled check that the secret
//! store is unsealed.

use super::{description, error, vpc_function, Module, Network, Result};
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{Alarm, RuleTarget, Template, Value};
use snafu::ResultExt;

const MODULE: &str = "cloudwatch";

/// How often the secret store monitor runs
const VAULT_CHECK_SCHEDULE: &str = "rate(2 minutes)";

pub(super) struct Cloudwatch;

fn alarm(name: String, namespace: &str, metric: &str, threshold: i64) -> Alarm {
    let mut alarm = Alarm::new(name, namespace, metric);
    alarm.threshold = threshold;
    alarm.period = 300;
    alarm.evaluation_periods = 2;
    alarm
}

#[async_trait]
impl Module for Cloudwatch {
    fn id(&self) -> LogicalId {
        LogicalId::Cloudwatch
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core, LogicalId::Api]
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let network = Network::import(ctx).await?;
        let mut template = Template::new(description(ctx, LogicalId::Cloudwatch));

        template.add_sns_topic(
            "AlarmTopic",
            &names.resolve(Kind::Sns, LogicalId::Alarms),
            "Alarms",
            &[],
        );
        let topic = Value::reference("AlarmTopic");

        // Load balancer names can't contain dots
        let auth_elb = names.dns(LogicalId::Auth).replace('.', "-");
        let db = names.dns(LogicalId::EndpointDb).replace('.', "-");
        let alarms = [
            (
                "AuthLatencyAlarm",
                alarm(
                    format!("{}-latency", auth_elb),
                    "AWS/ELB",
                    "Latency",
                    2,
                ),
                "LoadBalancerName",
                auth_elb.clone(),
            ),
            (
                "AuthUnhealthyAlarm",
                alarm(
                    format!("{}-unhealthy", auth_elb),
                    "AWS/ELB",
                    "UnHealthyHostCount",
                    0,
                ),
                "LoadBalancerName",
                auth_elb.clone(),
            ),
            (
                "EndpointDbCpuAlarm",
                alarm(format!("{}-cpu", db), "AWS/RDS", "CPUUtilization", 80),
                "DBInstanceIdentifier",
                db.clone(),
            ),
        ];
        for (key, mut alarm, dimension, value) in alarms {
            alarm.dimensions = vec![(dimension.to_string(), Value::from(value))];
            template.add_cloudwatch_alarm(key, &alarm, vec![topic.clone()]);
        }

        let mut monitor = vpc_function(
            ctx,
            &network,
            LogicalId::VaultMonitor,
            "vault_monitor.handler",
        )?;
        monitor.environment.insert(
            "VAULT".to_string(),
            Value::from(names.dns(LogicalId::Vault)),
        );
        monitor
            .environment
            .insert("TOPIC".to_string(), topic.clone());
        template
            .add_lambda("VaultMonitor", &monitor)
            .context(error::TemplateSnafu { module: MODULE })?;
        template.add_event_rule(
            "VaultCheck",
            &names.resolve(Kind::Cw, LogicalId::VaultCheck),
            Some(VAULT_CHECK_SCHEDULE),
            None,
            &[RuleTarget::new("VaultMonitor", Value::arn("VaultMonitor"))],
        );
        template.add_lambda_permission(
            "VaultCheckPermission",
            Value::reference("VaultMonitor"),
            "events.amazonaws.com",
            Some(Value::arn("VaultCheck")),
        );

        Ok(template)
    }
}

#[cfg(test)]
mod test {
    use super::Cloudwatch;
    use crate::configs::Module;
    use crate::context::test_support::context;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[tokio::test]
    async fn monitor_runs_on_a_schedule() {
        let template = Cloudwatch.template(&context()).await.unwrap();
        template.validate().unwrap();
        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": {
                    "VaultCheck": {
                        "Properties": {
                            "ScheduleExpression": "rate(2 minutes)",
                            "Targets": [{ "Arn": { "Fn::GetAtt": ["VaultMonitor", "Arn"] } }],
                        }
                    },
                    "VaultCheckPermission": {
                        "Properties": { "SourceArn": { "Fn::GetAtt": ["VaultCheck", "Arn"] } }
                    },
                    "VaultMonitor": {
                        "Properties": {
                            "Environment": { "Variables": { "VAULT": "vault.bosslet.a" } }
                        }
                    },
                    "AuthLatencyAlarm": {
                        "Properties": { "AlarmActions": [{ "Ref": "AlarmTopic" }] }
                    },
                }
            })
        );
    }
}
