//! Autoscaling for the provisioned key-value tables: a function that adjusts throughput when
//! their capacity alarms fire.

use super::{description, error, lambda_bucket, lambda_role, Module, Result, LAMBDA_RUNTIME};
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{Function, LambdaCode, RuleTarget, Template, Value};
use serde_json::json;
use snafu::ResultExt;

const MODULE: &str = "dynamolambda";

pub(super) struct DynamoLambda;

#[async_trait]
impl Module for DynamoLambda {
    fn id(&self) -> LogicalId {
        LogicalId::DynamoLambda
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core, LogicalId::Api]
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let mut template = Template::new(description(ctx, LogicalId::DynamoLambda));

        template.add_sns_topic(
            "DynamoAlertsTopic",
            &names.resolve(Kind::Sns, LogicalId::DynamoAlerts),
            "Table scaling alerts",
            &[],
        );

        // Only talks to the table and alarm APIs, so it stays outside the VPC
        let name = names.lambda(LogicalId::DynamoAutoscale);
        let code = LambdaCode::built(lambda_bucket(ctx)?, &name);
        let mut function = Function::new(
            name,
            lambda_role(ctx),
            "dynamo_autoscale.handler",
            LAMBDA_RUNTIME,
            code,
        );
        function.timeout = ctx.scenario.lambda_timeout;
        function
            .environment
            .insert("ALERTS_TOPIC".to_string(), Value::reference("DynamoAlertsTopic"));
        template
            .add_lambda("DynamoAutoscaleLambda", &function)
            .context(error::TemplateSnafu { module: MODULE })?;

        template.add_event_rule(
            "DynamoScaling",
            &names.resolve(Kind::Cw, LogicalId::DynamoScaling),
            None,
            Some(json!({
                "source": ["aws.cloudwatch"],
                "detail-type": ["CloudWatch Alarm State Change"],
                "detail": { "state": { "value": ["ALARM"] } },
                "resources": [{ "prefix": "arn:aws:cloudwatch" }],
            })),
            &[RuleTarget::new(
                "DynamoAutoscale",
                Value::arn("DynamoAutoscaleLambda"),
            )],
        );
        template.add_lambda_permission(
            "DynamoScalingPermission",
            Value::reference("DynamoAutoscaleLambda"),
            "events.amazonaws.com",
            Some(Value::arn("DynamoScaling")),
        );

        Ok(template)
    }
}
