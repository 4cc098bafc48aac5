//! Cuboid copying between buckets, driven by a queue.

use super::{description, error, vpc_function, Module, Network, Result};
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{DeadLetter, Resource, Template, Value};
use serde_json::json;
use snafu::ResultExt;

const MODULE: &str = "copycuboid";

/// Messages handed to the function per invocation
const BATCH_SIZE: u32 = 1;

pub(super) struct CopyCuboid;

#[async_trait]
impl Module for CopyCuboid {
    fn id(&self) -> LogicalId {
        LogicalId::CopyCuboid
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core, LogicalId::CacheDb]
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let scenario = &ctx.scenario;
        let network = Network::import(ctx).await?;
        let mut template = Template::new(description(ctx, LogicalId::CopyCuboid));

        template
            .add_sqs_queue(
                "CopyCuboidDeadLetterQueue",
                &names.sqs(LogicalId::CopyCuboidDeadLetter),
                scenario.queue_retention_seconds,
                scenario.queue_visibility_seconds,
                None,
            )
            .context(error::TemplateSnafu { module: MODULE })?;
        template
            .add_sqs_queue(
                "CopyCuboidQueue",
                &names.sqs(LogicalId::CopyCuboidQueue),
                scenario.queue_retention_seconds,
                // A message stays hidden for as long as the function may run with it
                scenario.queue_visibility_seconds.max(scenario.lambda_timeout),
                Some(DeadLetter {
                    queue_arn: Value::arn("CopyCuboidDeadLetterQueue"),
                    max_receive: scenario.dead_letter_max_receive,
                }),
            )
            .context(error::TemplateSnafu { module: MODULE })?;

        let mut function = vpc_function(
            ctx,
            &network,
            LogicalId::CopyCuboidLambda,
            "copy_cuboid_lambda.handler",
        )?;
        function.environment.insert(
            "CUBOID_BUCKET".to_string(),
            Value::from(names.resolve(Kind::S3, LogicalId::CuboidBucket)),
        );
        function.environment.insert(
            "S3_INDEX".to_string(),
            Value::from(names.resolve(Kind::Ddb, LogicalId::S3Index)),
        );
        template
            .add_lambda("CopyCuboidLambda", &function)
            .context(error::TemplateSnafu { module: MODULE })?;

        template.add_resource(
            "CopyCuboidEventSource",
            Resource::new(
                "AWS::Lambda::EventSourceMapping",
                json!({
                    "BatchSize": BATCH_SIZE,
                    "Enabled": true,
                    "EventSourceArn": Value::arn("CopyCuboidQueue").render(),
                    "FunctionName": Value::reference("CopyCuboidLambda").render(),
                }),
            ),
        );

        Ok(template)
    }
}

#[cfg(test)]
mod test {
    use super::CopyCuboid;
    use crate::configs::Module;
    use crate::context::test_support::context;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[tokio::test]
    async fn queue_feeds_the_function() {
        let mut ctx = context();
        ctx.scenario.queue_visibility_seconds = 30;
        let template = CopyCuboid.template(&ctx).await.unwrap();
        template.validate().unwrap();
        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": {
                    "CopyCuboidEventSource": {
                        "Properties": {
                            "EventSourceArn": { "Fn::GetAtt": ["CopyCuboidQueue", "Arn"] },
                            "FunctionName": { "Ref": "CopyCuboidLambda" },
                        }
                    },
                    "CopyCuboidQueue": {
                        "Properties": { "VisibilityTimeout": 120 }
                    },
                }
            })
        );
    }
}
