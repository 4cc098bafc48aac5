//! Annotation id indexing: the id tables, and the functions that find cuboids, batch them onto
//! a queue and write their ids.

use super::{billing, description, error, vpc_function, Module, Network, Result};
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{DeadLetter, Template, Value};
use snafu::ResultExt;

const MODULE: &str = "idindexing";

/// Table schemas, relative to the resources directory
const ID_INDEX_SCHEMA: &str = "dynamo/id_index_schema.json";
const ID_COUNT_SCHEMA: &str = "dynamo/id_count_schema.json";

/// `(key, function, handler)`
const FUNCTIONS: &[(&str, LogicalId, &str)] = &[
    (
        "IndexFindCuboidsLambda",
        LogicalId::IndexFindCuboids,
        "index_find_cuboids.handler",
    ),
    (
        "IndexBatchEnqueueLambda",
        LogicalId::IndexBatchEnqueue,
        "index_batch_enqueue_cuboids.handler",
    ),
    (
        "IndexWriteIdLambda",
        LogicalId::IndexWriteId,
        "index_write_id.handler",
    ),
];

pub(super) struct IdIndexing;

#[async_trait]
impl Module for IdIndexing {
    fn id(&self) -> LogicalId {
        LogicalId::IdIndexing
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core, LogicalId::CacheDb]
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let scenario = &ctx.scenario;
        let resources = ctx.paths.resources();
        let network = Network::import(ctx).await?;
        let mut template = Template::new(description(ctx, LogicalId::IdIndexing));

        for (key, id, schema) in [
            ("IdIndexTable", LogicalId::IdIndex, ID_INDEX_SCHEMA),
            ("IdCountIndexTable", LogicalId::IdCountIndex, ID_COUNT_SCHEMA),
        ] {
            template
                .add_dynamo_table_from_json(
                    key,
                    &names.resolve(Kind::Ddb, id),
                    resources.join(schema),
                    billing(ctx),
                )
                .context(error::TemplateSnafu { module: MODULE })?;
        }

        template
            .add_sqs_queue(
                "IndexDeadLetterQueue",
                &names.sqs(LogicalId::IndexDeadLetter),
                scenario.queue_retention_seconds,
                scenario.queue_visibility_seconds,
                None,
            )
            .context(error::TemplateSnafu { module: MODULE })?;
        template
            .add_sqs_queue(
                "IndexIdsQueue",
                &names.sqs(LogicalId::IndexIdsQueue),
                scenario.queue_retention_seconds,
                scenario.queue_visibility_seconds,
                Some(DeadLetter {
                    queue_arn: Value::arn("IndexDeadLetterQueue"),
                    max_receive: scenario.dead_letter_max_receive,
                }),
            )
            .context(error::TemplateSnafu { module: MODULE })?;

        for (key, id, handler) in FUNCTIONS {
            let mut function = vpc_function(ctx, &network, *id, handler)?;
            function.reserved_concurrency = scenario.index_lambda_reserved_concurrency;
            function.dead_letter = Some(Value::arn("IndexDeadLetterQueue"));
            function
                .environment
                .insert("IDS_QUEUE".to_string(), Value::reference("IndexIdsQueue"));
            function.environment.insert(
                "ID_INDEX_TABLE".to_string(),
                Value::from(names.resolve(Kind::Ddb, LogicalId::IdIndex)),
            );
            function.environment.insert(
                "ID_COUNT_TABLE".to_string(),
                Value::from(names.resolve(Kind::Ddb, LogicalId::IdCountIndex)),
            );
            function.environment.insert(
                "S3_INDEX".to_string(),
                Value::from(names.resolve(Kind::Ddb, LogicalId::S3Index)),
            );
            template
                .add_lambda(key, &function)
                .context(error::TemplateSnafu { module: MODULE })?;
        }

        Ok(template)
    }
}
