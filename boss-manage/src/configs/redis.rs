//! The redis caches the endpoint and the cache manager share.

use super::{description, error, Module, Network, Result};
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{DnsTarget, Ingress, ReplicationGroup, Template, Value};
use snafu::ResultExt;
use std::collections::BTreeMap;

const REDIS_PORT: u16 = 6379;

pub(super) struct Redis;

#[async_trait]
impl Module for Redis {
    fn id(&self) -> LogicalId {
        LogicalId::Redis
    }

    fn dependencies(&self) -> &'static [LogicalId] {
        &[LogicalId::Core]
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let scenario = &ctx.scenario;
        let network = Network::import(ctx).await?;
        let mut template = Template::new(description(ctx, LogicalId::Redis));

        template.add_security_group(
            "RedisSecurityGroup",
            &names.resolve(Kind::Sg, LogicalId::Redis),
            "Redis from inside the VPC",
            network.vpc.clone(),
            &[Ingress::tcp(REDIS_PORT, ctx.bosslet.vpc_cidr.as_str())],
        );

        let mut parameters = BTreeMap::new();
        if let Some(percent) = scenario.redis_reserved_memory_percent {
            parameters.insert("reserved-memory-percent".to_string(), percent.to_string());
        }

        let mut caches = vec![
            ("Cache", LogicalId::Cache, scenario.redis_cache_type.clone()),
            (
                "CacheState",
                LogicalId::CacheState,
                scenario.redis_state_type.clone(),
            ),
            (
                "CacheThrottle",
                LogicalId::CacheThrottle,
                scenario.redis_throttle_type.clone(),
            ),
        ];
        if let Some(session_type) = &scenario.redis_session_type {
            caches.push(("CacheSession", LogicalId::CacheSession, session_type.clone()));
        }

        for (key, id, node_type) in caches {
            let cache = ReplicationGroup {
                hostname: names.dns(id),
                engine_version: scenario.redis_engine_version.clone(),
                node_type,
                cluster_size: scenario.redis_cluster_size,
                subnets: network.internal_subnets.clone(),
                security_groups: vec![
                    network.internal_security_group.clone(),
                    Value::reference("RedisSecurityGroup"),
                ],
                parameters: parameters.clone(),
            };
            template
                .add_redis_replication(key, &cache)
                .context(error::TemplateSnafu { module: "redis" })?;
            template.add_route53_record(
                &format!("{}DNS", key),
                &names.dns(id),
                network.zone.clone(),
                DnsTarget::Replication(key.to_string()),
            );
        }

        Ok(template)
    }
}

#[cfg(test)]
mod test {
    use super::Redis;
    use crate::configs::Module;
    use crate::context::test_support::context;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[tokio::test]
    async fn caches_resolve_internally() {
        let template = Redis.template(&context()).await.unwrap();
        template.validate().unwrap();
        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": {
                    "CacheDNS": { "Properties": { "Name": "cache.bosslet.a" } },
                    "CacheStateSubnetGroup": {
                        "Properties": {
                            "SubnetIds": [
                                { "Fn::ImportValue": "CoreBossletA-InternalSubnetA" },
                                { "Fn::ImportValue": "CoreBossletA-InternalSubnetB" },
                            ]
                        }
                    },
                }
            })
        );
    }

    #[tokio::test]
    async fn session_cache_is_optional() {
        let mut ctx = context();
        ctx.scenario.redis_session_type = None;
        assert!(!Redis.template(&ctx).await.unwrap().has_resource("CacheSession"));

        ctx.scenario.redis_session_type = Some("cache.t3.small".to_string());
        ctx.scenario.redis_reserved_memory_percent = Some(30);
        let template = Redis.template(&ctx).await.unwrap();
        assert!(template.has_resource("CacheSession"));
        assert!(template.has_resource("CacheSessionParameters"));
    }
}
