//! Relational databases, in-memory caches and key-value tables.

use crate::value::render_all;
use crate::{error, name_tag, Resource, Result, Template, Value};
use serde_json::json;
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A relational database instance and the subnet group it lives in
#[derive(Debug, Clone, PartialEq)]
pub struct RdsInstance {
    pub hostname: String,
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub storage_gb: u32,
    pub db_name: String,
    pub username: Value,
    pub password: Value,
    pub port: u16,
    pub subnets: Vec<Value>,
    pub security_groups: Vec<Value>,
    pub multi_az: bool,
    pub backup_retention_days: u32,
}

/// A replicated in-memory cache
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationGroup {
    pub hostname: String,
    pub engine_version: String,
    pub node_type: String,
    pub cluster_size: u32,
    pub subnets: Vec<Value>,
    pub security_groups: Vec<Value>,
    /// Non-default engine parameters; a parameter group is only created when this is non-empty.
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyType {
    Hash,
    Range,
}

impl KeyType {
    fn as_str(&self) -> &'static str {
        match self {
            KeyType::Hash => "HASH",
            KeyType::Range => "RANGE",
        }
    }
}

/// How a key-value table is billed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Billing {
    OnDemand,
    Provisioned { read: u32, write: u32 },
}

impl Billing {
    fn throughput(&self) -> Option<serde_json::Value> {
        match self {
            Billing::OnDemand => None,
            Billing::Provisioned { read, write } => Some(json!({
                "ReadCapacityUnits": read,
                "WriteCapacityUnits": write,
            })),
        }
    }

    fn apply(&self, properties: &mut serde_json::Value) {
        match self.throughput() {
            None => properties["BillingMode"] = "PAY_PER_REQUEST".into(),
            Some(throughput) => {
                properties["BillingMode"] = "PROVISIONED".into();
                properties["ProvisionedThroughput"] = throughput.clone();
                if let Some(indexes) = properties
                    .get_mut("GlobalSecondaryIndexes")
                    .and_then(|indexes| indexes.as_array_mut())
                {
                    for index in indexes {
                        index["ProvisionedThroughput"] = throughput.clone();
                    }
                }
            }
        }
    }
}

/// Parameter group family for a redis engine version, e.g. `5.0.6` -> `redis5.0`.
pub fn redis_family(version: &str) -> Result<&'static str> {
    let mut parts = version.split('.');
    let major = parts.next().unwrap_or_default();
    let minor = parts.next().unwrap_or_default();
    let family = match (major, minor) {
        ("2", "6") => "redis2.6",
        ("2", "8") => "redis2.8",
        ("3", "2") => "redis3.2",
        ("4", "0") => "redis4.0",
        ("5", "0") => "redis5.0",
        ("6", _) => "redis6.x",
        ("7", _) => "redis7",
        _ => return error::UnknownRedisVersionSnafu { version }.fail(),
    };
    Ok(family)
}

impl Template {
    /// Adds the database under `key` and its subnet group under `<key>SubnetGroup`.
    pub fn add_rds(&mut self, key: &str, db: &RdsInstance) {
        let subnet_group = format!("{}SubnetGroup", key);
        self.add_resource(
            &subnet_group,
            Resource::new(
                "AWS::RDS::DBSubnetGroup",
                json!({
                    "DBSubnetGroupDescription": db.hostname,
                    "SubnetIds": render_all(&db.subnets),
                }),
            ),
        );

        let mut resource = Resource::new(
            "AWS::RDS::DBInstance",
            json!({
                "Engine": db.engine,
                "EngineVersion": db.engine_version,
                "DBInstanceClass": db.instance_class,
                "AllocatedStorage": db.storage_gb.to_string(),
                "DBInstanceIdentifier": db.hostname.replace('.', "-"),
                "DBName": db.db_name,
                "MasterUsername": db.username.render(),
                "MasterUserPassword": db.password.render(),
                "Port": db.port.to_string(),
                "DBSubnetGroupName": Value::reference(&subnet_group).render(),
                "VPCSecurityGroups": render_all(&db.security_groups),
                "MultiAZ": db.multi_az,
                "StorageEncrypted": true,
                "BackupRetentionPeriod": db.backup_retention_days,
                "Tags": name_tag(&db.hostname),
            }),
        );
        resource.deletion_policy = Some("Snapshot".to_string());
        self.add_resource(key, resource);
    }

    /// Adds the cache under `key`, its subnet group under `<key>SubnetGroup` and, when custom
    /// parameters are given, a parameter group under `<key>Parameters` whose family is derived
    /// from the engine version.
    pub fn add_redis_replication(&mut self, key: &str, cache: &ReplicationGroup) -> Result<()> {
        let subnet_group = format!("{}SubnetGroup", key);
        self.add_resource(
            &subnet_group,
            Resource::new(
                "AWS::ElastiCache::SubnetGroup",
                json!({
                    "Description": cache.hostname,
                    "SubnetIds": render_all(&cache.subnets),
                }),
            ),
        );

        let mut properties = json!({
            "ReplicationGroupDescription": cache.hostname,
            "Engine": "redis",
            "EngineVersion": cache.engine_version,
            "CacheNodeType": cache.node_type,
            "NumCacheClusters": cache.cluster_size,
            "AutomaticFailoverEnabled": cache.cluster_size > 1,
            "CacheSubnetGroupName": Value::reference(&subnet_group).render(),
            "SecurityGroupIds": render_all(&cache.security_groups),
            "Tags": name_tag(&cache.hostname),
        });

        if !cache.parameters.is_empty() {
            let family = redis_family(&cache.engine_version)?;
            let parameter_group = format!("{}Parameters", key);
            self.add_resource(
                &parameter_group,
                Resource::new(
                    "AWS::ElastiCache::ParameterGroup",
                    json!({
                        "CacheParameterGroupFamily": family,
                        "Description": format!("Parameters for {}", cache.hostname),
                        "Properties": cache.parameters,
                    }),
                ),
            );
            properties["CacheParameterGroupName"] = Value::reference(&parameter_group).render();
        }

        self.add_resource(
            key,
            Resource::new("AWS::ElastiCache::ReplicationGroup", properties),
        );
        Ok(())
    }

    /// Key-value table from explicit attribute definitions and key schema
    pub fn add_dynamo_table(
        &mut self,
        key: &str,
        name: &str,
        attributes: &[(&str, &str)],
        key_schema: &[(&str, KeyType)],
        billing: Billing,
    ) {
        let mut properties = json!({
            "TableName": name,
            "AttributeDefinitions": attributes
                .iter()
                .map(|(attribute, kind)| json!({ "AttributeName": attribute, "AttributeType": kind }))
                .collect::<Vec<_>>(),
            "KeySchema": key_schema
                .iter()
                .map(|(attribute, kind)| json!({ "AttributeName": attribute, "KeyType": kind.as_str() }))
                .collect::<Vec<_>>(),
        });
        billing.apply(&mut properties);
        self.add_resource(key, Resource::new("AWS::DynamoDB::Table", properties));
    }

    /// Key-value table from a JSON schema with `KeySchema`, `AttributeDefinitions` and optional
    /// `GlobalSecondaryIndexes`.  Any throughput in the schema is replaced according to `billing`.
    pub fn add_dynamo_table_from_schema(
        &mut self,
        key: &str,
        name: &str,
        schema: serde_json::Value,
        billing: Billing,
    ) -> Result<()> {
        let mut properties = schema;
        ensure!(
            properties.is_object(),
            error::InvalidSchemaSnafu {
                key,
                reason: "schema must be a JSON object",
            }
        );
        for required in ["KeySchema", "AttributeDefinitions"] {
            ensure!(
                properties.get(required).map_or(false, |v| v.is_array()),
                error::InvalidSchemaSnafu {
                    key,
                    reason: format!("'{}' must be a list", required),
                }
            );
        }
        if let Some(map) = properties.as_object_mut() {
            map.remove("ProvisionedThroughput");
            map.remove("BillingMode");
            map.insert("TableName".to_string(), name.into());
        }
        billing.apply(&mut properties);
        self.add_resource(key, Resource::new("AWS::DynamoDB::Table", properties));
        Ok(())
    }

    pub fn add_dynamo_table_from_json<P: AsRef<Path>>(
        &mut self,
        key: &str,
        name: &str,
        path: P,
        billing: Billing,
    ) -> Result<()> {
        let path = path.as_ref();
        let schema_str = fs::read_to_string(path).context(error::FileSnafu { path })?;
        let schema = serde_json::from_str(&schema_str).map_err(|e| error::Error::InvalidSchema {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.add_dynamo_table_from_schema(key, name, schema, billing)
    }
}
