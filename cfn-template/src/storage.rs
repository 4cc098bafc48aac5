//! Object storage buckets and their policies.

use crate::{error, Resource, Result, Template, Value};
use serde_json::json;
use snafu::{ensure, OptionExt};

const BUCKET_POLICY: &str = "AWS::S3::BucketPolicy";

/// A bucket lifecycle rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleRule {
    /// Expire every object under `prefix` after `days`
    Expiration {
        id: String,
        days: u32,
        prefix: Option<String>,
    },
    /// Expire objects tagged `tag_key=tag_value` after `days`
    DeleteTag {
        id: String,
        days: u32,
        tag_key: String,
        tag_value: String,
    },
}

impl LifecycleRule {
    fn render(&self) -> serde_json::Value {
        match self {
            LifecycleRule::Expiration { id, days, prefix } => {
                let mut rule = json!({ "Id": id, "Status": "Enabled", "ExpirationInDays": days });
                if let Some(prefix) = prefix {
                    rule["Prefix"] = prefix.as_str().into();
                }
                rule
            }
            LifecycleRule::DeleteTag {
                id,
                days,
                tag_key,
                tag_value,
            } => json!({
                "Id": id,
                "Status": "Enabled",
                "ExpirationInDays": days,
                "TagFilters": [{ "Key": tag_key, "Value": tag_value }],
            }),
        }
    }
}

fn policy_statement(bucket: &str, principal: Value, actions: &[&str]) -> serde_json::Value {
    json!({
        "Effect": "Allow",
        "Principal": { "AWS": principal.render() },
        "Action": actions,
        "Resource": [
            format!("arn:aws:s3:::{}", bucket),
            format!("arn:aws:s3:::{}/*", bucket),
        ],
    })
}

impl Template {
    /// Adds a bucket.  Buckets are always retained when the stack is deleted.
    pub fn add_s3_bucket(&mut self, key: &str, name: &str, lifecycle: &[LifecycleRule]) {
        let mut properties = json!({
            "BucketName": name,
            "BucketEncryption": {
                "ServerSideEncryptionConfiguration": [{
                    "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                }]
            },
        });
        if !lifecycle.is_empty() {
            properties["LifecycleConfiguration"] = json!({
                "Rules": lifecycle.iter().map(LifecycleRule::render).collect::<Vec<_>>()
            });
        }
        self.add_resource(key, Resource::new("AWS::S3::Bucket", properties).retain());
    }

    /// Grants `actions` on the named bucket to `principal`
    pub fn add_bucket_policy(&mut self, key: &str, bucket: &str, principal: Value, actions: &[&str]) {
        self.add_resource(
            key,
            Resource::new(
                BUCKET_POLICY,
                json!({
                    "Bucket": bucket,
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [policy_statement(bucket, principal, actions)],
                    },
                }),
            ),
        );
    }

    /// Adds another statement to the bucket policy stored under `key`.  Fails if `key` isn't a
    /// bucket policy, or is the policy of a different bucket.
    pub fn append_bucket_policy(
        &mut self,
        key: &str,
        bucket: &str,
        principal: Value,
        actions: &[&str],
    ) -> Result<()> {
        let resource = self
            .resource_mut(key)
            .context(error::MissingResourceSnafu { key })?;
        ensure!(
            resource.kind == BUCKET_POLICY,
            error::NotBucketPolicySnafu {
                key,
                kind: &resource.kind,
            }
        );
        let existing = resource.properties["Bucket"].as_str().unwrap_or_default();
        ensure!(
            existing == bucket,
            error::BucketPolicyMismatchSnafu {
                key,
                existing,
                requested: bucket,
            }
        );

        let statement = policy_statement(bucket, principal, actions);
        match resource.properties["PolicyDocument"]["Statement"].as_array_mut() {
            Some(statements) => statements.push(statement),
            None => resource.properties["PolicyDocument"]["Statement"] = json!([statement]),
        }
        Ok(())
    }
}
