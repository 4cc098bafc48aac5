//! Functions and the permissions that let other services invoke them.

use crate::value::render_all;
use crate::{error, Resource, Result, Template, Value};
use serde_json::json;
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const MIN_LAMBDA_MEMORY: u32 = 128;
pub const MAX_LAMBDA_MEMORY: u32 = 3008;
const MEMORY_STEP: u32 = 64;

/// Size limit for code embedded in the template
const MAX_INLINE_CODE: usize = 4096;

/// Where a function's code comes from
#[derive(Debug, Clone, PartialEq)]
pub enum LambdaCode {
    /// Source embedded in the template
    Inline(String),
    /// An archive already in object storage
    S3 { bucket: String, key: String },
    /// An archive the deployment helper builds and uploads before the stack is submitted
    Built { bucket: String, key: String },
}

impl LambdaCode {
    /// Reads and minifies a source file for inlining.  Comment-only lines, blank lines and
    /// trailing whitespace are dropped; indentation is kept.
    pub fn inline_file<P: AsRef<Path>>(key: &str, path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).context(error::FileSnafu { path })?;
        let minified = minify(&source);
        ensure!(
            minified.len() <= MAX_INLINE_CODE,
            error::InlineCodeSizeSnafu {
                key,
                size: minified.len(),
                max: MAX_INLINE_CODE,
            }
        );
        Ok(LambdaCode::Inline(minified))
    }

    /// Code built by the deployment helper is uploaded as `<name>.zip`.
    pub fn built<S1: Into<String>>(bucket: S1, name: &str) -> Self {
        LambdaCode::Built {
            bucket: bucket.into(),
            key: format!("{}.zip", name),
        }
    }

    fn render(&self) -> serde_json::Value {
        match self {
            LambdaCode::Inline(source) => json!({ "ZipFile": source }),
            LambdaCode::S3 { bucket, key } | LambdaCode::Built { bucket, key } => {
                json!({ "S3Bucket": bucket, "S3Key": key })
            }
        }
    }
}

fn minify(source: &str) -> String {
    source
        .lines()
        .map(str::trim_end)
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#') && !trimmed.starts_with("//")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A serverless function
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub description: String,
    pub role: Value,
    pub handler: String,
    pub runtime: String,
    pub code: LambdaCode,
    pub memory: u32,
    pub timeout: u32,
    pub security_groups: Vec<Value>,
    pub subnets: Vec<Value>,
    pub environment: BTreeMap<String, Value>,
    pub reserved_concurrency: Option<u32>,
    pub dead_letter: Option<Value>,
    pub layers: Vec<Value>,
}

impl Function {
    pub fn new<S1, S2, S3>(name: S1, role: Value, handler: S2, runtime: S3, code: LambdaCode) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            role,
            handler: handler.into(),
            runtime: runtime.into(),
            code,
            memory: MIN_LAMBDA_MEMORY,
            timeout: 3,
            security_groups: Vec::new(),
            subnets: Vec::new(),
            environment: BTreeMap::new(),
            reserved_concurrency: None,
            dead_letter: None,
            layers: Vec::new(),
        }
    }
}

impl Template {
    /// Adds a function.  Memory must be a multiple of 64 MB between 128 and 3008, and attaching
    /// to a VPC needs both security groups and subnets.
    pub fn add_lambda(&mut self, key: &str, function: &Function) -> Result<()> {
        let memory = function.memory;
        ensure!(
            (MIN_LAMBDA_MEMORY..=MAX_LAMBDA_MEMORY).contains(&memory) && memory % MEMORY_STEP == 0,
            error::InvalidMemorySnafu {
                key,
                memory,
                min: MIN_LAMBDA_MEMORY,
                max: MAX_LAMBDA_MEMORY,
            }
        );
        ensure!(
            function.security_groups.is_empty() == function.subnets.is_empty(),
            error::LambdaVpcSnafu { key }
        );

        let mut properties = json!({
            "FunctionName": function.name,
            "Description": function.description,
            "Role": function.role.render(),
            "Handler": function.handler,
            "Runtime": function.runtime,
            "Code": function.code.render(),
            "MemorySize": memory,
            "Timeout": function.timeout,
        });
        if !function.subnets.is_empty() {
            properties["VpcConfig"] = json!({
                "SecurityGroupIds": render_all(&function.security_groups),
                "SubnetIds": render_all(&function.subnets),
            });
        }
        if !function.environment.is_empty() {
            let variables: serde_json::Map<String, serde_json::Value> = function
                .environment
                .iter()
                .map(|(name, value)| (name.clone(), value.render()))
                .collect();
            properties["Environment"] = json!({ "Variables": variables });
        }
        if let Some(concurrency) = function.reserved_concurrency {
            properties["ReservedConcurrentExecutions"] = concurrency.into();
        }
        if let Some(target) = &function.dead_letter {
            properties["DeadLetterConfig"] = json!({ "TargetArn": target.render() });
        }
        if !function.layers.is_empty() {
            properties["Layers"] = render_all(&function.layers);
        }

        let mut resource = Resource::new("AWS::Lambda::Function", properties);
        if let LambdaCode::Built { bucket, key: object } = &function.code {
            resource.metadata = Some(json!({ "BuiltArtifact": { "Bucket": bucket, "Key": object } }));
        }
        self.add_resource(key, resource);
        Ok(())
    }

    /// Lets `principal` (a service such as `events.amazonaws.com`) invoke `function`
    pub fn add_lambda_permission(
        &mut self,
        key: &str,
        function: Value,
        principal: &str,
        source: Option<Value>,
    ) {
        let mut properties = json!({
            "Action": "lambda:InvokeFunction",
            "FunctionName": function.render(),
            "Principal": principal,
        });
        if let Some(source) = source {
            properties["SourceArn"] = source.render();
        }
        self.add_resource(key, Resource::new("AWS::Lambda::Permission", properties));
    }

    /// Archives of functions built by the deployment helper, as `(bucket, key)` pairs
    pub fn built_artifacts(&self) -> Vec<(String, String)> {
        self.resources()
            .filter_map(|(_, resource)| {
                let artifact = resource.metadata.as_ref()?.get("BuiltArtifact")?;
                let bucket = artifact.get("Bucket")?.as_str()?;
                let key = artifact.get("Key")?.as_str()?;
                Some((bucket.to_string(), key.to_string()))
            })
            .collect()
    }
}
