/*!
`cfn-template` assembles the declarative templates submitted to the cloud stack engine.

A `Template` accumulates parameters (with the values to submit for them), resources, outputs,
and capabilities.  Typed helpers exist for every resource kind the stacks use; the helpers check
the invariants the stack engine would otherwise only report halfway through a deployment.

```
use cfn_template::{Template, Value};

let mut template = Template::new("Core resources");
template.add_vpc("Vpc", "vpc.bosslet.a", "10.10.0.0/16");
template.add_output("VpcId", Value::reference("Vpc"), "VPC id", None);
assert!(template.validate().is_ok());
```
*/

mod arg;
mod compute;
mod data;
mod dns;
mod loadbalancer;
mod messaging;
mod misc;
mod network;
mod security;
mod serverless;
mod storage;
mod value;

pub use crate::arg::{Arg, ParameterSpec};
pub use crate::compute::{Alarm, AutoScaleGroup, Instance, StepAdjustment};
pub use crate::data::{redis_family, Billing, KeyType, RdsInstance, ReplicationGroup};
pub use crate::dns::DnsTarget;
pub use crate::loadbalancer::{AppListener, ClassicListener, Protocol};
pub use crate::messaging::{DeadLetter, RuleTarget, MAX_QUEUE_RETENTION, MIN_QUEUE_RETENTION};
pub use crate::misc::PipelineObject;
pub use crate::network::{subnet_cidrs, RouteTarget};
pub use crate::security::{Ingress, KEY_USER_ACTIONS};
pub use crate::serverless::{Function, LambdaCode, MAX_LAMBDA_MEMORY, MIN_LAMBDA_MEMORY};
pub use crate::storage::LifecycleRule;
pub use crate::value::Value;

use serde::Serialize;
use snafu::ensure;
use std::collections::{BTreeMap, BTreeSet};

/// The template format version understood by the stack engine
pub const FORMAT_VERSION: &str = "2010-09-09";

/// Capabilities that must be acknowledged when submitting a template
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Capability {
    #[serde(rename = "CAPABILITY_IAM")]
    Iam,
    #[serde(rename = "CAPABILITY_NAMED_IAM")]
    NamedIam,
    #[serde(rename = "CAPABILITY_AUTO_EXPAND")]
    AutoExpand,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Iam => "CAPABILITY_IAM",
            Capability::NamedIam => "CAPABILITY_NAMED_IAM",
            Capability::AutoExpand => "CAPABILITY_AUTO_EXPAND",
        }
    }
}

/// One resource of the template
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    pub properties: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
}

impl Resource {
    pub fn new<S: Into<String>>(kind: S, properties: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            properties,
            metadata: None,
            depends_on: Vec::new(),
            update_policy: None,
            deletion_policy: None,
        }
    }

    pub fn depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn retain(mut self) -> Self {
        self.deletion_policy = Some("Retain".to_string());
        self
    }
}

/// One output of the template, optionally exported for other stacks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub description: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<serde_json::Value>,
}

/// A template under construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    description: String,
    parameters: BTreeMap<String, ParameterSpec>,
    arguments: BTreeMap<String, Option<String>>,
    resources: BTreeMap<String, Resource>,
    outputs: BTreeMap<String, Output>,
    capabilities: BTreeSet<Capability>,
}

impl Template {
    pub fn new<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    /// Declares a parameter and records the value to submit for it
    pub fn add_arg(&mut self, arg: Arg) {
        self.arguments.insert(arg.key.clone(), arg.value);
        self.parameters.insert(arg.key, arg.spec);
    }

    /// Adds a resource, replacing any resource previously stored under the same key
    pub fn add_resource<S: Into<String>>(&mut self, key: S, resource: Resource) {
        self.resources.insert(key.into(), resource);
    }

    pub fn add_output<K, D>(&mut self, key: K, value: Value, description: D, export: Option<String>)
    where
        K: Into<String>,
        D: Into<String>,
    {
        self.outputs.insert(
            key.into(),
            Output {
                description: description.into(),
                value: value.render(),
                export: export.map(|name| serde_json::json!({ "Name": name })),
            },
        );
    }

    pub fn add_capability(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    pub fn resource(&self, key: &str) -> Option<&Resource> {
        self.resources.get(key)
    }

    pub(crate) fn resource_mut(&mut self, key: &str) -> Option<&mut Resource> {
        self.resources.get_mut(key)
    }

    pub fn resources(&self) -> impl Iterator<Item = (&String, &Resource)> {
        self.resources.iter()
    }

    pub fn has_resource(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().copied()
    }

    /// Parameter values to submit, in key order
    pub fn arguments(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.arguments
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    /// Keys of parameters that don't have a value yet
    pub fn missing_arguments(&self) -> Vec<String> {
        self.arguments
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// The `[{ParameterKey, ParameterValue}]` list written alongside a generated template
    pub fn arguments_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.arguments
                .iter()
                .map(|(key, value)| {
                    serde_json::json!({ "ParameterKey": key, "ParameterValue": value })
                })
                .collect(),
        )
    }

    /// Checks that every `Ref` names a declared parameter, a resource, or a pseudo parameter, that
    /// every `Fn::GetAtt` names a resource, and that every `DependsOn` names a resource.
    pub fn validate(&self) -> Result<()> {
        for (key, resource) in &self.resources {
            for dependency in &resource.depends_on {
                ensure!(
                    self.resources.contains_key(dependency),
                    error::UnknownDependencySnafu {
                        resource: key,
                        dependency,
                    }
                );
            }
            let mut references = Vec::new();
            collect_references(&resource.properties, &mut references);
            for reference in references {
                let declared = match &reference {
                    Reference::Ref(id) => {
                        id.starts_with("AWS::")
                            || self.parameters.contains_key(id)
                            || self.resources.contains_key(id)
                    }
                    Reference::GetAtt(id) => self.resources.contains_key(id),
                };
                ensure!(
                    declared,
                    error::UndeclaredReferenceSnafu {
                        resource: key,
                        reference: reference.id(),
                    }
                );
            }
        }
        Ok(())
    }

    /// Renders the template JSON submitted to the stack engine
    pub fn to_json(&self) -> serde_json::Value {
        let mut template = serde_json::Map::new();
        template.insert("AWSTemplateFormatVersion".into(), FORMAT_VERSION.into());
        template.insert("Description".into(), self.description.clone().into());
        if !self.parameters.is_empty() {
            template.insert("Parameters".into(), to_value(&self.parameters));
        }
        template.insert("Resources".into(), to_value(&self.resources));
        if !self.outputs.is_empty() {
            template.insert("Outputs".into(), to_value(&self.outputs));
        }
        serde_json::Value::Object(template)
    }

    pub fn to_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_json()).map_err(|source| Error::Serialize { source })
    }
}

/// Every type we render is built from strings, numbers, and maps with string keys, which can't
/// fail to serialize.
fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

enum Reference {
    Ref(String),
    GetAtt(String),
}

impl Reference {
    fn id(&self) -> &str {
        match self {
            Reference::Ref(id) | Reference::GetAtt(id) => id,
        }
    }
}

fn collect_references(value: &serde_json::Value, references: &mut Vec<Reference>) {
    match value {
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(serde_json::Value::String(id)) = map.get("Ref") {
                    references.push(Reference::Ref(id.clone()));
                    return;
                }
                if let Some(serde_json::Value::Array(parts)) = map.get("Fn::GetAtt") {
                    if let Some(serde_json::Value::String(id)) = parts.first() {
                        references.push(Reference::GetAtt(id.clone()));
                        return;
                    }
                }
            }
            for nested in map.values() {
                collect_references(nested, references);
            }
        }
        serde_json::Value::Array(values) => {
            for nested in values {
                collect_references(nested, references);
            }
        }
        _ => (),
    }
}

/// Standard `Tags` list carrying the resource's `Name`
pub(crate) fn name_tag(name: &str) -> serde_json::Value {
    serde_json::json!([{ "Key": "Name", "Value": name }])
}

mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(crate)))]
    pub enum Error {
        #[snafu(display(
            "Cannot append to '{}': it is a policy for bucket {}, not {}",
            key,
            existing,
            requested
        ))]
        BucketPolicyMismatch {
            key: String,
            existing: String,
            requested: String,
        },

        #[snafu(display("Cannot append to '{}': no such resource", key))]
        MissingResource { key: String },

        #[snafu(display("Cannot append to '{}': it is a {}, not a bucket policy", key, kind))]
        NotBucketPolicy { key: String, kind: String },

        #[snafu(display("Invalid CIDR '{}': {}", cidr, source))]
        InvalidCidr {
            cidr: String,
            source: ipnet::AddrParseError,
        },

        #[snafu(display("Cannot split '{}' into /{} subnets: {}", cidr, prefix, source))]
        InvalidPrefix {
            cidr: String,
            prefix: u8,
            source: ipnet::PrefixLenError,
        },

        #[snafu(display(
            "Lambda '{}' memory {} MB must be a multiple of 64 between {} and {}",
            key,
            memory,
            min,
            max
        ))]
        InvalidMemory {
            key: String,
            memory: u32,
            min: u32,
            max: u32,
        },

        #[snafu(display(
            "Queue '{}' retention of {} seconds must be between {} and {}",
            key,
            seconds,
            min,
            max
        ))]
        InvalidRetention {
            key: String,
            seconds: u32,
            min: u32,
            max: u32,
        },

        #[snafu(display("Invalid DynamoDB schema for '{}': {}", key, reason))]
        InvalidSchema { key: String, reason: String },

        #[snafu(display("Inline code for '{}' is {} bytes, more than the {} allowed", key, size, max))]
        InlineCodeSize { key: String, size: usize, max: usize },

        #[snafu(display("Failed to read '{}': {}", path.display(), source))]
        File {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display(
            "Lambda '{}' needs both security groups and subnets to attach to a VPC",
            key
        ))]
        LambdaVpc { key: String },

        #[snafu(display("Failed to serialize template: {}", source))]
        Serialize { source: serde_json::Error },

        #[snafu(display("Target group '{}' requires a VPC id", key))]
        TargetGroupVpc { key: String },

        #[snafu(display("Resource '{}' references undeclared '{}'", resource, reference))]
        UndeclaredReference { resource: String, reference: String },

        #[snafu(display("Resource '{}' depends on unknown resource '{}'", resource, dependency))]
        UnknownDependency {
            resource: String,
            dependency: String,
        },

        #[snafu(display("No parameter group family known for redis {}", version))]
        UnknownRedisVersion { version: String },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;
