//! Data pipelines and custom resources.

use crate::{Resource, Template, Value};
use serde_json::json;
use std::collections::BTreeMap;

/// One object of a data pipeline definition
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineObject {
    pub id: String,
    pub name: String,
    fields: Vec<serde_json::Value>,
}

impl PipelineObject {
    pub fn new<S1: Into<String>, S2: Into<String>>(id: S1, name: S2) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a string field
    pub fn field<S1: Into<String>>(mut self, key: S1, value: Value) -> Self {
        self.fields
            .push(json!({ "Key": key.into(), "StringValue": value.render() }));
        self
    }

    /// Adds a field pointing at another object of the pipeline
    pub fn reference<S1: Into<String>, S2: Into<String>>(mut self, key: S1, object_id: S2) -> Self {
        self.fields
            .push(json!({ "Key": key.into(), "RefValue": object_id.into() }));
        self
    }

    fn render(&self) -> serde_json::Value {
        json!({ "Id": self.id, "Name": self.name, "Fields": self.fields })
    }
}

impl Template {
    pub fn add_data_pipeline(&mut self, key: &str, name: &str, objects: &[PipelineObject]) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::DataPipeline::Pipeline",
                json!({
                    "Name": name,
                    "Activate": true,
                    "PipelineObjects": objects.iter().map(PipelineObject::render).collect::<Vec<_>>(),
                }),
            ),
        );
    }

    /// Custom resource backed by the function or topic behind `service_token`
    pub fn add_custom_resource(
        &mut self,
        key: &str,
        service_token: Value,
        properties: BTreeMap<String, Value>,
    ) {
        let mut rendered = serde_json::Map::new();
        rendered.insert("ServiceToken".to_string(), service_token.render());
        for (name, value) in properties {
            rendered.insert(name, value.render());
        }
        self.add_resource(
            key,
            Resource::new(
                "AWS::CloudFormation::CustomResource",
                serde_json::Value::Object(rendered),
            ),
        );
    }
}

#[cfg(test)]
mod test {
    use super::PipelineObject;
    use crate::{Template, Value};
    use assert_json_diff::assert_json_include;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn pipeline_objects() {
        let mut template = Template::new("backup");
        template.add_data_pipeline(
            "Backup",
            "backup.bosslet.a",
            &[
                PipelineObject::new("Default", "Default")
                    .field("scheduleType", "cron".into())
                    .reference("schedule", "Schedule"),
                PipelineObject::new("Schedule", "Every day")
                    .field("type", "Schedule".into())
                    .field("period", "1 days".into()),
            ],
        );
        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": { "Backup": { "Properties": { "PipelineObjects": [
                    { "Id": "Default", "Fields": [
                        { "Key": "scheduleType", "StringValue": "cron" },
                        { "Key": "schedule", "RefValue": "Schedule" },
                    ]},
                    { "Id": "Schedule" },
                ]}}}
            })
        );
    }

    #[test]
    fn custom_resource_token() {
        let mut template = Template::new("custom");
        let mut properties = BTreeMap::new();
        properties.insert("Table".to_string(), Value::reference("Table"));
        template.add_custom_resource("Seed", Value::arn("Seeder"), properties);
        let seed = &template.resource("Seed").unwrap().properties;
        assert_eq!(seed["ServiceToken"], json!({ "Fn::GetAtt": ["Seeder", "Arn"] }));
        assert_eq!(seed["Table"], json!({ "Ref": "Table" }));
    }
}
