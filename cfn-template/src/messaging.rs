//! Queues, topics and scheduled rules.

use crate::{error, Resource, Result, Template, Value};
use serde_json::json;
use snafu::ensure;

/// One minute
pub const MIN_QUEUE_RETENTION: u32 = 60;
/// Fourteen days
pub const MAX_QUEUE_RETENTION: u32 = 14 * 24 * 60 * 60;

/// Where a queue's undeliverable messages go
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub queue_arn: Value,
    pub max_receive: u32,
}

/// One target of a scheduled or event-pattern rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTarget {
    pub id: String,
    pub arn: Value,
    pub role: Option<Value>,
    pub input: Option<String>,
}

impl RuleTarget {
    pub fn new<S: Into<String>>(id: S, arn: Value) -> Self {
        Self {
            id: id.into(),
            arn,
            role: None,
            input: None,
        }
    }

    fn render(&self) -> serde_json::Value {
        let mut target = json!({ "Id": self.id, "Arn": self.arn.render() });
        if let Some(role) = &self.role {
            target["RoleArn"] = role.render();
        }
        if let Some(input) = &self.input {
            target["Input"] = input.as_str().into();
        }
        target
    }
}

impl Template {
    /// Adds a queue.  Retention must be between one minute and fourteen days.
    pub fn add_sqs_queue(
        &mut self,
        key: &str,
        name: &str,
        retention_seconds: u32,
        visibility_seconds: u32,
        dead_letter: Option<DeadLetter>,
    ) -> Result<()> {
        ensure!(
            (MIN_QUEUE_RETENTION..=MAX_QUEUE_RETENTION).contains(&retention_seconds),
            error::InvalidRetentionSnafu {
                key,
                seconds: retention_seconds,
                min: MIN_QUEUE_RETENTION,
                max: MAX_QUEUE_RETENTION,
            }
        );
        let mut properties = json!({
            "QueueName": name,
            "MessageRetentionPeriod": retention_seconds,
            "VisibilityTimeout": visibility_seconds,
        });
        if let Some(dead_letter) = dead_letter {
            properties["RedrivePolicy"] = json!({
                "deadLetterTargetArn": dead_letter.queue_arn.render(),
                "maxReceiveCount": dead_letter.max_receive,
            });
        }
        self.add_resource(key, Resource::new("AWS::SQS::Queue", properties));
        Ok(())
    }

    /// Adds a topic with `(protocol, endpoint)` subscriptions
    pub fn add_sns_topic(
        &mut self,
        key: &str,
        name: &str,
        display_name: &str,
        subscriptions: &[(&str, Value)],
    ) {
        let subscriptions: Vec<serde_json::Value> = subscriptions
            .iter()
            .map(|(protocol, endpoint)| json!({ "Protocol": protocol, "Endpoint": endpoint.render() }))
            .collect();
        self.add_resource(
            key,
            Resource::new(
                "AWS::SNS::Topic",
                json!({
                    "TopicName": name,
                    "DisplayName": display_name,
                    "Subscription": subscriptions,
                }),
            ),
        );
    }

    /// Adds a rule fired either on a schedule expression such as `rate(1 minute)` or on an
    /// event pattern.
    pub fn add_event_rule(
        &mut self,
        key: &str,
        name: &str,
        schedule: Option<&str>,
        pattern: Option<serde_json::Value>,
        targets: &[RuleTarget],
    ) {
        let mut properties = json!({
            "Name": name,
            "State": "ENABLED",
            "Targets": targets.iter().map(RuleTarget::render).collect::<Vec<_>>(),
        });
        if let Some(schedule) = schedule {
            properties["ScheduleExpression"] = schedule.into();
        }
        if let Some(pattern) = pattern {
            properties["EventPattern"] = pattern;
        }
        self.add_resource(key, Resource::new("AWS::Events::Rule", properties));
    }
}

#[cfg(test)]
mod test {
    use super::{DeadLetter, RuleTarget, MAX_QUEUE_RETENTION};
    use crate::{Error, Template, Value};
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[test]
    fn retention_bounds() {
        let mut template = Template::new("sqs");
        for seconds in [60, 3600, MAX_QUEUE_RETENTION] {
            assert!(template.add_sqs_queue("Q", "q", seconds, 30, None).is_ok());
        }
        for seconds in [0, 59, MAX_QUEUE_RETENTION + 1] {
            assert!(matches!(
                template.add_sqs_queue("Q", "q", seconds, 30, None),
                Err(Error::InvalidRetention { .. })
            ));
        }
    }

    #[test]
    fn redrive_policy() {
        let mut template = Template::new("sqs");
        template
            .add_sqs_queue("DeadLetter", "DeadletterBossletA", MAX_QUEUE_RETENTION, 30, None)
            .unwrap();
        template
            .add_sqs_queue(
                "Downsample",
                "DownsampleQueueBossletA",
                3600,
                120,
                Some(DeadLetter {
                    queue_arn: Value::arn("DeadLetter"),
                    max_receive: 3,
                }),
            )
            .unwrap();
        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": { "Downsample": { "Properties": {
                    "RedrivePolicy": {
                        "deadLetterTargetArn": { "Fn::GetAtt": ["DeadLetter", "Arn"] },
                        "maxReceiveCount": 3,
                    }
                }}}
            })
        );
        assert!(template.validate().is_ok());
    }

    #[test]
    fn scheduled_rule_targets() {
        let mut template = Template::new("rule");
        let mut target = RuleTarget::new("vaultMonitor", Value::arn("Monitor"));
        target.input = Some(r#"{"hostname":"vault.bosslet.a"}"#.to_string());
        template.add_event_rule("Check", "vaultCheck-bosslet-a", Some("rate(2 minutes)"), None, &[target]);
        let rule = &template.resource("Check").unwrap().properties;
        assert_eq!(rule["ScheduleExpression"], json!("rate(2 minutes)"));
        assert_eq!(rule["Targets"][0]["Arn"], json!({ "Fn::GetAtt": ["Monitor", "Arn"] }));
        assert!(rule.get("EventPattern").is_none());
    }
}
