//! Instances, autoscaling groups, scaling policies and alarms.

use crate::value::render_all;
use crate::{name_tag, Resource, Template, Value};
use serde_json::json;

/// A single EC2 instance
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub hostname: String,
    pub ami: Value,
    pub keypair: Value,
    pub subnet: Value,
    pub security_groups: Vec<Value>,
    pub instance_type: String,
    pub user_data: Option<String>,
    pub instance_profile: Option<String>,
    pub public_ip: bool,
}

impl Instance {
    pub fn new<S1, S2>(hostname: S1, ami: Value, keypair: Value, subnet: Value, instance_type: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            hostname: hostname.into(),
            ami,
            keypair,
            subnet,
            security_groups: Vec::new(),
            instance_type: instance_type.into(),
            user_data: None,
            instance_profile: None,
            public_ip: false,
        }
    }
}

/// An autoscaling group together with the launch configuration of its members
#[derive(Debug, Clone, PartialEq)]
pub struct AutoScaleGroup {
    pub hostname: String,
    pub ami: Value,
    pub keypair: Value,
    pub subnets: Vec<Value>,
    pub security_groups: Vec<Value>,
    pub instance_type: String,
    pub cluster_size: u32,
    pub user_data: Option<String>,
    pub instance_profile: Option<String>,
    pub public_ip: bool,
    pub elb: Option<Value>,
    pub target_group: Option<Value>,
    pub notifications: Option<Value>,
    pub health_check_grace_period: u32,
    pub depends_on: Vec<String>,
}

impl AutoScaleGroup {
    pub fn new<S1, S2>(
        hostname: S1,
        ami: Value,
        keypair: Value,
        subnets: Vec<Value>,
        instance_type: S2,
        cluster_size: u32,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            hostname: hostname.into(),
            ami,
            keypair,
            subnets,
            security_groups: Vec::new(),
            instance_type: instance_type.into(),
            cluster_size,
            user_data: None,
            instance_profile: None,
            public_ip: false,
            elb: None,
            target_group: None,
            notifications: None,
            health_check_grace_period: 30,
            depends_on: Vec::new(),
        }
    }
}

/// One step of a step scaling policy.  Bounds are relative to the alarm threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct StepAdjustment {
    pub lower_bound: Option<i64>,
    pub upper_bound: Option<i64>,
    pub adjustment: i64,
}

impl StepAdjustment {
    pub fn new(lower_bound: Option<i64>, upper_bound: Option<i64>, adjustment: i64) -> Self {
        Self {
            lower_bound,
            upper_bound,
            adjustment,
        }
    }

    fn render(&self) -> serde_json::Value {
        let mut step = json!({ "ScalingAdjustment": self.adjustment });
        if let Some(lower) = self.lower_bound {
            step["MetricIntervalLowerBound"] = lower.into();
        }
        if let Some(upper) = self.upper_bound {
            step["MetricIntervalUpperBound"] = upper.into();
        }
        step
    }
}

/// A CloudWatch alarm on one metric
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub name: String,
    pub description: String,
    pub namespace: String,
    pub metric: String,
    pub statistic: String,
    pub comparison: String,
    pub threshold: i64,
    pub period: u32,
    pub evaluation_periods: u32,
    pub dimensions: Vec<(String, Value)>,
}

impl Alarm {
    pub fn new<S1, S2, S3>(name: S1, namespace: S2, metric: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            namespace: namespace.into(),
            metric: metric.into(),
            statistic: "Average".to_string(),
            comparison: "GreaterThanThreshold".to_string(),
            threshold: 0,
            period: 60,
            evaluation_periods: 1,
            dimensions: Vec::new(),
        }
    }
}

impl Template {
    pub fn add_ec2_instance(&mut self, key: &str, instance: &Instance) {
        let mut properties = json!({
            "ImageId": instance.ami.render(),
            "InstanceType": instance.instance_type,
            "KeyName": instance.keypair.render(),
            "NetworkInterfaces": [{
                "AssociatePublicIpAddress": instance.public_ip,
                "DeviceIndex": "0",
                "DeleteOnTermination": true,
                "SubnetId": instance.subnet.render(),
                "GroupSet": render_all(&instance.security_groups),
            }],
            "Tags": name_tag(&instance.hostname),
        });
        if let Some(user_data) = &instance.user_data {
            properties["UserData"] = json!({ "Fn::Base64": user_data });
        }
        if let Some(profile) = &instance.instance_profile {
            properties["IamInstanceProfile"] = profile.as_str().into();
        }
        self.add_resource(key, Resource::new("AWS::EC2::Instance", properties));
    }

    /// Adds the group under `key` and its launch configuration under `<key>LaunchConfiguration`.
    /// Updates roll one instance at a time, keeping all but one member in service.
    pub fn add_autoscale_group(&mut self, key: &str, asg: &AutoScaleGroup) {
        let launch = format!("{}LaunchConfiguration", key);
        let mut launch_properties = json!({
            "ImageId": asg.ami.render(),
            "InstanceType": asg.instance_type,
            "KeyName": asg.keypair.render(),
            "SecurityGroups": render_all(&asg.security_groups),
            "AssociatePublicIpAddress": asg.public_ip,
            "InstanceMonitoring": false,
        });
        if let Some(user_data) = &asg.user_data {
            launch_properties["UserData"] = json!({ "Fn::Base64": user_data });
        }
        if let Some(profile) = &asg.instance_profile {
            launch_properties["IamInstanceProfile"] = profile.as_str().into();
        }
        self.add_resource(
            &launch,
            Resource::new("AWS::AutoScaling::LaunchConfiguration", launch_properties),
        );

        let size = asg.cluster_size.to_string();
        let mut properties = json!({
            "LaunchConfigurationName": Value::reference(&launch).render(),
            "MinSize": size,
            "MaxSize": size,
            "DesiredCapacity": size,
            "VPCZoneIdentifier": render_all(&asg.subnets),
            "HealthCheckGracePeriod": asg.health_check_grace_period,
            "HealthCheckType": "EC2",
            "Tags": [{ "Key": "Name", "Value": asg.hostname, "PropagateAtLaunch": true }],
        });
        if let Some(elb) = &asg.elb {
            properties["LoadBalancerNames"] = json!([elb.render()]);
            properties["HealthCheckType"] = "ELB".into();
        }
        if let Some(target_group) = &asg.target_group {
            properties["TargetGroupARNs"] = json!([target_group.render()]);
            properties["HealthCheckType"] = "ELB".into();
        }
        if let Some(topic) = &asg.notifications {
            properties["NotificationConfigurations"] = json!([{
                "TopicARN": topic.render(),
                "NotificationTypes": [
                    "autoscaling:EC2_INSTANCE_LAUNCH",
                    "autoscaling:EC2_INSTANCE_LAUNCH_ERROR",
                    "autoscaling:EC2_INSTANCE_TERMINATE",
                    "autoscaling:EC2_INSTANCE_TERMINATE_ERROR",
                ],
            }]);
        }

        let mut resource = Resource::new("AWS::AutoScaling::AutoScalingGroup", properties)
            .depends_on(asg.depends_on.clone());
        resource.update_policy = Some(json!({
            "AutoScalingRollingUpdate": {
                "MinInstancesInService": asg.cluster_size.saturating_sub(1),
                "MaxBatchSize": 1,
            }
        }));
        self.add_resource(key, resource);
    }

    /// Adds a step scaling policy for `asg`; every alarm in `alarms` triggers it.
    pub fn add_autoscale_policy(
        &mut self,
        key: &str,
        asg: Value,
        adjustments: &[StepAdjustment],
        alarms: &[(String, Alarm)],
    ) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::AutoScaling::ScalingPolicy",
                json!({
                    "AdjustmentType": "ChangeInCapacity",
                    "AutoScalingGroupName": asg.render(),
                    "PolicyType": "StepScaling",
                    "MetricAggregationType": "Average",
                    "StepAdjustments": adjustments.iter().map(StepAdjustment::render).collect::<Vec<_>>(),
                }),
            ),
        );
        for (alarm_key, alarm) in alarms {
            self.add_cloudwatch_alarm(alarm_key, alarm, vec![Value::reference(key)]);
        }
    }

    pub fn add_cloudwatch_alarm(&mut self, key: &str, alarm: &Alarm, actions: Vec<Value>) {
        let dimensions: Vec<serde_json::Value> = alarm
            .dimensions
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value.render() }))
            .collect();
        self.add_resource(
            key,
            Resource::new(
                "AWS::CloudWatch::Alarm",
                json!({
                    "AlarmName": alarm.name,
                    "AlarmDescription": alarm.description,
                    "Namespace": alarm.namespace,
                    "MetricName": alarm.metric,
                    "Statistic": alarm.statistic,
                    "ComparisonOperator": alarm.comparison,
                    "Threshold": alarm.threshold,
                    "Period": alarm.period,
                    "EvaluationPeriods": alarm.evaluation_periods,
                    "Dimensions": dimensions,
                    "AlarmActions": render_all(&actions),
                }),
            ),
        );
    }
}

#[cfg(test)]
mod test {
    use super::{Alarm, AutoScaleGroup, StepAdjustment};
    use crate::{Template, Value};
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    fn asg(size: u32) -> AutoScaleGroup {
        let mut asg = AutoScaleGroup::new(
            "endpoint.bosslet.a",
            Value::reference("EndpointAmi"),
            Value::reference("KeyName"),
            vec![Value::import("CoreBossletA-InternalSubnetA")],
            "t3.small",
            size,
        );
        asg.elb = Some(Value::reference("Elb"));
        asg
    }

    #[test]
    fn rolling_update_keeps_all_but_one() {
        let mut template = Template::new("asg");
        template.add_autoscale_group("Endpoint", &asg(3));
        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": {
                    "Endpoint": {
                        "Type": "AWS::AutoScaling::AutoScalingGroup",
                        "Properties": {
                            "LaunchConfigurationName": { "Ref": "EndpointLaunchConfiguration" },
                            "MinSize": "3",
                            "LoadBalancerNames": [{ "Ref": "Elb" }],
                            "HealthCheckType": "ELB",
                        },
                        "UpdatePolicy": { "AutoScalingRollingUpdate": { "MinInstancesInService": 2, "MaxBatchSize": 1 } },
                    },
                    "EndpointLaunchConfiguration": { "Type": "AWS::AutoScaling::LaunchConfiguration" },
                }
            })
        );
    }

    #[test]
    fn single_member_group_allows_zero_in_service() {
        let mut template = Template::new("asg");
        template.add_autoscale_group("Endpoint", &asg(1));
        let update = template.resource("Endpoint").unwrap().update_policy.clone().unwrap();
        assert_eq!(update["AutoScalingRollingUpdate"]["MinInstancesInService"], json!(0));
    }

    #[test]
    fn scaling_policy_alarms_point_at_policy() {
        let mut template = Template::new("asg");
        let mut alarm = Alarm::new("endpoint-cpu-high", "AWS/EC2", "CPUUtilization");
        alarm.threshold = 50;
        alarm.dimensions = vec![("AutoScalingGroupName".into(), Value::reference("Endpoint"))];
        template.add_autoscale_policy(
            "ScaleUp",
            Value::reference("Endpoint"),
            &[StepAdjustment::new(Some(0), Some(20), 1), StepAdjustment::new(Some(20), None, 2)],
            &[("CpuHigh".to_string(), alarm)],
        );
        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": {
                    "ScaleUp": { "Properties": { "StepAdjustments": [
                        { "MetricIntervalLowerBound": 0, "MetricIntervalUpperBound": 20, "ScalingAdjustment": 1 },
                        { "MetricIntervalLowerBound": 20, "ScalingAdjustment": 2 },
                    ]}},
                    "CpuHigh": { "Properties": {
                        "AlarmActions": [{ "Ref": "ScaleUp" }],
                        "Threshold": 50,
                        "Dimensions": [{ "Name": "AutoScalingGroupName", "Value": { "Ref": "Endpoint" } }],
                    }},
                }
            })
        );
    }
}
