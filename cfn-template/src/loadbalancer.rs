//! Classic and application load balancers.

use crate::value::render_all;
use crate::{error, name_tag, Resource, Result, Template, Value};
use serde_json::json;
use snafu::OptionExt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Tcp => "TCP",
        }
    }

    pub fn is_tls(&self) -> bool {
        *self == Protocol::Https
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassicListener {
    pub port: u16,
    pub instance_port: u16,
    pub protocol: Protocol,
    pub certificate: Option<Value>,
}

impl ClassicListener {
    pub fn new(port: u16, instance_port: u16, protocol: Protocol) -> Self {
        Self {
            port,
            instance_port,
            protocol,
            certificate: None,
        }
    }

    pub fn https(port: u16, instance_port: u16, certificate: Value) -> Self {
        Self {
            certificate: Some(certificate),
            ..Self::new(port, instance_port, Protocol::Https)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppListener {
    pub port: u16,
    pub target_port: u16,
    pub protocol: Protocol,
    pub certificate: Option<Value>,
}

impl AppListener {
    pub fn new(port: u16, target_port: u16, protocol: Protocol) -> Self {
        Self {
            port,
            target_port,
            protocol,
            certificate: None,
        }
    }

    pub fn https(port: u16, target_port: u16, certificate: Value) -> Self {
        Self {
            certificate: Some(certificate),
            ..Self::new(port, target_port, Protocol::Https)
        }
    }
}

/// Load balancer names are limited to 32 characters of letters, digits and dashes.
fn lb_name(name: &str) -> String {
    name.replace('.', "-").chars().take(32).collect()
}

impl Template {
    /// Classic load balancer in front of an autoscaling group
    #[allow(clippy::too_many_arguments)]
    pub fn add_loadbalancer(
        &mut self,
        key: &str,
        name: &str,
        listeners: &[ClassicListener],
        subnets: Vec<Value>,
        security_groups: Vec<Value>,
        healthcheck_target: &str,
        public: bool,
    ) {
        let listeners: Vec<serde_json::Value> = listeners
            .iter()
            .map(|listener| {
                let mut rendered = json!({
                    "LoadBalancerPort": listener.port.to_string(),
                    "InstancePort": listener.instance_port.to_string(),
                    "Protocol": listener.protocol.as_str(),
                    "InstanceProtocol": if listener.protocol == Protocol::Tcp { "TCP" } else { "HTTP" },
                });
                if let Some(certificate) = &listener.certificate {
                    rendered["SSLCertificateId"] = certificate.render();
                }
                rendered
            })
            .collect();
        self.add_resource(
            key,
            Resource::new(
                "AWS::ElasticLoadBalancing::LoadBalancer",
                json!({
                    "LoadBalancerName": lb_name(name),
                    "Listeners": listeners,
                    "Subnets": render_all(&subnets),
                    "SecurityGroups": render_all(&security_groups),
                    "Scheme": if public { "internet-facing" } else { "internal" },
                    "CrossZone": true,
                    "HealthCheck": {
                        "Target": healthcheck_target,
                        "HealthyThreshold": "2",
                        "UnhealthyThreshold": "5",
                        "Interval": "30",
                        "Timeout": "5",
                    },
                    "ConnectionDrainingPolicy": { "Enabled": true, "Timeout": 60 },
                    "Tags": name_tag(name),
                }),
            ),
        );
    }

    /// Application load balancer.  Each listener forwards to its own target group, stored as
    /// `<key>TargetGroup<port>`; when any listener uses TLS a port 80 listener redirecting to
    /// HTTPS is added as `<key>HttpRedirect`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_app_loadbalancer(
        &mut self,
        key: &str,
        name: &str,
        listeners: &[AppListener],
        vpc: Value,
        subnets: Vec<Value>,
        security_groups: Vec<Value>,
        healthcheck_path: &str,
        public: bool,
    ) -> Result<()> {
        self.add_resource(
            key,
            Resource::new(
                "AWS::ElasticLoadBalancingV2::LoadBalancer",
                json!({
                    "Name": lb_name(name),
                    "Type": "application",
                    "Scheme": if public { "internet-facing" } else { "internal" },
                    "Subnets": render_all(&subnets),
                    "SecurityGroups": render_all(&security_groups),
                    "Tags": name_tag(name),
                }),
            ),
        );

        for listener in listeners {
            let target_group = format!("{}TargetGroup{}", key, listener.port);
            self.add_target_group(
                &target_group,
                &format!("{}-{}", name, listener.port),
                Some(vpc.clone()),
                listener.target_port,
                healthcheck_path,
                None,
            )?;

            let mut properties = json!({
                "LoadBalancerArn": Value::reference(key).render(),
                "Port": listener.port,
                "Protocol": listener.protocol.as_str(),
                "DefaultActions": [{
                    "Type": "forward",
                    "TargetGroupArn": Value::reference(&target_group).render(),
                }],
            });
            if let Some(certificate) = &listener.certificate {
                properties["Certificates"] = json!([{ "CertificateArn": certificate.render() }]);
            }
            self.add_resource(
                format!("{}Listener{}", key, listener.port),
                Resource::new("AWS::ElasticLoadBalancingV2::Listener", properties),
            );
        }

        if listeners.iter().any(|listener| listener.protocol.is_tls()) {
            self.add_resource(
                format!("{}HttpRedirect", key),
                Resource::new(
                    "AWS::ElasticLoadBalancingV2::Listener",
                    json!({
                        "LoadBalancerArn": Value::reference(key).render(),
                        "Port": 80,
                        "Protocol": "HTTP",
                        "DefaultActions": [{
                            "Type": "redirect",
                            "RedirectConfig": {
                                "Protocol": "HTTPS",
                                "Port": "443",
                                "Host": "#{host}",
                                "Path": "/#{path}",
                                "Query": "#{query}",
                                "StatusCode": "HTTP_301",
                            },
                        }],
                    }),
                ),
            );
        }
        Ok(())
    }

    /// Target group for an application load balancer.  Instance targets need the VPC they live
    /// in; a group pointed at a function doesn't.
    pub fn add_target_group(
        &mut self,
        key: &str,
        name: &str,
        vpc: Option<Value>,
        port: u16,
        healthcheck_path: &str,
        lambda: Option<Value>,
    ) -> Result<()> {
        let properties = match lambda {
            Some(function) => json!({
                "Name": lb_name(name),
                "TargetType": "lambda",
                "Targets": [{ "Id": function.render() }],
                "HealthCheckEnabled": false,
            }),
            None => {
                let vpc = vpc.context(error::TargetGroupVpcSnafu { key })?;
                json!({
                    "Name": lb_name(name),
                    "TargetType": "instance",
                    "VpcId": vpc.render(),
                    "Port": port,
                    "Protocol": "HTTP",
                    "HealthCheckPath": healthcheck_path,
                    "HealthCheckIntervalSeconds": 30,
                    "HealthyThresholdCount": 2,
                    "UnhealthyThresholdCount": 5,
                })
            }
        };
        self.add_resource(
            key,
            Resource::new("AWS::ElasticLoadBalancingV2::TargetGroup", properties),
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{AppListener, ClassicListener, Protocol};
    use crate::{Error, Template, Value};
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[test]
    fn tls_listener_adds_redirect() {
        let mut template = Template::new("alb");
        template
            .add_app_loadbalancer(
                "Alb",
                "api.bosslet.a",
                &[AppListener::https(443, 80, Value::reference("Cert"))],
                Value::import("CoreBossletA-Vpc"),
                vec![Value::reference("SubnetA")],
                vec![Value::reference("Https")],
                "/ping/",
                true,
            )
            .unwrap();

        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": {
                    "AlbListener443": { "Properties": {
                        "Port": 443,
                        "Protocol": "HTTPS",
                        "Certificates": [{ "CertificateArn": { "Ref": "Cert" } }],
                        "DefaultActions": [{ "Type": "forward", "TargetGroupArn": { "Ref": "AlbTargetGroup443" } }],
                    }},
                    "AlbTargetGroup443": { "Properties": { "Port": 80, "VpcId": { "Fn::ImportValue": "CoreBossletA-Vpc" } } },
                    "AlbHttpRedirect": { "Properties": {
                        "Port": 80,
                        "DefaultActions": [{ "Type": "redirect", "RedirectConfig": { "Protocol": "HTTPS" } }],
                    }},
                }
            })
        );
    }

    #[test]
    fn plain_listener_has_no_redirect() {
        let mut template = Template::new("alb");
        template
            .add_app_loadbalancer(
                "Alb",
                "api.bosslet.a",
                &[AppListener::new(8080, 80, Protocol::Http)],
                Value::reference("Vpc"),
                vec![],
                vec![],
                "/",
                false,
            )
            .unwrap();
        assert!(!template.has_resource("AlbHttpRedirect"));
        assert!(template.has_resource("AlbTargetGroup8080"));
    }

    #[test]
    fn target_group_needs_vpc_unless_lambda() {
        let mut template = Template::new("tg");
        assert!(matches!(
            template.add_target_group("Tg", "tg", None, 80, "/", None),
            Err(Error::TargetGroupVpc { .. })
        ));
        template
            .add_target_group("Tg", "tg", None, 80, "/", Some(Value::arn("Fn")))
            .unwrap();
        assert_eq!(
            template.resource("Tg").unwrap().properties["TargetType"],
            json!("lambda")
        );
    }

    #[test]
    fn classic_listener_certificate() {
        let mut template = Template::new("elb");
        template.add_loadbalancer(
            "Elb",
            "elb.bosslet.a",
            &[ClassicListener::https(443, 80, "arn:aws:acm:cert".into())],
            vec![],
            vec![],
            "HTTP:80/ping/",
            true,
        );
        let elb = &template.resource("Elb").unwrap().properties;
        assert_eq!(elb["LoadBalancerName"], json!("elb-bosslet-a"));
        assert_eq!(elb["Listeners"][0]["SSLCertificateId"], json!("arn:aws:acm:cert"));
        assert_eq!(elb["Scheme"], json!("internet-facing"));
    }
}
