//! Route 53 records.

use crate::{Resource, Template, Value};
use serde_json::json;

const TTL: &str = "300";

/// What an internal CNAME points at.  The resource kinds expose their address under different
/// attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsTarget {
    Ec2(String),
    Elb(String),
    Rds(String),
    Replication(String),
}

impl DnsTarget {
    fn value(&self) -> Value {
        match self {
            DnsTarget::Ec2(key) => Value::get_att(key, "PrivateDnsName"),
            DnsTarget::Elb(key) => Value::get_att(key, "DNSName"),
            DnsTarget::Rds(key) => Value::get_att(key, "Endpoint.Address"),
            DnsTarget::Replication(key) => Value::get_att(key, "PrimaryEndPoint.Address"),
        }
    }
}

impl Template {
    /// CNAME in the internal hosted zone
    pub fn add_route53_record(&mut self, key: &str, hostname: &str, zone: Value, target: DnsTarget) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::Route53::RecordSet",
                json!({
                    "HostedZoneId": zone.render(),
                    "Name": hostname,
                    "Type": "CNAME",
                    "TTL": TTL,
                    "ResourceRecords": [target.value().render()],
                }),
            ),
        );
    }

    /// CNAME in the public hosted zone of the external domain
    pub fn add_public_dns(&mut self, key: &str, hostname: &str, external_domain: &str, target: Value) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::Route53::RecordSet",
                json!({
                    "HostedZoneName": format!("{}.", external_domain),
                    "Name": format!("{}.", hostname),
                    "Type": "CNAME",
                    "TTL": TTL,
                    "ResourceRecords": [target.render()],
                }),
            ),
        );
    }
}
