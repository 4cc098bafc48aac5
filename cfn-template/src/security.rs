//! Security groups and encryption keys.

use crate::{name_tag, Resource, Template, Value};
use serde_json::json;

/// One inbound rule of a security group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingress {
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: String,
}

impl Ingress {
    pub fn tcp<S: Into<String>>(port: u16, cidr: S) -> Self {
        Self::tcp_range(port, port, cidr)
    }

    pub fn tcp_range<S: Into<String>>(from: u16, to: u16, cidr: S) -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port: i32::from(from),
            to_port: i32::from(to),
            cidr: cidr.into(),
        }
    }

    /// Every protocol and port
    pub fn all<S: Into<String>>(cidr: S) -> Self {
        Self {
            protocol: "-1".to_string(),
            from_port: -1,
            to_port: -1,
            cidr: cidr.into(),
        }
    }

    fn render(&self) -> serde_json::Value {
        json!({
            "IpProtocol": self.protocol,
            "FromPort": self.from_port,
            "ToPort": self.to_port,
            "CidrIp": self.cidr,
        })
    }
}

/// Actions on a key granted to the principals nominated in `add_kms_key`
pub const KEY_USER_ACTIONS: &[&str] = &[
    "kms:Encrypt",
    "kms:Decrypt",
    "kms:ReEncrypt*",
    "kms:GenerateDataKey*",
    "kms:DescribeKey",
];

impl Template {
    pub fn add_security_group(
        &mut self,
        key: &str,
        name: &str,
        description: &str,
        vpc: Value,
        ingress: &[Ingress],
    ) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": description,
                    "VpcId": vpc.render(),
                    "SecurityGroupIngress": ingress.iter().map(Ingress::render).collect::<Vec<_>>(),
                    "Tags": name_tag(name),
                }),
            ),
        );
    }

    /// Encryption key with two statements: the account root gets full access, and each of the
    /// nominated principals gets `actions`.  The alias is stored as `<key>Alias`.
    pub fn add_kms_key(
        &mut self,
        key: &str,
        alias: &str,
        account_root: &str,
        principals: Vec<Value>,
        actions: &[&str],
    ) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::KMS::Key",
                json!({
                    "Description": format!("Key for {}", alias),
                    "Enabled": true,
                    "EnableKeyRotation": true,
                    "KeyPolicy": {
                        "Version": "2012-10-17",
                        "Statement": [
                            {
                                "Sid": "Enable IAM User Permissions",
                                "Effect": "Allow",
                                "Principal": { "AWS": account_root },
                                "Action": "kms:*",
                                "Resource": "*",
                            },
                            {
                                "Sid": "Allow use of the key",
                                "Effect": "Allow",
                                "Principal": { "AWS": Value::List(principals).render() },
                                "Action": actions,
                                "Resource": "*",
                            },
                        ],
                    },
                }),
            ),
        );
        self.add_resource(
            format!("{}Alias", key),
            Resource::new(
                "AWS::KMS::Alias",
                json!({
                    "AliasName": format!("alias/{}", alias),
                    "TargetKeyId": Value::reference(key).render(),
                }),
            ),
        );
    }
}
