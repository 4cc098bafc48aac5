//! VPCs, subnets, routing, gateways and peering.

use crate::{error, name_tag, Resource, Result, Template, Value};
use ipnet::Ipv4Net;
use serde_json::json;
use snafu::ResultExt;

/// Where a route sends its traffic.  A route has exactly one target.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteTarget {
    Gateway(Value),
    Peer(Value),
    Instance(Value),
    Nat(Value),
}

impl RouteTarget {
    fn property(&self) -> (&'static str, &Value) {
        match self {
            RouteTarget::Gateway(v) => ("GatewayId", v),
            RouteTarget::Peer(v) => ("VpcPeeringConnectionId", v),
            RouteTarget::Instance(v) => ("InstanceId", v),
            RouteTarget::Nat(v) => ("NatGatewayId", v),
        }
    }
}

/// Splits `cidr` into every subnet with the given prefix length, in address order.
pub fn subnet_cidrs(cidr: &str, prefix: u8) -> Result<Vec<String>> {
    let net: Ipv4Net = cidr.parse().context(error::InvalidCidrSnafu { cidr })?;
    let subnets = net
        .subnets(prefix)
        .context(error::InvalidPrefixSnafu { cidr, prefix })?;
    Ok(subnets.map(|subnet| subnet.to_string()).collect())
}

impl Template {
    pub fn add_vpc(&mut self, key: &str, domain: &str, cidr: &str) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::EC2::VPC",
                json!({
                    "CidrBlock": cidr,
                    "EnableDnsSupport": true,
                    "EnableDnsHostnames": true,
                    "Tags": name_tag(domain),
                }),
            ),
        );
    }

    /// Private hosted zone for the internal domain, attached to the given VPC
    pub fn add_hosted_zone(&mut self, key: &str, domain: &str, vpc: Value, region: &str) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::Route53::HostedZone",
                json!({
                    "Name": domain,
                    "HostedZoneConfig": { "Comment": format!("Internal DNS zone for {}", domain) },
                    "VPCs": [{ "VPCId": vpc.render(), "VPCRegion": region }],
                }),
            ),
        );
    }

    pub fn add_subnet(&mut self, key: &str, name: &str, vpc: Value, cidr: &str, az: Option<&str>) {
        let mut properties = json!({
            "VpcId": vpc.render(),
            "CidrBlock": cidr,
            "Tags": name_tag(name),
        });
        if let Some(az) = az {
            properties["AvailabilityZone"] = az.into();
        }
        self.add_resource(key, Resource::new("AWS::EC2::Subnet", properties));
    }

    pub fn add_route_table(&mut self, key: &str, name: &str, vpc: Value) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::EC2::RouteTable",
                json!({ "VpcId": vpc.render(), "Tags": name_tag(name) }),
            ),
        );
    }

    pub fn add_route_table_association(&mut self, key: &str, route_table: Value, subnet: Value) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({ "RouteTableId": route_table.render(), "SubnetId": subnet.render() }),
            ),
        );
    }

    /// Adds a route to `cidr`.  Routes through an internet gateway created by this template wait
    /// for the gateway to be attached to the VPC.
    pub fn add_route(&mut self, key: &str, route_table: Value, cidr: &str, target: RouteTarget) {
        let (property, value) = target.property();
        let mut properties = json!({
            "RouteTableId": route_table.render(),
            "DestinationCidrBlock": cidr,
        });
        properties[property] = value.render();

        let mut resource = Resource::new("AWS::EC2::Route", properties);
        if let RouteTarget::Gateway(Value::Ref(gateway)) = &target {
            let attachment = attachment_key(gateway);
            if self.has_resource(&attachment) {
                resource = resource.depends_on(vec![attachment]);
            }
        }
        self.add_resource(key, resource);
    }

    /// Internet gateway plus its attachment to the VPC, stored as `<key>Attachment`
    pub fn add_internet_gateway(&mut self, key: &str, name: &str, vpc: Value) {
        self.add_resource(
            key,
            Resource::new(
                "AWS::EC2::InternetGateway",
                json!({ "Tags": name_tag(name) }),
            ),
        );
        self.add_resource(
            attachment_key(key),
            Resource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({
                    "VpcId": vpc.render(),
                    "InternetGatewayId": Value::reference(key).render(),
                }),
            ),
        );
    }

    /// NAT gateway in `subnet` with its elastic IP, stored as `<key>Ip`
    pub fn add_nat_gateway(&mut self, key: &str, name: &str, subnet: Value) {
        let ip = format!("{}Ip", key);
        self.add_resource(
            &ip,
            Resource::new("AWS::EC2::EIP", json!({ "Domain": "vpc" })),
        );
        self.add_resource(
            key,
            Resource::new(
                "AWS::EC2::NatGateway",
                json!({
                    "AllocationId": Value::get_att(&ip, "AllocationId").render(),
                    "SubnetId": subnet.render(),
                    "Tags": name_tag(name),
                }),
            ),
        );
    }
}

fn attachment_key(gateway: &str) -> String {
    format!("{}Attachment", gateway)
}

#[cfg(test)]
mod test {
    use super::{subnet_cidrs, RouteTarget};
    use crate::{Error, Template, Value};
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[test]
    fn splits_cidrs() {
        let cidrs = subnet_cidrs("10.10.0.0/16", 18).unwrap();
        assert_eq!(
            cidrs,
            vec!["10.10.0.0/18", "10.10.64.0/18", "10.10.128.0/18", "10.10.192.0/18"]
        );
        assert!(matches!(
            subnet_cidrs("10.10.0.0", 24),
            Err(Error::InvalidCidr { .. })
        ));
        assert!(matches!(
            subnet_cidrs("10.10.0.0/16", 8),
            Err(Error::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn route_through_gateway_waits_for_attachment() {
        let mut template = Template::new("net");
        template.add_vpc("Vpc", "bosslet.a", "10.10.0.0/16");
        template.add_route_table("Rt", "internet.bosslet.a", Value::reference("Vpc"));
        template.add_internet_gateway("Igw", "internet.bosslet.a", Value::reference("Vpc"));
        template.add_route(
            "Route",
            Value::reference("Rt"),
            "0.0.0.0/0",
            RouteTarget::Gateway(Value::reference("Igw")),
        );

        assert_json_include!(
            actual: template.to_json(),
            expected: json!({
                "Resources": {
                    "Route": {
                        "Type": "AWS::EC2::Route",
                        "Properties": { "GatewayId": { "Ref": "Igw" }, "DestinationCidrBlock": "0.0.0.0/0" },
                        "DependsOn": ["IgwAttachment"],
                    },
                    "IgwAttachment": { "Properties": { "InternetGatewayId": { "Ref": "Igw" } } },
                }
            })
        );
        assert!(template.validate().is_ok());
    }

    #[test]
    fn nat_route() {
        let mut template = Template::new("net");
        template.add_nat_gateway("Nat", "nat.bosslet.a", Value::reference("Subnet"));
        template.add_route(
            "Route",
            Value::reference("Rt"),
            "0.0.0.0/0",
            RouteTarget::Nat(Value::reference("Nat")),
        );
        let route = &template.resource("Route").unwrap().properties;
        assert_eq!(route["NatGatewayId"], json!({ "Ref": "Nat" }));
        assert!(route.get("GatewayId").is_none());
        assert_eq!(
            template.resource("Nat").unwrap().properties["AllocationId"],
            json!({ "Fn::GetAtt": ["NatIp", "AllocationId"] })
        );
    }
}
