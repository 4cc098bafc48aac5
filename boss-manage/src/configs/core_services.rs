//! The network and the shared services: VPC, subnets and routing, the bastion, the secret store
//! cluster and the identity provider.

use super::{
    ami, description, error, export_name, lambda_subnet_output, public_dns, subnet_output,
    user_data, Module, Result,
};
use crate::bootstrap;
use crate::context::Context;
use async_trait::async_trait;
use bosslet_config::{Kind, LogicalId};
use cfn_template::{
    subnet_cidrs, Arg, AutoScaleGroup, ClassicListener, DnsTarget, Ingress, Instance, RouteTarget,
    Template, Value, KEY_USER_ACTIONS,
};
use log::info;
use snafu::{OptionExt, ResultExt};

const MODULE: &str = "core";

/// Instance profile of the secret store hosts; also the role allowed to use its seal key
const VAULT_PROFILE: &str = "vault";
const AUTH_PROFILE: &str = "auth";

/// Subnets are `bits` longer than the VPC's own prefix
fn subnet_prefix(vpc_cidr: &str, bits: u8) -> u8 {
    let vpc_prefix = vpc_cidr
        .split('/')
        .nth(1)
        .and_then(|prefix| prefix.parse::<u8>().ok())
        .unwrap_or(0);
    vpc_prefix.saturating_add(bits)
}

pub(super) struct Core;

#[async_trait]
impl Module for Core {
    fn id(&self) -> LogicalId {
        LogicalId::Core
    }

    async fn template(&self, ctx: &Context) -> Result<Template> {
        let names = &ctx.names;
        let bosslet = &ctx.bosslet;
        let scenario = &ctx.scenario;
        let mut template = Template::new(description(ctx, LogicalId::Core));

        template.add_arg(Arg::keypair(
            "KeyName",
            bosslet.ssh_key.clone(),
            "Key pair for the bosslet's hosts",
        ));
        template.add_arg(Arg::ami(
            "BastionAMI",
            ami(ctx, LogicalId::Bastion).await?,
            "Image for the bastion",
        ));
        template.add_arg(Arg::ami(
            "VaultAMI",
            ami(ctx, LogicalId::Vault).await?,
            "Image for the secret store cluster",
        ));
        template.add_arg(Arg::ami(
            "AuthAMI",
            ami(ctx, LogicalId::Auth).await?,
            "Image for the identity provider",
        ));
        template.add_arg(Arg::certificate(
            "Certificate",
            bosslet.certificate_arn.clone(),
            "Certificate for the public endpoints",
        ));

        template.add_vpc("VPC", names.internal_domain(), &bosslet.vpc_cidr);
        let vpc = Value::reference("VPC");
        template.add_hosted_zone(
            "InternalHostedZone",
            names.internal_domain(),
            vpc.clone(),
            &bosslet.region,
        );
        let zone = Value::reference("InternalHostedZone");
        for output in ["VPC", "InternalHostedZone"] {
            template.add_output(
                output,
                Value::reference(output),
                output,
                Some(export_name(ctx, output)),
            );
        }

        // Subnets: one internal and one external per zone, then the function subnets
        let zones = ctx
            .availability_zones()
            .await
            .context(error::ContextSnafu)?;
        let needed = zones.len() * 2 + usize::from(bosslet.lambda_subnets);
        let prefix = subnet_prefix(&bosslet.vpc_cidr, bosslet.subnet_cidr_bits);
        let mut cidrs = subnet_cidrs(&bosslet.vpc_cidr, prefix)
            .context(error::TemplateSnafu { module: MODULE })?
            .into_iter();
        let mut next_cidr = || {
            cidrs.next().context(error::SubnetSpaceSnafu {
                cidr: &bosslet.vpc_cidr,
                prefix,
                needed,
            })
        };

        let mut internal = Vec::new();
        let mut external = Vec::new();
        for az in &zones {
            for id in [LogicalId::Internal, LogicalId::External] {
                let key = subnet_output(az, id);
                template.add_subnet(
                    &key,
                    &names.az_subnet(az, id),
                    vpc.clone(),
                    &next_cidr()?,
                    Some(az.as_str()),
                );
                template.add_output(
                    &key,
                    Value::reference(&key),
                    format!("{} subnet in {}", id, az),
                    Some(export_name(ctx, &key)),
                );
                match id {
                    LogicalId::External => external.push(key),
                    _ => internal.push(key),
                }
            }
        }
        let mut routed_internally = internal.clone();
        for index in 0..bosslet.lambda_subnets {
            let key = lambda_subnet_output(index);
            let az = &zones[usize::from(index) % zones.len()];
            template.add_subnet(
                &key,
                &format!("lambda{}-{}", index, names.subnet(LogicalId::Internal)),
                vpc.clone(),
                &next_cidr()?,
                Some(az.as_str()),
            );
            template.add_output(
                &key,
                Value::reference(&key),
                format!("Function subnet {}", index),
                Some(export_name(ctx, &key)),
            );
            routed_internally.push(key);
        }

        // External subnets route through the internet gateway, everything else through NAT
        let first_external = external
            .first()
            .cloned()
            .context(error::SubnetSpaceSnafu {
                cidr: &bosslet.vpc_cidr,
                prefix,
                needed,
            })?;
        template.add_internet_gateway(
            "InternetGateway",
            &names.resolve(Kind::Gw, LogicalId::InternetGateway),
            vpc.clone(),
        );
        template.add_nat_gateway(
            "NatGateway",
            &names.resolve(Kind::Gw, LogicalId::NatGateway),
            Value::reference(&first_external),
        );
        for (table, id, target, subnets) in [
            (
                "ExternalRouteTable",
                LogicalId::External,
                RouteTarget::Gateway(Value::reference("InternetGateway")),
                &external,
            ),
            (
                "InternalRouteTable",
                LogicalId::Internal,
                RouteTarget::Nat(Value::reference("NatGateway")),
                &routed_internally,
            ),
        ] {
            template.add_route_table(table, &names.resolve(Kind::Rt, id), vpc.clone());
            template.add_route(
                &format!("{}Default", table),
                Value::reference(table),
                "0.0.0.0/0",
                target,
            );
            for subnet in subnets {
                template.add_route_table_association(
                    &format!("{}Routes", subnet),
                    Value::reference(table),
                    Value::reference(subnet),
                );
            }
        }

        template.add_security_group(
            "InternalSecurityGroup",
            &names.resolve(Kind::Sg, LogicalId::Internal),
            "Any traffic from inside the VPC",
            vpc.clone(),
            &[Ingress::all(bosslet.vpc_cidr.as_str())],
        );
        template.add_output(
            "InternalSecurityGroup",
            Value::reference("InternalSecurityGroup"),
            "Any traffic from inside the VPC",
            Some(export_name(ctx, "InternalSecurityGroup")),
        );
        template.add_security_group(
            "SshSecurityGroup",
            &names.resolve(Kind::Sg, LogicalId::Ssh),
            "SSH from anywhere",
            vpc.clone(),
            &[Ingress::tcp(22, "0.0.0.0/0")],
        );
        template.add_security_group(
            "HttpsSecurityGroup",
            &names.resolve(Kind::Sg, LogicalId::Https),
            "HTTP and HTTPS from anywhere",
            vpc,
            &[Ingress::tcp(443, "0.0.0.0/0"), Ingress::tcp(80, "0.0.0.0/0")],
        );
        let internal_sg = Value::reference("InternalSecurityGroup");
        let internal_subnets: Vec<Value> = internal.iter().map(Value::reference).collect();
        let external_subnets: Vec<Value> = external.iter().map(Value::reference).collect();

        let mut bastion = Instance::new(
            names.dns(LogicalId::Bastion),
            Value::reference("BastionAMI"),
            Value::reference("KeyName"),
            Value::reference(&first_external),
            scenario.bastion_type.as_str(),
        );
        bastion.security_groups = vec![internal_sg.clone(), Value::reference("SshSecurityGroup")];
        bastion.public_ip = true;
        bastion.user_data = Some(user_data(ctx, LogicalId::Bastion, &[]));
        template.add_ec2_instance("Bastion", &bastion);
        template.add_route53_record(
            "BastionDNS",
            &names.dns(LogicalId::Bastion),
            zone.clone(),
            DnsTarget::Ec2("Bastion".to_string()),
        );

        // The secret store cluster seals with a key only its own hosts can use
        let vault_dns = names.dns(LogicalId::Vault);
        let seal_alias = format!("alias/{}", names.resolve(Kind::Key, LogicalId::Vault));
        template.add_kms_key(
            "VaultKey",
            &seal_alias,
            &bosslet.account_root_arn(),
            vec![Value::from(format!(
                "arn:aws:iam::{}:role/{}",
                bosslet.account_id, VAULT_PROFILE
            ))],
            KEY_USER_ACTIONS,
        );
        let mut vault = AutoScaleGroup::new(
            vault_dns.as_str(),
            Value::reference("VaultAMI"),
            Value::reference("KeyName"),
            internal_subnets.clone(),
            scenario.vault_type.as_str(),
            scenario.vault_cluster_size,
        );
        vault.security_groups = vec![internal_sg.clone()];
        vault.instance_profile = Some(VAULT_PROFILE.to_string());
        vault.user_data = Some(user_data(
            ctx,
            LogicalId::Vault,
            &[("kms_key", seal_alias.clone())],
        ));
        vault.depends_on = vec!["VaultKey".to_string()];
        template.add_autoscale_group("Vault", &vault);

        // The identity provider sits behind a public load balancer
        template.add_loadbalancer(
            "AuthLoadBalancer",
            &names.dns(LogicalId::Auth),
            &[ClassicListener::https(443, 8080, Value::reference("Certificate"))],
            external_subnets,
            vec![internal_sg.clone(), Value::reference("HttpsSecurityGroup")],
            "HTTP:8080/auth/",
            true,
        );
        let mut auth = AutoScaleGroup::new(
            names.dns(LogicalId::Auth),
            Value::reference("AuthAMI"),
            Value::reference("KeyName"),
            internal_subnets,
            scenario.auth_type.as_str(),
            scenario.auth_cluster_size,
        );
        auth.security_groups = vec![internal_sg];
        auth.instance_profile = Some(AUTH_PROFILE.to_string());
        auth.elb = Some(Value::reference("AuthLoadBalancer"));
        auth.user_data = Some(user_data(ctx, LogicalId::Auth, &[]));
        template.add_autoscale_group("Auth", &auth);
        template.add_route53_record(
            "AuthDNS",
            &names.dns(LogicalId::Auth),
            zone,
            DnsTarget::Elb("AuthLoadBalancer".to_string()),
        );
        template.add_public_dns(
            "AuthPublicDNS",
            &public_dns(ctx, "auth")?,
            names.external_domain(),
            Value::get_att("AuthLoadBalancer", "DNSName"),
        );

        Ok(template)
    }

    async fn post_init(&self, ctx: &Context) -> Result<()> {
        bootstrap::secret_store(ctx)
            .await
            .context(error::BootstrapSnafu)?;
        let session = bootstrap::open_vault(ctx)
            .await
            .context(error::BootstrapSnafu)?;
        bootstrap::identity_provider(ctx, &session.client)
            .await
            .context(error::BootstrapSnafu)?;
        info!("Core services of {} are bootstrapped", ctx.bosslet.name);
        Ok(())
    }
}
