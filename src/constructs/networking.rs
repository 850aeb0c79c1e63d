//! VPC with public and private subnets across availability zones.
//!
//! Subnet CIDRs are carved from the VPC block by `Fn::Cidr` and zones are
//! picked by `Fn::GetAZs`. Public subnets occupy the start of the block;
//! private subnets follow in a second carve, aligned to their own size.

use crate::core::config::{host_bits, VpcConfig};
use crate::core::error::Result;
use crate::core::stack::Stack;
use crate::core::template::{kind, CfnResource, LogicalId, Token};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkHandle {
    pub vpc: LogicalId,
    pub public_subnets: Vec<LogicalId>,
    pub private_subnets: Vec<LogicalId>,
    pub nat_gateways: Vec<LogicalId>,
}

impl NetworkHandle {
    pub fn vpc_id(&self) -> Token {
        Token::reference(&self.vpc)
    }

    pub fn public_subnet_ids(&self) -> Vec<Token> {
        self.public_subnets.iter().map(Token::reference).collect()
    }

    pub fn private_subnet_ids(&self) -> Vec<Token> {
        self.private_subnets.iter().map(Token::reference).collect()
    }
}

const PREFIX: &str = "Networking";

fn az(index: u32) -> Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

fn name_tag(name: String) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

/// Declare the VPC and everything needed for public ingress and private
/// egress. NAT gateways are capped at the number of zones; with none,
/// private subnets get no default route.
pub fn declare(stack: &mut Stack, config: &VpcConfig) -> Result<NetworkHandle> {
    let vpc = stack.add_resource(
        format!("{}Vpc", PREFIX),
        CfnResource::new(
            kind::VPC,
            json!({
                "CidrBlock": config.cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "Tags": name_tag(config.vpc_name.clone()),
            }),
        ),
    )?;

    let azs = config.max_azs;
    let private_offset = config.private_block_offset();
    let cidr_blocks = |count: u64, mask: u8| {
        json!({
            "Fn::Cidr": [Token::get_att(&vpc, "CidrBlock"), count, host_bits(mask)]
        })
    };
    let public_cidrs = cidr_blocks(u64::from(azs), config.public_subnet_cidr_mask);
    let private_cidrs = cidr_blocks(
        private_offset + u64::from(azs),
        config.private_subnet_cidr_mask,
    );

    let igw = stack.add_resource(
        format!("{}InternetGateway", PREFIX),
        CfnResource::new(
            kind::INTERNET_GATEWAY,
            json!({ "Tags": name_tag(config.vpc_name.clone()) }),
        ),
    )?;
    let attachment = stack.add_resource(
        format!("{}GatewayAttachment", PREFIX),
        CfnResource::new(
            kind::GATEWAY_ATTACHMENT,
            json!({
                "VpcId": Token::reference(&vpc),
                "InternetGatewayId": Token::reference(&igw),
            }),
        ),
    )?;

    let public_rt = stack.add_resource(
        format!("{}PublicRouteTable", PREFIX),
        CfnResource::new(kind::ROUTE_TABLE, json!({ "VpcId": Token::reference(&vpc) })),
    )?;
    let public_route = stack.add_resource(
        format!("{}PublicDefaultRoute", PREFIX),
        CfnResource::new(
            kind::ROUTE,
            json!({
                "RouteTableId": Token::reference(&public_rt),
                "DestinationCidrBlock": "0.0.0.0/0",
                "GatewayId": Token::reference(&igw),
            }),
        ),
    )?;
    stack.add_dependency(&public_route, &attachment)?;

    let mut public_subnets = Vec::new();
    let mut private_subnets = Vec::new();
    for i in 0..azs {
        let n = i + 1;
        let public = stack.add_resource(
            format!("{}PublicSubnet{}", PREFIX, n),
            CfnResource::new(
                kind::SUBNET,
                json!({
                    "VpcId": Token::reference(&vpc),
                    "AvailabilityZone": az(i),
                    "CidrBlock": { "Fn::Select": [i, public_cidrs] },
                    "MapPublicIpOnLaunch": true,
                    "Tags": name_tag(format!("{}-public-{}", config.vpc_name, n)),
                }),
            ),
        )?;
        stack.add_resource(
            format!("{}PublicSubnet{}RouteTableAssociation", PREFIX, n),
            CfnResource::new(
                kind::ROUTE_TABLE_ASSOCIATION,
                json!({
                    "SubnetId": Token::reference(&public),
                    "RouteTableId": Token::reference(&public_rt),
                }),
            ),
        )?;
        public_subnets.push(public);

        let private = stack.add_resource(
            format!("{}PrivateSubnet{}", PREFIX, n),
            CfnResource::new(
                kind::SUBNET,
                json!({
                    "VpcId": Token::reference(&vpc),
                    "AvailabilityZone": az(i),
                    "CidrBlock": { "Fn::Select": [private_offset + u64::from(i), private_cidrs] },
                    "MapPublicIpOnLaunch": false,
                    "Tags": name_tag(format!("{}-private-{}", config.vpc_name, n)),
                }),
            ),
        )?;
        private_subnets.push(private);
    }

    let nat_count = config.nat_gateways.min(azs);
    let mut nat_gateways = Vec::new();
    for i in 0..nat_count {
        let n = i + 1;
        let eip = stack.add_resource(
            format!("{}NatEip{}", PREFIX, n),
            CfnResource::new(kind::EIP, json!({ "Domain": "vpc" })),
        )?;
        stack.add_dependency(&eip, &attachment)?;
        let nat = stack.add_resource(
            format!("{}NatGateway{}", PREFIX, n),
            CfnResource::new(
                kind::NAT_GATEWAY,
                json!({
                    "AllocationId": Token::get_att(&eip, "AllocationId"),
                    "SubnetId": Token::reference(&public_subnets[i as usize]),
                    "Tags": name_tag(format!("{}-nat-{}", config.vpc_name, n)),
                }),
            ),
        )?;
        nat_gateways.push(nat);
    }

    for (i, private) in private_subnets.iter().enumerate() {
        let n = i + 1;
        let rt = stack.add_resource(
            format!("{}PrivateSubnet{}RouteTable", PREFIX, n),
            CfnResource::new(kind::ROUTE_TABLE, json!({ "VpcId": Token::reference(&vpc) })),
        )?;
        stack.add_resource(
            format!("{}PrivateSubnet{}RouteTableAssociation", PREFIX, n),
            CfnResource::new(
                kind::ROUTE_TABLE_ASSOCIATION,
                json!({
                    "SubnetId": Token::reference(private),
                    "RouteTableId": Token::reference(&rt),
                }),
            ),
        )?;
        if !nat_gateways.is_empty() {
            let nat = &nat_gateways[i % nat_gateways.len()];
            stack.add_resource(
                format!("{}PrivateSubnet{}DefaultRoute", PREFIX, n),
                CfnResource::new(
                    kind::ROUTE,
                    json!({
                        "RouteTableId": Token::reference(&rt),
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": Token::reference(nat),
                    }),
                ),
            )?;
        }
    }

    debug!(
        azs,
        nat_gateways = nat_gateways.len(),
        "networking declared"
    );
    Ok(NetworkHandle {
        vpc,
        public_subnets,
        private_subnets,
        nat_gateways,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stack::StackEnv;

    fn declare_with(config: &VpcConfig) -> (Stack, NetworkHandle) {
        let mut s = Stack::new("T", StackEnv::default());
        let h = declare(&mut s, config).unwrap();
        (s, h)
    }

    #[test]
    fn test_networking_default_layout() {
        let (s, h) = declare_with(&VpcConfig::default());
        let t = s.template();
        assert_eq!(t.count_of_type(kind::VPC), 1);
        assert_eq!(t.count_of_type(kind::SUBNET), 4);
        assert_eq!(t.count_of_type(kind::NAT_GATEWAY), 1);
        assert_eq!(h.public_subnets.len(), 2);
        assert_eq!(h.private_subnets.len(), 2);

        // Both private subnets route through the single NAT gateway
        let routes: Vec<_> = t
            .resources_of_type(kind::ROUTE)
            .filter_map(|(_, r)| r.property("NatGatewayId"))
            .collect();
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|v| **v == json!({"Ref": "NetworkingNatGateway1"})));
        s.synth().unwrap();
    }

    #[test]
    fn test_networking_nat_capped_at_azs() {
        let config = VpcConfig {
            max_azs: 2,
            nat_gateways: 5,
            ..VpcConfig::default()
        };
        let (s, h) = declare_with(&config);
        assert_eq!(h.nat_gateways.len(), 2);
        assert_eq!(s.template().count_of_type(kind::EIP), 2);
    }

    #[test]
    fn test_networking_zero_nat_has_no_private_default_route() {
        let config = VpcConfig {
            nat_gateways: 0,
            ..VpcConfig::default()
        };
        let (s, _) = declare_with(&config);
        assert_eq!(s.template().count_of_type(kind::NAT_GATEWAY), 0);
        assert_eq!(s.template().count_of_type(kind::ROUTE), 1);
    }

    #[test]
    fn test_networking_subnet_cidr_and_az() {
        let config = VpcConfig {
            max_azs: 3,
            private_subnet_cidr_mask: 20,
            ..VpcConfig::default()
        };
        let (s, h) = declare_with(&config);
        let private = s.resource(&h.private_subnets[2]).unwrap();
        assert_eq!(private.properties["AvailabilityZone"]["Fn::Select"][0], 2);
        // Three /24 public subnets fit inside the first /20
        let cidr = &private.properties["CidrBlock"]["Fn::Select"];
        assert_eq!(cidr[0], 3);
        assert_eq!(cidr[1]["Fn::Cidr"][1], 4);
        assert_eq!(cidr[1]["Fn::Cidr"][2], 12);
    }

    /// Address ranges, relative to the VPC base, that the carves select.
    fn ranges(s: &Stack, ids: &[LogicalId]) -> Vec<(u64, u64)> {
        ids.iter()
            .map(|id| {
                let select = &s.resource(id).unwrap().properties["CidrBlock"]["Fn::Select"];
                let index = select[0].as_u64().unwrap();
                let bits = select[1]["Fn::Cidr"][2].as_u64().unwrap();
                let count = select[1]["Fn::Cidr"][1].as_u64().unwrap();
                assert!(index < count);
                (index << bits, (index + 1) << bits)
            })
            .collect()
    }

    #[test]
    fn test_networking_subnets_never_overlap() {
        for (public_mask, private_mask) in [(24, 24), (20, 24), (24, 20), (26, 22), (22, 26)] {
            for max_azs in 1..=3 {
                let config = VpcConfig {
                    max_azs,
                    public_subnet_cidr_mask: public_mask,
                    private_subnet_cidr_mask: private_mask,
                    ..VpcConfig::default()
                };
                let (s, h) = declare_with(&config);
                let mut all = ranges(&s, &h.public_subnets);
                all.extend(ranges(&s, &h.private_subnets));
                all.sort();
                for pair in all.windows(2) {
                    assert!(
                        pair[0].1 <= pair[1].0,
                        "masks /{} /{} with {} zones overlap: {:?}",
                        public_mask,
                        private_mask,
                        max_azs,
                        all
                    );
                }
            }
        }
    }

    #[test]
    fn test_networking_wide_public_pushes_private_past_it() {
        let config = VpcConfig {
            public_subnet_cidr_mask: 20,
            private_subnet_cidr_mask: 24,
            ..VpcConfig::default()
        };
        let (s, h) = declare_with(&config);
        let first = &s.resource(&h.private_subnets[0]).unwrap().properties["CidrBlock"]["Fn::Select"];
        // Two /20s span 32 /24 blocks
        assert_eq!(first[0], 32);
        assert_eq!(first[1]["Fn::Cidr"][1], 34);
    }
}
