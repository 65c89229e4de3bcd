//! SC-020: Shared networking.
//!
//! Two availability zones, each with a public and an isolated /24 subnet, and
//! no NAT gateways. The backend security group lives here so that both the
//! backend and the database stacks consume it from a common ancestor.

use crate::core::composer::BuildContext;
use crate::core::types::StackDescriptor;
use crate::provision::{ProvisionError, ResourceIntent};
use serde_json::json;

pub const NAME: &str = "network";

const VPC_CIDR: &str = "10.0.0.0/16";
const AZ_COUNT: usize = 2;

pub fn descriptor() -> StackDescriptor {
    StackDescriptor::new(NAME)
        .describe("Shared networking: VPC, subnets and the backend security group")
        .produces("vpcId")
        .produces("sgId")
        .produces("publicSubnetIds")
        .produces("isolatedSubnetIds")
        .deployed_as("Vpc")
        .export_as("sgId", "Ec2SecurityGroupId")
}

fn tags(name: &str) -> serde_json::Value {
    json!([{ "Key": "Name", "Value": name }])
}

fn availability_zone(index: usize) -> serde_json::Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

pub fn build(ctx: &mut BuildContext<'_>) -> Result<(), ProvisionError> {
    let vpc_name = ctx.settings().resource_name("vpc");
    let vpc = ctx.declare(
        "Vpc",
        ResourceIntent::new("AWS::EC2::VPC").properties(json!({
            "CidrBlock": VPC_CIDR,
            "EnableDnsHostnames": true,
            "EnableDnsSupport": true,
            "Tags": tags(&vpc_name),
        })),
    )?;

    let igw = ctx.declare(
        "InternetGateway",
        ResourceIntent::new("AWS::EC2::InternetGateway").properties(json!({
            "Tags": tags(&vpc_name),
        })),
    )?;
    let attachment = ctx.declare(
        "VpcGatewayAttachment",
        ResourceIntent::new("AWS::EC2::VPCGatewayAttachment").properties(json!({
            "VpcId": vpc.id(),
            "InternetGatewayId": igw.id(),
        })),
    )?;

    let public_routes = ctx.declare(
        "PublicRouteTable",
        ResourceIntent::new("AWS::EC2::RouteTable").properties(json!({ "VpcId": vpc.id() })),
    )?;
    ctx.declare(
        "PublicDefaultRoute",
        ResourceIntent::new("AWS::EC2::Route")
            .properties(json!({
                "RouteTableId": public_routes.id(),
                "DestinationCidrBlock": "0.0.0.0/0",
                "GatewayId": igw.id(),
            }))
            .after(&attachment),
    )?;

    let mut public_subnets = Vec::with_capacity(AZ_COUNT);
    let mut isolated_subnets = Vec::with_capacity(AZ_COUNT);

    for az in 0..AZ_COUNT {
        let n = az + 1;
        let public = ctx.declare(
            &format!("PublicSubnet{}", n),
            ResourceIntent::new("AWS::EC2::Subnet").properties(json!({
                "VpcId": vpc.id(),
                "CidrBlock": format!("10.0.{}.0/24", az),
                "AvailabilityZone": availability_zone(az),
                "MapPublicIpOnLaunch": true,
                "Tags": tags(&format!("{}-public-{}", vpc_name, n)),
            })),
        )?;
        ctx.declare(
            &format!("PublicSubnet{}RouteTableAssociation", n),
            ResourceIntent::new("AWS::EC2::SubnetRouteTableAssociation").properties(json!({
                "SubnetId": public.id(),
                "RouteTableId": public_routes.id(),
            })),
        )?;

        // Isolated subnets route nowhere beyond the VPC
        let isolated = ctx.declare(
            &format!("IsolatedSubnet{}", n),
            ResourceIntent::new("AWS::EC2::Subnet").properties(json!({
                "VpcId": vpc.id(),
                "CidrBlock": format!("10.0.{}.0/24", AZ_COUNT + az),
                "AvailabilityZone": availability_zone(az),
                "MapPublicIpOnLaunch": false,
                "Tags": tags(&format!("{}-isolated-{}", vpc_name, n)),
            })),
        )?;
        let isolated_routes = ctx.declare(
            &format!("IsolatedRouteTable{}", n),
            ResourceIntent::new("AWS::EC2::RouteTable").properties(json!({ "VpcId": vpc.id() })),
        )?;
        ctx.declare(
            &format!("IsolatedSubnet{}RouteTableAssociation", n),
            ResourceIntent::new("AWS::EC2::SubnetRouteTableAssociation").properties(json!({
                "SubnetId": isolated.id(),
                "RouteTableId": isolated_routes.id(),
            })),
        )?;

        public_subnets.push(public.id());
        isolated_subnets.push(isolated.id());
    }

    let sg_name = ctx.settings().resource_name("ec2-sg");
    let sg = ctx.declare(
        "Ec2SecurityGroup",
        ResourceIntent::new("AWS::EC2::SecurityGroup").properties(json!({
            "GroupName": sg_name,
            "GroupDescription": "Security group for backend EC2 instance",
            "VpcId": vpc.id(),
            "SecurityGroupIngress": [
                { "IpProtocol": "tcp", "FromPort": 80, "ToPort": 80, "CidrIp": "0.0.0.0/0", "Description": "Allow HTTP" },
                { "IpProtocol": "tcp", "FromPort": 443, "ToPort": 443, "CidrIp": "0.0.0.0/0", "Description": "Allow HTTPS" },
            ],
            "SecurityGroupEgress": [
                { "IpProtocol": "-1", "CidrIp": "0.0.0.0/0", "Description": "Allow all outbound traffic by default" },
            ],
        })),
    )?;

    ctx.output("vpcId", &vpc.id(), "VPC ID")?;
    ctx.output("sgId", &sg.attr("GroupId"), "EC2 Security Group ID")?;
    ctx.output(
        "publicSubnetIds",
        &public_subnets.join(","),
        "Public subnet IDs",
    )?;
    ctx.output(
        "isolatedSubnetIds",
        &isolated_subnets.join(","),
        "Isolated subnet IDs",
    )?;
    Ok(())
}
