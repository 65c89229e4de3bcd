//! SC-021: Backend host: registry, instance role, EC2 instance, Elastic IP, DNS.

use super::bootstrap::{self, BootstrapParams};
use super::network;
use crate::core::composer::BuildContext;
use crate::core::types::{StackDescriptor, ValueKind};
use crate::provision::{ProvisionError, ResourceIntent};
use base64::Engine;
use serde_json::json;

pub const NAME: &str = "backend";

/// Images kept in the registry: about ten per service across six services.
const MAX_IMAGE_COUNT: u32 = 60;
const ROOT_VOLUME_GIB: u32 = 20;
const AMI_PARAMETER: &str =
    "{{resolve:ssm:/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-arm64}}";

pub fn descriptor() -> StackDescriptor {
    StackDescriptor::new(NAME)
        .describe("Backend host: container registry, EC2 instance, Elastic IP and API DNS record")
        .from_output("publicSubnetIds", network::NAME, "publicSubnetIds")
        .from_output("sgId", network::NAME, "sgId")
        .from_profile("backendDomainName", ValueKind::Text)
        .produces("instanceId")
        .produces("elasticIp")
        .produces("apiDomainName")
        .produces("ecrRepoUri")
        .export_as("elasticIp", "ElasticIpAddress")
}

fn instance_type(production: bool) -> &'static str {
    if production {
        "t4g.small"
    } else {
        "t4g.micro"
    }
}

fn lifecycle_policy() -> String {
    json!({
        "rules": [{
            "rulePriority": 1,
            "description": format!("Keep last {} images", MAX_IMAGE_COUNT),
            "selection": {
                "tagStatus": "any",
                "countType": "imageCountMoreThan",
                "countNumber": MAX_IMAGE_COUNT,
            },
            "action": { "type": "expire" },
        }]
    })
    .to_string()
}

pub fn build(ctx: &mut BuildContext<'_>) -> Result<(), ProvisionError> {
    let domain = ctx.text("backendDomainName")?;
    if domain.trim().is_empty() {
        return Err(ProvisionError::InvalidProperty(
            "backendDomainName must not be empty".to_string(),
        ));
    }
    let subnets = ctx.text("publicSubnetIds")?;
    let subnet = subnets
        .split(',')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProvisionError::InvalidProperty("no public subnet".to_string()))?
        .to_string();
    let sg = ctx.text("sgId")?;

    let production = ctx.is_production();
    let settings = ctx.settings().clone();
    let env = settings.environment.as_str();

    let repo = ctx.declare(
        "EcrRepo",
        ResourceIntent::new("AWS::ECR::Repository")
            .properties(json!({
                "RepositoryName": format!("{}-backend-{}", settings.prefix, env),
                "EmptyOnDelete": !production,
                "LifecyclePolicy": { "LifecyclePolicyText": lifecycle_policy() },
            }))
            .retain(production),
    )?;

    let role = ctx.declare(
        "InstanceRole",
        ResourceIntent::new("AWS::IAM::Role").properties(json!({
            "RoleName": settings.resource_name("backend-role"),
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "ec2.amazonaws.com" },
                    "Action": "sts:AssumeRole",
                }],
            },
            "ManagedPolicyArns": ["arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore"],
            "Policies": [
                {
                    "PolicyName": "ecr-pull",
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [
                            {
                                "Effect": "Allow",
                                "Action": [
                                    "ecr:BatchCheckLayerAvailability",
                                    "ecr:GetDownloadUrlForLayer",
                                    "ecr:BatchGetImage",
                                ],
                                "Resource": repo.attr("Arn"),
                            },
                            {
                                "Effect": "Allow",
                                "Action": "ecr:GetAuthorizationToken",
                                "Resource": "*",
                            },
                        ],
                    },
                },
                {
                    "PolicyName": "read-secrets",
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Action": [
                                "secretsmanager:GetSecretValue",
                                "secretsmanager:DescribeSecret",
                            ],
                            "Resource": {
                                "Fn::Sub": format!(
                                    "arn:aws:secretsmanager:{}:${{AWS::AccountId}}:secret:{}",
                                    settings.region,
                                    settings.resource_name("*")
                                ),
                            },
                        }],
                    },
                },
            ],
        })),
    )?;

    let profile = ctx.declare(
        "InstanceProfile",
        ResourceIntent::new("AWS::IAM::InstanceProfile").properties(json!({
            "Roles": [role.id()],
        })),
    )?;

    let script = bootstrap::render(&BootstrapParams {
        environment: env,
        domain_name: &domain,
        region: &settings.region,
        account: settings.account.as_deref(),
    })
    .map_err(|e| ProvisionError::InvalidProperty(format!("user data: {}", e)))?;
    let user_data = base64::engine::general_purpose::STANDARD.encode(script);

    let instance = ctx.declare(
        "BackendInstance",
        ResourceIntent::new("AWS::EC2::Instance")
            .properties(json!({
                "InstanceType": instance_type(production),
                "ImageId": AMI_PARAMETER,
                "SubnetId": subnet,
                "SecurityGroupIds": [sg],
                "IamInstanceProfile": profile.id(),
                "UserData": user_data,
                "BlockDeviceMappings": [{
                    "DeviceName": "/dev/xvda",
                    "Ebs": {
                        "VolumeSize": ROOT_VOLUME_GIB,
                        "VolumeType": "gp3",
                        "Encrypted": true,
                    },
                }],
                "Tags": [{ "Key": "Name", "Value": settings.resource_name("backend") }],
            }))
            .after(&role),
    )?;

    let eip = ctx.declare(
        "ElasticIp",
        ResourceIntent::new("AWS::EC2::EIP").properties(json!({
            "Domain": "vpc",
            "Tags": [{ "Key": "Name", "Value": settings.resource_name("backend-eip") }],
        })),
    )?;

    ctx.declare(
        "EipAssociation",
        ResourceIntent::new("AWS::EC2::EIPAssociation").properties(json!({
            "AllocationId": eip.attr("AllocationId"),
            "InstanceId": instance.id(),
        })),
    )?;

    ctx.declare(
        "ApiARecord",
        ResourceIntent::new("AWS::Route53::RecordSet").properties(json!({
            "HostedZoneName": format!("{}.", settings.hosted_zone),
            "Name": domain,
            "Type": "A",
            "TTL": "300",
            "ResourceRecords": [eip.id()],
        })),
    )?;

    ctx.output("instanceId", &instance.id(), "EC2 instance ID")?;
    ctx.output("elasticIp", &eip.id(), "Elastic IP address")?;
    ctx.output("apiDomainName", &domain, "API domain name")?;
    ctx.output(
        "ecrRepoUri",
        &repo.attr("RepositoryUri"),
        "ECR repository URI for all service images",
    )?;
    Ok(())
}
