//! SC-022: PostgreSQL 16 on RDS in the isolated subnets.
//!
//! Ingress is limited to the backend security group owned by the network stack.

use super::network;
use crate::core::composer::BuildContext;
use crate::core::types::{StackDescriptor, ValueKind};
use crate::provision::{ProvisionError, ResourceIntent};
use serde_json::json;
use std::ops::RangeInclusive;

pub const NAME: &str = "database";

const POSTGRES_PORT: u16 = 5432;
const ENGINE_VERSION: &str = "16";
const STORAGE_GIB: RangeInclusive<i64> = 20..=65536;

pub fn descriptor() -> StackDescriptor {
    StackDescriptor::new(NAME)
        .describe("RDS PostgreSQL instance, credentials secret and its security group")
        .from_output("vpcId", network::NAME, "vpcId")
        .from_output("sgId", network::NAME, "sgId")
        .from_output("isolatedSubnetIds", network::NAME, "isolatedSubnetIds")
        .from_profile("dbInstanceClass", ValueKind::Text)
        .from_profile("dbAllocatedStorage", ValueKind::Int)
        .from_profile("dbName", ValueKind::Text)
        .from_profile("dbUsername", ValueKind::Text)
        .produces("dbEndpoint")
        .produces("dbSecretArn")
}

/// Normalize a profile instance class to `db.<family>.<size>`.
///
/// Family is `t4g` when the value mentions it, else `t3`; size is `micro`
/// when mentioned, else `small`.
pub fn parse_instance_class(value: &str) -> String {
    let family = if value.contains("t4g") { "t4g" } else { "t3" };
    let size = if value.contains("micro") {
        "micro"
    } else {
        "small"
    };
    format!("db.{}.{}", family, size)
}

fn backup_retention_days(production: bool) -> u32 {
    if production {
        14
    } else {
        7
    }
}

pub fn build(ctx: &mut BuildContext<'_>) -> Result<(), ProvisionError> {
    let storage = ctx.int("dbAllocatedStorage")?;
    if !STORAGE_GIB.contains(&storage) {
        return Err(ProvisionError::InvalidProperty(format!(
            "dbAllocatedStorage must be between {} and {} GiB, got {}",
            STORAGE_GIB.start(),
            STORAGE_GIB.end(),
            storage
        )));
    }
    let instance_class = parse_instance_class(&ctx.text("dbInstanceClass")?);
    let db_name = ctx.text("dbName")?;
    let username = ctx.text("dbUsername")?;
    let vpc = ctx.text("vpcId")?;
    let backend_sg = ctx.text("sgId")?;
    let subnets: Vec<String> = ctx
        .text("isolatedSubnetIds")?
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if subnets.len() < 2 {
        return Err(ProvisionError::InvalidProperty(
            "a DB subnet group needs subnets in at least two availability zones".to_string(),
        ));
    }

    let production = ctx.is_production();
    let settings = ctx.settings().clone();

    let sg = ctx.declare(
        "DbSecurityGroup",
        ResourceIntent::new("AWS::EC2::SecurityGroup").properties(json!({
            "GroupName": settings.resource_name("rds-sg"),
            "GroupDescription": "Security group for RDS PostgreSQL",
            "VpcId": vpc,
            "SecurityGroupIngress": [{
                "IpProtocol": "tcp",
                "FromPort": POSTGRES_PORT,
                "ToPort": POSTGRES_PORT,
                "SourceSecurityGroupId": backend_sg,
                "Description": "Allow PostgreSQL from backend EC2",
            }],
            // No outbound traffic
            "SecurityGroupEgress": [{
                "IpProtocol": "icmp",
                "FromPort": 252,
                "ToPort": 86,
                "CidrIp": "255.255.255.255/32",
                "Description": "Disallow all traffic",
            }],
        })),
    )?;

    let subnet_group = ctx.declare(
        "DbSubnetGroup",
        ResourceIntent::new("AWS::RDS::DBSubnetGroup").properties(json!({
            "DBSubnetGroupDescription": format!("Isolated subnets for {}", settings.resource_name("db")),
            "SubnetIds": subnets,
        })),
    )?;

    let secret = ctx.declare(
        "DbSecret",
        ResourceIntent::new("AWS::SecretsManager::Secret").properties(json!({
            "Name": settings.resource_name("db-credentials"),
            "GenerateSecretString": {
                "SecretStringTemplate": json!({ "username": username }).to_string(),
                "GenerateStringKey": "password",
                "PasswordLength": 30,
                "ExcludeCharacters": " %+~`#$&*()|[]{}:;<>?!'/@\"\\",
            },
        })),
    )?;

    let db = ctx.declare(
        "Database",
        ResourceIntent::new("AWS::RDS::DBInstance")
            .properties(json!({
                "DBInstanceIdentifier": settings.resource_name("db"),
                "Engine": "postgres",
                "EngineVersion": ENGINE_VERSION,
                "DBInstanceClass": instance_class,
                "DBName": db_name,
                "MasterUsername": format!("{{{{resolve:secretsmanager:{}:SecretString:username}}}}", secret.id()),
                "MasterUserPassword": format!("{{{{resolve:secretsmanager:{}:SecretString:password}}}}", secret.id()),
                "AllocatedStorage": storage.to_string(),
                "StorageType": "gp3",
                "StorageEncrypted": true,
                "MultiAZ": false,
                "PubliclyAccessible": false,
                "DBSubnetGroupName": subnet_group.id(),
                "VPCSecurityGroups": [sg.attr("GroupId")],
                "BackupRetentionPeriod": backup_retention_days(production),
                "DeletionProtection": production,
            }))
            .retain(production),
    )?;

    ctx.declare(
        "DbSecretAttachment",
        ResourceIntent::new("AWS::SecretsManager::SecretTargetAttachment").properties(json!({
            "SecretId": secret.id(),
            "TargetId": db.id(),
            "TargetType": "AWS::RDS::DBInstance",
        })),
    )?;

    ctx.output("dbEndpoint", &db.attr("Endpoint.Address"), "RDS endpoint hostname")?;
    ctx.output("dbSecretArn", &secret.id(), "Secret ARN for DB credentials")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sc022_parse_instance_class() {
        assert_eq!(parse_instance_class("db.t4g.micro"), "db.t4g.micro");
        assert_eq!(parse_instance_class("db.t4g.small"), "db.t4g.small");
        assert_eq!(parse_instance_class("db.t3.micro"), "db.t3.micro");
        // Unknown sizes fall back to small, unknown families to t3
        assert_eq!(parse_instance_class("db.t4g.large"), "db.t4g.small");
        assert_eq!(parse_instance_class("db.m5.xlarge"), "db.t3.small");
    }

    #[test]
    fn test_sc022_backup_retention() {
        assert_eq!(backup_retention_days(true), 14);
        assert_eq!(backup_retention_days(false), 7);
    }
}
