//! The Cricket Club Manager cloud footprint as four composed stacks.
//!
//! network → backend → database → frontend (registration order). The network
//! stack owns the backend security group; backend and database both consume it.

pub mod backend;
pub mod bootstrap;
pub mod database;
pub mod frontend;
pub mod network;

use crate::core::composer::{Composer, Settings};
use crate::core::error::ComposeError;
use crate::core::types::EnvironmentProfile;

/// A composer with every shipped stack registered.
pub fn compose(settings: Settings, profile: EnvironmentProfile) -> Result<Composer, ComposeError> {
    let mut composer = Composer::new(settings, profile);
    composer.register(network::descriptor(), network::build)?;
    composer.register(backend::descriptor(), backend::build)?;
    composer.register(database::descriptor(), database::build)?;
    composer.register(frontend::descriptor(), frontend::build)?;
    Ok(composer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::composer::Composition;
    use crate::provision::synth::TemplateSynthesizer;
    use serde_yaml_ng::Value;

    fn settings(env: &str) -> Settings {
        Settings {
            environment: env.to_string(),
            region: "eu-west-2".to_string(),
            account: None,
            hosted_zone: "crickitup.com".to_string(),
            prefix: "ccm".to_string(),
        }
    }

    fn profile(env: &str) -> Vec<(&'static str, Value)> {
        let prefix = if env == "production" { "api" } else { "api-staging" };
        vec![
            ("backendDomainName", Value::String(format!("{}.crickitup.com", prefix))),
            ("dbInstanceClass", Value::String("db.t4g.micro".to_string())),
            ("dbAllocatedStorage", Value::Number(20.into())),
            ("dbName", Value::String("ccm".to_string())),
            ("dbUsername", Value::String("ccm_admin".to_string())),
            ("v2S3BucketName", Value::String(format!("ccm-{}-v2-frontend", env))),
        ]
    }

    fn run(env: &str, extra: &[(&'static str, &str)]) -> (Composition, TemplateSynthesizer) {
        let mut values = profile(env);
        values.extend(extra.iter().map(|(k, v)| (*k, Value::String(v.to_string()))));
        let composer = compose(settings(env), values.into_iter().collect()).unwrap();
        let mut synth = TemplateSynthesizer::new();
        let composition = composer.run(&mut synth).unwrap();
        (composition, synth)
    }

    fn props<'a>(synth: &'a TemplateSynthesizer, stack: &str, id: &str) -> &'a serde_json::Value {
        &synth.template(stack).unwrap().resources[id].properties
    }

    #[test]
    fn test_sc024_order_and_wiring() {
        let (composition, synth) = run("staging", &[]);
        assert_eq!(
            composition.order,
            vec!["network", "backend", "database", "frontend"]
        );

        // The security group produced by network reaches both consumers
        let sg = composition.bundles["network"].get("sgId").unwrap();
        assert_eq!(sg, "${network:Ec2SecurityGroup.GroupId}");
        assert_eq!(props(&synth, "backend", "BackendInstance")["SecurityGroupIds"][0], sg);
        assert_eq!(
            props(&synth, "database", "DbSecurityGroup")["SecurityGroupIngress"][0]["SourceSecurityGroupId"],
            sg
        );
        assert_eq!(
            props(&synth, "database", "DbSubnetGroup")["SubnetIds"],
            serde_json::json!(["${network:IsolatedSubnet1}", "${network:IsolatedSubnet2}"])
        );
    }

    #[test]
    fn test_sc024_deployed_ids_and_output_keys() {
        let composer = compose(settings("staging"), profile("staging").into_iter().collect()).unwrap();
        let ids: Vec<String> = composer
            .descriptors()
            .iter()
            .map(|d| composer.settings().stack_id(d))
            .collect();
        assert_eq!(
            ids,
            vec![
                "CCM-staging-Vpc",
                "CCM-staging-Backend",
                "CCM-staging-Database",
                "CCM-staging-V2Frontend"
            ]
        );

        let (_, synth) = run("staging", &[]);
        let keys = |stack: &str| -> Vec<String> {
            synth.template(stack).unwrap().outputs.keys().cloned().collect()
        };
        assert_eq!(
            keys("network"),
            vec!["VpcId", "Ec2SecurityGroupId", "PublicSubnetIds", "IsolatedSubnetIds"]
        );
        assert_eq!(
            keys("backend"),
            vec!["InstanceId", "ElasticIpAddress", "ApiDomainName", "EcrRepoUri"]
        );
        assert_eq!(keys("database"), vec!["DbEndpoint", "DbSecretArn"]);
        assert_eq!(
            keys("frontend"),
            vec!["BucketName", "DistributionId", "DistributionDomainName"]
        );
    }

    #[test]
    fn test_sc024_staging_sizing() {
        let (_, synth) = run("staging", &[]);
        let instance = props(&synth, "backend", "BackendInstance");
        assert_eq!(instance["InstanceType"], "t4g.micro");
        let db = props(&synth, "database", "Database");
        assert_eq!(db["DBInstanceClass"], "db.t4g.micro");
        assert_eq!(db["BackupRetentionPeriod"], 7);
        assert_eq!(db["DeletionProtection"], false);
        let repo = &synth.template("backend").unwrap().resources["EcrRepo"];
        assert!(repo.deletion_policy.is_none());
        assert_eq!(repo.properties["EmptyOnDelete"], true);
    }

    #[test]
    fn test_sc024_production_sizing() {
        let (_, synth) = run("production", &[]);
        assert_eq!(props(&synth, "backend", "BackendInstance")["InstanceType"], "t4g.small");
        let db = &synth.template("database").unwrap().resources["Database"];
        assert_eq!(db.properties["BackupRetentionPeriod"], 14);
        assert_eq!(db.properties["DeletionProtection"], true);
        assert_eq!(db.deletion_policy.as_deref(), Some("Retain"));
        let bucket = &synth.template("frontend").unwrap().resources["WebBucket"];
        assert_eq!(bucket.deletion_policy.as_deref(), Some("Retain"));
    }

    #[test]
    fn test_sc024_user_data_is_bootstrap_script() {
        use base64::Engine;
        let (_, synth) = run("staging", &[]);
        let encoded = props(&synth, "backend", "BackendInstance")["UserData"]
            .as_str()
            .unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let script = String::from_utf8(decoded).unwrap();
        assert!(script.contains("server_name api-staging.crickitup.com;"));
        assert!(script.contains("get-caller-identity"));
    }

    #[test]
    fn test_sc024_frontend_without_domain() {
        let (_, synth) = run("staging", &[]);
        let template = synth.template("frontend").unwrap();
        assert!(!template.resources.contains_key("AliasRecord"));
        let config = &template.resources["WebDistribution"].properties["DistributionConfig"];
        assert!(config.get("Aliases").is_none());
        let csp = props(&synth, "frontend", "SecurityHeaders")["ResponseHeadersPolicyConfig"]
            ["SecurityHeadersConfig"]["ContentSecurityPolicy"]["ContentSecurityPolicy"]
            .as_str()
            .unwrap();
        assert!(csp.contains("https://api-staging.crickitup.com "));
    }

    #[test]
    fn test_sc024_frontend_domain_needs_certificate() {
        let (_, synth) = run("production", &[("v2DomainName", "app.crickitup.com")]);
        let template = synth.template("frontend").unwrap();
        // DNS alias regardless, aliases only with a certificate
        assert!(template.resources.contains_key("AliasRecord"));
        let config = &template.resources["WebDistribution"].properties["DistributionConfig"];
        assert!(config.get("Aliases").is_none());

        let (_, synth) = run(
            "production",
            &[
                ("v2DomainName", "app.crickitup.com"),
                ("certificateArn", "arn:aws:acm:us-east-1:123456789012:certificate/abc"),
            ],
        );
        let config = &props(&synth, "frontend", "WebDistribution")["DistributionConfig"];
        assert_eq!(config["Aliases"][0], "app.crickitup.com");
        assert_eq!(config["ViewerCertificate"]["MinimumProtocolVersion"], "TLSv1.2_2021");
    }

    #[test]
    fn test_sc024_bundles_complete() {
        let (composition, _) = run("staging", &[]);
        assert_eq!(composition.bundles["network"].values.len(), 4);
        assert_eq!(composition.bundles["backend"].values.len(), 4);
        assert_eq!(composition.bundles["database"].values.len(), 2);
        assert_eq!(composition.bundles["frontend"].values.len(), 3);
        assert_eq!(
            composition.bundles["backend"].get("apiDomainName"),
            Some("api-staging.crickitup.com")
        );
    }

    #[test]
    fn test_sc024_invalid_storage_is_delegated() {
        let mut values = profile("staging");
        values[2].1 = Value::Number(10.into());
        let composer = compose(settings("staging"), values.into_iter().collect()).unwrap();
        let err = composer.run(&mut TemplateSynthesizer::new()).unwrap_err();
        assert_eq!(err.stack(), Some("database"));
        assert!(err.to_string().contains("between 20 and 65536"));
    }

    #[test]
    fn test_sc024_invalid_bucket_name() {
        let mut values = profile("staging");
        values[5].1 = Value::String("Not_A_Bucket".to_string());
        let composer = compose(settings("staging"), values.into_iter().collect()).unwrap();
        let err = composer.run(&mut TemplateSynthesizer::new()).unwrap_err();
        assert_eq!(err.stack(), Some("frontend"));
    }

    #[test]
    fn test_sc024_templates_deterministic() {
        let (_, a) = run("staging", &[]);
        let (_, b) = run("staging", &[]);
        for stack in ["network", "backend", "database", "frontend"] {
            assert_eq!(a.template_hash(stack), b.template_hash(stack));
        }
    }
}
