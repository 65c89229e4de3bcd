//! SC-023: Static web frontend: private S3 bucket behind CloudFront.
//!
//! The custom domain and certificate are attached only when both are
//! configured; the DNS alias is created whenever a domain is set.

use super::backend;
use crate::core::composer::BuildContext;
use crate::core::types::{StackDescriptor, ValueKind};
use crate::provision::{ProvisionError, ResourceIntent};
use regex::Regex;
use serde_json::json;
use std::sync::LazyLock;

pub const NAME: &str = "frontend";

static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("bucket name pattern")
});

/// Managed CachingOptimized policy.
const CACHING_OPTIMIZED: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";
/// Hosted zone id CloudFront alias records point into.
const CLOUDFRONT_ZONE_ID: &str = "Z2FDTNDATAQYW2";

pub fn descriptor() -> StackDescriptor {
    StackDescriptor::new(NAME)
        .describe("Web frontend: private S3 bucket served through CloudFront")
        .from_output("apiDomainName", backend::NAME, "apiDomainName")
        .from_profile("v2S3BucketName", ValueKind::Text)
        .optional_from_profile("v2DomainName", ValueKind::Text)
        .optional_from_profile("certificateArn", ValueKind::Text)
        .produces("bucketName")
        .produces("distributionId")
        .produces("distributionDomainName")
        .deployed_as("V2Frontend")
}

/// Check a bucket name against the S3 naming rules.
pub fn validate_bucket_name(name: &str) -> Result<(), ProvisionError> {
    if !BUCKET_NAME.is_match(name) || name.contains("..") {
        return Err(ProvisionError::InvalidProperty(format!(
            "'{}' is not a valid S3 bucket name",
            name
        )));
    }
    Ok(())
}

/// Content-Security-Policy allowing the API origin plus payment and maps providers.
pub fn content_security_policy(api_domain: &str) -> String {
    [
        "default-src 'self'".to_string(),
        "script-src 'self' 'unsafe-inline' 'unsafe-eval' https://js.stripe.com https://maps.googleapis.com".to_string(),
        "style-src 'self' 'unsafe-inline'".to_string(),
        format!(
            "connect-src 'self' https://{} https://api.stripe.com https://maps.googleapis.com https://*.google.com https://*.gstatic.com",
            api_domain
        ),
        "img-src 'self' data: blob: https://*.amazonaws.com https://*.googleapis.com https://*.gstatic.com https://*.google.com https://*.ggpht.com".to_string(),
        "font-src 'self' data: https://fonts.gstatic.com".to_string(),
        "frame-src https://js.stripe.com https://hooks.stripe.com https://maps.googleapis.com https://*.google.com".to_string(),
        "media-src 'self' blob:".to_string(),
    ]
    .join("; ")
}

pub fn build(ctx: &mut BuildContext<'_>) -> Result<(), ProvisionError> {
    let bucket_name = ctx.text("v2S3BucketName")?;
    validate_bucket_name(&bucket_name)?;
    let api_domain = ctx.text("apiDomainName")?;
    let domain = ctx.optional_text("v2DomainName")?.filter(|d| !d.is_empty());
    let certificate = ctx.optional_text("certificateArn")?.filter(|c| !c.is_empty());

    let production = ctx.is_production();
    let settings = ctx.settings().clone();
    let env = settings.environment.as_str();

    let bucket = ctx.declare(
        "WebBucket",
        ResourceIntent::new("AWS::S3::Bucket")
            .properties(json!({
                "BucketName": bucket_name,
                "BucketEncryption": {
                    "ServerSideEncryptionConfiguration": [{
                        "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" },
                    }],
                },
                "PublicAccessBlockConfiguration": {
                    "BlockPublicAcls": true,
                    "BlockPublicPolicy": true,
                    "IgnorePublicAcls": true,
                    "RestrictPublicBuckets": true,
                },
                "VersioningConfiguration": { "Status": "Enabled" },
            }))
            .retain(production),
    )?;

    let oac = ctx.declare(
        "OriginAccessControl",
        ResourceIntent::new("AWS::CloudFront::OriginAccessControl").properties(json!({
            "OriginAccessControlConfig": {
                "Name": format!("{}-v2-{}-oac", settings.prefix, env),
                "OriginAccessControlOriginType": "s3",
                "SigningBehavior": "always",
                "SigningProtocol": "sigv4",
            },
        })),
    )?;

    let headers = ctx.declare(
        "SecurityHeaders",
        ResourceIntent::new("AWS::CloudFront::ResponseHeadersPolicy").properties(json!({
            "ResponseHeadersPolicyConfig": {
                "Name": format!("{}-v2-{}-security-headers", settings.prefix, env),
                "SecurityHeadersConfig": {
                    "StrictTransportSecurity": {
                        "AccessControlMaxAgeSec": 31_536_000,
                        "IncludeSubdomains": true,
                        "Override": true,
                    },
                    "ContentTypeOptions": { "Override": true },
                    "FrameOptions": { "FrameOption": "DENY", "Override": true },
                    "XSSProtection": { "Protection": true, "ModeBlock": true, "Override": true },
                    "ReferrerPolicy": {
                        "ReferrerPolicy": "strict-origin-when-cross-origin",
                        "Override": true,
                    },
                    "ContentSecurityPolicy": {
                        "ContentSecurityPolicy": content_security_policy(&api_domain),
                        "Override": true,
                    },
                },
            },
        })),
    )?;

    let mut distribution_config = json!({
        "Comment": format!("Cricket Club Manager V2 - {}", env),
        "Enabled": true,
        "DefaultRootObject": "index.html",
        "Origins": [{
            "Id": "web-bucket",
            "DomainName": bucket.attr("RegionalDomainName"),
            "OriginAccessControlId": oac.attr("Id"),
            "S3OriginConfig": { "OriginAccessIdentity": "" },
        }],
        "DefaultCacheBehavior": {
            "TargetOriginId": "web-bucket",
            "ViewerProtocolPolicy": "redirect-to-https",
            "CachePolicyId": CACHING_OPTIMIZED,
            "ResponseHeadersPolicyId": headers.id(),
            "Compress": true,
        },
        // SPA routing
        "CustomErrorResponses": [
            { "ErrorCode": 404, "ResponseCode": 200, "ResponsePagePath": "/index.html", "ErrorCachingMinTTL": 0 },
            { "ErrorCode": 403, "ResponseCode": 200, "ResponsePagePath": "/index.html", "ErrorCachingMinTTL": 0 },
        ],
        "PriceClass": "PriceClass_100",
        "HttpVersion": "http2and3",
    });
    if let (Some(domain), Some(certificate)) = (&domain, &certificate) {
        distribution_config["Aliases"] = json!([domain]);
        distribution_config["ViewerCertificate"] = json!({
            "AcmCertificateArn": certificate,
            "SslSupportMethod": "sni-only",
            "MinimumProtocolVersion": "TLSv1.2_2021",
        });
    }

    let distribution = ctx.declare(
        "WebDistribution",
        ResourceIntent::new("AWS::CloudFront::Distribution").properties(json!({
            "DistributionConfig": distribution_config,
        })),
    )?;

    ctx.declare(
        "WebBucketPolicy",
        ResourceIntent::new("AWS::S3::BucketPolicy").properties(json!({
            "Bucket": bucket.id(),
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "cloudfront.amazonaws.com" },
                    "Action": "s3:GetObject",
                    "Resource": format!("{}/*", bucket.attr("Arn")),
                    "Condition": {
                        "StringEquals": {
                            "AWS:SourceArn": {
                                "Fn::Sub": format!(
                                    "arn:aws:cloudfront::${{AWS::AccountId}}:distribution/{}",
                                    distribution.id()
                                ),
                            },
                        },
                    },
                }],
            },
        })),
    )?;

    if let Some(ref domain) = domain {
        ctx.declare(
            "AliasRecord",
            ResourceIntent::new("AWS::Route53::RecordSet").properties(json!({
                "HostedZoneName": format!("{}.", settings.hosted_zone),
                "Name": domain,
                "Type": "A",
                "AliasTarget": {
                    "DNSName": distribution.attr("DomainName"),
                    "HostedZoneId": CLOUDFRONT_ZONE_ID,
                },
            })),
        )?;
    }

    ctx.output("bucketName", &bucket.id(), "S3 bucket for V2 web files")?;
    ctx.output("distributionId", &distribution.id(), "CloudFront distribution ID")?;
    ctx.output(
        "distributionDomainName",
        &distribution.attr("DomainName"),
        "CloudFront domain name",
    )?;
    Ok(())
}
