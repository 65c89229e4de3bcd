//! SC-002: YAML parsing, validation, and profile selection.
//!
//! Parses ccm-infra.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Name and environment names are lowercase identifiers
//! - Region and hosted zone are present
//! - At least one environment, with well-formed profile keys

use super::error::ComposeError;
use super::types::*;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("identifier pattern"));

static PROFILE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("profile key pattern"));

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a ccm-infra.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<InfraConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a ccm-infra.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<InfraConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &InfraConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        ));
    }

    if config.name.is_empty() {
        push("name must not be empty".to_string());
    } else if !IDENT.is_match(&config.name) {
        push(format!(
            "name '{}' must be lowercase letters, digits and hyphens",
            config.name
        ));
    }

    if config.region.trim().is_empty() {
        push("region must not be empty".to_string());
    }

    if config.hosted_zone.trim().is_empty() {
        push("hosted_zone must not be empty".to_string());
    }

    if config.environments.is_empty() {
        push("at least one environment is required".to_string());
    }

    for (env, profile) in &config.environments {
        if !IDENT.is_match(env) {
            push(format!(
                "environment '{}' must be lowercase letters, digits and hyphens",
                env
            ));
        }
        for key in profile.keys() {
            if !PROFILE_KEY.is_match(key) {
                push(format!(
                    "environment '{}' has invalid profile key '{}'",
                    env, key
                ));
            }
        }
    }

    errors
}

/// Select the profile for `environment`.
pub fn select_profile(
    config: &InfraConfig,
    environment: &str,
) -> Result<EnvironmentProfile, ComposeError> {
    config
        .environments
        .get(environment)
        .cloned()
        .ok_or_else(|| ComposeError::UnknownEnvironment {
            name: environment.to_string(),
            available: config.environment_names(),
        })
}
