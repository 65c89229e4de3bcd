//! SC-013: Backend instance bootstrap script.
//!
//! Installs docker and nginx, writes the reverse-proxy routing for the six
//! backend services, and drops a deploy script that refreshes every service
//! container from the registry.

use crate::core::resolver::render_template;
use indexmap::IndexMap;

const TEMPLATE: &str = include_str!("templates/bootstrap.sh");

/// Resolves the account on the host when none is configured.
const ACCOUNT_LOOKUP: &str = "$(aws sts get-caller-identity --query Account --output text)";

/// Inputs to the bootstrap script.
#[derive(Debug, Clone)]
pub struct BootstrapParams<'a> {
    pub environment: &'a str,
    pub domain_name: &'a str,
    pub region: &'a str,
    pub account: Option<&'a str>,
}

/// Render the user-data script.
pub fn render(params: &BootstrapParams<'_>) -> Result<String, String> {
    let values = IndexMap::from([
        ("environment".to_string(), params.environment.to_string()),
        ("domain_name".to_string(), params.domain_name.to_string()),
        ("region".to_string(), params.region.to_string()),
        (
            "account".to_string(),
            params.account.unwrap_or(ACCOUNT_LOOKUP).to_string(),
        ),
    ]);
    render_template(TEMPLATE, &values)
}
