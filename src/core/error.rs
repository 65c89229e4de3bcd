//! SC-006: Composition error taxonomy.
//!
//! Everything except `DelegatedProvisioning` and `MissingOutput` is detected
//! by `resolve()`, before any build function runs.

use crate::provision::ProvisionError;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ComposeError {
    #[error("stack '{0}' is already registered")]
    DuplicateStack(String),

    #[error("dependency cycle detected involving: {}", .members.join(", "))]
    CyclicDependency { members: Vec<String> },

    #[error("stack '{stack}' input '{input}' references unknown output '{target}.{output}'")]
    UnknownOutput {
        stack: String,
        input: String,
        target: String,
        output: String,
    },

    #[error("stack '{stack}' requires profile key '{key}', missing from environment '{environment}'")]
    MissingProfileKey {
        stack: String,
        key: String,
        environment: String,
    },

    #[error("unknown environment '{name}' (available: {})", .available.join(", "))]
    UnknownEnvironment { name: String, available: Vec<String> },

    #[error("stack '{stack}' profile key '{key}' must be {expected}, got {found}")]
    ProfileTypeMismatch {
        stack: String,
        key: String,
        expected: String,
        found: String,
    },

    #[error("stack '{stack}' did not publish declared output '{output}'")]
    MissingOutput { stack: String, output: String },

    #[error("stack '{stack}' failed: {source}")]
    DelegatedProvisioning {
        stack: String,
        #[source]
        source: ProvisionError,
    },
}

impl ComposeError {
    /// True for errors raised before any build function ran.
    pub fn is_resolution_error(&self) -> bool {
        !matches!(
            self,
            Self::DelegatedProvisioning { .. } | Self::MissingOutput { .. }
        )
    }

    /// Stack the error is attributed to, when there is exactly one.
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::DuplicateStack(name) => Some(name),
            Self::UnknownOutput { stack, .. }
            | Self::MissingProfileKey { stack, .. }
            | Self::ProfileTypeMismatch { stack, .. }
            | Self::MissingOutput { stack, .. }
            | Self::DelegatedProvisioning { stack, .. } => Some(stack),
            Self::CyclicDependency { .. } | Self::UnknownEnvironment { .. } => None,
        }
    }
}
