//! Provisioning engine boundary.
//!
//! Build functions declare resource intent through a [`ProvisioningEngine`].
//! The composer never inspects what an engine does with a declaration; it only
//! sequences build calls and threads the returned reference tokens between
//! stacks.

pub mod synth;

use serde::Serialize;

/// Failure raised while a stack declares its resources.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    #[error("duplicate logical id '{logical_id}' in stack '{stack}'")]
    DuplicateLogicalId { stack: String, logical_id: String },

    #[error("invalid resource type '{0}' (expected Vendor::Service::Kind)")]
    InvalidResourceType(String),

    #[error("input '{0}' is not declared by this stack")]
    UndeclaredInput(String),

    #[error("output '{0}' is not declared by this stack")]
    UndeclaredOutput(String),

    #[error("optional input '{0}' is absent from the profile")]
    AbsentInput(String),

    #[error("input '{name}' is not a {expected}")]
    InputKind { name: String, expected: String },

    #[error("invalid property: {0}")]
    InvalidProperty(String),

    #[error("{0}")]
    Engine(String),
}

/// A resource a stack wants to exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceIntent {
    pub resource_type: String,
    pub properties: serde_json::Value,
    pub depends_on: Vec<String>,
    pub retain: bool,
}

impl ResourceIntent {
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties: serde_json::Value::Object(serde_json::Map::new()),
            depends_on: Vec::new(),
            retain: false,
        }
    }

    pub fn properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    /// Order this resource after another one in the same stack.
    pub fn after(mut self, other: &ResourceRef) -> Self {
        self.depends_on.push(other.logical_id.clone());
        self
    }

    /// Keep the physical resource when the stack is deleted.
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Handle to a declared resource. Renders tokens that an engine resolves
/// to physical values at deploy time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub stack: String,
    pub logical_id: String,
}

impl ResourceRef {
    pub fn new(stack: &str, logical_id: &str) -> Self {
        Self {
            stack: stack.to_string(),
            logical_id: logical_id.to_string(),
        }
    }

    /// Primary identifier token, e.g. `${network:Vpc}`.
    pub fn id(&self) -> String {
        format!("${{{}:{}}}", self.stack, self.logical_id)
    }

    /// Attribute token, e.g. `${network:Ec2SecurityGroup.GroupId}`.
    pub fn attr(&self, attribute: &str) -> String {
        format!("${{{}:{}.{}}}", self.stack, self.logical_id, attribute)
    }
}

/// The external system that turns declared intent into infrastructure.
pub trait ProvisioningEngine {
    /// Declare a resource in `stack` under `logical_id`.
    fn declare(
        &mut self,
        stack: &str,
        logical_id: &str,
        intent: ResourceIntent,
    ) -> Result<ResourceRef, ProvisionError>;

    /// Publish a stack output under template output key `key`.
    fn export(
        &mut self,
        stack: &str,
        key: &str,
        value: &str,
        description: &str,
    ) -> Result<(), ProvisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sc007_ref_tokens() {
        let r = ResourceRef::new("network", "Vpc");
        assert_eq!(r.id(), "${network:Vpc}");
        assert_eq!(r.attr("CidrBlock"), "${network:Vpc.CidrBlock}");
    }

    #[test]
    fn test_sc007_intent_builder() {
        let dep = ResourceRef::new("backend", "Role");
        let intent = ResourceIntent::new("AWS::EC2::Instance")
            .properties(serde_json::json!({"InstanceType": "t4g.micro"}))
            .after(&dep)
            .retain(true);
        assert_eq!(intent.depends_on, vec!["Role"]);
        assert!(intent.retain);
        assert_eq!(intent.properties["InstanceType"], "t4g.micro");
    }

    #[test]
    fn test_sc007_intent_defaults() {
        let intent = ResourceIntent::new("AWS::S3::Bucket");
        assert!(intent.depends_on.is_empty());
        assert!(!intent.retain);
        assert!(intent.properties.as_object().is_some_and(|m| m.is_empty()));
    }
}
