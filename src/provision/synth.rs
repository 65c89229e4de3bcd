//! SC-008: Template synthesizer, the shipped provisioning engine.
//!
//! Records every declaration as a CloudFormation-shaped template per stack.
//! Nothing is deployed; templates are hashed for planning and written to disk
//! for an external deployer.

use super::{ProvisionError, ProvisioningEngine, ResourceIntent, ResourceRef};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static RESOURCE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]+::[A-Za-z0-9]+::[A-Za-z0-9]+$").expect("resource type pattern")
});

const FORMAT_VERSION: &str = "2010-09-09";

/// One synthesized stack.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackTemplate {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub resources: IndexMap<String, TemplateResource>,

    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, TemplateOutput>,
}

impl StackTemplate {
    fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: None,
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    pub properties: serde_json::Value,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateOutput {
    pub value: String,
    pub description: String,
}

/// Collects templates for every stack that declares something.
#[derive(Debug, Default)]
pub struct TemplateSynthesizer {
    templates: IndexMap<String, StackTemplate>,
}

impl TemplateSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a human-readable description to a stack's template.
    pub fn describe(&mut self, stack: &str, description: &str) {
        self.entry(stack).description = Some(description.to_string());
    }

    pub fn template(&self, stack: &str) -> Option<&StackTemplate> {
        self.templates.get(stack)
    }

    pub fn templates(&self) -> &IndexMap<String, StackTemplate> {
        &self.templates
    }

    /// BLAKE3 of the template's canonical JSON.
    pub fn template_hash(&self, stack: &str) -> Option<String> {
        let template = self.templates.get(stack)?;
        let json = serde_json::to_string(template).ok()?;
        Some(hasher::hash_string(&json))
    }

    /// Write `<stack-id>.template.json` for every stack.
    ///
    /// `stack_id` maps a stack name to its deployed identifier.
    pub fn write_to(
        &self,
        out_dir: &Path,
        stack_id: impl Fn(&str) -> String,
    ) -> Result<Vec<PathBuf>, String> {
        std::fs::create_dir_all(out_dir)
            .map_err(|e| format!("cannot create dir {}: {}", out_dir.display(), e))?;

        let mut written = Vec::new();
        for (stack, template) in &self.templates {
            let path = out_dir.join(format!("{}.template.json", stack_id(stack)));
            let json = serde_json::to_string_pretty(template)
                .map_err(|e| format!("serialize error for {}: {}", stack, e))?;
            std::fs::write(&path, json + "\n")
                .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "wrote template");
            written.push(path);
        }
        Ok(written)
    }

    fn entry(&mut self, stack: &str) -> &mut StackTemplate {
        self.templates
            .entry(stack.to_string())
            .or_insert_with(StackTemplate::new)
    }
}

impl ProvisioningEngine for TemplateSynthesizer {
    fn declare(
        &mut self,
        stack: &str,
        logical_id: &str,
        intent: ResourceIntent,
    ) -> Result<ResourceRef, ProvisionError> {
        if !RESOURCE_TYPE.is_match(&intent.resource_type) {
            return Err(ProvisionError::InvalidResourceType(intent.resource_type));
        }

        let template = self.entry(stack);
        if template.resources.contains_key(logical_id) {
            return Err(ProvisionError::DuplicateLogicalId {
                stack: stack.to_string(),
                logical_id: logical_id.to_string(),
            });
        }
        for dep in &intent.depends_on {
            if !template.resources.contains_key(dep) {
                return Err(ProvisionError::InvalidProperty(format!(
                    "{} depends on undeclared resource '{}'",
                    logical_id, dep
                )));
            }
        }

        template.resources.insert(
            logical_id.to_string(),
            TemplateResource {
                resource_type: intent.resource_type,
                properties: intent.properties,
                depends_on: intent.depends_on,
                deletion_policy: intent.retain.then(|| "Retain".to_string()),
            },
        );

        Ok(ResourceRef::new(stack, logical_id))
    }

    fn export(
        &mut self,
        stack: &str,
        key: &str,
        value: &str,
        description: &str,
    ) -> Result<(), ProvisionError> {
        let template = self.entry(stack);
        if template.outputs.contains_key(key) {
            return Err(ProvisionError::Engine(format!(
                "output '{}' exported twice from stack '{}'",
                key, stack
            )));
        }
        template.outputs.insert(
            key.to_string(),
            TemplateOutput {
                value: value.to_string(),
                description: description.to_string(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vpc() -> ResourceIntent {
        ResourceIntent::new("AWS::EC2::VPC").properties(json!({"CidrBlock": "10.0.0.0/16"}))
    }

    #[test]
    fn test_sc008_declare_returns_ref() {
        let mut synth = TemplateSynthesizer::new();
        let r = synth.declare("network", "Vpc", vpc()).unwrap();
        assert_eq!(r.id(), "${network:Vpc}");
        let t = synth.template("network").unwrap();
        assert_eq!(t.resources["Vpc"].resource_type, "AWS::EC2::VPC");
    }

    #[test]
    fn test_sc008_duplicate_logical_id() {
        let mut synth = TemplateSynthesizer::new();
        synth.declare("network", "Vpc", vpc()).unwrap();
        let err = synth.declare("network", "Vpc", vpc()).unwrap_err();
        assert!(matches!(err, ProvisionError::DuplicateLogicalId { .. }));
        // Same id in another stack is fine
        synth.declare("other", "Vpc", vpc()).unwrap();
    }

    #[test]
    fn test_sc008_invalid_type() {
        let mut synth = TemplateSynthesizer::new();
        let err = synth
            .declare("network", "Vpc", ResourceIntent::new("vpc"))
            .unwrap_err();
        assert_eq!(err, ProvisionError::InvalidResourceType("vpc".to_string()));
    }

    #[test]
    fn test_sc008_depends_on_must_exist() {
        let mut synth = TemplateSynthesizer::new();
        let ghost = ResourceRef::new("network", "Ghost");
        let err = synth
            .declare("network", "Vpc", vpc().after(&ghost))
            .unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_sc008_serialized_shape() {
        let mut synth = TemplateSynthesizer::new();
        synth.describe("network", "shared networking");
        let v = synth.declare("network", "Vpc", vpc().retain(true)).unwrap();
        synth
            .export("network", "VpcId", &v.id(), "VPC ID")
            .unwrap();
        let json = serde_json::to_value(synth.template("network").unwrap()).unwrap();
        assert_eq!(json["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(json["Description"], "shared networking");
        assert_eq!(json["Resources"]["Vpc"]["Type"], "AWS::EC2::VPC");
        assert_eq!(json["Resources"]["Vpc"]["DeletionPolicy"], "Retain");
        assert!(json["Resources"]["Vpc"].get("DependsOn").is_none());
        assert_eq!(json["Outputs"]["VpcId"]["Value"], "${network:Vpc}");
    }

    #[test]
    fn test_sc008_export_twice() {
        let mut synth = TemplateSynthesizer::new();
        synth.export("a", "x", "1", "").unwrap();
        assert!(synth.export("a", "x", "2", "").is_err());
    }

    #[test]
    fn test_sc008_hash_tracks_content() {
        let mut a = TemplateSynthesizer::new();
        a.declare("network", "Vpc", vpc()).unwrap();
        let mut b = TemplateSynthesizer::new();
        b.declare("network", "Vpc", vpc()).unwrap();
        assert_eq!(a.template_hash("network"), b.template_hash("network"));

        b.declare("network", "Igw", ResourceIntent::new("AWS::EC2::InternetGateway"))
            .unwrap();
        assert_ne!(a.template_hash("network"), b.template_hash("network"));
        assert!(a.template_hash("missing").is_none());
    }

    #[test]
    fn test_sc008_write_to() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = TemplateSynthesizer::new();
        synth.declare("network", "Vpc", vpc()).unwrap();
        let written = synth
            .write_to(dir.path(), |s| format!("CCM-staging-{}", s))
            .unwrap();
        assert_eq!(written.len(), 1);
        let path = dir.path().join("CCM-staging-network.template.json");
        assert!(path.exists());
        let content = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["Resources"]["Vpc"]["Properties"]["CidrBlock"], "10.0.0.0/16");
    }
}
