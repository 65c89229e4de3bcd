//! SC-001: Config schema, stack contracts, lock, plan, and provenance types.
//!
//! Defines the YAML schema for `ccm-infra.yaml`, the descriptor model the
//! composer wires together, and the records persisted after a synth pass.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level ccm-infra.yaml
// ============================================================================

/// Root configuration: settings plus one profile per environment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InfraConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Naming prefix for stacks and resources
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Deployment region
    #[serde(default = "default_region")]
    pub region: String,

    /// Deployment account; resolved on the host when absent
    #[serde(default)]
    pub account: Option<String>,

    /// DNS zone that holds the public records
    pub hosted_zone: String,

    /// Environment profiles (order-preserving)
    pub environments: IndexMap<String, EnvironmentProfile>,

    /// Synth policy
    #[serde(default)]
    pub policy: Policy,
}

fn default_region() -> String {
    "eu-west-2".to_string()
}

impl InfraConfig {
    pub fn environment_names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }
}

// ============================================================================
// Environment profiles
// ============================================================================

/// Environment-specific values, keyed by profile key. Immutable once selected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct EnvironmentProfile {
    #[schemars(with = "IndexMap<String, serde_json::Value>")]
    values: IndexMap<String, serde_yaml_ng::Value>,
}

impl EnvironmentProfile {
    pub fn new(values: IndexMap<String, serde_yaml_ng::Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&serde_yaml_ng::Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<serde_yaml_ng::Value>> FromIterator<(K, V)> for EnvironmentProfile {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Append provenance events on every synth
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist the outputs lock after synth
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            tripwire: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Stack contracts
// ============================================================================

/// Declared kind of a profile input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    #[serde(rename = "string")]
    Text,
    Int,
    Bool,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// A resolved input value handed to a build function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InputValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl InputValue {
    /// Read a profile value as `kind`. Returns the YAML kind found on mismatch.
    pub fn from_yaml(value: &serde_yaml_ng::Value, kind: ValueKind) -> Result<Self, &'static str> {
        use serde_yaml_ng::Value;
        match (kind, value) {
            (ValueKind::Text, Value::String(s)) => Ok(Self::Text(s.clone())),
            (ValueKind::Text, Value::Number(n)) => Ok(Self::Text(n.to_string())),
            (ValueKind::Text, Value::Bool(b)) => Ok(Self::Text(b.to_string())),
            (ValueKind::Int, Value::Number(n)) => n.as_i64().map(Self::Int).ok_or("number"),
            (ValueKind::Bool, Value::Bool(b)) => Ok(Self::Bool(*b)),
            (_, other) => Err(yaml_kind(other)),
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Int(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Where an input's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Profile { key: String },
    Output { stack: String, output: String },
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile { key } => write!(f, "profile.{}", key),
            Self::Output { stack, output } => write!(f, "{}.{}", stack, output),
        }
    }
}

/// One declared input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDecl {
    pub name: String,
    pub source: InputSource,
    pub kind: ValueKind,
    pub required: bool,
}

/// Contract of a named infrastructure group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<String>,
    /// Deployed stack suffix; defaults to the capitalized name
    pub deployed_as: Option<String>,
    /// Template output keys that differ from the capitalized output name
    pub export_keys: IndexMap<String, String>,
}

impl StackDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            deployed_as: None,
            export_keys: IndexMap::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Require profile key `key`, exposed to the build under the same name.
    pub fn from_profile(self, key: &str, kind: ValueKind) -> Self {
        self.profile_input(key, kind, true)
    }

    /// Like [`from_profile`](Self::from_profile), but an absent key yields no value.
    pub fn optional_from_profile(self, key: &str, kind: ValueKind) -> Self {
        self.profile_input(key, kind, false)
    }

    /// Consume `stack.output`, exposed to the build as `name`.
    pub fn from_output(mut self, name: &str, stack: &str, output: &str) -> Self {
        self.inputs.push(InputDecl {
            name: name.to_string(),
            source: InputSource::Output {
                stack: stack.to_string(),
                output: output.to_string(),
            },
            kind: ValueKind::Text,
            required: true,
        });
        self
    }

    pub fn produces(mut self, output: &str) -> Self {
        self.outputs.push(output.to_string());
        self
    }

    /// Deploy under `<PREFIX>-<env>-<suffix>` instead of the capitalized name.
    pub fn deployed_as(mut self, suffix: &str) -> Self {
        self.deployed_as = Some(suffix.to_string());
        self
    }

    /// Publish `output` under template output key `key`.
    pub fn export_as(mut self, output: &str, key: &str) -> Self {
        self.export_keys.insert(output.to_string(), key.to_string());
        self
    }

    /// Suffix of the deployed stack id, e.g. `Vpc` for `network`.
    pub fn deployed_name(&self) -> String {
        self.deployed_as
            .clone()
            .unwrap_or_else(|| capitalize(&self.name))
    }

    /// Template output key of `output`, e.g. `VpcId` for `vpcId`.
    pub fn export_key(&self, output: &str) -> String {
        self.export_keys
            .get(output)
            .cloned()
            .unwrap_or_else(|| capitalize(output))
    }

    pub fn declares_output(&self, output: &str) -> bool {
        self.outputs.iter().any(|o| o == output)
    }

    pub fn input(&self, name: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Stacks this descriptor consumes outputs from, first-mention order, deduplicated.
    pub fn upstream(&self) -> Vec<&str> {
        let mut stacks: Vec<&str> = Vec::new();
        for input in &self.inputs {
            if let InputSource::Output { stack, .. } = &input.source {
                if !stacks.contains(&stack.as_str()) {
                    stacks.push(stack);
                }
            }
        }
        stacks
    }

    fn profile_input(mut self, key: &str, kind: ValueKind, required: bool) -> Self {
        self.inputs.push(InputDecl {
            name: key.to_string(),
            source: InputSource::Profile {
                key: key.to_string(),
            },
            kind,
            required,
        });
        self
    }
}

/// Outputs a stack produced. Populated once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBundle {
    pub stack: String,
    pub values: IndexMap<String, String>,
}

impl OutputBundle {
    pub fn get(&self, output: &str) -> Option<&str> {
        self.values.get(output).map(String::as_str)
    }
}

// ============================================================================
// Lock file
// ============================================================================

/// Per-environment record of the last synth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionLock {
    pub schema: String,
    pub environment: String,
    pub generated_at: String,
    pub generator: String,
    pub blake3_version: String,
    pub stacks: IndexMap<String, StackLock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackLock {
    pub status: StackStatus,

    #[serde(default)]
    pub applied_at: Option<String>,

    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 of the synthesized template
    pub hash: String,

    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    Built,
    Failed,
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built => write!(f, "BUILT"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub stack: String,
    pub action: PlanAction,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub environment: String,
    pub changes: Vec<PlannedChange>,
    pub execution_order: Vec<String>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ComposeStarted {
        environment: String,
        run_id: String,
        generator_version: String,
    },
    StackStarted {
        environment: String,
        stack: String,
        position: usize,
    },
    StackBuilt {
        environment: String,
        stack: String,
        duration_seconds: f64,
        hash: String,
    },
    StackFailed {
        environment: String,
        stack: String,
        error: String,
    },
    ComposeCompleted {
        environment: String,
        run_id: String,
        stacks_built: u32,
        stacks_failed: u32,
        total_seconds: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// YAML helpers
// ============================================================================

/// Name of a YAML value's kind, for error messages.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn yaml_kind(value: &serde_yaml_ng::Value) -> &'static str {
    use serde_yaml_ng::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml_ng::Value;

    #[test]
    fn test_sc001_config_parse() {
        let yaml = r#"
version: "1.0"
name: ccm
hosted_zone: crickitup.com
environments:
  staging:
    backendDomainName: api-staging.crickitup.com
    dbAllocatedStorage: 20
  production:
    backendDomainName: api.crickitup.com
    dbAllocatedStorage: 50
policy:
  tripwire: false
"#;
        let config: InfraConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.region, "eu-west-2");
        assert!(config.account.is_none());
        assert_eq!(config.environment_names(), vec!["staging", "production"]);
        let staging = &config.environments["staging"];
        assert_eq!(staging.len(), 2);
        assert_eq!(
            staging.get("dbAllocatedStorage"),
            Some(&Value::Number(20.into()))
        );
        assert!(!config.policy.tripwire);
        assert!(config.policy.lock_file);
    }

    #[test]
    fn test_sc001_policy_defaults() {
        let p = Policy::default();
        assert!(p.tripwire);
        assert!(p.lock_file);
    }

    #[test]
    fn test_sc001_profile_preserves_order() {
        let profile: EnvironmentProfile =
            [("zeta", "1"), ("alpha", "2")].into_iter().collect();
        assert_eq!(profile.keys().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert!(profile.contains("alpha"));
        assert!(!profile.contains("beta"));
    }

    #[test]
    fn test_sc001_input_value_kinds() {
        let text = InputValue::from_yaml(&Value::String("ccm".into()), ValueKind::Text);
        assert_eq!(text, Ok(InputValue::Text("ccm".to_string())));

        let num_as_text = InputValue::from_yaml(&Value::Number(20.into()), ValueKind::Text);
        assert_eq!(num_as_text, Ok(InputValue::Text("20".to_string())));

        let int = InputValue::from_yaml(&Value::Number(20.into()), ValueKind::Int);
        assert_eq!(int, Ok(InputValue::Int(20)));

        let bad_int = InputValue::from_yaml(&Value::String("20".into()), ValueKind::Int);
        assert_eq!(bad_int, Err("string"));

        let float = serde_yaml_ng::from_str::<Value>("2.5").unwrap();
        assert_eq!(InputValue::from_yaml(&float, ValueKind::Int), Err("number"));

        let flag = InputValue::from_yaml(&Value::Bool(true), ValueKind::Bool);
        assert_eq!(flag, Ok(InputValue::Bool(true)));

        assert_eq!(
            InputValue::from_yaml(&Value::Null, ValueKind::Text),
            Err("null")
        );
    }

    #[test]
    fn test_sc001_descriptor_builder() {
        let d = StackDescriptor::new("compute")
            .from_output("vpcId", "network", "vpcId")
            .from_output("sgId", "network", "sgId")
            .from_output("dbEndpoint", "database", "dbEndpoint")
            .from_profile("backendDomainName", ValueKind::Text)
            .produces("instanceId");
        assert_eq!(d.upstream(), vec!["network", "database"]);
        assert!(d.declares_output("instanceId"));
        assert!(!d.declares_output("vpcId"));
        assert_eq!(
            d.input("sgId").unwrap().source.to_string(),
            "network.sgId"
        );
        assert_eq!(
            d.input("backendDomainName").unwrap().source.to_string(),
            "profile.backendDomainName"
        );
    }

    #[test]
    fn test_sc001_deployed_names_and_export_keys() {
        let d = StackDescriptor::new("network")
            .produces("vpcId")
            .produces("sgId")
            .deployed_as("Vpc")
            .export_as("sgId", "Ec2SecurityGroupId");
        assert_eq!(d.deployed_name(), "Vpc");
        assert_eq!(d.export_key("vpcId"), "VpcId");
        assert_eq!(d.export_key("sgId"), "Ec2SecurityGroupId");
        assert_eq!(StackDescriptor::new("backend").deployed_name(), "Backend");
    }

    #[test]
    fn test_sc001_optional_profile_input() {
        let d = StackDescriptor::new("frontend").optional_from_profile("v2DomainName", ValueKind::Text);
        assert!(!d.inputs[0].required);
        assert!(d.upstream().is_empty());
    }

    #[test]
    fn test_sc001_displays() {
        assert_eq!(ValueKind::Text.to_string(), "string");
        assert_eq!(ValueKind::Int.to_string(), "int");
        assert_eq!(StackStatus::Built.to_string(), "BUILT");
        assert_eq!(PlanAction::NoOp.to_string(), "NO-OP");
        assert_eq!(InputValue::Int(7).to_string(), "7");
    }

    #[test]
    fn test_sc001_provenance_event_serde() {
        let event = ProvenanceEvent::StackBuilt {
            environment: "staging".to_string(),
            stack: "network".to_string(),
            duration_seconds: 0.01,
            hash: "blake3:abc".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"stack_built\""));
        assert!(json.contains("\"stack\":\"network\""));
    }

    #[test]
    fn test_sc001_lock_roundtrip() {
        let lock = CompositionLock {
            schema: "1.0".to_string(),
            environment: "staging".to_string(),
            generated_at: "2026-10-19T10:00:00Z".to_string(),
            generator: "ccm-infra 0.4.0".to_string(),
            blake3_version: "1.8".to_string(),
            stacks: IndexMap::from([(
                "network".to_string(),
                StackLock {
                    status: StackStatus::Built,
                    applied_at: None,
                    duration_seconds: Some(0.002),
                    hash: "blake3:abc".to_string(),
                    outputs: IndexMap::from([("vpcId".to_string(), "${network:Vpc}".to_string())]),
                },
            )]),
        };
        let yaml = serde_yaml_ng::to_string(&lock).unwrap();
        let back: CompositionLock = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.stacks["network"].status, StackStatus::Built);
        assert_eq!(back.stacks["network"].outputs["vpcId"], "${network:Vpc}");
    }
}
