//! SC-004: Stack composer: registration, resolution, and the build pass.
//!
//! Each registered stack pairs a [`StackDescriptor`] with a [`StackBuilder`].
//! `resolve()` checks every contract and computes the execution order before
//! anything runs; `run()` then calls each builder exactly once, handing it a
//! [`BuildContext`] that exposes only the inputs the stack declared.

use super::error::ComposeError;
use super::resolver;
use super::types::*;
use crate::provision::{ProvisionError, ProvisioningEngine, ResourceIntent, ResourceRef};
use indexmap::IndexMap;
use std::time::Instant;

/// Explicit composition settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub environment: String,
    pub region: String,
    pub account: Option<String>,
    pub hosted_zone: String,
    /// Naming prefix
    pub prefix: String,
}

impl Settings {
    pub fn from_config(config: &InfraConfig, environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            region: config.region.clone(),
            account: config.account.clone(),
            hosted_zone: config.hosted_zone.clone(),
            prefix: config.name.clone(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Deployed stack identifier, e.g. `CCM-staging-Vpc`.
    pub fn stack_id(&self, stack: &StackDescriptor) -> String {
        format!(
            "{}-{}-{}",
            self.prefix.to_uppercase(),
            self.environment,
            stack.deployed_name()
        )
    }

    /// Physical resource name, e.g. `ccm-staging-vpc`.
    pub fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}-{}", self.prefix, self.environment, suffix)
    }
}

/// Build function of a stack.
pub trait StackBuilder {
    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), ProvisionError>;
}

impl<F> StackBuilder for F
where
    F: Fn(&mut BuildContext<'_>) -> Result<(), ProvisionError>,
{
    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), ProvisionError> {
        self(ctx)
    }
}

/// What a build function sees: its declared inputs, the settings, and the engine.
pub struct BuildContext<'a> {
    settings: &'a Settings,
    stack: &'a StackDescriptor,
    inputs: IndexMap<String, Option<InputValue>>,
    engine: &'a mut dyn ProvisioningEngine,
    outputs: IndexMap<String, String>,
}

impl<'a> BuildContext<'a> {
    pub fn environment(&self) -> &str {
        &self.settings.environment
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn is_production(&self) -> bool {
        self.settings.is_production()
    }

    pub fn stack(&self) -> &str {
        &self.stack.name
    }

    /// A required string input.
    pub fn text(&self, name: &str) -> Result<String, ProvisionError> {
        self.optional_text(name)?
            .ok_or_else(|| ProvisionError::AbsentInput(name.to_string()))
    }

    /// A string input that may be absent from the profile.
    pub fn optional_text(&self, name: &str) -> Result<Option<String>, ProvisionError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(InputValue::Text(s)) => Ok(Some(s.clone())),
            Some(_) => Err(kind_error(name, ValueKind::Text)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, ProvisionError> {
        self.optional_int(name)?
            .ok_or_else(|| ProvisionError::AbsentInput(name.to_string()))
    }

    pub fn optional_int(&self, name: &str) -> Result<Option<i64>, ProvisionError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(InputValue::Int(n)) => Ok(Some(*n)),
            Some(_) => Err(kind_error(name, ValueKind::Int)),
        }
    }

    pub fn flag(&self, name: &str) -> Result<bool, ProvisionError> {
        self.optional_flag(name)?
            .ok_or_else(|| ProvisionError::AbsentInput(name.to_string()))
    }

    pub fn optional_flag(&self, name: &str) -> Result<Option<bool>, ProvisionError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(InputValue::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(kind_error(name, ValueKind::Bool)),
        }
    }

    /// Declare a resource in this stack.
    pub fn declare(
        &mut self,
        logical_id: &str,
        intent: ResourceIntent,
    ) -> Result<ResourceRef, ProvisionError> {
        self.engine.declare(&self.stack.name, logical_id, intent)
    }

    /// Publish a declared output.
    pub fn output(&mut self, name: &str, value: &str, description: &str) -> Result<(), ProvisionError> {
        if !self.stack.declares_output(name) {
            return Err(ProvisionError::UndeclaredOutput(name.to_string()));
        }
        let key = self.stack.export_key(name);
        self.engine.export(&self.stack.name, &key, value, description)?;
        self.outputs.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Option<&InputValue>, ProvisionError> {
        self.inputs
            .get(name)
            .map(Option::as_ref)
            .ok_or_else(|| ProvisionError::UndeclaredInput(name.to_string()))
    }
}

fn kind_error(name: &str, kind: ValueKind) -> ProvisionError {
    ProvisionError::InputKind {
        name: name.to_string(),
        expected: kind.to_string(),
    }
}

/// Progress notification from [`Composer::run_observed`].
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    Started {
        stack: String,
        position: usize,
    },
    Built {
        stack: String,
        outputs: OutputBundle,
        duration_seconds: f64,
    },
    Failed {
        stack: String,
        error: ComposeError,
    },
}

/// Result of a completed build pass.
#[derive(Debug, Clone)]
pub struct Composition {
    pub environment: String,
    pub order: Vec<String>,
    pub bundles: IndexMap<String, OutputBundle>,
    pub durations: IndexMap<String, f64>,
}

struct RegisteredStack {
    descriptor: StackDescriptor,
    builder: Box<dyn StackBuilder>,
}

pub struct Composer {
    settings: Settings,
    profile: EnvironmentProfile,
    stacks: Vec<RegisteredStack>,
}

impl Composer {
    pub fn new(settings: Settings, profile: EnvironmentProfile) -> Self {
        Self {
            settings,
            profile,
            stacks: Vec::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn profile(&self) -> &EnvironmentProfile {
        &self.profile
    }

    /// Add a stack. A duplicate name is rejected and leaves the composer unchanged.
    pub fn register(
        &mut self,
        descriptor: StackDescriptor,
        builder: impl StackBuilder + 'static,
    ) -> Result<(), ComposeError> {
        if self.stacks.iter().any(|s| s.descriptor.name == descriptor.name) {
            return Err(ComposeError::DuplicateStack(descriptor.name));
        }
        tracing::debug!(
            stack = %descriptor.name,
            inputs = descriptor.inputs.len(),
            outputs = descriptor.outputs.len(),
            "registered stack"
        );
        self.stacks.push(RegisteredStack {
            descriptor,
            builder: Box::new(builder),
        });
        Ok(())
    }

    /// Registered descriptors, in registration order.
    pub fn descriptors(&self) -> Vec<&StackDescriptor> {
        self.stacks.iter().map(|s| &s.descriptor).collect()
    }

    /// Check every contract and return the execution order by stack name.
    pub fn resolve(&self) -> Result<Vec<String>, ComposeError> {
        let descriptors = self.descriptors();
        let order = self.resolve_indices(&descriptors)?;
        Ok(order
            .into_iter()
            .map(|i| descriptors[i].name.clone())
            .collect())
    }

    fn resolve_indices(&self, descriptors: &[&StackDescriptor]) -> Result<Vec<usize>, ComposeError> {
        resolver::check_contracts(descriptors, &self.profile, &self.settings.environment)?;
        let order = resolver::execution_order(descriptors)?;
        tracing::info!(
            environment = %self.settings.environment,
            order = ?order.iter().map(|&i| descriptors[i].name.as_str()).collect::<Vec<_>>(),
            "resolved execution order"
        );
        Ok(order)
    }

    /// Resolve, then build every stack once in order.
    pub fn run(self, engine: &mut dyn ProvisioningEngine) -> Result<Composition, ComposeError> {
        self.run_observed(engine, &mut |_: &StackEvent| {})
    }

    /// Like [`run`](Self::run), reporting each stack's progress to `observer`.
    pub fn run_observed(
        self,
        engine: &mut dyn ProvisioningEngine,
        observer: &mut dyn FnMut(&StackEvent),
    ) -> Result<Composition, ComposeError> {
        let order = {
            let descriptors = self.descriptors();
            self.resolve_indices(&descriptors)?
        };

        let mut composition = Composition {
            environment: self.settings.environment.clone(),
            order: order
                .iter()
                .map(|&i| self.stacks[i].descriptor.name.clone())
                .collect(),
            bundles: IndexMap::new(),
            durations: IndexMap::new(),
        };

        for (position, &index) in order.iter().enumerate() {
            let stack = &self.stacks[index];
            let name = stack.descriptor.name.clone();
            observer(&StackEvent::Started {
                stack: name.clone(),
                position,
            });
            tracing::info!(stack = %name, position, "building stack");

            let start = Instant::now();
            let result = self.build_one(stack, &composition.bundles, &mut *engine);
            let elapsed = start.elapsed().as_secs_f64();

            match result {
                Ok(bundle) => {
                    tracing::info!(stack = %name, duration_seconds = elapsed, "stack built");
                    observer(&StackEvent::Built {
                        stack: name.clone(),
                        outputs: bundle.clone(),
                        duration_seconds: elapsed,
                    });
                    composition.durations.insert(name.clone(), elapsed);
                    composition.bundles.insert(name, bundle);
                }
                Err(error) => {
                    tracing::error!(stack = %name, error = %error, "stack failed");
                    observer(&StackEvent::Failed {
                        stack: name,
                        error: error.clone(),
                    });
                    return Err(error);
                }
            }
        }

        Ok(composition)
    }

    fn build_one(
        &self,
        stack: &RegisteredStack,
        bundles: &IndexMap<String, OutputBundle>,
        engine: &mut dyn ProvisioningEngine,
    ) -> Result<OutputBundle, ComposeError> {
        let descriptor = &stack.descriptor;
        let inputs = resolver::resolve_inputs(descriptor, &self.profile, bundles)?;

        let mut ctx = BuildContext {
            settings: &self.settings,
            stack: descriptor,
            inputs,
            engine,
            outputs: IndexMap::new(),
        };

        stack
            .builder
            .build(&mut ctx)
            .map_err(|source| ComposeError::DelegatedProvisioning {
                stack: descriptor.name.clone(),
                source,
            })?;

        if let Some(missing) = descriptor
            .outputs
            .iter()
            .find(|o| !ctx.outputs.contains_key(o.as_str()))
        {
            return Err(ComposeError::MissingOutput {
                stack: descriptor.name.clone(),
                output: missing.clone(),
            });
        }

        // Bundle follows declaration order
        let values = descriptor
            .outputs
            .iter()
            .filter_map(|o| ctx.outputs.get(o).map(|v| (o.clone(), v.clone())))
            .collect();
        Ok(OutputBundle {
            stack: descriptor.name.clone(),
            values,
        })
    }
}
