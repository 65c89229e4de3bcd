//! SC-012: The end-to-end synth pass.
//!
//! select profile → compose → resolve → build each stack → plan → write
//! templates → lock → events

use super::composer::{Composer, Composition, Settings, StackEvent};
use super::error::ComposeError;
use super::parser;
use super::planner;
use super::state;
use super::types::*;
use crate::infra;
use crate::provision::synth::TemplateSynthesizer;
use crate::tripwire::{eventlog, hasher};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Configuration for a synth run.
pub struct ComposeConfig<'a> {
    pub config: &'a InfraConfig,
    pub environment: &'a str,
    pub state_dir: &'a Path,
    pub out_dir: &'a Path,
    pub dry_run: bool,
}

/// Outcome of a synth run.
#[derive(Debug)]
pub struct ComposeResult {
    pub environment: String,
    pub order: Vec<String>,
    pub plan: ExecutionPlan,
    pub templates: Vec<PathBuf>,
    /// Hash over every stack's template hash, in execution order
    pub composite_hash: String,
    pub total_duration: Duration,
}

/// Build the composer for `environment` with the shipped stacks registered.
pub fn composer_for(config: &InfraConfig, environment: &str) -> Result<Composer, ComposeError> {
    let profile = parser::select_profile(config, environment)?;
    let settings = Settings::from_config(config, environment);
    infra::compose(settings, profile)
}

/// Describe every registered stack on the synthesizer.
fn describe_stacks(composer: &Composer, synth: &mut TemplateSynthesizer) {
    for descriptor in composer.descriptors() {
        if let Some(ref description) = descriptor.description {
            synth.describe(&descriptor.name, description);
        }
    }
}

/// Run a composition against a fresh synthesizer without touching disk.
pub fn synthesize(
    config: &InfraConfig,
    environment: &str,
) -> Result<(Composition, TemplateSynthesizer), ComposeError> {
    let composer = composer_for(config, environment)?;
    let mut synth = TemplateSynthesizer::new();
    describe_stacks(&composer, &mut synth);
    let composition = composer.run(&mut synth)?;
    Ok((composition, synth))
}

/// Plan a synth against the environment's lock.
pub fn plan(
    config: &InfraConfig,
    environment: &str,
    state_dir: &Path,
) -> Result<ExecutionPlan, String> {
    let (composition, synth) = synthesize(config, environment).map_err(|e| e.to_string())?;
    let lock = state::load_lock(state_dir, environment)?;
    Ok(planner::plan(&composition, &synth, lock.as_ref()))
}

/// Execute the synth pass.
pub fn compose(cfg: &ComposeConfig) -> Result<ComposeResult, String> {
    let start = Instant::now();

    // Unknown environment fails here, before anything is resolved
    let composer = composer_for(cfg.config, cfg.environment).map_err(|e| e.to_string())?;
    // Structural errors leave no trace in the state dir
    composer.resolve().map_err(|e| e.to_string())?;
    let settings = composer.settings().clone();
    let stack_ids: IndexMap<String, String> = composer
        .descriptors()
        .iter()
        .map(|d| (d.name.clone(), settings.stack_id(d)))
        .collect();
    let previous = state::load_lock(cfg.state_dir, cfg.environment)?;

    let recorder = Recorder {
        state_dir: cfg.state_dir,
        environment: cfg.environment,
        enabled: cfg.config.policy.tripwire && !cfg.dry_run,
    };
    let run_id = eventlog::generate_run_id();
    recorder.record(ProvenanceEvent::ComposeStarted {
        environment: cfg.environment.to_string(),
        run_id: run_id.clone(),
        generator_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let mut synth = TemplateSynthesizer::new();
    describe_stacks(&composer, &mut synth);

    let mut events: Vec<StackEvent> = Vec::new();
    let outcome = composer.run_observed(&mut synth, &mut |e: &StackEvent| events.push(e.clone()));

    // Replay stack events into the previous lock; stacks this run never reached keep their entries
    let mut lock = previous
        .clone()
        .unwrap_or_else(|| state::new_lock(cfg.environment));
    lock.generated_at = eventlog::now_iso8601();
    lock.generator = format!("ccm-infra {}", env!("CARGO_PKG_VERSION"));
    let (mut built, mut failed) = (0u32, 0u32);
    for event in &events {
        match event {
            StackEvent::Started { stack, position } => {
                recorder.record(ProvenanceEvent::StackStarted {
                    environment: cfg.environment.to_string(),
                    stack: stack.clone(),
                    position: *position,
                });
            }
            StackEvent::Built {
                stack,
                outputs,
                duration_seconds,
            } => {
                built += 1;
                let hash = synth.template_hash(stack).unwrap_or_default();
                recorder.record(ProvenanceEvent::StackBuilt {
                    environment: cfg.environment.to_string(),
                    stack: stack.clone(),
                    duration_seconds: *duration_seconds,
                    hash: hash.clone(),
                });
                lock.stacks.insert(
                    stack.clone(),
                    StackLock {
                        status: StackStatus::Built,
                        applied_at: Some(eventlog::now_iso8601()),
                        duration_seconds: Some(*duration_seconds),
                        hash,
                        outputs: outputs.values.clone(),
                    },
                );
            }
            StackEvent::Failed { stack, error } => {
                failed += 1;
                recorder.record(ProvenanceEvent::StackFailed {
                    environment: cfg.environment.to_string(),
                    stack: stack.clone(),
                    error: error.to_string(),
                });
                lock.stacks.insert(
                    stack.clone(),
                    StackLock {
                        status: StackStatus::Failed,
                        applied_at: Some(eventlog::now_iso8601()),
                        duration_seconds: None,
                        hash: String::new(),
                        outputs: Default::default(),
                    },
                );
            }
        }
    }

    let persist = cfg.config.policy.lock_file && !cfg.dry_run;
    let complete = |recorder: &Recorder| {
        recorder.record(ProvenanceEvent::ComposeCompleted {
            environment: cfg.environment.to_string(),
            run_id: run_id.clone(),
            stacks_built: built,
            stacks_failed: failed,
            total_seconds: start.elapsed().as_secs_f64(),
        });
    };

    let composition = match outcome {
        Ok(composition) => composition,
        Err(error) => {
            if persist && !error.is_resolution_error() {
                state::save_lock(cfg.state_dir, &lock)?;
            }
            complete(&recorder);
            return Err(error.to_string());
        }
    };

    let plan = planner::plan(&composition, &synth, previous.as_ref());
    // Stacks no longer composed were planned for destruction
    lock.stacks
        .retain(|stack, _| composition.bundles.contains_key(stack));

    let templates = if cfg.dry_run {
        Vec::new()
    } else {
        synth.write_to(cfg.out_dir, |stack| {
            stack_ids
                .get(stack)
                .cloned()
                .unwrap_or_else(|| stack.to_string())
        })?
    };

    if persist {
        state::save_lock(cfg.state_dir, &lock)?;
    }
    complete(&recorder);

    let hashes: Vec<String> = composition
        .order
        .iter()
        .map(|s| synth.template_hash(s).unwrap_or_default())
        .collect();
    let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();

    tracing::info!(
        environment = %cfg.environment,
        stacks = composition.order.len(),
        templates = templates.len(),
        dry_run = cfg.dry_run,
        "synth complete"
    );

    Ok(ComposeResult {
        environment: cfg.environment.to_string(),
        order: composition.order,
        plan,
        templates,
        composite_hash: hasher::composite_hash(&refs),
        total_duration: start.elapsed(),
    })
}

/// Appends provenance events when enabled.
struct Recorder<'a> {
    state_dir: &'a Path,
    environment: &'a str,
    enabled: bool,
}

impl Recorder<'_> {
    fn record(&self, event: ProvenanceEvent) {
        if !self.enabled {
            return;
        }
        if let Err(e) = eventlog::append_event(self.state_dir, self.environment, event) {
            tracing::warn!(error = %e, "cannot append provenance event");
        }
    }
}
