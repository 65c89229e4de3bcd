//! SC-010: Plan generation: diff synthesized templates against the lock.

use super::composer::Composition;
use super::types::*;
use crate::provision::synth::TemplateSynthesizer;

/// Generate an execution plan by comparing fresh templates to the previous lock.
pub fn plan(
    composition: &Composition,
    synth: &TemplateSynthesizer,
    lock: Option<&CompositionLock>,
) -> ExecutionPlan {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for stack in &composition.order {
        let hash = synth.template_hash(stack).unwrap_or_default();
        let action = determine_action(stack, &hash, lock);
        let resources = synth
            .template(stack)
            .map(|t| t.resources.len())
            .unwrap_or(0);

        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }

        changes.push(PlannedChange {
            stack: stack.clone(),
            description: describe_action(stack, &action, resources),
            action,
        });
    }

    // Stacks the lock knows about that are no longer composed
    if let Some(lock) = lock {
        for stack in lock.stacks.keys() {
            if !composition.order.contains(stack) {
                to_destroy += 1;
                changes.push(PlannedChange {
                    stack: stack.clone(),
                    action: PlanAction::Destroy,
                    description: format!("{}: no longer composed", stack),
                });
            }
        }
    }

    ExecutionPlan {
        environment: composition.environment.clone(),
        changes,
        execution_order: composition.order.clone(),
        to_create,
        to_update,
        to_destroy,
        unchanged,
    }
}

/// Determine what happens to a composed stack.
fn determine_action(stack: &str, hash: &str, lock: Option<&CompositionLock>) -> PlanAction {
    match lock.and_then(|l| l.stacks.get(stack)) {
        None => PlanAction::Create,
        // Previously failed: rebuild
        Some(entry) if entry.status == StackStatus::Failed => PlanAction::Update,
        Some(entry) if entry.hash == hash => PlanAction::NoOp,
        Some(_) => PlanAction::Update,
    }
}

fn describe_action(stack: &str, action: &PlanAction, resources: usize) -> String {
    let noun = if resources == 1 { "resource" } else { "resources" };
    match action {
        PlanAction::Create => format!("{}: create {} {}", stack, resources, noun),
        PlanAction::Update => format!("{}: update ({} {})", stack, resources, noun),
        PlanAction::Destroy => format!("{}: destroy", stack),
        PlanAction::NoOp => format!("{}: unchanged", stack),
    }
}
