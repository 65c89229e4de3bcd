//! SC-003: Contract checking, dependency DAG, and template rendering.
//!
//! Edges come from inputs that consume another stack's output. Topological
//! order uses Kahn's algorithm; among ready stacks the one registered first
//! goes first, so the order is stable for a fixed registration sequence.
//!
//! Also renders `{{key}}` templates used for generated artifacts.

use super::error::ComposeError;
use super::types::*;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Check every input contract against the registered stacks and the profile.
///
/// Stacks are visited in registration order and inputs in declaration order;
/// the first violation wins.
pub fn check_contracts(
    descriptors: &[&StackDescriptor],
    profile: &EnvironmentProfile,
    environment: &str,
) -> Result<(), ComposeError> {
    let by_name: FxHashMap<&str, &StackDescriptor> =
        descriptors.iter().map(|d| (d.name.as_str(), *d)).collect();

    for descriptor in descriptors {
        for input in &descriptor.inputs {
            match &input.source {
                InputSource::Output { stack, output } => {
                    if *stack == descriptor.name {
                        return Err(ComposeError::CyclicDependency {
                            members: vec![descriptor.name.clone()],
                        });
                    }
                    let declared = by_name
                        .get(stack.as_str())
                        .is_some_and(|target| target.declares_output(output));
                    if !declared {
                        return Err(ComposeError::UnknownOutput {
                            stack: descriptor.name.clone(),
                            input: input.name.clone(),
                            target: stack.clone(),
                            output: output.clone(),
                        });
                    }
                }
                InputSource::Profile { key } => match profile.get(key) {
                    None if input.required => {
                        return Err(ComposeError::MissingProfileKey {
                            stack: descriptor.name.clone(),
                            key: key.clone(),
                            environment: environment.to_string(),
                        });
                    }
                    None => {}
                    Some(value) => {
                        if let Err(found) = InputValue::from_yaml(value, input.kind) {
                            return Err(ComposeError::ProfileTypeMismatch {
                                stack: descriptor.name.clone(),
                                key: key.clone(),
                                expected: input.kind.to_string(),
                                found: found.to_string(),
                            });
                        }
                    }
                },
            }
        }
    }

    Ok(())
}

/// Build a topological execution order, returned as indices into `descriptors`.
pub fn execution_order(descriptors: &[&StackDescriptor]) -> Result<Vec<usize>, ComposeError> {
    let index: FxHashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; descriptors.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];

    for (i, descriptor) in descriptors.iter().enumerate() {
        for upstream in descriptor.upstream() {
            let Some(&j) = index.get(upstream) else {
                return Err(unknown_stack(descriptor, upstream));
            };
            if i == j {
                return Err(ComposeError::CyclicDependency {
                    members: vec![descriptor.name.clone()],
                });
            }
            dependents[j].push(i);
            in_degree[i] += 1;
        }
    }

    // Ready set keyed by registration index
    let mut ready: BTreeSet<usize> = (0..descriptors.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();

    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != descriptors.len() {
        // Stacks merely downstream of a cycle are left over too; name only cycle members
        let leftover: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        let members = (0..descriptors.len())
            .filter(|&i| leftover[i] && on_cycle(i, &dependents, &leftover))
            .map(|i| descriptors[i].name.clone())
            .collect();
        return Err(ComposeError::CyclicDependency { members });
    }

    Ok(order)
}

/// Whether `start` can reach itself through edges between leftover stacks.
fn on_cycle(start: usize, dependents: &[Vec<usize>], leftover: &[bool]) -> bool {
    let mut seen = vec![false; dependents.len()];
    let mut pending: Vec<usize> = dependents[start].clone();
    while let Some(node) = pending.pop() {
        if node == start {
            return true;
        }
        if !leftover[node] || seen[node] {
            continue;
        }
        seen[node] = true;
        pending.extend(&dependents[node]);
    }
    false
}

fn unknown_stack(descriptor: &StackDescriptor, upstream: &str) -> ComposeError {
    let (input, output) = descriptor
        .inputs
        .iter()
        .find_map(|i| match &i.source {
            InputSource::Output { stack, output } if stack == upstream => {
                Some((i.name.clone(), output.clone()))
            }
            _ => None,
        })
        .unwrap_or_default();
    ComposeError::UnknownOutput {
        stack: descriptor.name.clone(),
        input,
        target: upstream.to_string(),
        output,
    }
}

/// Resolve the declared inputs of one stack against the profile and the
/// bundles of stacks already built.
///
/// Absent optional profile keys map to `None`.
pub fn resolve_inputs(
    descriptor: &StackDescriptor,
    profile: &EnvironmentProfile,
    bundles: &IndexMap<String, OutputBundle>,
) -> Result<IndexMap<String, Option<InputValue>>, ComposeError> {
    let mut resolved = IndexMap::with_capacity(descriptor.inputs.len());

    for input in &descriptor.inputs {
        let value = match &input.source {
            InputSource::Profile { key } => match profile.get(key) {
                Some(v) => Some(InputValue::from_yaml(v, input.kind).map_err(|found| {
                    ComposeError::ProfileTypeMismatch {
                        stack: descriptor.name.clone(),
                        key: key.clone(),
                        expected: input.kind.to_string(),
                        found: found.to_string(),
                    }
                })?),
                None => None,
            },
            InputSource::Output { stack, output } => {
                let value = bundles
                    .get(stack)
                    .and_then(|b| b.get(output))
                    .ok_or_else(|| ComposeError::UnknownOutput {
                        stack: descriptor.name.clone(),
                        input: input.name.clone(),
                        target: stack.clone(),
                        output: output.clone(),
                    })?;
                Some(InputValue::Text(value.to_string()))
            }
        };
        resolved.insert(input.name.clone(), value);
    }

    Ok(resolved)
}

/// Render `{{key}}` placeholders from `params`. Whitespace inside braces is ignored.
pub fn render_template(template: &str, params: &IndexMap<String, String>) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = params
            .get(key)
            .ok_or_else(|| format!("unknown template variable: {}", key))?
            .clone();

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}
