//! Dependency scheduler.
//!
//! Pure functions over a validated definition and the current execution
//! state. The executor recomputes the ready set after every completion
//! rather than planning waves up front, so pauses, failures, and blocked
//! steps fall out of the same computation.

use std::collections::HashSet;

use weft_types::workflow::{StepDefinition, WorkflowDefinition};

/// Steps whose dependencies are all completed and which are not already
/// completed, in flight, or blocked. Returned in definition order, which
/// is the tie-break when concurrency limits cap how many can dispatch.
pub fn ready_steps<'a>(
    def: &'a WorkflowDefinition,
    completed: &HashSet<String>,
    in_flight: &HashSet<String>,
    blocked: &HashSet<String>,
) -> Vec<&'a StepDefinition> {
    def.steps
        .iter()
        .filter(|step| {
            !completed.contains(&step.id)
                && !in_flight.contains(&step.id)
                && !blocked.contains(&step.id)
                && step.depends_on.iter().all(|dep| completed.contains(dep))
        })
        .collect()
}

/// All steps that transitively depend on `step_id` (excluding itself).
pub fn transitive_dependents(def: &WorkflowDefinition, step_id: &str) -> HashSet<String> {
    let mut dependents: HashSet<String> = HashSet::new();
    loop {
        let before = dependents.len();
        for step in &def.steps {
            if dependents.contains(&step.id) {
                continue;
            }
            if step
                .depends_on
                .iter()
                .any(|dep| dep == step_id || dependents.contains(dep))
            {
                dependents.insert(step.id.clone());
            }
        }
        if dependents.len() == before {
            return dependents;
        }
    }
}

/// All steps that `step_id` transitively depends on (excluding itself).
pub fn transitive_dependencies(def: &WorkflowDefinition, step_id: &str) -> HashSet<String> {
    let mut dependencies: HashSet<String> = HashSet::new();
    let mut frontier: Vec<&str> = match def.step(step_id) {
        Some(step) => step.depends_on.iter().map(String::as_str).collect(),
        None => return dependencies,
    };
    while let Some(id) = frontier.pop() {
        if !dependencies.insert(id.to_string()) {
            continue;
        }
        if let Some(step) = def.step(id) {
            frontier.extend(step.depends_on.iter().map(String::as_str));
        }
    }
    dependencies
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
