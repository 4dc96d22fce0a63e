//! Workflow input parsing and validation.
//!
//! Normalizes raw caller input into the canonical [`WorkflowDefinition`]
//! and enforces every structural invariant up front: unique ids, known
//! dependencies, an acyclic graph, and template references that only point
//! at fields of transitive dependencies. Nothing downstream re-validates.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use weft_types::workflow::{StepDefinition, WorkflowDefinition, WorkflowInput};

use super::{resolver, scheduler};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow definition has no steps")]
    EmptyDefinition,

    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle involving step '{0}'")]
    CycleDetected(String),

    #[error("step '{step}' has invalid reference '{{{reference}}}': {reason}")]
    InvalidReference {
        step: String,
        reference: String,
        reason: String,
    },
}

/// Normalize and validate raw workflow input.
pub fn parse(input: WorkflowInput) -> Result<WorkflowDefinition, ValidationError> {
    let raw = match input {
        WorkflowInput::Single(step) => vec![step],
        WorkflowInput::Steps(steps) => steps,
    };
    if raw.is_empty() {
        return Err(ValidationError::EmptyDefinition);
    }

    // A fully unlabelled list (no ids, no declared dependencies) reads as a
    // pipeline: each step implicitly depends on the one before it.
    let implicit_chain = raw.len() > 1
        && raw
            .iter()
            .all(|s| s.id.is_none() && s.depends_on.is_empty());

    let mut steps = Vec::with_capacity(raw.len());
    for (index, step) in raw.into_iter().enumerate() {
        let id = step.id.unwrap_or_else(|| format!("step{}", index + 1));
        let depends_on = if implicit_chain && index > 0 {
            vec![format!("step{index}")]
        } else {
            step.depends_on
        };
        steps.push(StepDefinition {
            id,
            agent: step.agent,
            task: step.task,
            depends_on,
        });
    }

    let def = WorkflowDefinition { steps };
    validate(&def)?;
    Ok(def)
}

fn validate(def: &WorkflowDefinition) -> Result<(), ValidationError> {
    let mut ids: HashSet<&str> = HashSet::new();
    for step in &def.steps {
        if !ids.insert(&step.id) {
            return Err(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(ValidationError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    check_acyclic(def)?;
    check_references(def)
}

fn check_acyclic(def: &WorkflowDefinition) -> Result<(), ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    for step in &def.steps {
        nodes.insert(step.id.as_str(), graph.add_node(step.id.as_str()));
    }
    for step in &def.steps {
        for dep in &step.depends_on {
            graph.add_edge(nodes[dep.as_str()], nodes[step.id.as_str()], ());
        }
    }
    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| ValidationError::CycleDetected(graph[cycle.node_id()].to_string()))
}

/// Template references may only point at `output`/`status`/`response` of a
/// transitive dependency; anything else would read a value that is not
/// guaranteed to exist at dispatch time.
fn check_references(def: &WorkflowDefinition) -> Result<(), ValidationError> {
    for step in &def.steps {
        let upstream = scheduler::transitive_dependencies(def, &step.id);
        for reference in resolver::references(&step.task) {
            let raw = format!("{}.{}", reference.step_id, reference.field);
            if !resolver::is_valid_field(&reference.field) {
                return Err(ValidationError::InvalidReference {
                    step: step.id.clone(),
                    reference: raw,
                    reason: format!("unknown field '{}'", reference.field),
                });
            }
            if !upstream.contains(&reference.step_id) {
                return Err(ValidationError::InvalidReference {
                    step: step.id.clone(),
                    reference: raw,
                    reason: format!("'{}' is not a dependency of this step", reference.step_id),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
