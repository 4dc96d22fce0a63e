//! Workflow definition types.
//!
//! `WorkflowInput` is the raw shape accepted at the API boundary: either a
//! bare single step or a list of steps, with optional ids. The parser in
//! `weft-core` normalizes it into the canonical `WorkflowDefinition`, which
//! is the only representation the scheduler and executor ever observe.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw input shape
// ---------------------------------------------------------------------------

/// Raw workflow input as submitted by a caller.
///
/// A single unlabelled step and an ordered step list are both accepted;
/// normalization into explicit ids (and, for unlabelled lists, implicit
/// sequential dependencies) happens in the parser before anything else
/// sees the definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowInput {
    /// A bare single step.
    Single(RawStep),
    /// An ordered list of steps.
    Steps(Vec<RawStep>),
}

/// One step as submitted, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStep {
    /// Caller-assigned step id. Generated (`step1`, `step2`, ...) when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Reference to the agent that executes this step.
    pub agent: String,
    /// Task text, possibly containing `{stepId.field}` references.
    pub task: String,
    /// Step ids this step depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

// ---------------------------------------------------------------------------
// Canonical definition
// ---------------------------------------------------------------------------

/// The canonical, validated workflow definition.
///
/// Invariants (enforced by the parser, never re-checked downstream):
/// ids are unique, every `depends_on` entry names an existing step, and
/// the dependency graph is acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Steps in definition order. Definition order is the stable tie-break
    /// when more steps are ready than the concurrency limits allow.
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// A single step in the canonical workflow DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step id, unique within the workflow.
    pub id: String,
    /// Reference to the agent that executes this step.
    pub agent: String,
    /// Task text, possibly containing `{stepId.field}` references.
    pub task: String,
    /// Step ids this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
}
