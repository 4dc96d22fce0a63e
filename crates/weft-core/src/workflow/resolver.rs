//! Template reference resolution.
//!
//! Task text may embed `{stepId.field}` references to upstream results,
//! where field is one of `output`, `status`, or `response` (`response` is
//! a legacy alias for `output`). Resolution happens exactly once, at
//! dispatch time, against the results recorded so far. Anything in braces
//! that does not match the reference shape is left untouched.

use std::collections::HashMap;

use weft_types::thread::StepResult;

/// A `{stepId.field}` reference found in task text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub step_id: String,
    pub field: String,
}

/// Whether a field name is one the resolver understands.
pub fn is_valid_field(field: &str) -> bool {
    matches!(field, "output" | "status" | "response")
}

/// All `{stepId.field}` shaped references in a task string.
///
/// Field names are returned as written; validity is the parser's concern.
pub fn references(task: &str) -> Vec<Reference> {
    let mut found = Vec::new();
    let mut rest = task;
    while let Some(open) = rest.find('{') {
        let after = &rest[open..];
        match parse_at(after) {
            Some((step_id, field, consumed)) => {
                found.push(Reference {
                    step_id: step_id.to_string(),
                    field: field.to_string(),
                });
                rest = &after[consumed..];
            }
            None => rest = &after[1..],
        }
    }
    found
}

/// Substitute every reference in `task` with the corresponding recorded
/// result value.
///
/// A reference to a step with no recorded result resolves to the empty
/// string with a warning; execution is never failed over a dangling
/// reference at resolve time.
pub fn resolve(task: &str, results: &HashMap<String, StepResult>) -> String {
    let mut out = String::with_capacity(task.len());
    let mut rest = task;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        match parse_at(after) {
            Some((step_id, field, consumed)) => {
                out.push_str(&lookup(results, step_id, field));
                rest = &after[consumed..];
            }
            None => {
                out.push('{');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Try to parse a reference at the start of `s` (which begins with `{`).
/// Returns the step id, field, and the number of bytes consumed.
fn parse_at(s: &str) -> Option<(&str, &str, usize)> {
    let close = s.find('}')?;
    let inner = &s[1..close];
    let (step_id, field) = inner.split_once('.')?;
    let step_ok = !step_id.is_empty()
        && step_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let field_ok = !field.is_empty() && field.chars().all(|c| c.is_ascii_alphabetic());
    if step_ok && field_ok {
        Some((step_id, field, close + 1))
    } else {
        None
    }
}

fn lookup(results: &HashMap<String, StepResult>, step_id: &str, field: &str) -> String {
    let Some(result) = results.get(step_id) else {
        tracing::warn!(step_id, field, "reference to step with no recorded result");
        return String::new();
    };
    match field {
        "output" | "response" => result.output.clone(),
        "status" => result.status.as_str().to_string(),
        other => {
            tracing::warn!(step_id, field = other, "reference to unknown field");
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::thread::StepStatus;

    fn results_with(step_id: &str, output: &str) -> HashMap<String, StepResult> {
        let mut results = HashMap::new();
        results.insert(
            step_id.to_string(),
            StepResult {
                output: output.to_string(),
                status: StepStatus::Completed,
            },
        );
        results
    }

    #[test]
    fn substitutes_output_and_status() {
        let results = results_with("a", "42");
        assert_eq!(
            resolve("got {a.output}, which {a.status}", &results),
            "got 42, which completed"
        );
    }

    #[test]
    fn response_aliases_output() {
        let results = results_with("a", "42");
        assert_eq!(resolve("reply: {a.response}", &results), "reply: 42");
    }

    #[test]
    fn missing_result_resolves_empty() {
        let results = HashMap::new();
        assert_eq!(resolve("got {a.output}!", &results), "got !");
    }

    #[test]
    fn non_reference_braces_are_preserved() {
        let results = results_with("a", "42");
        assert_eq!(resolve("json: {\"k\": 1}", &results), "json: {\"k\": 1}");
        assert_eq!(resolve("lone { brace", &results), "lone { brace");
        assert_eq!(resolve("{a.output", &results), "{a.output");
    }

    #[test]
    fn brace_before_real_reference_does_not_swallow_it() {
        let results = results_with("a", "42");
        assert_eq!(resolve("{ {a.output}", &results), "{ 42");
    }

    #[test]
    fn references_reports_all_shaped_occurrences() {
        let refs = references("use {a.output} and {b.banana} but not {nope}");
        assert_eq!(
            refs,
            vec![
                Reference {
                    step_id: "a".to_string(),
                    field: "output".to_string()
                },
                Reference {
                    step_id: "b".to_string(),
                    field: "banana".to_string()
                },
            ]
        );
    }

    #[test]
    fn valid_fields() {
        assert!(is_valid_field("output"));
        assert!(is_valid_field("status"));
        assert!(is_valid_field("response"));
        assert!(!is_valid_field("banana"));
    }
}
