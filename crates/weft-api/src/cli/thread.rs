//! Thread CLI commands: run, state, history, resume, pause, abort.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use weft_core::repository::CheckpointStore;
use weft_core::workflow::ExecutorError;
use weft_types::thread::{InvokeOutcome, StepResult, StepStatus, Thread, ThreadStatus};
use weft_types::workflow::WorkflowInput;

use crate::state::AppState;

/// Execute a workflow file and wait for the thread to settle.
///
/// # Examples
///
/// ```bash
/// weft run pipeline.json
/// weft run pipeline.json --project acme --timeout-ms 30000
/// weft run pipeline.json --detach
/// ```
pub async fn run(
    state: &AppState,
    file: &Path,
    project: Option<String>,
    thread_id: Option<String>,
    timeout_ms: Option<u64>,
    detach: bool,
    json: bool,
) -> Result<()> {
    let content = tokio::fs::read_to_string(file).await?;
    let input: WorkflowInput = serde_json::from_str(&content)?;

    if detach {
        let thread_id = state.executor.invoke_async(input, project, thread_id)?;
        if json {
            println!(
                "{}",
                serde_json::json!({ "thread_id": thread_id, "status": "started" })
            );
        } else {
            println!(
                "  {} Started thread {}",
                style("✓").green().bold(),
                style(&thread_id).cyan()
            );
        }
        return Ok(());
    }

    let spinner = (!json).then(|| {
        let spinner = ProgressBar::new_spinner();
        if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(template);
        }
        spinner.set_message("Running workflow...");
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    });

    let outcome = state
        .executor
        .invoke(
            input,
            project,
            thread_id,
            timeout_ms.map(Duration::from_millis),
        )
        .await;

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(ExecutorError::WaitTimeout(id)) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "thread_id": id, "status": "running", "timed_out": true })
                );
            } else {
                println!(
                    "  {} Still executing. Check progress with: {}",
                    style("i").blue().bold(),
                    style(format!("weft state {id}")).yellow()
                );
            }
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    print_outcome(&outcome);
    Ok(())
}

/// Show the current state of a thread, live or reconstructed from its
/// latest checkpoint.
pub async fn show_state(state: &AppState, thread_id: &str, json: bool) -> Result<()> {
    match state.registry.get(thread_id) {
        Ok(thread) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&thread)?);
            } else {
                print_thread(&thread);
            }
        }
        Err(_) => {
            let checkpoint = state
                .store
                .load_latest(thread_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("thread '{thread_id}' not found"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&checkpoint)?);
            } else {
                println!();
                println!(
                    "  {} {}  {}",
                    style("Thread:").bold(),
                    style(&checkpoint.thread_id).cyan(),
                    style("(from checkpoint)").dim()
                );
                println!(
                    "  {} {}",
                    style("Status:").bold(),
                    format_thread_status(checkpoint.status)
                );
                println!(
                    "  {} {}",
                    style("Checkpoint:").bold(),
                    style(checkpoint.checkpoint_id.to_string()).dim()
                );
                print_results_table(&checkpoint.completed_steps, &checkpoint.results);
                println!();
            }
        }
    }
    Ok(())
}

/// List a thread's checkpoint history, oldest first.
pub async fn show_history(state: &AppState, thread_id: &str, json: bool) -> Result<()> {
    let history = state.store.load_history(thread_id).await?;
    if history.is_empty() && !state.registry.contains(thread_id) {
        anyhow::bail!("thread '{thread_id}' not found");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Seq").fg(Color::White),
        Cell::new("Checkpoint").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Completed Steps").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);

    for checkpoint in &history {
        table.add_row(vec![
            Cell::new(checkpoint.seq.to_string()),
            Cell::new(checkpoint.checkpoint_id.to_string()).fg(Color::DarkGrey),
            status_cell(checkpoint.status),
            Cell::new(checkpoint.completed_steps.join(", ")),
            Cell::new(checkpoint.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} checkpoint{}",
        style(history.len()).bold(),
        if history.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

/// Resume a thread from a checkpoint with a workflow file.
pub async fn resume(
    state: &AppState,
    thread_id: &str,
    file: &Path,
    checkpoint: Option<Uuid>,
    project: Option<String>,
    json: bool,
) -> Result<()> {
    let content = tokio::fs::read_to_string(file).await?;
    let input: WorkflowInput = serde_json::from_str(&content)?;

    let thread = state
        .executor
        .resume(thread_id, input, checkpoint, project)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&thread)?);
    } else {
        println!(
            "  {} Resumed thread {} ({} step{} already done)",
            style("✓").green().bold(),
            style(thread_id).cyan(),
            thread.completed_steps.len(),
            if thread.completed_steps.len() == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

/// Pause a running thread.
pub async fn pause(
    state: &AppState,
    thread_id: &str,
    reason: Option<String>,
    json: bool,
) -> Result<()> {
    let thread = state.executor.pause(thread_id, reason)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&thread)?);
    } else {
        println!(
            "  {} Pausing thread {}; in-flight steps will drain first.",
            style("✓").yellow().bold(),
            style(thread_id).cyan()
        );
    }
    Ok(())
}

/// Abort a thread, cancelling in-flight steps.
pub async fn abort(state: &AppState, thread_id: &str, json: bool) -> Result<()> {
    state.executor.abort(thread_id).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "thread_id": thread_id, "status": "aborting" })
        );
    } else {
        println!(
            "  {} Aborting thread {}",
            style("✓").red().bold(),
            style(thread_id).cyan()
        );
    }
    Ok(())
}

// --- Formatting helpers ---

fn print_outcome(outcome: &InvokeOutcome) {
    println!();
    println!(
        "  {} {}",
        style("Thread:").bold(),
        style(&outcome.thread_id).cyan()
    );
    println!(
        "  {} {}",
        style("Status:").bold(),
        format_thread_status(outcome.status)
    );
    println!(
        "  {} {}/{} steps completed",
        style("Steps:").bold(),
        outcome.summary.completed,
        outcome.summary.total
    );
    if outcome.summary.blocked > 0 {
        println!(
            "  {} {} step{} blocked",
            style("Blocked:").bold(),
            outcome.summary.blocked,
            if outcome.summary.blocked == 1 { "" } else { "s" }
        );
    }
    let mut step_ids: Vec<String> = outcome.results.keys().cloned().collect();
    step_ids.sort();
    print_results_table(&step_ids, &outcome.results);
    println!();
}

fn print_thread(thread: &Thread) {
    println!();
    println!(
        "  {} {}",
        style("Thread:").bold(),
        style(&thread.thread_id).cyan()
    );
    println!(
        "  {} {}",
        style("Status:").bold(),
        format_thread_status(thread.status)
    );
    if let Some(reason) = &thread.pause_reason {
        println!("  {} {}", style("Pause reason:").bold(), reason);
    }
    if !thread.blocked_steps.is_empty() {
        println!(
            "  {} {}",
            style("Blocked:").bold(),
            style(thread.blocked_steps.join(", ")).red()
        );
    }
    let mut step_ids: Vec<String> = thread.results.keys().cloned().collect();
    step_ids.sort();
    print_results_table(&step_ids, &thread.results);
    println!();
}

fn print_results_table(
    step_ids: &[String],
    results: &std::collections::HashMap<String, StepResult>,
) {
    if step_ids.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Step").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Output").fg(Color::White),
    ]);

    for step_id in step_ids {
        let Some(result) = results.get(step_id) else {
            continue;
        };
        let status = match result.status {
            StepStatus::Completed => Cell::new("● completed").fg(Color::Green),
            StepStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(step_id).fg(Color::Cyan),
            status,
            Cell::new(truncate_output(&result.output)),
        ]);
    }

    println!();
    println!("{table}");
}

/// Cap table output at 80 characters, counting chars rather than bytes so
/// multibyte agent output never splits mid-codepoint.
fn truncate_output(output: &str) -> String {
    if output.chars().count() > 80 {
        let head: String = output.chars().take(77).collect();
        format!("{head}...")
    } else {
        output.to_string()
    }
}

fn format_thread_status(status: ThreadStatus) -> String {
    match status {
        ThreadStatus::Pending => format!("{}", style("◌ pending").dim()),
        ThreadStatus::Running => format!("{}", style("◐ running").cyan()),
        ThreadStatus::Paused => format!("{}", style("◑ paused").yellow()),
        ThreadStatus::Completed => format!("{}", style("● completed").green()),
        ThreadStatus::Failed => format!("{}", style("✗ failed").red()),
        ThreadStatus::Aborted => format!("{}", style("○ aborted").dim()),
    }
}

fn status_cell(status: ThreadStatus) -> Cell {
    match status {
        ThreadStatus::Pending => Cell::new("pending").fg(Color::DarkGrey),
        ThreadStatus::Running => Cell::new("running").fg(Color::Cyan),
        ThreadStatus::Paused => Cell::new("paused").fg(Color::Yellow),
        ThreadStatus::Completed => Cell::new("completed").fg(Color::Green),
        ThreadStatus::Failed => Cell::new("failed").fg(Color::Red),
        ThreadStatus::Aborted => Cell::new("aborted").fg(Color::DarkGrey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_passes_through() {
        assert_eq!(truncate_output("4"), "4");
    }

    #[test]
    fn long_output_is_capped_with_ellipsis() {
        let long = "x".repeat(200);
        let shown = truncate_output(&long);
        assert_eq!(shown.chars().count(), 80);
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn multibyte_output_truncates_on_char_boundaries() {
        let long = "é".repeat(120);
        let shown = truncate_output(&long);
        assert_eq!(shown, format!("{}...", "é".repeat(77)));
    }
}
