//! CLI workflow subcommands: run, validate, list.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use tokio::sync::broadcast::{self, error::RecvError};

use autoflow_core::workflow::definition::{discover_workflows, load_workflow_file};
use autoflow_core::workflow::executor::{ExecuteOptions, WorkflowExecutor};
use autoflow_types::event::EngineEvent;
use autoflow_types::execution::{ExecutionResult, RunState};
use autoflow_types::value::Value;

use crate::state::AppState;

/// Widest result text shown in the summary table.
const MAX_CELL_WIDTH: usize = 60;

/// Split a `KEY=VALUE` argument.
///
/// VALUE is read as JSON when it parses (`3`, `true`, `[1,2]`, `"x"`),
/// otherwise it is kept as plain text.
pub fn parse_var(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("invalid --var '{raw}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("invalid --var '{raw}': key is empty");
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}

/// Run a workflow file to completion, printing progress as it goes.
pub async fn run_workflow(
    state: &AppState,
    file: &Path,
    vars: &[String],
    target: Option<String>,
    workflows: Option<&Path>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let definition = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;

    let mut options = ExecuteOptions::new();
    for raw in vars {
        let (key, value) = parse_var(raw)?;
        options = options.with_variable(key, value);
    }
    if let Some(target) = target {
        options = options.with_target(target);
    }

    let engine = Arc::new(state.build_engine());

    if let Some(dir) = workflows {
        let found = discover_workflows(dir)
            .with_context(|| format!("Failed to scan {}", dir.display()))?;
        for (path, def) in found {
            let id = engine
                .create_workflow(def)
                .with_context(|| format!("Failed to register {}", path.display()))?;
            tracing::debug!(workflow_id = %id, path = %path.display(), "registered workflow");
        }
    }

    let workflow_id = engine
        .create_workflow(definition)
        .context("Failed to register workflow")?;

    let printer = (!json && !quiet).then(|| tokio::spawn(print_progress(engine.subscribe())));

    let mut run = tokio::spawn({
        let engine = Arc::clone(&engine);
        let workflow_id = workflow_id.clone();
        async move { engine.execute(&workflow_id, options).await }
    });

    let outcome = tokio::select! {
        joined = &mut run => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(workflow_id = %workflow_id, "interrupt received, cancelling run");
            engine.cancel()?;
            run.await
        }
    }
    .context("Workflow task panicked")?;

    if let Some(printer) = printer {
        // The printer exits on the terminal event; don't hang if it was lost.
        let _ = tokio::time::timeout(Duration::from_millis(500), printer).await;
    }

    match outcome {
        Ok(result) => report(&result, json, quiet),
        Err(err) => match err.execution() {
            Some(result) => {
                report(result, json, quiet)?;
                bail!("Workflow '{workflow_id}' {}: {err}", result.state);
            }
            None => Err(err).with_context(|| format!("Failed to run workflow '{workflow_id}'")),
        },
    }
}

/// Parse and validate a workflow file without running it.
pub fn validate_workflow(file: &Path, json: bool) -> Result<()> {
    let def = load_workflow_file(file)
        .with_context(|| format!("Invalid workflow {}", file.display()))?;

    if json {
        let summary = serde_json::json!({
            "valid": true,
            "file": file.display().to_string(),
            "id": def.id,
            "name": def.name,
            "version": def.version,
            "steps": def.steps.len(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "  {} Workflow '{}' is valid ({} steps)",
            style("*").green().bold(),
            style(&def.name).cyan(),
            def.steps.len()
        );
    }
    Ok(())
}

/// Table every workflow discoverable under `dir`.
pub fn list_workflows(state: &AppState, dir: Option<PathBuf>, json: bool) -> Result<()> {
    let dir = dir.unwrap_or_else(|| state.workflows_dir());
    let found = discover_workflows(&dir)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;

    if json {
        let items: Vec<serde_json::Value> = found
            .iter()
            .map(|(path, def)| {
                serde_json::json!({
                    "file": path.display().to_string(),
                    "id": def.id,
                    "name": def.name,
                    "version": def.version,
                    "steps": def.steps.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if found.is_empty() {
        println!();
        println!("  No workflows found in {}.", dir.display());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version").fg(Color::Cyan),
            Cell::new("Steps").fg(Color::Cyan),
            Cell::new("File").fg(Color::Cyan),
        ]);

    for (path, def) in &found {
        let rel = path.strip_prefix(&dir).unwrap_or(path);
        table.add_row(vec![
            Cell::new(if def.id.is_empty() { "-" } else { def.id.as_str() }),
            Cell::new(&def.name),
            Cell::new(&def.version),
            Cell::new(def.steps.len()),
            Cell::new(rel.display()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

async fn print_progress(mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = progress_line(&event) {
                    println!("{line}");
                }
                if matches!(
                    event,
                    EngineEvent::Completed { .. }
                        | EngineEvent::Failed { .. }
                        | EngineEvent::Cancelled { .. }
                ) {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "progress output fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// One styled progress line per event. Run-level outcomes are left to the
/// summary and return `None`.
fn progress_line(event: &EngineEvent) -> Option<String> {
    let line = match event {
        EngineEvent::Started {
            workflow_id,
            total_steps,
            ..
        } => format!(
            "  {} Running '{}' ({total_steps} steps)",
            style(">").cyan().bold(),
            style(workflow_id).cyan()
        ),
        EngineEvent::StepStarted {
            path, name, kind, ..
        } => format!(
            "{}{} {name} {}",
            indent(path),
            style("-").dim(),
            style(format!("[{kind}]")).dim()
        ),
        EngineEvent::StepCompleted {
            path,
            name,
            duration_ms,
            ..
        } => format!(
            "{}{} {name} {}",
            indent(path),
            style("ok").green(),
            style(format!("({duration_ms} ms)")).dim()
        ),
        EngineEvent::StepFailed {
            path, name, error, ..
        } => format!("{}{} {name}: {error}", indent(path), style("failed").red()),
        EngineEvent::Retrying {
            path,
            attempt,
            max_retries,
            delay_ms,
            error,
            ..
        } => format!(
            "{}{} retry {attempt}/{max_retries} in {delay_ms} ms: {error}",
            indent(path),
            style("~").yellow()
        ),
        EngineEvent::ScriptLog {
            path,
            level,
            message,
            ..
        } => format!(
            "{}{} {message}",
            indent(path),
            style(format!("[{}]", level.as_str())).dim()
        ),
        EngineEvent::Paused { step_index, .. } => {
            format!("  {} Paused before step {step_index}", style("||").yellow())
        }
        EngineEvent::Resumed { step_index, .. } => {
            format!("  {} Resumed at step {step_index}", style(">").cyan())
        }
        EngineEvent::Cancelled { .. } | EngineEvent::Completed { .. } | EngineEvent::Failed { .. } => {
            return None;
        }
    };
    Some(line)
}

/// Two spaces per index segment of a step path.
///
/// A top-level step (`"0"`) gets one level; each nested list adds one more,
/// and loop iterations and parallel branches add their own index level.
fn indent(path: &str) -> String {
    let depth = path.split('/').filter(|s| s.parse::<usize>().is_ok()).count();
    "  ".repeat(depth.max(1))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

fn report(result: &ExecutionResult, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Result").fg(Color::Cyan),
        ]);

    for step in &result.results {
        let (status, detail) = if step.success {
            (
                Cell::new("ok").fg(Color::Green),
                step.result.as_ref().map(Value::to_string).unwrap_or_default(),
            )
        } else {
            (
                Cell::new("failed").fg(Color::Red),
                step.error.clone().unwrap_or_default(),
            )
        };
        table.add_row(vec![
            Cell::new(step.index),
            Cell::new(&step.name),
            status,
            Cell::new(truncate(&detail, MAX_CELL_WIDTH)),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    match result.state {
        RunState::Completed => println!(
            "  {} Workflow '{}' completed in {} ms",
            style("*").green().bold(),
            style(&result.workflow_id).cyan(),
            result.duration_ms
        ),
        RunState::Cancelled => println!(
            "  {} Workflow '{}' cancelled after {} ms",
            style("!").yellow().bold(),
            style(&result.workflow_id).cyan(),
            result.duration_ms
        ),
        _ => println!(
            "  {} Workflow '{}' failed at step {}: {}",
            style("x").red().bold(),
            style(&result.workflow_id).cyan(),
            result
                .failed_step
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string()),
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }

    let user_vars: Vec<_> = result
        .environment
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .collect();
    if !user_vars.is_empty() {
        println!();
        for (key, value) in user_vars {
            println!(
                "    {} = {}",
                style(key).bold(),
                truncate(&value.to_string(), MAX_CELL_WIDTH)
            );
        }
    }
    println!();
    Ok(())
}
