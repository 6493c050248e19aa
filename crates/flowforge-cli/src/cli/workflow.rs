//! CLI workflow subcommands.
//!
//! Provides validate, simulate and run over a workflow definition file. Each
//! command builds the standard executor registry from the loaded
//! configuration; runs use an in-memory execution store.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use flowforge_core::repository::InMemoryExecutionStore;
use flowforge_core::simulation::SimulationEngine;
use flowforge_core::workflow::definition::load_workflow_file;
use flowforge_core::workflow::{ExecutionEngine, WorkflowValidator};
use flowforge_infra::workflow::standard_registry;
use flowforge_types::JsonMap;
use flowforge_types::config::EngineConfig;
use flowforge_types::execution::{ExecutionStatus, StepStatus, WorkflowExecution};
use flowforge_types::simulation::{SimulationResult, SimulationStatus};
use flowforge_types::validation::{Severity, ValidationReport};
use flowforge_types::workflow::WorkflowDefinition;

use super::{Commands, Output};

/// Dispatch a workflow command.
pub async fn handle_command(cmd: Commands, config: &EngineConfig, out: Output) -> Result<()> {
    match cmd {
        Commands::Validate { file } => handle_validate(&file, config, out),
        Commands::Simulate { file, dry_run, vars } => {
            handle_simulate(&file, dry_run, vars.as_deref(), config, out).await
        }
        Commands::Run { file, vars } => handle_run(&file, vars.as_deref(), config, out).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Load a definition, defaulting its id to the file stem.
fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    let mut def = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    if def.id.is_empty() {
        def.id = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow")
            .to_string();
    }
    Ok(def)
}

/// Parse `--vars` into a variable map. Absent means empty.
fn parse_vars(vars: Option<&str>) -> Result<JsonMap> {
    let Some(raw) = vars else {
        return Ok(JsonMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(raw).context("--vars is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("--vars must be a JSON object, got: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

fn handle_validate(file: &Path, config: &EngineConfig, out: Output) -> Result<()> {
    let def = load_definition(file)?;
    let registry = standard_registry(config).context("Failed to build HTTP client")?;
    let report = WorkflowValidator::with_registry(&registry).validate(&def);

    if out.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !out.quiet {
        print_report(&def, &report);
    }

    if !report.is_valid() {
        bail!(
            "workflow '{}' has {} validation error(s)",
            def.name,
            report.errors.len()
        );
    }
    Ok(())
}

fn print_report(def: &WorkflowDefinition, report: &ValidationReport) {
    println!();
    if report.is_valid() {
        println!(
            "  {} Workflow '{}' is valid",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
    } else {
        println!(
            "  {} Workflow '{}' is invalid",
            style("x").red().bold(),
            style(&def.name).cyan()
        );
    }

    let issues = report.issues();
    if issues.is_empty() {
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Severity").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Type"),
            Cell::new("Message"),
        ]);

    for issue in &issues {
        table.add_row(vec![
            format_severity(issue.severity),
            Cell::new(issue.step_id.as_deref().unwrap_or("-")),
            Cell::new(&issue.error_type),
            Cell::new(&issue.message),
        ]);
    }

    println!();
    println!("{table}");
    println!();
}

// ---------------------------------------------------------------------------
// Simulate
// ---------------------------------------------------------------------------

async fn handle_simulate(
    file: &Path,
    dry_run: bool,
    vars: Option<&str>,
    config: &EngineConfig,
    out: Output,
) -> Result<()> {
    let def = load_definition(file)?;
    let variables = parse_vars(vars)?;
    let registry = standard_registry(config).context("Failed to build HTTP client")?;

    let mut sim_config = config.simulation.clone();
    sim_config.dry_run |= dry_run;

    let simulator = SimulationEngine::new(registry);
    let result = simulator.simulate(&def, &sim_config, variables).await;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !out.quiet {
        print_simulation(&result, sim_config.dry_run);
    }

    match result.status {
        SimulationStatus::Completed => Ok(()),
        status => bail!(
            "simulation {}: {}",
            simulation_status_str(status),
            result.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}

fn print_simulation(result: &SimulationResult, dry_run: bool) {
    println!();
    println!(
        "  {} Simulation of '{}' {}{}",
        style("Workflow:").bold(),
        style(&result.workflow_name).cyan(),
        simulation_status_str(result.status),
        if dry_run { " (dry run)" } else { "" }
    );
    if !result.execution_path.is_empty() {
        println!("  Path: {}", result.execution_path.join(" -> "));
    }
    for message in &result.validation_errors {
        println!("  {} {message}", style("!").yellow());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for step in &result.steps {
        table.add_row(vec![
            Cell::new(&step.step_id),
            Cell::new(&step.step_type),
            format_step_status(step.status),
            Cell::new(
                step.duration_ms
                    .map(|ms| format!("{ms} ms"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(step.error.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");

    if let Some(metrics) = &result.performance_metrics {
        println!(
            "  {} executed, {} failed, {} skipped in {} ms",
            metrics.steps_executed, metrics.steps_failed, metrics.steps_skipped, metrics.total_duration_ms
        );
        if metrics.max_steps_reached {
            println!("  {} Stopped at the max_steps limit", style("!").yellow());
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn handle_run(file: &Path, vars: Option<&str>, config: &EngineConfig, out: Output) -> Result<()> {
    let def = load_definition(file)?;
    let variables = parse_vars(vars)?;
    let registry = standard_registry(config).context("Failed to build HTTP client")?;

    let engine = ExecutionEngine::new(InMemoryExecutionStore::new(), registry, config.engine.clone());
    let execution = engine
        .run_to_completion(def.id.clone(), &def, variables)
        .await
        .context("Workflow execution failed")?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else if !out.quiet {
        print_execution(&execution);
    }

    if execution.status != ExecutionStatus::Completed {
        bail!(
            "execution {} {}: {}",
            execution.id,
            execution.status,
            execution.error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

fn print_execution(execution: &WorkflowExecution) {
    println!();
    println!(
        "  {} Run {} of '{}': {}",
        style("Workflow:").bold(),
        style(execution.id.to_string().chars().take(8).collect::<String>()).cyan(),
        execution.workflow_name,
        execution.status
    );

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Time"),
            Cell::new("Error"),
        ]);

    // Authoring order; steps never reached have no result.
    for step in &execution.steps {
        let Some(result) = execution.step_results.get(&step.id) else {
            table.add_row(vec![
                Cell::new(&step.id),
                Cell::new(&step.step_type),
                Cell::new("-"),
                Cell::new(""),
                Cell::new(""),
                Cell::new(""),
            ]);
            continue;
        };
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(&step.step_type),
            format_step_status(result.status),
            Cell::new(result.retry_count),
            Cell::new(format!("{:.2}s", result.execution_time)),
            Cell::new(result.error.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    if let Some(error) = &execution.error {
        println!("  {} {error}", style("Error:").red().bold());
    }
    println!();
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn format_step_status(status: StepStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        StepStatus::Pending => cell.fg(Color::Yellow),
        StepStatus::Running | StepStatus::Retrying => cell.fg(Color::Blue),
        StepStatus::Completed => cell.fg(Color::Green),
        StepStatus::Failed | StepStatus::TimedOut => cell.fg(Color::Red),
        StepStatus::Skipped => cell.fg(Color::DarkYellow),
    }
}

fn format_severity(severity: Severity) -> Cell {
    let cell = Cell::new(severity.to_string());
    match severity {
        Severity::Error => cell.fg(Color::Red),
        Severity::Warning => cell.fg(Color::Yellow),
        Severity::Info => cell.fg(Color::Blue),
    }
}

fn simulation_status_str(status: SimulationStatus) -> &'static str {
    match status {
        SimulationStatus::Running => "running",
        SimulationStatus::Completed => "completed",
        SimulationStatus::Failed => "failed",
        SimulationStatus::Cancelled => "cancelled",
    }
}
