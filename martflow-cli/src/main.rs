//! Martflow CLI: run the sales pipeline or individual steps.
//!
//! Commands:
//! - `run`: execute the whole pipeline, or resume it from a named step
//! - `step`: execute one named step, passing run context through a JSON file
//! - `graph`: print the step graph with trigger rules

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use martflow_runner::{
    run_pipeline, EtlSteps, Executor, PipelineConfig, PipelineGraph, RetryPolicy, RunContext,
    RunOptions, RunReport, StepId, StepOutcome, StepState, TriggerRule,
};

#[derive(Parser)]
#[command(
    name = "martflow",
    about = "Martflow: retail sales ETL (raw → core → mart)"
)]
struct Cli {
    /// Debug-level logging (overrides RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the pipeline from `start`, or resume from a named step.
    Run {
        /// Path to the pipeline TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Resume from this step; its ancestors are treated as done.
        #[arg(long)]
        from: Option<StepId>,

        /// Category to seed the run context with (used when resuming past the pick).
        #[arg(long)]
        category: Option<String>,

        /// Seed for the category pick.
        #[arg(long)]
        seed: Option<u64>,

        /// Fail on the first error instead of applying the configured retries.
        #[arg(long, default_value_t = false)]
        no_retry: bool,

        /// JSON file the run context is loaded from (when present) and saved back to.
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Execute a single named step.
    Step {
        /// Step name, e.g. `load-raw` (see `martflow graph`).
        name: StepId,

        /// Path to the pipeline TOML config.
        #[arg(long)]
        config: PathBuf,

        /// JSON file the run context is loaded from and saved back to.
        #[arg(long)]
        context: Option<PathBuf>,

        /// Override the category in the run context.
        #[arg(long)]
        category: Option<String>,

        /// Seed for the category pick.
        #[arg(long)]
        seed: Option<u64>,

        /// Fail on the first error instead of applying the configured retries.
        #[arg(long, default_value_t = false)]
        no_retry: bool,
    },
    /// Print the step graph.
    Graph,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            from,
            category,
            seed,
            no_retry,
            context,
        } => run_cmd(&config, from, category, seed, no_retry, context.as_deref()),
        Commands::Step {
            name,
            config,
            context,
            category,
            seed,
            no_retry,
        } => step_cmd(name, &config, context.as_deref(), category, seed, no_retry),
        Commands::Graph => {
            print_graph(&PipelineGraph::standard());
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// A missing context file starts from an empty context.
fn load_context(path: Option<&Path>) -> Result<RunContext> {
    match path {
        Some(path) => RunContext::load(path)
            .with_context(|| format!("loading run context {}", path.display())),
        None => Ok(RunContext::default()),
    }
}

fn retry_policy(config: &PipelineConfig, no_retry: bool) -> RetryPolicy {
    if no_retry {
        RetryPolicy::none()
    } else {
        config.retry.into()
    }
}

fn run_cmd(
    config_path: &Path,
    from: Option<StepId>,
    category: Option<String>,
    seed: Option<u64>,
    no_retry: bool,
    context_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    if category.is_some() && from.is_none() {
        warn!("--category has no effect on a full run; pick-random-category chooses anew");
    }

    let mut ctx = load_context(context_path)?;
    if let Some(category) = category {
        ctx.category = Some(category);
    }
    let options = RunOptions {
        from,
        retry: retry_policy(&config, no_retry),
    };
    let mut steps = EtlSteps::from_config(config.clone(), seed)?;

    let report = run_pipeline(&config, &mut steps, &mut ctx, &options)?;

    if let Some(path) = context_path {
        ctx.save(path)?;
    }
    print_summary(&report, &config.runs_dir());

    if !report.outcome.is_completed() {
        std::process::exit(1);
    }
    Ok(())
}

fn step_cmd(
    step: StepId,
    config_path: &Path,
    context_path: Option<&Path>,
    category: Option<String>,
    seed: Option<u64>,
    no_retry: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut ctx = load_context(context_path)?;
    if let Some(category) = category {
        ctx.category = Some(category);
    }

    let executor = Executor::new(PipelineGraph::standard(), retry_policy(&config, no_retry));
    let mut steps = EtlSteps::from_config(config, seed)?;
    let (record, result) = executor.execute_one(&mut steps, step, &mut ctx);

    match result {
        Ok(outcome) => {
            if let Some(path) = context_path {
                ctx.save(path)?;
            }
            match outcome {
                StepOutcome::Done => {
                    println!("{step}: succeeded ({} attempt(s))", record.attempts)
                }
                StepOutcome::Branch(next) => println!(
                    "{step}: succeeded ({} attempt(s)), next: {next}",
                    record.attempts
                ),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!(
                "{step}: failed after {} attempt(s) [{}]: {e}",
                record.attempts,
                e.kind()
            );
            std::process::exit(1);
        }
    }
}

fn print_graph(graph: &PipelineGraph) {
    println!("{:<22} {:<12} UPSTREAM", "STEP", "TRIGGER");
    for node in graph.nodes() {
        let upstream: Vec<&str> = node.upstream.iter().map(|s| s.as_str()).collect();
        let trigger = match node.trigger {
            TriggerRule::AllSuccess => "all_success",
            TriggerRule::OneSuccess => "one_success",
        };
        println!(
            "{:<22} {:<12} {}",
            node.id.as_str(),
            trigger,
            if upstream.is_empty() {
                "-".to_string()
            } else {
                upstream.join(", ")
            }
        );
    }
}

fn print_summary(report: &RunReport, runs_dir: &Path) {
    println!();
    println!("=== Pipeline Run ===");
    println!("Run ID:         {}", report.run_id);
    if let Some(from) = report.resumed_from {
        println!("Resumed from:   {from}");
    }
    let fingerprint = report
        .config_fingerprint
        .get(..12)
        .unwrap_or(report.config_fingerprint.as_str());
    println!("Config:         {fingerprint}");
    println!(
        "Duration:       {:.1}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
    if let Some(rows) = report.source_rows {
        println!("Source rows:    {rows}");
    }
    if let Some(category) = &report.category {
        println!("Category:       {category}");
    }
    println!();
    println!("--- Steps ---");
    for rec in &report.steps {
        let attempts = if rec.attempts > 1 {
            format!(" ({} attempts)", rec.attempts)
        } else {
            String::new()
        };
        println!("{:<22} {}{attempts}", rec.step.as_str(), rec.state);
        if let Some(err) = &rec.error {
            println!("{:<22}   {err}", "");
        }
    }
    println!();
    println!(
        "Succeeded: {}  Skipped: {}  Reused: {}  Not run: {}",
        report.count(StepState::Succeeded),
        report.count(StepState::Skipped),
        report.count(StepState::Reused),
        report.count(StepState::NotRun)
    );
    match report.failed_step() {
        None => println!("Outcome:        completed"),
        Some(rec) => println!("Outcome:        aborted at {}", rec.step),
    }
    println!(
        "Report saved to: {}",
        runs_dir.join(format!("{}.json", report.run_id)).display()
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_context_file_carries_the_category_into_a_resumed_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.json");
        RunContext::with_category("Office Supplies")
            .save(&path)
            .unwrap();

        let ctx = load_context(Some(&path)).unwrap();
        assert_eq!(ctx.category.as_deref(), Some("Office Supplies"));
    }

    #[test]
    fn absent_context_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = load_context(Some(&dir.path().join("missing.json"))).unwrap();
        assert_eq!(ctx.category, None);
        assert_eq!(load_context(None).unwrap().category, None);
    }

    #[test]
    fn corrupt_context_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_context(Some(&path)).is_err());
    }
}
