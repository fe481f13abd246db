mod scripted;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oxkair_core::config::AppConfig;
use oxkair_core::event::EventBus;
use oxkair_core::state::WorkflowState;
use oxkair_core::types::{FailurePolicy, StepId, StepOutput};
use oxkair_engine::{Engine, ExecutionPlan, ExecutionReport};

#[derive(Parser)]
#[command(name = "oxkair", version, about = "Dependency-aware parallel agent pipelines")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "oxkair.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the foundation agents and pathways of the configured pipeline
    Plan,
    /// Run the configured pipeline
    Run {
        /// Stop the run on the first fatal foundation error
        #[arg(long)]
        fail_fast: bool,
        /// Deadline for the whole run, overriding the config
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// JSON file with the initial steps (an object of step -> value)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oxkair=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        path = %cli.config.display(),
        agents = config.agents.len(),
        "Config loaded"
    );

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Plan => {
            let registry = scripted::build_registry(&config.agents)?;
            let engine = Engine::new(registry, config.engine.clone());
            print_plan(&engine.plan()?);
        }
        Commands::Run {
            fail_fast,
            timeout_secs,
            input,
            json,
        } => {
            if fail_fast {
                config.engine.failure_policy = FailurePolicy::FailFast;
            }
            if timeout_secs.is_some() {
                config.engine.run_timeout_secs = timeout_secs;
            }
            let initial = match input {
                Some(path) => load_initial_state(&path)?,
                None => WorkflowState::new(),
            };

            let registry = scripted::build_registry(&config.agents)?;
            let engine = Engine::new(registry, config.engine.clone());
            let report = run_with_progress(&engine, initial, !json).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if !report.succeeded {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Run the engine while a background task prints progress events.
async fn run_with_progress(
    engine: &Engine,
    initial: WorkflowState,
    show_progress: bool,
) -> anyhow::Result<ExecutionReport> {
    let bus = Arc::new(EventBus::new(engine.config().progress_capacity));
    let mut rx = bus.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if show_progress {
                        eprintln!("[{:>3}%] {:<10} {}", event.percent, event.phase.to_string(), event.label);
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Progress printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let report = engine
        .run(initial, engine.config().failure_policy, bus.clone())
        .await?;

    // Dropping the last sender closes the channel and ends the printer.
    drop(bus);
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("Progress printer did not finish");
    }
    Ok(report)
}

fn load_initial_state(path: &Path) -> anyhow::Result<WorkflowState> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let steps: BTreeMap<StepId, StepOutput> = serde_json::from_str(&content)
        .with_context(|| format!("{} must be a JSON object of steps", path.display()))?;
    Ok(WorkflowState::from_steps(steps))
}

fn print_plan(plan: &ExecutionPlan) {
    let names = |agents: &[Arc<oxkair_engine::AgentDescriptor>]| {
        agents
            .iter()
            .map(|a| a.id.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    };

    if plan.is_empty() {
        println!("No agents configured.");
        return;
    }
    println!("Foundation: {}", names(&plan.foundation));
    for (index, pathway) in plan.pathways.iter().enumerate() {
        println!("Pathway {}: {}", index, names(pathway));
    }
}

fn print_report(report: &ExecutionReport) {
    let status = match (report.succeeded, report.aborted) {
        (true, _) => "succeeded",
        (false, true) => "aborted",
        (false, false) => "finished with errors",
    };
    println!("Run {} in {}ms", status, report.total_elapsed_ms);

    println!("\nSteps:");
    for (step, value) in report.final_state.steps() {
        println!("  {}: {}", step, value);
    }

    if !report.agent_timings.is_empty() {
        println!("\nAgents:");
        for timing in &report.agent_timings {
            let location = match timing.pathway {
                Some(index) => format!("pathway {}", index),
                None => timing.phase.to_string(),
            };
            println!(
                "  {:<20} {:<12} {:>6}ms  {:?}",
                timing.agent_id.as_str(), location, timing.elapsed_ms, timing.outcome
            );
        }
    }

    if !report.errors.is_empty() {
        println!("\nErrors:");
        for error in &report.errors {
            println!(
                "  [{:?}] {} ({}): {}",
                error.severity, error.agent_id, error.step, error.message
            );
        }
    }
}
