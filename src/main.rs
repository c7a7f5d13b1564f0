//! PhaseKeeper CLI Entry Point
//!
//! Loads a workflow definition, shows its execution plan and optionally
//! runs it end to end with the dry-run executor.
//!
//! # Usage
//!
//! ```bash
//! # Show the plan
//! phasekeeper workflow.yaml
//!
//! # Override the optimization strategy and parallelism
//! phasekeeper workflow.yaml --strategy resource_optimal --parallel 2
//!
//! # Run every node through the dry-run executor
//! phasekeeper workflow.yaml --simulate
//!
//! # Use an orchestrator config file
//! phasekeeper workflow.yaml --simulate --config phasekeeper.yaml
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info};

use phasekeeper::execution::{DryRunExecutor, Orchestrator};
use phasekeeper::workflow::state::{ExecutionStatus, ExecutionSummary};
use phasekeeper::workflow::{
    load_definition, ExecutionPlan, ExecutionPlanner, OptimizationStrategy,
};
use phasekeeper::{OrchestratorConfig, APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_WORKFLOW: &str = "workflow.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workflow_path: String,
    strategy: Option<OptimizationStrategy>,
    max_parallel: Option<usize>,
    simulate: bool,
    config_path: Option<PathBuf>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: DEFAULT_WORKFLOW.to_string(),
            strategy: None,
            max_parallel: None,
            simulate: false,
            config_path: None,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Phase-Parallel Workflow Orchestration");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: phasekeeper [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to a workflow YAML or JSON file");
    println!();
    println!("Options:");
    println!("  --strategy NAME     Optimization strategy (time_optimal, resource_optimal,");
    println!("                      cost_optimal, reliability_optimal, balanced)");
    println!("  --parallel N        Maximum nodes per phase");
    println!("  --simulate          Run the workflow with the dry-run executor");
    println!("  --config PATH       Orchestrator configuration file (YAML)");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  phasekeeper nightly.yaml");
    println!("  phasekeeper nightly.yaml --strategy resource_optimal --parallel 2");
    println!("  phasekeeper nightly.json --simulate --verbose");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--simulate" => {
                config.simulate = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--strategy" => {
                i += 1;
                if i >= args.len() {
                    return Err("--strategy requires a name argument".to_string());
                }
                config.strategy = Some(args[i].parse()?);
            }
            "--parallel" => {
                i += 1;
                if i >= args.len() {
                    return Err("--parallel requires a number argument".to_string());
                }
                let parallel: usize = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid parallel value: {}", args[i]))?;
                if parallel == 0 {
                    return Err("--parallel must be at least 1".to_string());
                }
                config.max_parallel = Some(parallel);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a path argument".to_string());
                }
                config.config_path = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.workflow_path = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

fn print_plan(title: &str, plan: &ExecutionPlan) {
    println!("{} ({} phases):", title.bold(), plan.len());
    for (index, phase) in plan.phases.iter().enumerate() {
        println!("  Phase {:>2}: {}", index + 1, phase.join(", "));
    }
    println!();
}

fn print_summary(summary: &ExecutionSummary) {
    let status = match summary.status {
        ExecutionStatus::Completed => summary.status.to_string().green(),
        ExecutionStatus::Cancelled => summary.status.to_string().yellow(),
        _ => summary.status.to_string().red(),
    };

    println!();
    println!("Workflow '{}' {}", summary.name, status.bold());
    println!(
        "  Nodes: {} completed, {} failed, {} skipped, {} cancelled (of {})",
        summary.completed_nodes,
        summary.failed_nodes,
        summary.skipped_nodes,
        summary.cancelled_nodes,
        summary.total_nodes
    );
    println!("  Success rate: {:.0}%", summary.success_rate * 100.0);
    if let Some(ms) = summary.duration_ms {
        println!("  Duration: {} ms", ms);
    }
    if let Some(failures) = &summary.failure_summary {
        println!("  {}", failures.red());
    }

    if !summary.node_durations_ms.is_empty() {
        println!();
        println!("Node durations:");
        for (node_id, ms) in &summary.node_durations_ms {
            println!("  {:20} {:>6} ms", node_id, ms);
        }
    }
    println!();
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let orchestrator_config = match &config.config_path {
        Some(path) => OrchestratorConfig::from_yaml_file(path)?,
        None => OrchestratorConfig::default(),
    };

    let mut definition = load_definition(&config.workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!(
            "Could not load workflow from '{}': {}",
            config.workflow_path, e
        )
    })?;

    if let Some(strategy) = config.strategy {
        definition.optimization_strategy = strategy;
    }
    if let Some(parallel) = config.max_parallel {
        definition.max_parallel_tasks = parallel;
    }
    let strategy = definition.optimization_strategy;

    info!(
        "Workflow '{}': {} nodes, strategy {}, error handling {}, max {} parallel",
        definition.name,
        definition.len(),
        strategy,
        definition.error_handling_strategy,
        definition.max_parallel_tasks
    );
    println!();

    {
        let planner = ExecutionPlanner::new(&definition)?;
        let base = planner.plan()?;
        print_plan("Execution plan", &base);

        if strategy != OptimizationStrategy::Balanced {
            let optimized = planner.optimize(base, strategy)?;
            print_plan(&format!("Optimized plan ({})", strategy), &optimized);
        }
    }

    if !config.simulate {
        info!("Plan only. Use --simulate to run it with the dry-run executor.");
        return Ok(());
    }

    info!("Mode: SIMULATE (dry-run executor for every action)");
    let orchestrator = Orchestrator::new(orchestrator_config);
    for action in definition.actions() {
        orchestrator.register_executor(action, Arc::new(DryRunExecutor));
    }
    let watchdog = orchestrator.spawn_watchdog();

    let name = definition.name.clone();
    let description = definition.description.clone();
    let id = orchestrator.create_workflow(name, description, definition, strategy)?;
    let summary = orchestrator.execute_workflow(&id)?.wait().await?;

    orchestrator.shutdown();
    watchdog.await?;

    print_summary(&summary);

    if summary.status != ExecutionStatus::Completed {
        return Err(format!("Workflow finished with status {}", summary.status).into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
