//! agentflow CLI
//!
//! Run workflow files against in-process agents, validate workflow graphs, and
//! list the workflows in a directory.
//!
//! Usage:
//!   agentflow run <FILE> [--var key=value]... [--agent ID] [--config FILE]
//!   agentflow validate <PATH>
//!   agentflow list <DIR>
//!
//! Exit codes: 0 when the execution completed, 1 when it ended any other way
//! (or a graph is invalid), 2 on errors such as unreadable files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use agentflow::store::DocumentStore;
use agentflow::workflow::{coerce_value, Execution, LogLevel};
use agentflow::{
    Engine, EngineConfig, ExecutionStatus, LocalAgentConfig, LocalAgentPool, MemoryStore,
    Workflow, WorkflowGraph, WorkflowLoader,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Run node-graph workflows against script agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single workflow file
    Run {
        /// Path to the workflow YAML or JSON file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Initial user variable, as key=value (repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Default agent for script nodes without an assigned agent
        #[arg(short, long)]
        agent: Option<String>,

        /// Path to an engine config file (default: agentflow.yaml next to FILE, if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up waiting after this many seconds
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Validate workflow graphs without running them
    Validate {
        /// Path to workflow file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// List workflows in a directory
    List {
        /// Path to the workflows directory
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "agentflow=debug"
    } else {
        "agentflow=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "agentflow failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run {
            file,
            vars,
            agent,
            config,
            timeout,
        } => run_single(file, vars, agent, config, timeout, cli.verbose).await,
        Commands::Validate { path } => validate(path),
        Commands::List { dir } => list_workflows(dir),
    }
}

async fn run_single(
    file: PathBuf,
    vars: Vec<String>,
    agent: Option<String>,
    config: Option<PathBuf>,
    timeout: Option<u64>,
    verbose: bool,
) -> anyhow::Result<bool> {
    if !file.exists() {
        anyhow::bail!("Workflow file not found: {}", file.display());
    }

    let workflow = WorkflowLoader::load_file(&file)?;
    let config = load_config(&file, config)?;
    let initial_variables = parse_vars(&vars)?;

    let mut agents = config.agents.clone();
    if agents.is_empty() {
        agents.push(LocalAgentConfig::new("local"));
    }
    let (pool, results) = LocalAgentPool::new(agents);
    let pool = Arc::new(pool);

    let store = Arc::new(MemoryStore::new());
    store.save_workflow(&workflow).await?;

    let engine = Engine::new(store, pool.clone(), pool, config);
    let pump = engine.clone();
    tokio::spawn(async move { pump.pump_results(results).await });

    tracing::info!("Running workflow: {}", workflow.display_name());
    let started = engine
        .start_execution(&workflow.id, "cli", agent, initial_variables)
        .await?;

    let execution = match timeout {
        Some(secs) => {
            match engine
                .wait_for_timeout(&started.id, Duration::from_secs(secs))
                .await
            {
                Ok(execution) => execution,
                Err(e) => {
                    tracing::warn!(error = %e, "Cancelling execution");
                    engine.cancel_execution(&started.id).await?
                }
            }
        }
        None => engine.wait_for(&started.id).await?,
    };

    print_execution(&workflow, &execution, verbose);
    Ok(execution.status == ExecutionStatus::Completed)
}

/// `--config` wins; otherwise an `agentflow.yaml` beside the workflow file
fn load_config(file: &Path, explicit: Option<PathBuf>) -> anyhow::Result<EngineConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(EngineConfig::load(&path)?);
    }

    let beside = file
        .parent()
        .map(|dir| dir.join("agentflow.yaml"))
        .filter(|p| p.exists());
    match beside {
        Some(path) => {
            tracing::debug!("Using config: {}", path.display());
            Ok(EngineConfig::load(&path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn parse_vars(vars: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    vars.iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got '{}'", pair))?;
            let key = key.trim();
            if key.is_empty() {
                anyhow::bail!("Empty variable name in '{}'", pair);
            }
            Ok((key.to_string(), coerce_value(value)))
        })
        .collect()
}

fn validate(path: PathBuf) -> anyhow::Result<bool> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    let workflows = if path.is_dir() {
        WorkflowLoader::load_directory(&path)?
    } else {
        vec![WorkflowLoader::load_file(&path)?]
    };

    if workflows.is_empty() {
        println!("No workflows found in: {}", path.display());
        return Ok(true);
    }

    let mut all_valid = true;
    for workflow in &workflows {
        match WorkflowGraph::build(workflow) {
            Ok(graph) => {
                println!(
                    "✓ {} is valid ({} nodes, {} levels)",
                    workflow.display_name(),
                    graph.len(),
                    graph.execution_levels().len()
                );
                for (i, level) in graph.execution_levels().iter().enumerate() {
                    println!("  Level {}: [{}]", i, level.join(", "));
                }
            }
            Err(e) => {
                all_valid = false;
                println!("✗ {}: {}", workflow.display_name(), e);
            }
        }
    }

    Ok(all_valid)
}

fn list_workflows(dir: PathBuf) -> anyhow::Result<bool> {
    if !dir.exists() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let workflows = WorkflowLoader::load_directory(&dir)?;

    if workflows.is_empty() {
        println!("No workflows found in: {}", dir.display());
        return Ok(true);
    }

    println!("Workflows in {}:\n", dir.display());
    for w in &workflows {
        match &w.name {
            Some(name) => println!(
                "  {} - {} ({} nodes, {} edges)",
                w.id,
                name,
                w.nodes.len(),
                w.edges.len()
            ),
            None => println!("  {} ({} nodes, {} edges)", w.id, w.nodes.len(), w.edges.len()),
        }
    }

    Ok(true)
}

fn print_execution(workflow: &Workflow, execution: &Execution, verbose: bool) {
    println!("\n=== Execution Result ===\n");
    println!("Workflow: {}", workflow.display_name());
    println!("Execution ID: {}", execution.id);
    println!("Status: {}\n", execution.status);

    for entry in execution.logs.entries() {
        if entry.level == LogLevel::Debug && !verbose {
            continue;
        }
        let marker = match entry.level {
            LogLevel::Error => "✗",
            LogLevel::Warn => "!",
            _ => " ",
        };
        match &entry.node_id {
            Some(node_id) => println!("{} [{}] {}", marker, node_id, entry.message),
            None => println!("{} {}", marker, entry.message),
        }
    }

    if let Some(error) = &execution.error {
        match &error.node_id {
            Some(node_id) => println!("\nError in {}: {}", node_id, error.message),
            None => println!("\nError: {}", error.message),
        }
    }

    if verbose {
        if let Some(user) = execution.variables.category("user") {
            println!("\nVariables:");
            for (name, value) in user {
                println!("  {} = {}", name, value);
            }
        }
    }
}
