use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conduit_core::config::{AppConfig, ModelConfig};
use conduit_core::error::ConduitError;
use conduit_core::event::{EventBus, RunEvent};
use conduit_core::types::{NodeStatus, RunResult};
use conduit_core::workflow::WorkflowDefinition;
use conduit_engine::{Adapters, Engine, RunOptions};
use conduit_retrieval::{HttpRetrieval, TavilySearch};

#[derive(Parser)]
#[command(name = "conduit", version, about = "Run retrieval-augmented workflow graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conduit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow against a query
    Run {
        /// Workflow definition (JSON)
        #[arg(short, long)]
        workflow: PathBuf,
        /// Run-wide deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,
        /// The question to answer
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },
    /// Check a workflow definition without running it
    Validate {
        #[arg(short, long)]
        workflow: PathBuf,
    },
    /// Show the execution levels of a workflow
    Plan {
        #[arg(short, long)]
        workflow: PathBuf,
    },
    /// List available node kinds and their config defaults
    Components,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conduit=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that need no config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "conduit", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Components => {
            for info in conduit_engine::catalog() {
                println!("{:<20} {}", info.kind.as_str(), info.description);
                println!("{:<20} defaults: {}", "", info.defaults);
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { workflow } => {
            let definition = WorkflowDefinition::load(&workflow)?;
            match conduit_engine::validate(&definition) {
                Ok(graph) => println!(
                    "{}: valid ({} nodes, entry '{}', output '{}')",
                    workflow.display(),
                    graph.model.nodes.len(),
                    graph.entry,
                    graph.terminal
                ),
                Err(e) => {
                    eprintln!("{}: invalid", workflow.display());
                    for issue in &e.issues {
                        eprintln!("  - {}", issue);
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Plan { workflow } => {
            let definition = WorkflowDefinition::load(&workflow)?;
            let graph = conduit_engine::validate(&definition).map_err(ConduitError::from)?;
            let plan = conduit_engine::plan(&graph)?;
            for (level, ids) in plan.levels.iter().enumerate() {
                let nodes: Vec<String> = ids
                    .iter()
                    .filter_map(|id| plan.node(id))
                    .map(|n| format!("{} ({})", n.id, n.kind))
                    .collect();
                println!("level {}: {}", level, nodes.join(", "));
            }
            println!("max width: {}", plan.max_width());
        }
        Commands::Run {
            workflow,
            deadline_ms,
            json,
            query,
        } => {
            let definition = WorkflowDefinition::load(&workflow)?;
            let result = run_workflow(&config, &definition, &query.join(" "), deadline_ms).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            if !result.succeeded() {
                std::process::exit(1);
            }
        }
        Commands::Completions { .. } | Commands::Components => {
            unreachable!("handled before config load")
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = dirs_home().map(|h| h.join(".conduit").join("config.toml"));
    if let Some(ref path) = home_config {
        if path.exists() {
            info!(path = %path.display(), "Loading config from home directory");
            return Ok(AppConfig::load(path)?);
        }
    }

    warn!("No config file found, using defaults and environment");
    Ok(create_env_config())
}

fn create_env_config() -> AppConfig {
    let model = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => ModelConfig {
            api_key: Some(key),
            ..ModelConfig::default()
        },
        // Default to Ollama (local)
        Err(_) => ModelConfig {
            provider: "ollama".to_string(),
            model_id: "llama3.2".to_string(),
            ..ModelConfig::default()
        },
    };
    AppConfig {
        model,
        ..AppConfig::default()
    }
}

fn build_adapters(config: &AppConfig) -> anyhow::Result<Adapters> {
    let mut adapters = Adapters::new(conduit_llm::create_provider(&config.model)?);
    if let Some(ref retrieval) = config.retrieval {
        adapters = adapters.with_retrieval(Arc::new(HttpRetrieval::new(retrieval)));
    }
    if let Some(ref web) = config.web_search {
        adapters = adapters.with_web_search(Arc::new(TavilySearch::new(web)));
    }
    Ok(adapters)
}

async fn run_workflow(
    config: &AppConfig,
    definition: &WorkflowDefinition,
    query: &str,
    deadline_ms: Option<u64>,
) -> anyhow::Result<RunResult> {
    let event_bus = Arc::new(EventBus::default());
    let engine = Engine::new(build_adapters(config)?, config.engine.clone()).with_events(event_bus.clone());

    // Spawn progress printer
    let rx = event_bus.subscribe();
    let print_handle = tokio::spawn(print_progress(rx, |line| eprintln!("{}", line)));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let options = RunOptions {
        deadline: deadline_ms.map(Duration::from_millis),
        cancel: Some(cancel),
    };
    let result = engine.submit_with_options(definition, query, options).await;
    // Close the bus so the printer exits even if the run never started.
    drop(engine);
    drop(event_bus);
    print_handle.await.ok();
    Ok(result?)
}

fn progress_line(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::NodeStarted { node_id, .. } => Some(format!("[{}] running", node_id)),
        RunEvent::NodeFinished {
            node_id,
            status,
            duration_ms,
            ..
        } => Some(format!("[{}] {} in {}ms", node_id, status, duration_ms)),
        RunEvent::NodeSkipped { node_id, status, .. } => Some(format!("[{}] {}", node_id, status)),
        RunEvent::RunStarted { .. } | RunEvent::RunFinished { .. } => None,
    }
}

/// Print run progress until the run finishes or the bus closes.
async fn print_progress(mut rx: broadcast::Receiver<RunEvent>, mut emit: impl FnMut(String)) {
    loop {
        match rx.recv().await {
            Ok(RunEvent::RunFinished { .. }) => break,
            Ok(event) => {
                if let Some(line) = progress_line(&event) {
                    emit(line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Progress output fell behind, some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_result(result: &RunResult) {
    if let Some(ref artifact) = result.final_artifact {
        match artifact.as_text() {
            Some(text) => println!("{}", text),
            None => println!(
                "{}",
                serde_json::to_string_pretty(&artifact.payload).unwrap_or_default()
            ),
        }
    }

    eprintln!();
    eprintln!("run {} {} in {}ms", result.run_id, result.status, result.elapsed_ms);
    for trace in &result.node_traces {
        let marker = match trace.status {
            NodeStatus::Succeeded => "ok",
            NodeStatus::Failed => "FAILED",
            _ => "--",
        };
        eprintln!(
            "  L{} {:<6} {:<16} {:<20} {:>6}ms attempts={}{}",
            trace.level,
            marker,
            trace.node_id,
            trace.kind.as_str(),
            trace.duration_ms,
            trace.attempts,
            trace
                .error
                .as_deref()
                .map(|e| format!("  {}", truncate(e, 200)))
                .unwrap_or_default()
        );
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
