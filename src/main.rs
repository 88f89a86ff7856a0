use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use braid_config::WorkflowDef;
use braid_engine::{Engine, EngineConfig};
use braid_store::{ExecutionState, ExecutionStatus, SqliteStore, StateStore};

/// Braid - a DAG workflow engine
#[derive(Parser)]
#[command(name = "braid")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the state database (default: ~/.braid/state.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Engine configuration file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Override the maximum number of steps running at once
  #[arg(long, global = true)]
  max_parallel: Option<usize>,

  /// Emit logs as JSON lines
  #[arg(long, global = true)]
  log_json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow until it completes, fails, or pauses for input
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Supply input to a paused execution and continue it
  Resume {
    /// Path to the workflow file the execution was started from
    workflow_file: PathBuf,

    execution_id: String,

    /// Input object as JSON; read from stdin when omitted
    #[arg(long)]
    inputs: Option<String>,
  },

  /// Continue an execution interrupted by a crash
  Recover {
    workflow_file: PathBuf,
    execution_id: String,
  },

  /// Cancel a paused or orphaned execution
  Cancel { execution_id: String },

  /// Print the stored state of an execution
  Status { execution_id: String },

  /// List executions of a workflow
  List { workflow_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.log_json);

  let db = match cli.db {
    Some(db) => db,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".braid")
      .join("state.db"),
  };
  if let Some(parent) = db.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = Arc::new(
    SqliteStore::open(&db)
      .await
      .with_context(|| format!("failed to open state database: {}", db.display()))?,
  );

  let mut config = match &cli.config {
    Some(path) => EngineConfig::from_json_file(path)?,
    None => EngineConfig::default(),
  };
  if let Some(max_parallel) = cli.max_parallel {
    config = config.with_max_parallel_steps(max_parallel);
  }

  let engine = Engine::builder(store.clone())
    .config(config)
    .build()
    .context("failed to create engine")?;

  match cli.command {
    Commands::Run { workflow_file } => {
      let definition = load_workflow(&workflow_file).await?;
      let state = engine
        .run(definition)
        .await
        .context("workflow execution failed")?;
      report(&state)
    }
    Commands::Resume {
      workflow_file,
      execution_id,
      inputs,
    } => {
      let definition = load_workflow(&workflow_file).await?;
      let inputs = match inputs {
        Some(raw) => serde_json::from_str(&raw).context("failed to parse --inputs JSON")?,
        None => read_inputs_from_stdin()?,
      };
      engine
        .attach(definition, &execution_id)
        .await
        .context("failed to attach execution")?;
      engine
        .resume(&execution_id, inputs)
        .await
        .context("failed to resume execution")?;
      let state = engine.wait(&execution_id).await?;
      report(&state)
    }
    Commands::Recover {
      workflow_file,
      execution_id,
    } => {
      let definition = load_workflow(&workflow_file).await?;
      engine
        .recover(definition, &execution_id)
        .await
        .context("failed to recover execution")?;
      let state = engine.wait(&execution_id).await?;
      report(&state)
    }
    Commands::Cancel { execution_id } => {
      engine.cancel(&execution_id).await?;
      let state = engine.get_state(&execution_id).await?;
      report(&state)
    }
    Commands::Status { execution_id } => {
      let state = engine.get_state(&execution_id).await?;
      println!("{}", serde_json::to_string_pretty(&state)?);
      Ok(())
    }
    Commands::List { workflow_id } => {
      for state in store.list(&workflow_id).await? {
        println!("{}\t{}\t{}", state.execution_id, state.status, state.updated_at);
      }
      Ok(())
    }
  }
}

fn init_logging(json: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let registry = tracing_subscriber::registry().with(filter);
  if json {
    registry
      .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
      .init();
  } else {
    registry
      .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
      .init();
  }
}

async fn load_workflow(path: &Path) -> Result<WorkflowDef> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read workflow file: {}", path.display()))?;
  WorkflowDef::from_json(&content)
    .with_context(|| format!("failed to parse workflow file: {}", path.display()))
}

/// Print step outputs to stdout and the outcome to stderr.
fn report(state: &ExecutionState) -> Result<()> {
  eprintln!("Execution {}: {}", state.execution_id, state.status);
  println!("{}", serde_json::to_string_pretty(&state.variables)?);

  match state.status {
    ExecutionStatus::Completed => Ok(()),
    ExecutionStatus::PausedAwaitingInput => {
      let keys: Vec<&str> = state.pending_input_keys.iter().map(String::as_str).collect();
      eprintln!("Waiting for input: {}", keys.join(", "));
      Ok(())
    }
    ExecutionStatus::Failed => bail!(
      "execution failed: {}",
      state.error.as_deref().unwrap_or("unknown error")
    ),
    status => bail!("execution ended {}", status),
  }
}

fn read_inputs_from_stdin() -> Result<serde_json::Value> {
  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read inputs from stdin")?;
  serde_json::from_str(&input).context("failed to parse inputs JSON from stdin")
}
