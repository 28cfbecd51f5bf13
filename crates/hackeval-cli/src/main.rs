//! hackeval - command-line front end for the evaluation engine
//!
//! ## Commands
//!
//! - `evaluate`: fetch, analyze, test and score one submission
//! - `validate-config`: check an engine configuration file
//! - `check-tools`: report which configured tools the sandbox can run
//! - `show`: print a stored result

mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hackeval_core::{
    init_tracing, CancelSignal, EngineConfig, GitSourceProvider, JobId, ProcessSandbox,
    SandboxRunner, SourceLocation, Submission,
};
use hackeval_judge::{check_tool_availability, Engine};
use result_store::{MemoryResultStore, ResultStore, StoreError, SurrealResultStore};
use tracing::{info, Level};

use report::{render_result, render_tools, required_tools, ToolStatus};

#[derive(Parser)]
#[command(name = "hackeval")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automated evaluation of hackathon submissions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one submission and print its result
    Evaluate {
        /// Engine configuration file (TOML)
        #[arg(short, long, env = "HACKEVAL_CONFIG")]
        config: PathBuf,

        /// Repository URL or local path
        #[arg(long)]
        repo: String,

        /// Branch, tag or full commit SHA
        #[arg(long = "ref", default_value = "main")]
        reference: String,

        /// Participant or team identifier
        #[arg(long, default_value = "local")]
        participant: String,

        /// Hackathon identifier
        #[arg(long, default_value = "local")]
        hackathon: String,

        /// Write the full result as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Persist the result in this durable store directory
        #[arg(long, env = "HACKEVAL_STORE")]
        store: Option<PathBuf>,
    },

    /// Parse and validate an engine configuration file
    ValidateConfig {
        /// Configuration file (TOML)
        path: PathBuf,
    },

    /// Check that every tool the configuration needs runs in the sandbox
    CheckTools {
        /// Engine configuration file (TOML)
        #[arg(short, long, env = "HACKEVAL_CONFIG")]
        config: PathBuf,
    },

    /// Print a stored result
    Show {
        /// Durable store directory
        #[arg(long, env = "HACKEVAL_STORE")]
        store: PathBuf,

        /// Job ID
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Evaluate {
            config,
            repo,
            reference,
            participant,
            hackathon,
            output,
            store,
        } => {
            let source = SourceLocation::new(repo, reference);
            let submission = Submission::new(participant, source, hackathon)?;
            cmd_evaluate(&config, submission, output.as_deref(), store.as_deref(), cli.json).await
        }
        Commands::ValidateConfig { path } => cmd_validate_config(&path, cli.json),
        Commands::CheckTools { config } => cmd_check_tools(&config, cli.json).await,
        Commands::Show { store, job_id } => cmd_show(&store, &job_id, cli.json).await,
    }
}

fn load_config(path: &Path) -> Result<Arc<EngineConfig>> {
    EngineConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn sandbox_for(config: &EngineConfig) -> Result<Arc<dyn SandboxRunner>> {
    let sandbox = ProcessSandbox::new(config.sandbox.clone()).context("Sandbox unavailable")?;
    Ok(Arc::new(sandbox))
}

/// Evaluate one submission end to end.
async fn cmd_evaluate(
    config_path: &Path,
    submission: Submission,
    output: Option<&Path>,
    store_dir: Option<&Path>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store: Arc<dyn ResultStore> = match store_dir {
        Some(dir) => Arc::new(
            SurrealResultStore::open(dir)
                .await
                .with_context(|| format!("Failed to open result store {}", dir.display()))?,
        ),
        None => Arc::new(MemoryResultStore::new()),
    };
    let sandbox = sandbox_for(&config)?;
    let scratch = config
        .engine
        .workspace_root
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let provider = GitSourceProvider::new(Duration::from_millis(config.fetch.git_timeout_ms), scratch);

    let engine = Engine::start(config, store, Arc::new(provider), sandbox)?;
    info!(
        repo = %submission.source.repo_url,
        reference = %submission.source.reference,
        "evaluating submission"
    );
    let job_id = engine.submit(submission).await?;
    let result = tokio::select! {
        result = engine.wait_for(&job_id) => result?,
        _ = tokio::signal::ctrl_c() => {
            engine.cancel(&job_id).await?;
            engine.wait_for(&job_id).await?
        }
    };
    engine.shutdown().await;

    if let Some(path) = output {
        let body = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_result(&result));
    }
    Ok(())
}

fn cmd_validate_config(path: &Path, json: bool) -> Result<()> {
    let config = load_config(path)?;
    let digest = config.config_digest()?;
    if json {
        let summary = serde_json::json!({
            "valid": true,
            "config_digest": digest,
            "checkers": config.lint.checkers.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "cases": config.suite.cases.len(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Configuration OK: {}", path.display());
        println!("Digest:   {digest}");
        println!("Checkers: {}", config.lint.checkers.len());
        println!("Cases:    {}", config.suite.cases.len());
    }
    Ok(())
}

async fn cmd_check_tools(config_path: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let sandbox = sandbox_for(&config)?;
    let cancel = CancelSignal::never();

    let mut statuses = Vec::new();
    for tool in required_tools(&config) {
        let available = check_tool_availability(sandbox.as_ref(), &tool, &cancel).await;
        statuses.push(ToolStatus { tool, available });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else if statuses.is_empty() {
        println!("No external tools configured.");
    } else {
        print!("{}", render_tools(&statuses));
    }
    let missing = statuses.iter().filter(|s| !s.available).count();
    if missing > 0 {
        bail!("{missing} tool(s) unavailable");
    }
    Ok(())
}

async fn cmd_show(store_dir: &Path, job_id: &str, json: bool) -> Result<()> {
    let job_id: JobId = job_id.parse()?;
    let store = SurrealResultStore::open(store_dir)
        .await
        .with_context(|| format!("Failed to open result store {}", store_dir.display()))?;
    let result = match store.get(&job_id).await {
        Ok(result) => result,
        Err(StoreError::NotFound { .. }) => bail!("No result stored for job {job_id}"),
        Err(e) => return Err(e.into()),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_result(&result));
    }
    Ok(())
}
