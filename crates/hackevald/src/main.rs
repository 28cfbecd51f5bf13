//! hackevald - long-running hackeval engine
//!
//! Reads one JSON request per line on stdin and answers with one JSON line
//! per request on stdout. Logs go to stderr. EOF drains the queue and exits;
//! Ctrl-C cancels in-flight jobs first.

mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hackeval_core::{init_tracing, EngineConfig, GitSourceProvider, ProcessSandbox};
use hackeval_judge::Engine;
use result_store::{ResultStore, SurrealResultStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "hackevald")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "hackeval evaluation engine (JSON lines over stdin/stdout)", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long, env = "HACKEVAL_CONFIG")]
    config: PathBuf,

    /// Directory of the durable result store (in-memory when omitted)
    #[arg(long, env = "HACKEVAL_STORE")]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    let store: Arc<dyn ResultStore> = match &cli.store {
        Some(path) => Arc::new(
            SurrealResultStore::open(path)
                .await
                .with_context(|| format!("Failed to open result store {}", path.display()))?,
        ),
        None => Arc::new(
            SurrealResultStore::in_memory()
                .await
                .context("Failed to start in-memory result store")?,
        ),
    };

    let sandbox = ProcessSandbox::new(config.sandbox.clone()).context("Sandbox unavailable")?;
    let scratch = config
        .engine
        .workspace_root
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let provider = GitSourceProvider::new(Duration::from_millis(config.fetch.git_timeout_ms), scratch);

    let engine = Engine::start(config, store, Arc::new(provider), Arc::new(sandbox))?;
    info!(config_digest = engine.config_digest(), "hackevald ready");

    tokio::select! {
        served = serve(&engine) => {
            served?;
            info!("stdin closed, draining queue");
            engine.shutdown().await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, cancelling in-flight jobs");
            engine.abort().await;
        }
    }
    Ok(())
}

async fn serve(engine: &Engine) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match protocol::parse_request(&line) {
            Ok(request) => protocol::handle(engine, request).await,
            Err(response) => response,
        };
        let mut out = protocol::encode(&response);
        out.push('\n');
        stdout.write_all(out.as_bytes()).await.context("Failed to write stdout")?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }
    Ok(())
}
