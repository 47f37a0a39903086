//! Litreview API server binary.
//!
//! Wires the long-lived singletons (HTTP client, LLM client, failure and
//! cost trackers, checkpoint store) into the workflow engine and serves the
//! REST + SSE API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use litreview_core::config::{Limits, LlmSettings, ScholarSettings};
use litreview_core::cost::CostTracker;
use litreview_core::llm::OpenAiChatClient;
use litreview_core::net::build_http_client;
use litreview_core::scholar::SourceTracker;
use litreview_core::stages::StageContext;
use litreview_core::workflow::checkpoint::{init_db, CheckpointStore};
use litreview_core::workflow::Workflow;

use litreview_server::state::AppState;

/// Litreview API server — automated literature reviews over scholarly
/// search and LLM drafting.
#[derive(Parser)]
#[command(name = "litreview-server", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value = "3002")]
    port: u16,

    /// Host address to bind to. Use 0.0.0.0 for LAN access.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Path to the checkpoint database.
    #[arg(long, default_value = "~/.litreview/checkpoints.db")]
    db: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    tracing::info!(db = %cli.db, host = %cli.host, port = cli.port, "starting litreview server");

    let pool = init_db(&cli.db).await.context("init checkpoint store")?;
    let store = CheckpointStore::new(pool);

    let llm_settings = LlmSettings::from_env().context("LLM configuration")?;
    let llm = OpenAiChatClient::new(llm_settings).context("build LLM client")?;

    let http = build_http_client().context("build HTTP client")?;

    let limits = Limits::default();
    let sources = SourceTracker::new(
        std::time::Duration::from_secs(limits.source_skip_window_secs),
        limits.source_skip_threshold,
    );

    let ctx = StageContext {
        llm: Arc::new(llm),
        http,
        scholar: ScholarSettings::from_env(),
        sources: Arc::new(sources),
        costs: Arc::new(CostTracker::new()),
        limits,
    };

    let state = Arc::new(AppState {
        engine: Workflow::new(store, ctx),
    });
    let router = litreview_server::build_router(state);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, router).await.context("serve")?;
    Ok(())
}
