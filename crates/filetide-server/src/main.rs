use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use filetide_core::PipelineExecutor;
use filetide_server::config::Cli;
use filetide_server::routes::{AppState, router};
use filetide_server::token::{MemoryTokenSource, TokenSource};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let registry = Arc::new(filetide_steps::builtin_registry());
    let http = reqwest::Client::builder()
        .user_agent("filetide/0.1")
        .build()
        .context("build shared http client")?;
    let executor = Arc::new(PipelineExecutor::new(registry, http, cli.limits()));
    let tokens: Arc<dyn TokenSource> = Arc::new(MemoryTokenSource::new());

    let app = router(AppState { executor, tokens });
    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("bind {}", cli.listen))?;
    tracing::info!(addr = %cli.listen, "filetide server listening");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
