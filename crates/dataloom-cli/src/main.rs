//! Process entrypoint: loads `EngineConfig` from the environment, wires up
//! a `QwenClient`, and serves the `/analyze` SSE route.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dataloom_engine::EngineConfig;
use dataloom_llm::{ChatProvider, QwenClient};
use dataloom_server::AppState;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the SSE server to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,
}

/// Builds the log filter from, in order of precedence: `LOG_LEVEL` (spec
/// §6's settings table — a bare level name such as `debug`/`warn`, applied
/// crate-wide), then the standard `RUST_LOG` filter-expression syntax,
/// then a hardcoded default.
fn setup_logging() {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(format!("dataloom={level},tower_http={level}")).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("dataloom=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let args = Args::parse();

    let config = EngineConfig::from_env();
    tracing::info!(addr = %args.addr, model = %config.model_name, "starting dataloom");

    let llm: Arc<dyn ChatProvider> = Arc::new(QwenClient::new());
    let state = AppState::new(llm, config);
    let app = dataloom_server::router(state);

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
