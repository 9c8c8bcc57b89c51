// crates/ashfox-server/src/cli.rs
// Command definitions and startup wiring.

use anyhow::Result;
use ashfox::adapter::NullEditorAdapter;
use ashfox::config::GatewayConfig;
use ashfox::error::envelope;
use ashfox::mcp::Gateway;
use ashfox::mcp::router::build_router;
use ashfox::tools::{ToolName, ToolService, ToolServiceOptions};
use ashfox::worker::{Worker, WorkerConfig};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(
    name = "ashfox",
    version,
    about = "MCP gateway for a 3D block-model editor"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway (default).
    Serve {
        /// Listen address, e.g. 127.0.0.1:8787.
        #[arg(long, env = "ASHFOX_BIND")]
        bind: Option<String>,
    },
    /// Invoke one tool directly and print the result envelope.
    Tool {
        /// Tool name, e.g. get_project_state.
        name: String,
        /// JSON arguments.
        #[arg(default_value = "{}")]
        args: String,
    },
}

/// How often the session store scans for idle sessions.
const EVICTION_SCAN_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_serve(bind: Option<String>) -> Result<()> {
    let mut config = GatewayConfig::from_env();
    if let Some(bind) = bind {
        config.bind = bind;
    }

    let gateway = Arc::new(Gateway::assemble(config.clone(), Arc::new(NullEditorAdapter)).await?);
    gateway.sessions.spawn_eviction(EVICTION_SCAN_INTERVAL);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if config.worker_enabled {
        let worker = Worker::new(
            gateway.store.clone(),
            gateway.backend.clone(),
            WorkerConfig {
                workspaces: config.worker_workspaces.clone(),
                ..Default::default()
            },
        );
        tokio::spawn(worker.run(shutdown_rx));
    }

    let app = build_router(gateway);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(
        "ashfox gateway listening on {} (mcp path {})",
        config.bind,
        config.mcp_path
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}

pub async fn run_tool(name: String, args: String) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(&args).map_err(|e| anyhow::anyhow!("arguments are not JSON: {e}"))?;
    let config = GatewayConfig::from_env();
    let service = ToolService::new(
        Arc::new(NullEditorAdapter),
        ToolServiceOptions {
            require_revision: config.require_revision,
            auto_attach: config.auto_attach,
            merge: Default::default(),
        },
    );
    let tool: ToolName = name
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown tool '{name}'"))?;
    let spec = service
        .registry()
        .get(&name)
        .ok_or_else(|| anyhow::anyhow!("unknown tool '{name}'"))?;
    let validated = spec
        .schema
        .validate(arguments)
        .map_err(|violation| anyhow::anyhow!("invalid arguments: {}", violation.message))?;
    let result = service.call_validated(tool, validated).await;
    println!("{}", serde_json::to_string_pretty(&envelope(&result))?);
    Ok(())
}
