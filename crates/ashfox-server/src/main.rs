// crates/ashfox-server/src/main.rs
// Ashfox - MCP gateway runtime for a 3D block-model editor

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from ~/.ashfox/.env only (never from CWD - a hostile
    // working directory could override persistence settings).
    if let Some(home) = dirs::home_dir() {
        if let Err(e) = dotenvy::from_path(home.join(".ashfox/.env")) {
            tracing::debug!("no global .env loaded: {e}");
        }
    }

    let cli = Cli::parse();

    let log_level = match &cli.command {
        Some(Commands::Tool { .. }) => Level::WARN,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        None | Some(Commands::Serve { bind: None }) => cli::run_serve(None).await,
        Some(Commands::Serve { bind }) => cli::run_serve(bind).await,
        Some(Commands::Tool { name, args }) => cli::run_tool(name, args).await,
    }
}
