//! Ledgerview CLI - Command-line front end for the analysis engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledgerview_core::config::LedgerviewConfig;
use ledgerview_core::server::LedgerviewServer;
use ledgerview_core::tools::ToolEvent;
use serde_json::{Value, json};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ledgerview")]
#[command(about = "DAML authorization safety analysis", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (overrides ledgerview.toml and LEDGERVIEW_CONFIG_PATH)
    #[arg(short, long, global = true, env = "LEDGERVIEW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the safety pipeline over a DAML source file
    Analyze {
        /// DAML source file
        file: PathBuf,
    },
    /// Invoke any registered tool with a JSON input
    Call {
        /// Tool identifier
        tool: String,
        /// JSON input, `{}` when omitted
        input: Option<String>,
    },
    /// List registered tools
    Tools,
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LedgerviewConfig::from_file(path),
        None => LedgerviewConfig::load(),
    }
    .context("failed to load configuration")?;

    // stdout carries events; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("ledgerview {}", env!("CARGO_PKG_VERSION"));
            println!("ledgerview-core {}", ledgerview_core::VERSION);
        }
        Commands::Tools => {
            let server = LedgerviewServer::from_config(config)?;
            let listing = serde_json::to_string_pretty(&server.registry().list())?;
            println!("{}", listing);
            server.shutdown().await;
        }
        Commands::Analyze { file } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let server = LedgerviewServer::from_config(config)?;
            let ok = stream(&server, "analyze_daml_safety", json!({ "source": source })).await?;
            server.shutdown().await;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Call { tool, input } => {
            let input: Value = match input {
                Some(raw) => serde_json::from_str(&raw).context("input is not valid JSON")?,
                None => json!({}),
            };
            let server = LedgerviewServer::from_config(config)?;
            let ok = stream(&server, &tool, input).await?;
            server.shutdown().await;
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Print every event as one JSON line; returns whether the terminal event was a result
async fn stream(server: &LedgerviewServer, tool: &str, input: Value) -> Result<bool> {
    let mut handle = match server.engine().invoke(tool, input) {
        Ok(handle) => handle,
        Err(e) => {
            println!("{}", serde_json::to_string(&e.to_event())?);
            return Ok(false);
        }
    };

    let cancel = handle.cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling invocation");
            cancel.cancel();
        }
    });

    let mut ok = false;
    while let Some(event) = handle.next_event().await {
        println!("{}", serde_json::to_string(&event)?);
        if event.is_terminal() {
            ok = matches!(event, ToolEvent::Result { .. });
            break;
        }
    }

    interrupt.abort();
    Ok(ok)
}
