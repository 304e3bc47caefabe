mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use sidecar::output::{CliOutput, UserOutput};
use sidecar::{Error as SidecarError, Parser as ConfigParser};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(sidecar_error) = e.downcast_ref::<SidecarError>() {
            eprintln!("Error: {}", sidecar_error);
            if let Some(suggestion) = sidecar_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = ConfigParser::new().load_or_default(cli.config.as_deref())?;
    let out: Arc<dyn UserOutput> = Arc::new(CliOutput);

    match cli.command {
        Commands::Serve { project, dir } => {
            commands::run_serve(&project, dir, config, out).await
        }
        Commands::Ports { ports, json } => {
            commands::run_ports(&ports, json, &config, out.as_ref()).await
        }
        Commands::Token(ref cmd) => commands::run_token(cmd, &config, out.as_ref()),
        Commands::Config => commands::run_config(&config),
    }
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(std::sync::Mutex::new(log_file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}
