use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sidecar")]
#[command(about = "Keep an embedded content backend running and its UI session authenticated")]
pub struct Cli {
    /// Config file path (defaults to sidecar.yaml, searched upward)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a project until interrupted
    Serve {
        /// Project key tokens are stored under
        #[arg(short, long)]
        project: String,

        /// Project directory (defaults to the current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Probe candidate ports and show which one would be picked
    Ports {
        /// Ports to probe (defaults to the configured preferred list)
        ports: Vec<u16>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage stored tokens
    #[command(subcommand)]
    Token(TokenCommands),
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Print the stored token for a project
    Get {
        #[arg(short, long)]
        project: String,
    },
    /// Store a token for a project
    Set {
        #[arg(short, long)]
        project: String,
        token: String,
    },
    /// Remove the token for a project
    Clear {
        #[arg(short, long)]
        project: String,
    },
    /// Remove every stored token
    ClearAll,
    /// List projects with a stored token
    List,
}
