//! Parley CLI, the main entry point.
//!
//! Commands:
//! - `serve`       Start the HTTP gateway
//! - `chat`        Talk to the persona from the terminal
//! - `transcribe`  Run an audio file through speech recognition + correction
//! - `doctor`      Check configuration, credentials and persona documents
//! - `config`      Print the default configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod app;
mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley: talk to a persona-primed Gemini model by text or voice",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $PARLEY_CONFIG, then ./parley.toml)
    #[arg(short, long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the persona
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Session to continue (default: the shared session)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Transcribe an audio file and print the corrected text
    Transcribe {
        /// Audio in the configured encoding (WEBM_OPUS, 48 kHz by default)
        file: PathBuf,
    },

    /// Diagnose configuration and persona documents
    Doctor,

    /// Print the default configuration as TOML
    Config,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Chat { message, session } => {
            commands::chat::run(config_path, message, session).await?
        }
        Commands::Transcribe { file } => commands::transcribe::run(config_path, &file).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
        Commands::Config => commands::config_cmd::run(),
    }

    Ok(())
}
