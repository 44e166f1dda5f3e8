//! cadence - call backend methods and follow push channels from a terminal
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use tracing::{error, info};

use cadence::commands;
use cadence::Overrides;
use cadence_core::logging::{self, LogOptions};

/// cadence - multiplexed calls and push channels over WebSocket
#[derive(Parser, Debug)]
#[command(name = "cadence", version)]
#[command(about = "Call backend methods and follow push channels", long_about = None)]
struct Args {
    /// Backend WebSocket URL (overrides config and CADENCE_URL)
    #[arg(long, global = true, value_name = "URL")]
    url: Option<String>,

    /// Path to config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Echo logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call `service.method` with JSON arguments and print the result
    Invoke {
        method: String,
        /// Arguments, each parsed as JSON (bare words become strings)
        args: Vec<String>,
    },
    /// Print push events on the given channels until Ctrl-C
    Listen {
        #[arg(required = true)]
        channels: Vec<String>,
    },
    /// Connect, print the handshake, and disconnect
    Status,
    /// Write a default config.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    logging::init(LogOptions {
        echo_stderr: args.verbose,
    })?;
    info!("cadence starting: {:?}", args.command);

    if let Command::Init = args.command {
        return commands::init(args.config.as_deref());
    }

    let settings = cadence::resolve_settings(&Overrides {
        config: args.config.as_deref(),
        url: args.url.clone(),
        timeout_ms: args.timeout_ms,
    })?;

    let result = match &args.command {
        Command::Invoke { method, args } => commands::invoke(&settings, method, args).await,
        Command::Listen { channels } => commands::listen(&settings, channels).await,
        Command::Status => commands::status(&settings).await,
        Command::Init => Ok(()),
    };

    if let Err(ref e) = result {
        error!("cadence error: {:?}", e);
    }
    info!("cadence exiting");
    result
}
