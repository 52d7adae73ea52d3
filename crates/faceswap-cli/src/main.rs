//! faceswap - command line client for the Piktid face-swap service.
//!
//! Signs in, uploads a face and a target image, submits the swap and
//! waits for the result links.

mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Context;

/// Face swap from the command line
#[derive(Parser, Debug)]
#[command(name = "faceswap")]
#[command(about = "Swap a face onto a target image using the Piktid service", long_about = None)]
struct Args {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session
    Login {
        /// Account name (prompted for when omitted)
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Revoke the session and forget it locally
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Upload two images and wait for the swapped result
    Swap {
        /// Image containing the face to use
        #[arg(short, long)]
        face: PathBuf,
        /// Image the face is placed onto
        #[arg(short, long)]
        target: PathBuf,
        /// Seed for reproducible results
        #[arg(short, long)]
        seed: Option<u64>,
    },
    /// Show or change the saved configuration
    Config {
        /// Service URL, including the /api prefix
        #[arg(long)]
        base_url: Option<String>,
        /// Where to keep the session: file, keyring or memory
        #[arg(long)]
        token_store: Option<String>,
        /// Milliseconds between job status checks
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
}

/// Initialize the tracing subscriber for logging.
/// The returned guard must stay alive for file logs to be flushed.
fn init_tracing(log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _guard = init_tracing(args.log_file.as_ref())?;
    info!("faceswap starting");

    match args.command {
        Command::Config {
            base_url,
            token_store,
            poll_interval_ms,
        } => commands::configure(base_url, token_store, poll_interval_ms),
        Command::Login { username } => commands::login(&Context::open()?, username).await,
        Command::Logout => commands::logout(&Context::open()?).await,
        Command::Whoami => commands::whoami(&Context::open()?).await,
        Command::Swap { face, target, seed } => {
            commands::swap(&Context::open()?, &face, &target, seed).await
        }
    }
}
