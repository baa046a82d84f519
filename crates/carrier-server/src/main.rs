//! carrierd - log carrier daemon
//!
//! Buffers incoming log streams into rotating, optionally compressed files
//! and keeps buffered data across restarts.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use carrier_buffer::StreamId;
use carrier_config::Config;
use carrier_server::checkpoint::{self, Checkpoint};
use carrier_server::{Server, ServerHandle};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "carrierd")]
#[command(about = "Log carrier daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the carrier until interrupted
    Run {
        /// Path to config file
        #[arg(short, long, env = "CARRIER_CONFIG", default_value = "/etc/carrier/config.json")]
        config: PathBuf,

        /// Feed stdin lines into this stream (`dir/name/group`)
        #[arg(long)]
        stdin: Option<StreamId>,
    },

    /// Validate a config file and print a summary
    CheckConfig {
        /// Path to config file
        #[arg(short, long, env = "CARRIER_CONFIG", default_value = "/etc/carrier/config.json")]
        config: PathBuf,
    },

    /// Print the contents of a checkpoint file
    Inspect {
        /// Path to checkpoint file
        #[arg(short, long)]
        state: PathBuf,
    },

    /// Write all checkpointed data to files and exit
    Drain {
        /// Path to config file
        #[arg(short, long, env = "CARRIER_CONFIG", default_value = "/etc/carrier/config.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, stdin } => {
            let config = load(&config)?;
            init_tracing(&config.logging.level, config.logging.file.as_deref())?;
            run(config, stdin).await?;
        }

        Commands::CheckConfig { config } => {
            let config = load(&config)?;
            print_summary(&config);
        }

        Commands::Inspect { state } => {
            let checkpoint = Checkpoint::read(&state)?
                .with_context(|| format!("no checkpoint at {}", state.display()))?;
            print!("{}", checkpoint::inspect(&checkpoint)?);
        }

        Commands::Drain { config } => {
            let config = load(&config)?;
            init_tracing(&config.logging.level, config.logging.file.as_deref())?;
            let streams = carrier_server::drain(&config)?;
            println!("drained {streams} streams");
        }
    }

    Ok(())
}

fn load(path: &Path) -> anyhow::Result<Config> {
    Config::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn init_tracing(level: &str, file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }
    Ok(())
}

async fn run(config: Config, stdin: Option<StreamId>) -> anyhow::Result<()> {
    let server = Server::start(config)?;

    match stdin {
        Some(stream) => {
            let eof = feed_stdin(server.handle(), stream);
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
                _ = eof => info!("stdin closed"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("interrupted");
        }
    }

    server.shutdown().await?;
    Ok(())
}

/// Copies stdin into `stream` line by line on a detached thread, so a
/// pending read never holds up shutdown.
fn feed_stdin(handle: ServerHandle, stream: StreamId) -> oneshot::Receiver<()> {
    let (done, eof) = oneshot::channel();
    std::thread::spawn(move || {
        let mut reader = BufReader::new(std::io::stdin().lock());
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if !line.ends_with(b"\n") {
                        line.push(b'\n');
                    }
                    if handle.blocking_write(stream.clone(), line.clone()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "reading stdin failed");
                    break;
                }
            }
        }
        let _ = done.send(());
    });
    eof
}

fn print_summary(config: &Config) {
    println!("configuration OK");
    println!("  compression:  {} (level {})", config.compression.method, config.compression.level);
    println!("  buffers:      input {} B, framing {} B", config.buffers.input, config.buffers.framing);
    println!(
        "  workers:      {} ingest, {} flushers every {}s, {} rotators",
        config.workers.ingest,
        config.workers.flushers,
        config.workers.flush_interval_secs,
        config.workers.rotators
    );
    println!("  root:         {} (mode {:04o})", config.files.root.display(), config.files.root_mode);
    println!("  file names:   {} -> {}", config.files.name, config.files.rotation);
    if config.links.enabled() {
        println!(
            "  links:        {} (mode {:04o}): {} -> {}",
            config.links.root.display(),
            config.links.root_mode,
            config.links.name,
            config.links.rotation
        );
    }
    println!(
        "  rotation:     {} every {}s",
        config.logrotate.method, config.logrotate.interval_secs
    );
    println!("  notifier:     {}", config.notifier().kind());
    println!("  state file:   {}", config.state_file.display());
}
