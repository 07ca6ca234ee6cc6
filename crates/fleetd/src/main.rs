//! fleetd — the Fleetgrid daemon.
//!
//! Single binary that wires the engine together:
//! - Capacity ledger + planning passes
//! - Demand estimation and target selection
//! - Convergence / batch supervisor
//! - Read-only status API
//!
//! # Usage
//!
//! ```text
//! fleetd simulate --port 8450 --speed 10
//! fleetd batch-timing --grow-ms 3200 --extract-ms 1000 --harden-ms 4000
//! fleetd init --output fleet.toml
//! fleetd check-config --config fleet.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use fleet_core::config::ControlMode;

mod commands;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(
    name = "fleetd",
    about = "Fleetgrid daemon",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Converge,
    Batch,
}

impl From<ModeArg> for ControlMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Converge => ControlMode::Converge,
            ModeArg::Batch => ControlMode::Batch,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor against the in-memory demo fleet and serve its status.
    Simulate {
        /// Path to fleet.toml (defaults apply when omitted).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port for the status API (overrides [api].port).
        #[arg(long)]
        port: Option<u16>,

        /// Simulated milliseconds per real millisecond.
        #[arg(long, default_value = "1.0")]
        speed: f64,

        /// Control mode (overrides [controller].mode).
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Print the start delays of a timed batch as JSON.
    BatchTiming {
        #[arg(long)]
        grow_ms: u64,
        #[arg(long)]
        extract_ms: u64,
        #[arg(long)]
        harden_ms: u64,
    },
    /// Write a scaffolded fleet.toml.
    Init {
        #[arg(short, long, default_value = "fleet.toml")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Parse and validate a fleet.toml.
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    // Logs go to stderr so command output on stdout stays machine-readable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Command::Simulate {
            config,
            port,
            speed,
            mode,
        } => commands::simulate::run(config.as_deref(), port, speed, mode.map(Into::into)).await,
        Command::BatchTiming {
            grow_ms,
            extract_ms,
            harden_ms,
        } => commands::timing::print(grow_ms, extract_ms, harden_ms),
        Command::Init { output, force } => commands::config::init(&output, force),
        Command::CheckConfig { config } => commands::config::check(&config),
    }
}
