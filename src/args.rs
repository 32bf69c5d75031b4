use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nascore-supervisor")]
#[command(version)]
#[command(about = "Service supervisor and scheduler for NasCore", long_about = None)]
pub(crate) struct Cli {
    /// Config file (default: $NASCORE_CONFIG, ./nascore.toml, or the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the supervisor in the foreground (Ctrl+C to stop)
    Run {
        /// Force stateless mode regardless of IsRunInServerLess. Every tick
        /// then kill-restarts each enabled service and reruns the mount and
        /// extension launches, as a request-triggered instance would
        #[arg(long)]
        stateless: bool,

        /// Seconds between ticks in stateless mode
        #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
        tick_secs: u64,
    },

    /// Perform one synchronous stateless pass and exit
    Tick,

    /// Show managed services and extension liveness
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start a managed service (ddns-go, caddy2, openlist)
    Start { service: String },

    /// Stop a managed service
    Stop { service: String },

    /// Kill then start a managed service
    Restart { service: String },

    /// Locate extension executables and probe their sockets
    Extensions {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Probe a single Unix socket with GET /ping
    Probe {
        /// Socket path
        socket: PathBuf,

        /// Timeout in milliseconds
        #[arg(short, long, default_value = "2000")]
        timeout_ms: u64,
    },

    /// Write a config file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
