use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use plexus_core::event::BusMode;

/// Plexus: plugin microkernel host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Print `pong` and exit
    #[arg(long)]
    pub ping: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the kernel with the bundled plugins and run until Ctrl-C
    Run {
        #[command(flatten)]
        kernel: KernelArgs,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Start the kernel, print its composite health report, then stop
    Health {
        #[command(flatten)]
        kernel: KernelArgs,
    },
    /// Run the reference TCP broker used by networked deployments
    Broker {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:4222")]
        listen: String,
    },
}

/// Options shared by commands that build a kernel.
#[derive(Args, Debug, Default)]
pub struct KernelArgs {
    /// Configuration file (.json, .toml, .yaml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Override `bus.mode` (in-process, networked)
    #[arg(long)]
    pub mode: Option<BusMode>,

    /// Override `bus.broker_endpoint`
    #[arg(long)]
    pub broker: Option<String>,

    /// Heartbeat interval for the core-heartbeat plugin, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub heartbeat_ms: u64,
}
