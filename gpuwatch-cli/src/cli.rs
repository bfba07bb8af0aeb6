//! CLI argument parsing types using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// `GpuWatch` command-line interface for monitoring a remote GPU server
#[derive(Parser)]
#[command(name = "gpuwatch")]
#[command(author, version, about = "Remote GPU monitor over SSH")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file (default: ~/.config/gpuwatch/config.toml)
    #[arg(short, long, global = true, env = "GPUWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// GPU server host (overrides config and GPU_SERVER_HOST)
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// SSH user (overrides config and GPU_SERVER_USER)
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Increase output verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Options shared by every command
    pub fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            config: self.config.clone(),
            host: self.host.clone(),
            user: self.user.clone(),
            quiet: self.quiet,
        }
    }
}

/// Global flags passed down to command handlers
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub quiet: bool,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Poll the server periodically and print each snapshot
    #[command(about = "Watch GPU utilization (keys: r=refresh s=suspend w=wake q=quit)")]
    Watch {
        /// Write the status icon PNG here after every refresh
        #[arg(long, value_name = "PATH")]
        icon_out: Option<PathBuf>,
    },

    /// Fetch one snapshot and print it
    #[command(about = "Fetch GPU metrics once")]
    Fetch {
        /// Output format
        #[arg(short, long, default_value = "text", value_enum)]
        format: OutputFormat,
    },

    /// Render a status icon from given percentages
    #[command(about = "Render a status icon to a PNG file")]
    Render {
        /// Utilization percentage; pass once per GPU (at most two)
        #[arg(short, long = "percent", value_name = "P", required = true, num_args = 1)]
        percents: Vec<f32>,

        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,

        /// Icon edge in pixels (16-256)
        #[arg(short, long)]
        size: Option<u32>,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// Snapshot as JSON
    Json,
}
