//! `GpuWatch` CLI - terminal front end for the remote GPU monitor
//!
//! Watches a GPU server over a reused SSH session, prints one-off
//! snapshots, and renders status icons.

mod cli;
mod commands;
mod error;
mod util;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = util::init_logging(cli.verbose, cli.quiet) {
        eprintln!("Warning: logging disabled: {e}");
    }

    let result = commands::dispatch(&cli.global_options(), cli.command);

    if let Err(e) = result {
        if !cli.quiet {
            eprintln!("Error: {e}");
        }
        std::process::exit(e.exit_code());
    }
}
