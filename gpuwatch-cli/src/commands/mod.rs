//! Command handler modules for the CLI.

mod fetch;
mod render;
mod watch;

use crate::cli::{Commands, GlobalOptions};
use crate::error::CliError;

/// Dispatch a CLI command to the appropriate handler.
pub fn dispatch(opts: &GlobalOptions, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Watch { icon_out } => watch::cmd_watch(opts, icon_out),
        Commands::Fetch { format } => fetch::cmd_fetch(opts, format),
        Commands::Render {
            percents,
            output,
            size,
        } => render::cmd_render(opts, &percents, &output, size),
    }
}
