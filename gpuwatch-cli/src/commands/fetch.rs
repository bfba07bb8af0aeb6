//! One-shot fetch command.

use gpuwatch_core::monitoring::FetchTarget;
use gpuwatch_core::monitoring::summary::format_summary;

use crate::cli::{GlobalOptions, OutputFormat};
use crate::error::CliError;
use crate::util::{build_fetcher, load_settings, runtime};

/// Fetch command handler
pub fn cmd_fetch(opts: &GlobalOptions, format: OutputFormat) -> Result<(), CliError> {
    let settings = load_settings(opts)?;
    let target = FetchTarget::from_settings(&settings);
    let runtime = runtime()?;

    let snapshot = runtime.block_on(async {
        let fetcher = build_fetcher(&settings)?;
        let snapshot = fetcher
            .fetch(&target.host, target.identity.as_deref(), target.timeout)
            .await;
        fetcher.connections().close_all().await;
        Ok::<_, CliError>(snapshot)
    })?;

    match format {
        OutputFormat::Text => {
            if snapshot.is_ok() || !opts.quiet {
                println!("{}", format_summary(&snapshot));
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| CliError::Output(format!("Failed to serialize snapshot: {e}")))?;
            println!("{json}");
        }
    }

    match snapshot.error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
