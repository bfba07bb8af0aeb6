//! Shared utility functions used across command modules.

use std::path::PathBuf;
use std::sync::Arc;

use gpuwatch_core::config::apply_env_overrides;
use gpuwatch_core::tracing::DEBUG_LOG_ENV;
use gpuwatch_core::{
    AppSettings, ConfigManager, ConnectionManager, MetricsFetcher, ProcessRunner, TracingConfig,
    TracingLevel, TracingOutput, init_tracing,
};

use crate::cli::GlobalOptions;
use crate::error::CliError;

/// Installs the global subscriber.
///
/// `-v` flags pick the level; `-q` keeps only errors. When
/// `GPUWATCH_DEBUG_LOG` names a file, debug output goes there instead of
/// stderr so it does not interleave with the summary.
pub fn init_logging(verbose: u8, quiet: bool) -> Result<(), CliError> {
    let debug_log = std::env::var_os(DEBUG_LOG_ENV).filter(|p| !p.is_empty());

    let config = match debug_log {
        Some(path) => TracingConfig::new()
            .with_level(if verbose > 2 {
                TracingLevel::Trace
            } else {
                TracingLevel::Debug
            })
            .with_output(TracingOutput::File {
                path: PathBuf::from(path),
                append: true,
            }),
        None if quiet => TracingConfig::new().with_level(TracingLevel::Error),
        None => TracingConfig::new().with_level(TracingLevel::from_verbosity(verbose)),
    };

    init_tracing(&config).map_err(|e| CliError::Config(e.to_string()))
}

/// Loads settings: config file, then `GPU_*` environment, then CLI flags.
pub fn load_settings(opts: &GlobalOptions) -> Result<AppSettings, CliError> {
    let mut settings = match &opts.config {
        Some(path) => ConfigManager::load_from(path)?,
        None => ConfigManager::new()?.load_settings()?,
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;

    if let Some(host) = opts.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        settings.host = host.to_string();
    }
    if let Some(user) = opts.user.as_deref().map(str::trim) {
        settings.identity = (!user.is_empty()).then(|| user.to_string());
    }

    if settings.host.trim().is_empty() {
        return Err(CliError::Config(
            "no GPU server host configured (use --host or GPU_SERVER_HOST)".to_string(),
        ));
    }
    Ok(settings)
}

/// Wires a fetcher to real `ssh` processes
pub fn build_fetcher(settings: &AppSettings) -> Result<Arc<MetricsFetcher>, CliError> {
    let runner = Arc::new(ProcessRunner::new());
    let connections = ConnectionManager::new(runner.clone(), settings.channel.clone())?;
    Ok(Arc::new(MetricsFetcher::new(Arc::new(connections), runner)))
}

/// Creates the multi-threaded runtime used by network commands
pub fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Runtime(format!("Failed to create async runtime: {e}")))
}
