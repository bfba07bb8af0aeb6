//! CLI error types and exit codes.

use gpuwatch_core::{ConfigError, FetchError, IconError};

/// Exit codes for CLI operations
pub mod exit_codes {
    /// General error - configuration, rendering, or other local errors
    pub const GENERAL_ERROR: i32 = 1;
    /// Connection failure - the GPU server could not be queried
    pub const CONNECTION_FAILURE: i32 = 2;
}

/// CLI error type
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fetching metrics from the server failed
    #[error("Fetch failed: {0}")]
    Connection(String),

    /// Icon rendering error
    #[error("Render error: {0}")]
    Render(String),

    /// Async runtime could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Output serialization error
    #[error("Output error: {0}")]
    Output(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<FetchError> for CliError {
    fn from(err: FetchError) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<IconError> for CliError {
    fn from(err: IconError) -> Self {
        Self::Render(err.to_string())
    }
}

impl CliError {
    /// Returns the appropriate exit code for this error type.
    ///
    /// Exit codes:
    /// - 0: Success (not an error)
    /// - 1: General error (configuration, rendering, IO)
    /// - 2: Connection failure (fetch failed)
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Connection(_) => exit_codes::CONNECTION_FAILURE,
            Self::Config(_) | Self::Render(_) | Self::Runtime(_) | Self::Output(_) | Self::Io(_) => {
                exit_codes::GENERAL_ERROR
            }
        }
    }
}
