//! Configuration management for `GpuWatch`
//!
//! Settings are read from a TOML file and then overridden by the `GPU_*`
//! environment variables. The monitoring core only ever reads them.

mod manager;
pub mod settings;

use std::path::PathBuf;

use thiserror::Error;

pub use manager::{
    CONFIG_FILE_NAME, ConfigManager, ENV_FETCH_TIMEOUT, ENV_HOST, ENV_REFRESH_INTERVAL,
    ENV_SHOW_PERCENTAGES, ENV_USER, apply_env_overrides,
};
pub use settings::{AppSettings, ChannelSettings};

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No platform configuration directory could be determined
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// The config file exists but could not be read
    #[error("Failed to read {}: {reason}", path.display())]
    Read {
        /// File that failed
        path: PathBuf,
        /// OS error text
        reason: String,
    },

    /// The config file is not valid TOML for [`AppSettings`]
    #[error("Failed to parse {}: {reason}", path.display())]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Parser error text
        reason: String,
    },

    /// An override value is malformed
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Setting or environment variable name
        key: String,
        /// Raw value
        value: String,
    },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
