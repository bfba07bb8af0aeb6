//! Loading settings from disk and the environment

use std::path::{Path, PathBuf};

use super::ConfigError;
use super::settings::AppSettings;

/// Name of the settings file inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding [`AppSettings::host`]
pub const ENV_HOST: &str = "GPU_SERVER_HOST";
/// Environment variable overriding [`AppSettings::identity`]
pub const ENV_USER: &str = "GPU_SERVER_USER";
/// Environment variable overriding [`AppSettings::refresh_interval_secs`]
pub const ENV_REFRESH_INTERVAL: &str = "GPU_REFRESH_INTERVAL";
/// Environment variable overriding [`AppSettings::fetch_timeout_secs`]
pub const ENV_FETCH_TIMEOUT: &str = "GPU_FETCH_TIMEOUT";
/// Environment variable overriding [`AppSettings::show_percentages`]
pub const ENV_SHOW_PERCENTAGES: &str = "GPU_SHOW_PERCENTAGES";

/// Locates and reads `config.toml`
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a manager for the default directory (`$XDG_CONFIG_HOME/gpuwatch`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] if the platform has no
    /// configuration directory.
    pub fn new() -> Result<Self, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self {
            config_dir: base.join("gpuwatch"),
        })
    }

    /// Creates a manager rooted at a custom directory
    #[must_use]
    pub fn with_config_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Directory holding `config.toml`
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Full path of `config.toml`
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Loads settings from `config.toml`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file exists but cannot be read and
    /// [`ConfigError::Parse`] if it is not valid TOML.
    pub fn load_settings(&self) -> Result<AppSettings, ConfigError> {
        Self::load_from(&self.config_path())
    }

    /// Loads settings from an explicit file path; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// See [`Self::load_settings`].
    pub fn load_from(path: &Path) -> Result<AppSettings, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(AppSettings::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let settings = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(settings)
    }

    /// Loads settings and applies overrides from the process environment
    ///
    /// # Errors
    ///
    /// See [`Self::load_settings`] and [`apply_env_overrides`].
    pub fn load_with_env(&self) -> Result<AppSettings, ConfigError> {
        let mut settings = self.load_settings()?;
        apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
        Ok(settings)
    }
}

/// Applies `GPU_*` environment overrides using `lookup` to read variables.
///
/// Taking a lookup function keeps this testable without mutating the real
/// process environment.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if a numeric or boolean override
/// cannot be parsed.
pub fn apply_env_overrides<F>(settings: &mut AppSettings, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup(ENV_HOST).filter(|v| !v.trim().is_empty()) {
        settings.host = host.trim().to_string();
    }
    if let Some(user) = lookup(ENV_USER) {
        let user = user.trim();
        settings.identity = (!user.is_empty()).then(|| user.to_string());
    }
    if let Some(raw) = lookup(ENV_REFRESH_INTERVAL) {
        settings.refresh_interval_secs = parse_secs(ENV_REFRESH_INTERVAL, &raw)?;
    }
    if let Some(raw) = lookup(ENV_FETCH_TIMEOUT) {
        settings.fetch_timeout_secs = parse_secs(ENV_FETCH_TIMEOUT, &raw)?;
    }
    if let Some(raw) = lookup(ENV_SHOW_PERCENTAGES) {
        settings.show_percentages = match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: ENV_SHOW_PERCENTAGES.to_string(),
                    value: raw,
                });
            }
        };
    }
    Ok(())
}

/// Accepts whole or fractional seconds ("300", "2.5"); fractions round up
fn parse_secs(key: &str, raw: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    };
    let value: f64 = raw.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(value.ceil() as u64)
}
