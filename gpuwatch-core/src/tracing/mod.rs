//! Structured logging setup
//!
//! Library code only emits `tracing` events and spans. Front ends call
//! [`init_tracing`] once to install a `tracing-subscriber` registry with an
//! `EnvFilter` and a single `fmt` layer.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Environment variable naming a file that receives a debug-level log
pub const DEBUG_LOG_ENV: &str = "GPUWATCH_DEBUG_LOG";

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    /// The subscriber could not be installed
    #[error("Failed to initialize tracing: {0}")]
    InitializationFailed(String),

    /// The filter directive did not parse
    #[error("Invalid filter directive: {0}")]
    InvalidFilter(String),

    /// [`init_tracing`] was already called in this process
    #[error("Tracing has already been initialized")]
    AlreadyInitialized,

    /// The log file could not be opened
    #[error("Failed to open log file {}: {reason}", path.display())]
    FileCreationFailed {
        /// Requested log file
        path: PathBuf,
        /// OS error text
        reason: String,
    },
}

/// Result type for tracing operations
pub type TracingResult<T> = Result<T, TracingError>;

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingLevel {
    /// Errors only
    Error,
    /// Errors and warnings (malformed rows, failed probes)
    Warn,
    /// Lifecycle events such as channel establishment
    #[default]
    Info,
    /// Every fetch and process invocation
    Debug,
    /// Everything
    Trace,
}

impl TracingLevel {
    /// Converts to the `tracing` crate's level
    #[must_use]
    pub const fn to_tracing_level(self) -> Level {
        match self {
            Self::Error => Level::ERROR,
            Self::Warn => Level::WARN,
            Self::Info => Level::INFO,
            Self::Debug => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Maps a `-v` count to a level, starting from `Warn`
    #[must_use]
    pub const fn from_verbosity(count: u8) -> Self {
        match count {
            0 => Self::Warn,
            1 => Self::Info,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl std::str::FromStr for TracingLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TracingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TracingOutput {
    /// Standard output
    Stdout,
    /// Standard error
    #[default]
    Stderr,
    /// A plain-text file (no ANSI colours)
    File {
        /// Path to the log file
        path: PathBuf,
        /// Append instead of truncating
        append: bool,
    },
}

/// Configuration for [`init_tracing`]
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level applied to the `gpuwatch` targets
    pub level: TracingLevel,
    /// Output destination
    pub output: TracingOutput,
    /// Include the event target (module path) in each line
    pub include_target: bool,
    /// Include thread ids in each line
    pub include_thread_ids: bool,
    /// Custom `EnvFilter` directive (overrides `level` if set)
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: TracingLevel::Info,
            output: TracingOutput::Stderr,
            include_target: true,
            include_thread_ids: cfg!(debug_assertions),
            filter: None,
        }
    }
}

impl TracingConfig {
    /// Creates a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log level
    #[must_use]
    pub const fn with_level(mut self, level: TracingLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the output destination
    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Sets whether targets are printed
    #[must_use]
    pub const fn with_target(mut self, include: bool) -> Self {
        self.include_target = include;
        self
    }

    /// Sets whether thread ids are printed
    #[must_use]
    pub const fn with_thread_ids(mut self, include: bool) -> Self {
        self.include_thread_ids = include;
        self
    }

    /// Sets a custom filter directive
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Debug level on stderr with thread ids
    #[must_use]
    pub const fn development() -> Self {
        Self {
            level: TracingLevel::Debug,
            output: TracingOutput::Stderr,
            include_target: true,
            include_thread_ids: true,
            filter: None,
        }
    }

    /// Warn level on stderr, terse
    #[must_use]
    pub const fn production() -> Self {
        Self {
            level: TracingLevel::Warn,
            output: TracingOutput::Stderr,
            include_target: false,
            include_thread_ids: false,
            filter: None,
        }
    }

    /// Filter directive actually installed
    #[must_use]
    pub fn filter_directive(&self) -> String {
        self.filter.clone().unwrap_or_else(|| {
            format!(
                "gpuwatch_core={level},gpuwatch={level}",
                level = self.level
            )
        })
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`TracingError::AlreadyInitialized`] on a second call,
/// [`TracingError::InvalidFilter`] for a bad custom filter,
/// [`TracingError::FileCreationFailed`] if the log file cannot be opened,
/// and [`TracingError::InitializationFailed`] if another global subscriber
/// is already installed.
pub fn init_tracing(config: &TracingConfig) -> TracingResult<()> {
    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(TracingError::AlreadyInitialized);
    }

    let result = install(config);
    if result.is_err() {
        TRACING_INITIALIZED.store(false, Ordering::SeqCst);
        return result;
    }

    tracing::debug!(
        level = %config.level,
        filter = %config.filter_directive(),
        "Tracing initialized"
    );
    Ok(())
}

fn install(config: &TracingConfig) -> TracingResult<()> {
    let filter = EnvFilter::try_new(config.filter_directive())
        .map_err(|e| TracingError::InvalidFilter(e.to_string()))?;

    let (writer, ansi) = match &config.output {
        TracingOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        TracingOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        TracingOutput::File { path, append } => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(*append)
                .truncate(!*append)
                .open(path)
                .map_err(|e| TracingError::FileCreationFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            (BoxMakeWriter::new(file), false)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(config.include_target)
                .with_level(true)
                .with_thread_ids(config.include_thread_ids)
                .with_ansi(ansi)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| TracingError::InitializationFailed(e.to_string()))
}

/// Creates an info-level span with a standard name from [`span_names`]
///
/// ```ignore
/// let span = gpuwatch_core::trace_operation!(span_names::FETCH, host = %host);
/// ```
#[macro_export]
macro_rules! trace_operation {
    ($name:expr) => {
        tracing::info_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}

/// Debug-level variant of [`trace_operation!`] for frequent operations
#[macro_export]
macro_rules! trace_operation_debug {
    ($name:expr) => {
        tracing::debug_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::debug_span!($name, $($field)*)
    };
}

/// Standard span names
pub mod span_names {
    /// Making a control channel ready (probe or establish)
    pub const CHANNEL_ENSURE: &str = "channel.ensure";
    /// Tearing down a control channel
    pub const CHANNEL_CLOSE: &str = "channel.close";
    /// One metrics fetch
    pub const FETCH: &str = "metrics.fetch";
    /// One scheduler refresh cycle (fetch, render, publish)
    pub const REFRESH: &str = "scheduler.refresh";
    /// Scheduler shutdown
    pub const SHUTDOWN: &str = "scheduler.shutdown";
}
