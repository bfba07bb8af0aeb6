//! `GpuWatch` Core Library
//!
//! Polls GPU utilization on a remote machine over a reused SSH session and
//! turns it into a small status icon plus a text summary.
//!
//! # Crate Structure
//!
//! - [`monitoring`] - SSH channels, the metrics fetch, CSV parsing and the refresh scheduler
//! - [`icon`] - Utilization bars rendered to PNG
//! - [`config`] - Settings file and environment overrides
//! - [`error`] - Error types
//! - [`tracing`] - Logging setup

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod icon;
pub mod monitoring;
pub mod tracing;

pub use config::{AppSettings, ChannelSettings, ConfigError, ConfigManager};
pub use error::{ConnError, FetchError};
pub use icon::{BarSpec, ColorBand, IconError, IconRenderer, RenderSpec};
pub use monitoring::{
    ChannelState, CommandRunner, ConnectionManager, GpuReading, MetricsFetcher, ProcessRunner,
    ReadingParser, RefreshScheduler, RefreshSettings, SchedulerState, Snapshot, SnapshotSink,
    SnapshotStatus, TriggerOutcome,
};
pub use tracing::{
    TracingConfig, TracingError, TracingLevel, TracingOutput, TracingResult, init_tracing,
};
