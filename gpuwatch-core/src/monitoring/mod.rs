//! Remote GPU monitoring over a multiplexed SSH channel
//!
//! Runs a fixed `nvidia-smi` query on the target through an OpenSSH
//! `ControlMaster`, parses the CSV output and publishes the latest
//! [`Snapshot`] on a timer.
//!
//! This module is GUI-free; front ends implement [`SnapshotSink`] and drive
//! [`RefreshScheduler`] with manual, suspend and resume requests.

pub mod channel;
pub mod exec;
pub mod fetcher;
mod metrics;
mod parser;
pub mod scheduler;
pub mod summary;

pub use channel::{ChannelKey, ChannelReady, ChannelState, ConnectionManager, ConnectionRecord};
pub use exec::{CommandOutput, CommandRunner, Invocation, ProcessRunner, RunError};
pub use fetcher::{FetchTarget, MetricsFetcher, SnapshotSource};
pub use metrics::{GpuReading, Snapshot, SnapshotStatus};
pub use parser::{FIELD_COUNT, GPU_QUERY_COMMAND, MonitoringError, MonitoringResult, ReadingParser};
pub use scheduler::{
    DEFAULT_DRAIN_TIMEOUT, RefreshScheduler, RefreshSettings, SchedulerState, SnapshotSink,
    TriggerOutcome, TriggerSource,
};
