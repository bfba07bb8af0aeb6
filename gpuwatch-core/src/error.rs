//! Error types for `GpuWatch`
//!
//! Each concern owns a `thiserror` enum. Snapshots carry [`FetchError`];
//! the other kinds stay with the module that raises them.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while managing a multiplexed SSH channel.
///
/// These never escape a fetch: [`crate::monitoring::MetricsFetcher`] turns
/// them into [`FetchError::Connection`] on the published snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnError {
    /// The control master could not be started (timeout, auth failure,
    /// unreachable host, missing `ssh` binary)
    #[error("Failed to establish SSH channel to {host}: {detail}")]
    EstablishFailed {
        /// Destination the channel was opened for
        host: String,
        /// Human-readable cause
        detail: String,
    },

    /// The liveness probe on an existing channel failed
    #[error("SSH channel to {host} failed liveness probe: {detail}")]
    ProbeFailed {
        /// Destination the channel was opened for
        host: String,
        /// Human-readable cause
        detail: String,
    },
}

impl ConnError {
    /// Returns the human-readable cause without the host prefix
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::EstablishFailed { detail, .. } | Self::ProbeFailed { detail, .. } => detail,
        }
    }
}

/// Failure kinds of a single metrics fetch.
///
/// Carried by [`crate::monitoring::SnapshotStatus::Error`]. `Empty` is the
/// error view of [`crate::monitoring::SnapshotStatus::Empty`] and is distinct
/// from any transport failure.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    /// The SSH channel could not be made ready
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote command did not finish within the fetch budget
    #[error("Timed out: exceeded {}", format_secs(.0))]
    Timeout(#[serde(serialize_with = "serialize_secs")] Duration),

    /// The remote command exited with a non-zero status
    #[error("Remote command failed: {0}")]
    RemoteCommandFailed(String),

    /// The remote command succeeded but produced no parsable rows
    #[error("No GPU readings in remote output")]
    Empty,
}

impl FetchError {
    /// Short machine-friendly name of the failure kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::RemoteCommandFailed(_) => "remote_command_failed",
            Self::Empty => "empty",
        }
    }
}

/// Whole seconds as `10s`, anything finer to one decimal (`0.3s`)
fn format_secs(value: &Duration) -> String {
    if value.subsec_nanos() == 0 {
        format!("{}s", value.as_secs())
    } else {
        format!("{:.1}s", value.as_secs_f64())
    }
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    if value.subsec_nanos() == 0 {
        serializer.serialize_u64(value.as_secs())
    } else {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
