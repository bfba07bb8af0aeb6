//! One bounded-latency metrics fetch
//!
//! Ensures the channel, runs the fixed query through it and parses the
//! result. Every failure is folded into the returned [`Snapshot`]; there are
//! no retries here, the scheduler simply tries again on its next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::Instrument;

use super::channel::ConnectionManager;
use super::exec::{CommandRunner, Invocation, RunError};
use super::metrics::Snapshot;
use super::parser::{GPU_QUERY_COMMAND, ReadingParser};
use crate::config::AppSettings;
use crate::error::FetchError;
use crate::tracing::span_names;

/// Where and how long to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// Target host
    pub host: String,
    /// Remote user
    pub identity: Option<String>,
    /// Total budget for channel setup plus the remote command
    pub timeout: Duration,
}

impl FetchTarget {
    /// Creates a target
    #[must_use]
    pub fn new(host: impl Into<String>, identity: Option<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            identity: identity.filter(|s| !s.is_empty()),
            timeout,
        }
    }

    /// Target described by loaded settings
    #[must_use]
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(
            settings.host.clone(),
            settings.identity().map(str::to_string),
            settings.fetch_timeout(),
        )
    }
}

/// Anything that can produce snapshots for the scheduler
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetches one snapshot. Never fails; errors are carried in the status.
    async fn fetch_snapshot(&self, target: &FetchTarget) -> Snapshot;

    /// Releases remote resources (called once at shutdown)
    async fn close_all(&self);
}

/// Fetches GPU metrics over a multiplexed SSH channel
pub struct MetricsFetcher {
    connections: Arc<ConnectionManager>,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for MetricsFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsFetcher")
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl MetricsFetcher {
    /// Creates a fetcher that runs [`GPU_QUERY_COMMAND`]
    #[must_use]
    pub fn new(connections: Arc<ConnectionManager>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            connections,
            runner,
        }
    }

    /// Shared connection manager
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Fetches a snapshot from `host` within `timeout`.
    ///
    /// The timeout covers both channel setup and the remote command; the
    /// command gets whatever budget remains after the channel is ready.
    pub async fn fetch(&self, host: &str, identity: Option<&str>, timeout: Duration) -> Snapshot {
        let span = crate::trace_operation_debug!(span_names::FETCH, host = %host);
        async {
            let started = Instant::now();
            let snapshot = match self.try_fetch(host, identity, timeout, started).await {
                Ok(snapshot) => snapshot,
                Err(err) => Snapshot::failed(host, err),
            };

            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match snapshot.error() {
                None => tracing::debug!(
                    reading_count = snapshot.readings.len(),
                    duration_ms,
                    "Fetched GPU metrics"
                ),
                Some(err) => tracing::warn!(host = %host, error = %err, duration_ms, "GPU metrics fetch failed"),
            }
            snapshot
        }
        .instrument(span)
        .await
    }

    async fn try_fetch(
        &self,
        host: &str,
        identity: Option<&str>,
        timeout: Duration,
        started: Instant,
    ) -> Result<Snapshot, FetchError> {
        self.connections
            .ensure_channel(host, identity, timeout)
            .await
            .map_err(|e| FetchError::Connection(e.detail().to_string()))?;

        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(FetchError::Timeout(timeout));
        }

        let mut argv = self.connections.command_prefix(host, identity);
        argv.push(GPU_QUERY_COMMAND.to_string());
        let invocation = Invocation::from_argv(argv);

        let output = match self.runner.run(&invocation, remaining).await {
            Ok(output) => output,
            Err(RunError::Timeout(_)) => return Err(FetchError::Timeout(timeout)),
            Err(err @ RunError::Spawn { .. }) => return Err(FetchError::Connection(err.to_string())),
        };

        if !output.success {
            return Err(FetchError::RemoteCommandFailed(output.failure_detail()));
        }

        Ok(Snapshot::from_readings(
            host,
            ReadingParser::parse(&output.stdout),
        ))
    }
}

#[async_trait]
impl SnapshotSource for MetricsFetcher {
    async fn fetch_snapshot(&self, target: &FetchTarget) -> Snapshot {
        self.fetch(&target.host, target.identity.as_deref(), target.timeout)
            .await
    }

    async fn close_all(&self) {
        self.connections.close_all().await;
    }
}
