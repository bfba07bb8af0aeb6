//! Persistent multiplexed SSH channels
//!
//! One OpenSSH `ControlMaster` per (host, identity). The master is started
//! once and every later command is routed through its control socket, so a
//! refresh costs a single round trip instead of a full handshake.
//!
//! Before a channel is reused it is probed with `ssh -O check`. A failed
//! probe marks the record stale, removes the socket file and falls through to
//! re-establishment in the same call.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::time::Instant;
use tracing::Instrument;

use super::exec::{CommandRunner, Invocation, RunError};
use crate::config::ChannelSettings;
use crate::error::ConnError;
use crate::tracing::span_names;

/// Identifies one channel: target host plus optional remote user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    host: String,
    identity: Option<String>,
}

impl ChannelKey {
    /// Creates a key; an empty identity is treated as none
    #[must_use]
    pub fn new(host: &str, identity: Option<&str>) -> Self {
        Self {
            host: host.to_string(),
            identity: identity.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    /// Target host
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote user, if any
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// `user@host` or just `host`
    #[must_use]
    pub fn destination(&self) -> String {
        match &self.identity {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn file_stem(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// Lifecycle of a control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No master is known to be running
    #[default]
    Unestablished,
    /// The master was started and its last probe succeeded
    Active,
    /// The last probe failed; the next use re-establishes
    Stale,
}

/// Book-keeping for one (host, identity) channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    socket_path: PathBuf,
    state: ChannelState,
    established_at: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            state: ChannelState::Unestablished,
            established_at: None,
        }
    }

    /// Control socket used by the master
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// When the current master was started
    #[must_use]
    pub const fn established_at(&self) -> Option<DateTime<Utc>> {
        self.established_at
    }
}

/// Returned by [`ConnectionManager::ensure_channel`] once a channel is usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReady {
    /// Control socket to route commands through
    pub socket_path: PathBuf,
    /// True if an existing master passed its probe
    pub reused: bool,
}

type RecordSlot = Arc<tokio::sync::Mutex<ConnectionRecord>>;

/// Owns the control masters and their sockets.
///
/// Sockets live in a private temporary directory created with the manager
/// and removed by [`Self::close_all`]. The record map is guarded by a short
/// synchronous lock; each record has its own async lock held across the
/// probe/establish/close process calls, so different keys never wait on
/// each other and a key is never established twice concurrently.
pub struct ConnectionManager {
    runner: Arc<dyn CommandRunner>,
    settings: ChannelSettings,
    socket_dir_path: PathBuf,
    socket_dir: Mutex<Option<TempDir>>,
    records: Mutex<HashMap<ChannelKey, RecordSlot>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("socket_dir", &self.socket_dir_path)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager with a fresh socket directory.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the temporary directory cannot be created.
    pub fn new(runner: Arc<dyn CommandRunner>, settings: ChannelSettings) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("gpuwatch-").tempdir()?;
        Ok(Self {
            runner,
            settings,
            socket_dir_path: dir.path().to_path_buf(),
            socket_dir: Mutex::new(Some(dir)),
            records: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Directory holding the control sockets
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir_path
    }

    /// Channel parameters in use
    #[must_use]
    pub const fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Returns true once [`Self::close_all`] has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Control socket path for a key (deterministic, no I/O)
    #[must_use]
    pub fn socket_path_for(&self, key: &ChannelKey) -> PathBuf {
        self.socket_dir_path.join(format!("{}.sock", key.file_stem()))
    }

    fn log_path_for(&self, key: &ChannelKey) -> PathBuf {
        self.socket_dir_path.join(format!("{}.log", key.file_stem()))
    }

    fn slot(&self, key: &ChannelKey) -> RecordSlot {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(records.entry(key.clone()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(ConnectionRecord::new(
                self.socket_path_for(key),
            )))
        }))
    }

    fn existing_slot(&self, key: &ChannelKey) -> Option<RecordSlot> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Makes sure a usable master exists for (host, identity).
    ///
    /// An active channel is probed first; a stale or missing one is
    /// (re-)established. `timeout` bounds the whole call: waiting for the
    /// record, the probe and establishment share it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnError::EstablishFailed`] if the master cannot be
    /// started in time or ssh exits non-zero. The record is then left
    /// [`ChannelState::Unestablished`].
    pub async fn ensure_channel(
        &self,
        host: &str,
        identity: Option<&str>,
        timeout: Duration,
    ) -> Result<ChannelReady, ConnError> {
        let key = ChannelKey::new(host, identity);
        let span = crate::trace_operation_debug!(span_names::CHANNEL_ENSURE, host = %key.host);

        async {
            if self.is_closed() {
                return Err(ConnError::EstablishFailed {
                    host: key.host.clone(),
                    detail: "connection manager is closed".to_string(),
                });
            }

            let started = Instant::now();
            let slot = self.slot(&key);
            let mut record = slot.lock().await;

            if record.state == ChannelState::Active {
                let budget = timeout.saturating_sub(started.elapsed());
                match self.probe(&key, &record.socket_path, budget).await {
                    Ok(()) => {
                        tracing::debug!(socket = %record.socket_path.display(), "Reusing SSH channel");
                        return Ok(ChannelReady {
                            socket_path: record.socket_path.clone(),
                            reused: true,
                        });
                    }
                    Err(err) => {
                        tracing::warn!(host = %key.host, error = %err, "SSH channel is stale, re-establishing");
                        record.state = ChannelState::Stale;
                        record.established_at = None;
                        remove_file_quiet(&record.socket_path).await;
                    }
                }
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            let result = if remaining.is_zero() {
                Err(ConnError::EstablishFailed {
                    host: key.host.clone(),
                    detail: format!("timed out after {}s", timeout.as_secs_f32()),
                })
            } else {
                self.establish(&key, &record.socket_path, remaining).await
            };

            match result {
                Ok(()) => {
                    record.state = ChannelState::Active;
                    record.established_at = Some(Utc::now());
                    tracing::info!(host = %key.host, socket = %record.socket_path.display(), "SSH channel established");
                    Ok(ChannelReady {
                        socket_path: record.socket_path.clone(),
                        reused: false,
                    })
                }
                Err(err) => {
                    record.state = ChannelState::Unestablished;
                    record.established_at = None;
                    remove_file_quiet(&record.socket_path).await;
                    tracing::warn!(host = %key.host, error = %err, "SSH channel establishment failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs `ssh -O check` against an existing channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConnError::ProbeFailed`] if no record exists or the master
    /// does not answer within the probe timeout.
    pub async fn check_channel(&self, host: &str, identity: Option<&str>) -> Result<(), ConnError> {
        let key = ChannelKey::new(host, identity);
        let Some(slot) = self.existing_slot(&key) else {
            return Err(ConnError::ProbeFailed {
                host: key.host,
                detail: "no channel".to_string(),
            });
        };
        let record = slot.lock().await;
        self.probe(&key, &record.socket_path, self.settings.probe_timeout())
            .await
    }

    async fn probe(&self, key: &ChannelKey, socket: &Path, budget: Duration) -> Result<(), ConnError> {
        let probe_failed = |detail: String| ConnError::ProbeFailed {
            host: key.host.clone(),
            detail,
        };

        let timeout = self.settings.probe_timeout().min(budget);
        let invocation = self.control_invocation(key, socket, "check");
        match self.runner.run(&invocation, timeout).await {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(probe_failed(output.failure_detail())),
            Err(err) => Err(probe_failed(err.to_string())),
        }
    }

    async fn establish(&self, key: &ChannelKey, socket: &Path, timeout: Duration) -> Result<(), ConnError> {
        let log_path = self.log_path_for(key);
        // ssh refuses to become master over an existing socket file
        remove_file_quiet(socket).await;
        remove_file_quiet(&log_path).await;

        let invocation = self.establish_invocation(key, socket, &log_path);
        tracing::debug!(host = %key.host, args = ?invocation.args, "Starting SSH control master");

        let detail = match self.runner.run(&invocation, timeout).await {
            Ok(output) if output.success => return Ok(()),
            Ok(output) => read_ssh_log(&log_path)
                .await
                .unwrap_or_else(|| output.failure_detail()),
            Err(RunError::Timeout(limit)) => {
                format!("timed out after {}s", limit.as_secs_f32())
            }
            Err(err) => err.to_string(),
        };

        Err(ConnError::EstablishFailed {
            host: key.host.clone(),
            detail,
        })
    }

    /// Argv (program first) that runs a remote command through the channel.
    ///
    /// `ControlMaster=auto` lets the command fall back to a direct
    /// connection if the master disappeared in between.
    #[must_use]
    pub fn command_prefix(&self, host: &str, identity: Option<&str>) -> Vec<String> {
        let key = ChannelKey::new(host, identity);
        let socket = self.socket_path_for(&key);
        let mut argv = vec![self.settings.ssh_program.clone()];
        push_option(&mut argv, "ControlMaster", "auto");
        push_option(&mut argv, "ControlPath", &socket.to_string_lossy());
        push_option(&mut argv, "BatchMode", "yes");
        push_option(
            &mut argv,
            "ConnectTimeout",
            &self.settings.connect_timeout_secs.to_string(),
        );
        self.push_identity_file(&mut argv);
        argv.push(key.destination());
        argv
    }

    fn establish_invocation(&self, key: &ChannelKey, socket: &Path, log_path: &Path) -> Invocation {
        let s = &self.settings;
        let mut argv = vec![
            s.ssh_program.clone(),
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-E".to_string(),
            log_path.to_string_lossy().into_owned(),
        ];
        push_option(&mut argv, "ControlMaster", "yes");
        push_option(&mut argv, "ControlPath", &socket.to_string_lossy());
        push_option(&mut argv, "ControlPersist", &s.persist_secs.to_string());
        push_option(&mut argv, "ServerAliveInterval", &s.keepalive_interval_secs.to_string());
        push_option(&mut argv, "ServerAliveCountMax", &s.keepalive_count_max.to_string());
        push_option(&mut argv, "ConnectTimeout", &s.connect_timeout_secs.to_string());
        push_option(&mut argv, "BatchMode", "yes");
        self.push_identity_file(&mut argv);
        argv.push(key.destination());

        // `-f` leaves a daemon holding inherited pipes; only the exit status
        // is read and errors go to the `-E` log
        Invocation::from_argv(argv).status_only()
    }

    fn control_invocation(&self, key: &ChannelKey, socket: &Path, op: &str) -> Invocation {
        Invocation::from_argv(vec![
            self.settings.ssh_program.clone(),
            "-S".to_string(),
            socket.to_string_lossy().into_owned(),
            "-O".to_string(),
            op.to_string(),
            key.destination(),
        ])
    }

    fn push_identity_file(&self, argv: &mut Vec<String>) {
        if let Some(key_file) = self.settings.expanded_identity_file() {
            argv.push("-i".to_string());
            argv.push(key_file.to_string_lossy().into_owned());
            push_option(argv, "IdentitiesOnly", "yes");
        }
    }

    /// Tears down one channel. Best effort: errors are logged and ignored.
    pub async fn close_channel(&self, host: &str, identity: Option<&str>) {
        let key = ChannelKey::new(host, identity);
        let slot = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&key);
        if let Some(slot) = slot {
            self.close_slot(&key, &slot).await;
        }
    }

    async fn close_slot(&self, key: &ChannelKey, slot: &RecordSlot) {
        let span = crate::trace_operation_debug!(span_names::CHANNEL_CLOSE, host = %key.host);
        async {
            let mut record = slot.lock().await;
            let socket_exists = tokio::fs::try_exists(&record.socket_path)
                .await
                .unwrap_or(false);

            if record.state != ChannelState::Unestablished || socket_exists {
                let invocation = self.control_invocation(key, &record.socket_path, "exit");
                match self.runner.run(&invocation, self.settings.close_timeout()).await {
                    Ok(output) if output.success => {
                        tracing::debug!(host = %key.host, "SSH control master stopped");
                    }
                    Ok(output) => {
                        tracing::debug!(host = %key.host, detail = %output.failure_detail(), "ssh -O exit failed");
                    }
                    Err(err) => {
                        tracing::debug!(host = %key.host, error = %err, "ssh -O exit failed");
                    }
                }
            }

            remove_file_quiet(&record.socket_path).await;
            remove_file_quiet(&self.log_path_for(key)).await;
            record.state = ChannelState::Unestablished;
            record.established_at = None;
        }
        .instrument(span)
        .await;
    }

    /// Closes every channel concurrently and removes the socket directory.
    ///
    /// Intended to run once at shutdown; later calls are no-ops and
    /// [`Self::ensure_channel`] fails afterwards.
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<(ChannelKey, RecordSlot)> = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain()
            .collect();
        let count = drained.len();

        futures::future::join_all(
            drained
                .iter()
                .map(|(key, slot)| self.close_slot(key, slot)),
        )
        .await;

        let dir = self
            .socket_dir
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(dir) = dir
            && let Err(e) = dir.close()
        {
            tracing::debug!(error = %e, "Failed to remove socket directory");
        }

        tracing::debug!(channels = count, "All SSH channels closed");
    }

    /// State of the channel for (host, identity); `Unestablished` if unknown
    pub async fn channel_state(&self, host: &str, identity: Option<&str>) -> ChannelState {
        match self.existing_slot(&ChannelKey::new(host, identity)) {
            Some(slot) => slot.lock().await.state,
            None => ChannelState::Unestablished,
        }
    }

    /// Copy of the record for (host, identity), if one exists
    pub async fn record(&self, host: &str, identity: Option<&str>) -> Option<ConnectionRecord> {
        let slot = self.existing_slot(&ChannelKey::new(host, identity))?;
        let record = slot.lock().await.clone();
        Some(record)
    }
}

fn push_option(argv: &mut Vec<String>, name: &str, value: &str) {
    argv.push("-o".to_string());
    argv.push(format!("{name}={value}"));
}

async fn remove_file_quiet(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %path.display(), error = %e, "Failed to remove file");
    }
}

/// Last non-empty line ssh wrote to its `-E` log
async fn read_ssh_log(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    content
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
