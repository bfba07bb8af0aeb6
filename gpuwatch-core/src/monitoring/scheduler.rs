//! Periodic refresh driver
//!
//! Triggers come from three places: the interval timer, a manual request
//! from the UI and resume after host sleep. All of them try to take a single
//! "fetch in flight" lock; a trigger that finds it held does nothing. The
//! fetch runs on the runtime captured at construction so callers on a UI
//! thread never block.
//!
//! Each completed fetch publishes, in order: the snapshot to the watch slot,
//! the snapshot to the sink, the rendered icon to the sink. The lock is
//! released only after publishing, so published snapshots never go back in
//! time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use super::fetcher::{FetchTarget, SnapshotSource};
use super::metrics::Snapshot;
use crate::config::AppSettings;
use crate::icon::{IconRenderer, RenderSpec};
use crate::tracing::span_names;

/// Default bound on waiting for an in-flight fetch at shutdown
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Receives everything the scheduler publishes.
///
/// Callbacks run on a runtime worker; a GUI front end forwards them to its
/// own main loop.
pub trait SnapshotSink: Send + Sync {
    /// A new snapshot replaced the previous one
    fn on_snapshot_published(&self, snapshot: &Snapshot);

    /// The icon for the snapshot just published
    fn on_render_published(&self, png: &[u8]);
}

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No fetch in flight
    Idle,
    /// A fetch is in flight
    Running,
    /// Host is asleep; timer disarmed and triggers ignored
    Suspended,
}

/// What a trigger did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A fetch was started
    Started,
    /// Another fetch is in flight; nothing was queued
    AlreadyRunning,
    /// The scheduler is suspended
    Suspended,
    /// The scheduler has been shut down
    ShutDown,
}

/// Why a refresh was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// First fetch from [`RefreshScheduler::start`]
    Startup,
    /// Interval timer tick
    Timer,
    /// UI request
    Manual,
    /// Host woke up
    Resume,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Startup => "startup",
            Self::Timer => "timer",
            Self::Manual => "manual",
            Self::Resume => "resume",
        })
    }
}

/// Scheduler parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSettings {
    /// What to fetch
    pub target: FetchTarget,
    /// Time between timer-driven refreshes
    pub interval: Duration,
    /// Icon edge in pixels
    pub icon_size: u32,
    /// How long shutdown waits for an in-flight fetch before abandoning it
    pub drain_timeout: Duration,
}

impl RefreshSettings {
    /// Parameters derived from loaded settings
    #[must_use]
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            target: FetchTarget::from_settings(settings),
            interval: settings.refresh_interval(),
            icon_size: settings.effective_icon_size(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Sets the shutdown drain bound
    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Drives a [`SnapshotSource`] on a timer and publishes the results
pub struct RefreshScheduler {
    source: Arc<dyn SnapshotSource>,
    sink: Arc<dyn SnapshotSink>,
    renderer: IconRenderer,
    settings: RefreshSettings,
    runtime: Handle,
    fetch_lock: Arc<tokio::sync::Mutex<()>>,
    latest: watch::Sender<Option<Arc<Snapshot>>>,
    suspended: AtomicBool,
    shut_down: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    /// Creates an idle scheduler; nothing runs until [`Self::start`].
    ///
    /// Fetches and the timer are spawned on `runtime`, so this can be called
    /// from a thread that is not part of the runtime.
    #[must_use]
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        sink: Arc<dyn SnapshotSink>,
        settings: RefreshSettings,
        runtime: Handle,
    ) -> Arc<Self> {
        let (latest, _) = watch::channel(None);
        Arc::new(Self {
            source,
            sink,
            renderer: IconRenderer::new(settings.icon_size),
            settings,
            runtime,
            fetch_lock: Arc::new(tokio::sync::Mutex::new(())),
            latest,
            suspended: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            timer: Mutex::new(None),
            in_flight: Mutex::new(None),
        })
    }

    /// Scheduler parameters
    #[must_use]
    pub const fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if self.suspended.load(Ordering::SeqCst) {
            SchedulerState::Suspended
        } else if self.fetch_lock.try_lock().is_err() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Returns true once [`Self::shutdown`] has started
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Returns true while the interval timer is armed
    #[must_use]
    pub fn is_timer_armed(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Most recently published snapshot
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.borrow().clone()
    }

    /// Watch receiver for published snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.latest.subscribe()
    }

    /// Runs one immediate fetch and arms the interval timer
    pub fn start(self: &Arc<Self>) -> TriggerOutcome {
        let outcome = self.trigger(TriggerSource::Startup);
        if matches!(outcome, TriggerOutcome::Started | TriggerOutcome::AlreadyRunning) {
            self.arm_timer();
        }
        outcome
    }

    /// Requests an immediate refresh; ignored while suspended or busy
    pub fn manual_refresh(self: &Arc<Self>) -> TriggerOutcome {
        self.trigger(TriggerSource::Manual)
    }

    /// Host is going to sleep: disarm the timer and ignore triggers.
    ///
    /// A fetch already in flight still completes and publishes.
    pub fn suspend(&self) {
        if self.is_shut_down() || self.suspended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disarm_timer();
        tracing::info!("Refresh suspended");
    }

    /// Host woke up: fetch immediately and re-arm the timer.
    ///
    /// Returns `None` if the scheduler was not suspended.
    pub fn resume(self: &Arc<Self>) -> Option<TriggerOutcome> {
        if self.is_shut_down() {
            return Some(TriggerOutcome::ShutDown);
        }
        if !self.suspended.swap(false, Ordering::SeqCst) {
            tracing::debug!("Resume while not suspended, ignored");
            return None;
        }
        tracing::info!("Refresh resumed");
        let outcome = self.trigger(TriggerSource::Resume);
        self.arm_timer();
        Some(outcome)
    }

    /// Starts a fetch unless one is in flight
    pub fn trigger(self: &Arc<Self>, source: TriggerSource) -> TriggerOutcome {
        if self.is_shut_down() {
            return TriggerOutcome::ShutDown;
        }
        if self.suspended.load(Ordering::SeqCst) {
            tracing::debug!(trigger = %source, "Trigger ignored while suspended");
            return TriggerOutcome::Suspended;
        }
        let Ok(guard) = Arc::clone(&self.fetch_lock).try_lock_owned() else {
            tracing::debug!(trigger = %source, "Refresh already in flight");
            return TriggerOutcome::AlreadyRunning;
        };

        let this = Arc::clone(self);
        let handle = self
            .runtime
            .spawn(async move { this.refresh(source, guard).await });
        *lock(&self.in_flight) = Some(handle);
        TriggerOutcome::Started
    }

    async fn refresh(&self, source: TriggerSource, guard: OwnedMutexGuard<()>) {
        let span = crate::trace_operation!(
            span_names::REFRESH,
            trigger = %source,
            host = %self.settings.target.host
        );
        async {
            let snapshot = self.source.fetch_snapshot(&self.settings.target).await;
            let spec = RenderSpec::from_snapshot(&snapshot);
            let png = self.renderer.render_spec(&spec);

            let snapshot = Arc::new(snapshot);
            self.latest.send_replace(Some(Arc::clone(&snapshot)));
            self.sink.on_snapshot_published(&snapshot);
            match png {
                Ok(png) => self.sink.on_render_published(&png),
                Err(err) => tracing::warn!(error = %err, "Icon rendering failed"),
            }
            tracing::debug!(reading_count = snapshot.readings.len(), "Snapshot published");
        }
        .instrument(span)
        .await;
        drop(guard);
    }

    fn arm_timer(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        // suspend and shutdown set their flag before taking this lock to disarm
        if self.suspended.load(Ordering::SeqCst) || self.is_shut_down() {
            return;
        }
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.interval;
        *timer = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                scheduler.trigger(TriggerSource::Timer);
            }
        }));
        tracing::debug!(interval_secs = period.as_secs(), "Refresh timer armed");
    }

    fn disarm_timer(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }

    /// Waits until no fetch is in flight
    pub async fn wait_idle(&self) {
        drop(self.fetch_lock.lock().await);
    }

    /// Stops the timer, drains or abandons the in-flight fetch and closes
    /// every remote channel. Later triggers return [`TriggerOutcome::ShutDown`].
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let span = crate::trace_operation!(span_names::SHUTDOWN);
        async {
            self.disarm_timer();

            let drained =
                tokio::time::timeout(self.settings.drain_timeout, self.fetch_lock.lock()).await;
            // held until the channels are closed so no late trigger slips in
            let _guard = match drained {
                Ok(guard) => Some(guard),
                Err(_) => {
                    tracing::warn!(
                        drain_secs = self.settings.drain_timeout.as_secs(),
                        "In-flight fetch did not finish, abandoning it"
                    );
                    if let Some(handle) = lock(&self.in_flight).take() {
                        handle.abort();
                    }
                    None
                }
            };

            self.source.close_all().await;
            tracing::info!("Scheduler shut down");
        }
        .instrument(span)
        .await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
