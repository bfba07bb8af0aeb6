//! Continuous monitoring command.
//!
//! The terminal stands in for a tray applet: every publish prints the gauge
//! panel and optionally rewrites the icon file, and single-letter lines on
//! stdin play the role of menu items and sleep/wake notifications.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gpuwatch_core::monitoring::summary::{format_panel, title_label};
use gpuwatch_core::{RefreshScheduler, RefreshSettings, Snapshot, SnapshotSink, TriggerOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;

use crate::cli::GlobalOptions;
use crate::error::CliError;
use crate::util::{build_fetcher, load_settings, runtime};

/// Grace period for the blocking stdin reader when the runtime stops
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

/// A line typed while watching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKey {
    Refresh,
    Suspend,
    Wake,
    Quit,
}

impl WatchKey {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "r" | "refresh" => Some(Self::Refresh),
            "s" | "suspend" | "sleep" => Some(Self::Suspend),
            "w" | "wake" | "resume" => Some(Self::Wake),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Prints snapshots and writes the icon file
struct TerminalSink {
    icon_out: Option<PathBuf>,
    show_percentages: bool,
    quiet: bool,
}

impl SnapshotSink for TerminalSink {
    fn on_snapshot_published(&self, snapshot: &Snapshot) {
        if self.quiet {
            return;
        }
        let title = if self.show_percentages {
            title_label(snapshot).unwrap_or_default()
        } else {
            String::new()
        };
        println!("\n=== {}{title} ===", snapshot.hostname);
        println!("{}", format_panel(snapshot));
    }

    fn on_render_published(&self, png: &[u8]) {
        let Some(path) = &self.icon_out else {
            return;
        };
        if let Err(e) = std::fs::write(path, png) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write icon");
        }
    }
}

/// Watch command handler
pub fn cmd_watch(opts: &GlobalOptions, icon_out: Option<PathBuf>) -> Result<(), CliError> {
    let settings = load_settings(opts)?;
    let runtime = runtime()?;

    let sink = Arc::new(TerminalSink {
        icon_out,
        show_percentages: settings.show_percentages,
        quiet: opts.quiet,
    });
    let quiet = opts.quiet;

    let result = runtime.block_on(async move {
        let fetcher = build_fetcher(&settings)?;
        let scheduler = RefreshScheduler::new(
            fetcher,
            sink,
            RefreshSettings::from_settings(&settings),
            Handle::current(),
        );

        if !quiet {
            eprintln!(
                "Watching {} every {}s (r=refresh s=suspend w=wake q=quit)",
                settings.host,
                settings.refresh_interval().as_secs()
            );
        }
        scheduler.start();

        let outcome = input_loop(&scheduler, quiet).await;
        scheduler.shutdown().await;
        outcome
    });

    // stdin is read on a blocking thread that never finishes on its own
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

/// Runs until `q`, Ctrl-C, or a stdin error
async fn input_loop(scheduler: &Arc<RefreshScheduler>, quiet: bool) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    // detached from a terminal; keep running until Ctrl-C
                    stdin_open = false;
                    continue;
                };
                match WatchKey::parse(&line) {
                    Some(WatchKey::Quit) => return Ok(()),
                    Some(key) => handle_key(scheduler, key, quiet),
                    None if line.trim().is_empty() => {}
                    None => {
                        if !quiet {
                            eprintln!("Unknown command '{}' (r, s, w, q)", line.trim());
                        }
                    }
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Ok(());
            }
        }
    }
}

fn handle_key(scheduler: &Arc<RefreshScheduler>, key: WatchKey, quiet: bool) {
    let message = match key {
        WatchKey::Refresh => match scheduler.manual_refresh() {
            TriggerOutcome::Started => "Refreshing...",
            TriggerOutcome::AlreadyRunning => "Refresh already in progress",
            TriggerOutcome::Suspended => "Suspended; press w to wake",
            TriggerOutcome::ShutDown => "Shutting down",
        },
        WatchKey::Suspend => {
            scheduler.suspend();
            "Suspended"
        }
        WatchKey::Wake => match scheduler.resume() {
            Some(_) => "Resumed",
            None => "Not suspended",
        },
        WatchKey::Quit => return,
    };
    if !quiet {
        eprintln!("{message}");
    }
}
