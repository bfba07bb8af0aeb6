//! Integration tests for the metrics fetch
//!
//! Covers the mapping from channel and remote-command outcomes to snapshot
//! status, and the shared time budget.

use std::sync::Arc;
use std::time::Duration;

use gpuwatch_core::config::ChannelSettings;
use gpuwatch_core::error::FetchError;
use gpuwatch_core::monitoring::{
    ConnectionManager, FetchTarget, GPU_QUERY_COMMAND, MetricsFetcher, SnapshotSource,
    SnapshotStatus,
};

use super::support::{Op, Reply, ScriptedRunner};

const TIMEOUT: Duration = Duration::from_secs(2);

fn fetcher_with(runner: &Arc<ScriptedRunner>) -> MetricsFetcher {
    let manager = Arc::new(ConnectionManager::new(runner.clone(), ChannelSettings::default()).unwrap());
    MetricsFetcher::new(manager, runner.clone())
}

// ========== Success Paths ==========

/// Tests that a healthy host yields an Ok snapshot with every GPU in order
#[tokio::test]
async fn healthy_fetch_returns_readings() {
    let runner = ScriptedRunner::healthy();
    let fetcher = fetcher_with(&runner);

    let snapshot = fetcher.fetch("ganesha", None, TIMEOUT).await;

    assert_eq!(snapshot.status, SnapshotStatus::Ok);
    assert_eq!(snapshot.hostname, "ganesha");
    assert_eq!(snapshot.readings.len(), 2);
    assert_eq!(snapshot.readings[0].index(), 0);
    assert_eq!(snapshot.readings[1].index(), 1);
    assert_eq!(snapshot.icon_percentages(), vec![62.0, 35.0]);
}

/// Tests that the query runs through the control socket with the fixed command
#[tokio::test]
async fn query_is_routed_through_channel() {
    let runner = ScriptedRunner::healthy();
    let fetcher = fetcher_with(&runner);

    fetcher.fetch("ganesha", Some("ml"), TIMEOUT).await;

    let queries = runner.calls(Op::Query);
    assert_eq!(queries.len(), 1);
    let invocation = &queries[0].invocation;
    assert!(invocation.capture_output);
    assert!(invocation.has_arg_pair("-o", "ControlMaster=auto"));
    assert_eq!(
        invocation.args.last().map(String::as_str),
        Some(GPU_QUERY_COMMAND)
    );
    assert!(invocation.args.contains(&"ml@ganesha".to_string()));
}

/// Tests that the second fetch reuses the channel
#[tokio::test]
async fn consecutive_fetches_reuse_channel() {
    let runner = ScriptedRunner::healthy();
    let fetcher = fetcher_with(&runner);

    for _ in 0..3 {
        assert!(fetcher.fetch("ganesha", None, TIMEOUT).await.is_ok());
    }

    assert_eq!(runner.count(Op::Establish), 1);
    assert_eq!(runner.count(Op::Check), 2);
    assert_eq!(runner.count(Op::Query), 3);
}

/// Tests that malformed rows are dropped while good rows survive
#[tokio::test]
async fn malformed_rows_are_skipped() {
    let runner = ScriptedRunner::healthy();
    runner.set_default(
        Op::Query,
        Reply::Ok("0, T4, 10, 1, 2, 3, 4\ngarbage\n2, T4, 30, 1, 2, 3, [N/A]\n".into()),
    );
    let fetcher = fetcher_with(&runner);

    let snapshot = fetcher.fetch("ganesha", None, TIMEOUT).await;

    assert!(snapshot.is_ok());
    assert_eq!(snapshot.readings.len(), 1);
    assert_eq!(snapshot.readings[0].index(), 0);
}

// ========== Failure Paths ==========

/// Tests that output with no parsable rows is reported as Empty
#[tokio::test]
async fn unparsable_output_is_empty() {
    let runner = ScriptedRunner::healthy();
    runner.set_default(Op::Query, Reply::Ok("No devices were found\n".into()));
    let fetcher = fetcher_with(&runner);

    let snapshot = fetcher.fetch("ganesha", None, TIMEOUT).await;

    assert_eq!(snapshot.status, SnapshotStatus::Empty);
    assert!(snapshot.readings.is_empty());
    assert_eq!(snapshot.error(), Some(FetchError::Empty));
}

/// Tests that a channel failure skips the remote command
#[tokio::test]
async fn connection_failure_skips_query() {
    let runner = ScriptedRunner::healthy();
    runner.set_default(
        Op::Establish,
        Reply::Fail(255, "ssh: Could not resolve hostname ganesha".into()),
    );
    let fetcher = fetcher_with(&runner);

    let snapshot = fetcher.fetch("ganesha", None, TIMEOUT).await;

    match snapshot.status {
        SnapshotStatus::Error(FetchError::Connection(detail)) => {
            assert!(detail.contains("Could not resolve hostname"));
        }
        other => panic!("unexpected status: {other:?}"),
    }
    assert_eq!(runner.count(Op::Query), 0);
    assert!(snapshot.readings.is_empty());
}

/// Tests that a failing remote command reports its stderr
#[tokio::test]
async fn remote_failure_reports_stderr() {
    let runner = ScriptedRunner::healthy();
    runner.set_default(
        Op::Query,
        Reply::Fail(127, "bash: nvidia-smi: command not found\n".into()),
    );
    let fetcher = fetcher_with(&runner);

    let snapshot = fetcher.fetch("ganesha", None, TIMEOUT).await;

    assert_eq!(
        snapshot.status,
        SnapshotStatus::Error(FetchError::RemoteCommandFailed(
            "bash: nvidia-smi: command not found".into()
        ))
    );
}

/// Tests that a hung remote command is cut off at the fetch timeout
#[tokio::test]
async fn slow_query_times_out() {
    let runner = ScriptedRunner::healthy();
    runner.set_delay(Op::Query, Duration::from_secs(30));
    let fetcher = fetcher_with(&runner);
    let timeout = Duration::from_millis(300);

    let started = std::time::Instant::now();
    let snapshot = fetcher.fetch("ganesha", None, timeout).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        snapshot.status,
        SnapshotStatus::Error(FetchError::Timeout(timeout))
    );
}

/// Tests that the query only gets the budget left after channel setup
#[tokio::test]
async fn query_gets_remaining_budget() {
    let runner = ScriptedRunner::healthy();
    runner.set_delay(Op::Establish, Duration::from_millis(400));
    let fetcher = fetcher_with(&runner);

    let snapshot = fetcher.fetch("ganesha", None, TIMEOUT).await;

    assert!(snapshot.is_ok());
    let query_timeout = runner.calls(Op::Query)[0].timeout;
    assert!(query_timeout <= TIMEOUT - Duration::from_millis(400));
    assert!(query_timeout > Duration::ZERO);
}

/// Tests that a hung liveness probe and the re-establish share one budget
#[tokio::test]
async fn stale_channel_fetch_stays_within_timeout() {
    let runner = ScriptedRunner::healthy();
    let fetcher = fetcher_with(&runner);
    assert!(fetcher.fetch("ganesha", None, TIMEOUT).await.is_ok());

    runner.set_delay(Op::Check, Duration::from_secs(30));
    runner.set_delay(Op::Establish, Duration::from_millis(900));
    let timeout = Duration::from_secs(1);

    let started = std::time::Instant::now();
    let snapshot = fetcher.fetch("ganesha", None, timeout).await;
    let elapsed = started.elapsed();

    assert!(elapsed <= timeout + Duration::from_millis(200), "took {elapsed:?}");
    assert!(!snapshot.is_ok());
    // the probe used the whole budget, so no second master was started
    assert_eq!(runner.count(Op::Establish), 1);
    assert_eq!(runner.count(Op::Query), 1);
}

/// Tests that re-establishment after a failed probe gets only what is left
#[tokio::test]
async fn reestablish_gets_remaining_budget() {
    let runner = ScriptedRunner::healthy();
    let fetcher = fetcher_with(&runner);
    assert!(fetcher.fetch("ganesha", None, TIMEOUT).await.is_ok());

    runner.set_delay(Op::Check, Duration::from_millis(300));
    runner.push(Op::Check, Reply::Fail(255, "Control socket connect: No such file".into()));

    let snapshot = fetcher.fetch("ganesha", None, TIMEOUT).await;

    assert!(snapshot.is_ok());
    let establishes = runner.calls(Op::Establish);
    assert_eq!(establishes.len(), 2);
    assert!(establishes[1].timeout <= TIMEOUT - Duration::from_millis(300));
    assert!(establishes[1].timeout > Duration::ZERO);
}

// ========== Snapshot Source ==========

/// Tests the scheduler-facing trait and shutdown of the channels
#[tokio::test]
async fn snapshot_source_fetches_and_closes() {
    let runner = ScriptedRunner::healthy();
    let fetcher = fetcher_with(&runner);
    let source: &dyn SnapshotSource = &fetcher;
    let target = FetchTarget::new("ganesha", Some("ml".into()), TIMEOUT);

    let snapshot = source.fetch_snapshot(&target).await;
    assert!(snapshot.is_ok());

    source.close_all().await;
    assert_eq!(runner.count(Op::Exit), 1);
    assert!(fetcher.connections().is_closed());

    let after = source.fetch_snapshot(&target).await;
    assert!(matches!(
        after.status,
        SnapshotStatus::Error(FetchError::Connection(_))
    ));
}
