//! Integration tests for SSH channel management
//!
//! A scripted runner stands in for `ssh`, so these tests check which
//! invocations the manager issues and how it reacts to their results.

use std::sync::Arc;
use std::time::Duration;

use gpuwatch_core::config::ChannelSettings;
use gpuwatch_core::error::ConnError;
use gpuwatch_core::monitoring::{ChannelKey, ChannelState, ConnectionManager};

use super::support::{Op, Reply, ScriptedRunner};

const TIMEOUT: Duration = Duration::from_secs(2);

fn manager_with(runner: &Arc<ScriptedRunner>) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(runner.clone(), ChannelSettings::default()).unwrap())
}

// ========== Establish / Reuse ==========

/// Tests that the first use starts a control master and records it as active
#[tokio::test]
async fn first_use_establishes_master() {
    let runner = ScriptedRunner::healthy();
    let manager = manager_with(&runner);

    let ready = manager.ensure_channel("gpu01", Some("ml"), TIMEOUT).await.unwrap();

    assert!(!ready.reused);
    assert_eq!(
        ready.socket_path,
        manager.socket_path_for(&ChannelKey::new("gpu01", Some("ml")))
    );
    assert_eq!(runner.count(Op::Establish), 1);
    assert_eq!(runner.count(Op::Check), 0);

    let call = &runner.calls(Op::Establish)[0];
    assert!(!call.invocation.capture_output);
    assert!(call.timeout <= TIMEOUT);
    assert!(call.timeout > TIMEOUT - Duration::from_secs(1));
    assert_eq!(call.invocation.args.last().map(String::as_str), Some("ml@gpu01"));
    assert!(call.invocation.has_arg_pair("-o", "BatchMode=yes"));
    assert!(call.invocation.has_arg_pair("-o", "ControlPersist=600"));

    let record = manager.record("gpu01", Some("ml")).await.unwrap();
    assert_eq!(record.state(), ChannelState::Active);
    assert!(record.established_at().is_some());
}

/// Tests that a live channel is probed and reused without a new handshake
#[tokio::test]
async fn active_channel_is_reused_after_probe() {
    let runner = ScriptedRunner::healthy();
    let manager = manager_with(&runner);

    manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();
    let first = manager.record("gpu01", None).await.unwrap();
    let ready = manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();

    assert!(ready.reused);
    assert_eq!(runner.count(Op::Establish), 1);
    assert_eq!(runner.count(Op::Check), 1);
    assert!(runner.calls(Op::Check)[0].timeout <= Duration::from_secs(5));
    assert_eq!(
        manager.record("gpu01", None).await.unwrap().established_at(),
        first.established_at()
    );
}

/// Tests that a failed probe marks the channel stale and re-establishes in the same call
#[tokio::test]
async fn failed_probe_triggers_reestablish() {
    let runner = ScriptedRunner::healthy();
    let manager = manager_with(&runner);
    manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();

    runner.push(
        Op::Check,
        Reply::Fail(255, "Control socket connect: No such file or directory".into()),
    );
    let ready = manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();

    assert!(!ready.reused);
    assert_eq!(runner.count(Op::Establish), 2);
    assert_eq!(manager.channel_state("gpu01", None).await, ChannelState::Active);
}

/// Tests that an explicit liveness check reports probe failures
#[tokio::test]
async fn check_channel_reports_probe_failure() {
    let runner = ScriptedRunner::healthy();
    let manager = manager_with(&runner);
    manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();

    assert!(manager.check_channel("gpu01", None).await.is_ok());

    runner.push(Op::Check, Reply::Fail(255, "Master running? no".into()));
    let err = manager.check_channel("gpu01", None).await.unwrap_err();
    assert!(matches!(err, ConnError::ProbeFailed { .. }));
    assert_eq!(err.detail(), "Master running? no");
}

// ========== Failures ==========

/// Tests that a non-zero establish leaves the record unestablished
#[tokio::test]
async fn establish_failure_is_reported() {
    let runner = ScriptedRunner::healthy();
    runner.push(
        Op::Establish,
        Reply::Fail(255, "Permission denied (publickey).".into()),
    );
    let manager = manager_with(&runner);

    let err = manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap_err();

    match err {
        ConnError::EstablishFailed { host, detail } => {
            assert_eq!(host, "gpu01");
            assert!(detail.contains("Permission denied"));
        }
        other @ ConnError::ProbeFailed { .. } => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        manager.channel_state("gpu01", None).await,
        ChannelState::Unestablished
    );

    // next call tries again from scratch
    manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();
    assert_eq!(runner.count(Op::Establish), 2);
}

/// Tests that establishment is bounded by the caller's timeout
#[tokio::test]
async fn establish_timeout_is_reported() {
    let runner = ScriptedRunner::healthy();
    runner.set_delay(Op::Establish, Duration::from_secs(30));
    let manager = manager_with(&runner);

    let started = std::time::Instant::now();
    let err = manager
        .ensure_channel("gpu01", None, Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(err.detail().contains("timed out"));
    assert_eq!(
        manager.channel_state("gpu01", None).await,
        ChannelState::Unestablished
    );
}

/// Tests that a missing ssh binary surfaces as an establish failure
#[tokio::test]
async fn spawn_failure_is_reported() {
    let runner = ScriptedRunner::healthy();
    runner.push(Op::Establish, Reply::SpawnError);
    let manager = manager_with(&runner);

    let err = manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ConnError::EstablishFailed { .. }));
}

// ========== Concurrency ==========

/// Tests that two concurrent first callers share a single establishment
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_first_callers_establish_once() {
    let runner = ScriptedRunner::healthy();
    runner.set_delay(Op::Establish, Duration::from_millis(150));
    let manager = manager_with(&runner);

    let (a, b) = tokio::join!(
        manager.ensure_channel("gpu01", None, TIMEOUT),
        manager.ensure_channel("gpu01", None, TIMEOUT),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(runner.count(Op::Establish), 1);
    assert_ne!(a.reused, b.reused);
    assert_eq!(a.socket_path, b.socket_path);
}

/// Tests that channels for different keys do not interfere
#[tokio::test]
async fn different_keys_get_separate_channels() {
    let runner = ScriptedRunner::healthy();
    let manager = manager_with(&runner);

    let a = manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();
    let b = manager.ensure_channel("gpu01", Some("ml"), TIMEOUT).await.unwrap();
    let c = manager.ensure_channel("gpu02", None, TIMEOUT).await.unwrap();

    assert_eq!(runner.count(Op::Establish), 3);
    assert_ne!(a.socket_path, b.socket_path);
    assert_ne!(a.socket_path, c.socket_path);
}

// ========== Teardown ==========

/// Tests that closing a channel stops the master and forgets the record
#[tokio::test]
async fn close_channel_stops_master() {
    let runner = ScriptedRunner::healthy();
    let manager = manager_with(&runner);
    manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();

    manager.close_channel("gpu01", None).await;

    assert_eq!(runner.count(Op::Exit), 1);
    assert!(runner.calls(Op::Exit)[0].timeout <= Duration::from_secs(10));
    assert!(manager.record("gpu01", None).await.is_none());

    // closing an unknown channel is a no-op
    manager.close_channel("gpu09", None).await;
    assert_eq!(runner.count(Op::Exit), 1);
}

/// Tests that teardown errors are swallowed
#[tokio::test]
async fn close_channel_ignores_errors() {
    let runner = ScriptedRunner::healthy();
    runner.set_default(Op::Exit, Reply::Fail(255, "No ControlPath specified".into()));
    let manager = manager_with(&runner);
    manager.ensure_channel("gpu01", None, TIMEOUT).await.unwrap();

    manager.close_channel("gpu01", None).await;
    assert!(manager.record("gpu01", None).await.is_none());
}

/// Tests that close_all stops every master and removes the socket directory
#[tokio::test]
async fn close_all_closes_every_channel() {
    let runner = ScriptedRunner::healthy();
    let manager = manager_with(&runner);
    for host in ["gpu01", "gpu02", "gpu03"] {
        manager.ensure_channel(host, None, TIMEOUT).await.unwrap();
    }
    let dir = manager.socket_dir().to_path_buf();

    manager.close_all().await;

    assert_eq!(runner.count(Op::Exit), 3);
    assert!(!dir.exists());
    for host in ["gpu01", "gpu02", "gpu03"] {
        assert_eq!(
            manager.channel_state(host, None).await,
            ChannelState::Unestablished
        );
    }

    // second call is a no-op
    manager.close_all().await;
    assert_eq!(runner.count(Op::Exit), 3);
}
