//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gpuwatch_core::monitoring::{
    CommandOutput, CommandRunner, FetchTarget, Invocation, ReadingParser, RunError, Snapshot,
    SnapshotSink, SnapshotSource,
};

/// Two Tesla T4 rows in `nvidia-smi` CSV form
pub const TWO_GPU_OUTPUT: &str = "\
0, Tesla T4, 62.0, 4096, 16384, 58, 45.2
1, Tesla T4, 35.0, 1024, 16384, 49, 30.1
";

/// Kind of ssh invocation, recognised from its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `ssh -M -N -f ...`
    Establish,
    /// `ssh -O check ...`
    Check,
    /// `ssh -O exit ...`
    Exit,
    /// Remote command routed through the channel
    Query,
}

impl Op {
    fn of(invocation: &Invocation) -> Self {
        if invocation.args.iter().any(|a| a == "-M") {
            Self::Establish
        } else if invocation.has_arg_pair("-O", "check") {
            Self::Check
        } else if invocation.has_arg_pair("-O", "exit") {
            Self::Exit
        } else {
            Self::Query
        }
    }
}

/// Canned result for one invocation
#[derive(Debug, Clone)]
pub enum Reply {
    /// Exit 0 with this stdout
    Ok(String),
    /// Non-zero exit with this stderr
    Fail(i32, String),
    /// Spawn failure
    SpawnError,
}

/// A recorded call
#[derive(Debug, Clone)]
pub struct Call {
    pub op: Op,
    pub invocation: Invocation,
    pub timeout: Duration,
}

/// [`CommandRunner`] that answers from a script instead of spawning ssh
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Call>>,
    queued: Mutex<HashMap<Op, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<Op, Reply>>,
    delays: Mutex<HashMap<Op, Duration>>,
}

impl ScriptedRunner {
    /// Every op succeeds; queries return [`TWO_GPU_OUTPUT`]
    pub fn healthy() -> Arc<Self> {
        let runner = Self::default();
        runner.set_default(Op::Query, Reply::Ok(TWO_GPU_OUTPUT.to_string()));
        Arc::new(runner)
    }

    pub fn set_default(&self, op: Op, reply: Reply) {
        self.defaults.lock().unwrap().insert(op, reply);
    }

    /// Queues a one-shot reply used before the default
    pub fn push(&self, op: Op, reply: Reply) {
        self.queued
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(reply);
    }

    /// Makes every `op` take `delay`; it times out if `delay >= timeout`
    pub fn set_delay(&self, op: Op, delay: Duration) {
        self.delays.lock().unwrap().insert(op, delay);
    }

    pub fn calls(&self, op: Op) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls(op).len()
    }

    fn next_reply(&self, op: Op) -> Reply {
        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        self.defaults
            .lock()
            .unwrap()
            .get(&op)
            .cloned()
            .unwrap_or_else(|| Reply::Ok(String::new()))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        let op = Op::of(invocation);
        self.calls.lock().unwrap().push(Call {
            op,
            invocation: invocation.clone(),
            timeout,
        });

        let delay = self.delays.lock().unwrap().get(&op).copied();
        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(RunError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(op) {
            Reply::Ok(stdout) => Ok(CommandOutput::ok(stdout)),
            Reply::Fail(code, stderr) => Ok(CommandOutput::failed(code, stderr)),
            Reply::SpawnError => Err(RunError::Spawn {
                program: invocation.program.clone(),
                reason: "No such file or directory".to_string(),
            }),
        }
    }
}

/// [`SnapshotSource`] that parses canned output after an optional delay
#[derive(Debug)]
pub struct FakeSource {
    output: Mutex<String>,
    delay: Duration,
    fetches: AtomicUsize,
    closed: AtomicBool,
}

impl FakeSource {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            output: Mutex::new(TWO_GPU_OUTPUT.to_string()),
            delay,
            fetches: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_output(&self, output: &str) {
        *self.output.lock().unwrap() = output.to_string();
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn fetch_snapshot(&self, target: &FetchTarget) -> Snapshot {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let output = self.output.lock().unwrap().clone();
        Snapshot::from_readings(target.host.clone(), ReadingParser::parse(&output))
    }

    async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// What a [`RecordingSink`] saw, in order
#[derive(Debug, Clone)]
pub enum Published {
    Snapshot(Arc<Snapshot>),
    Icon(Vec<u8>),
}

/// [`SnapshotSink`] that records every callback
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Published>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Published> {
        self.events.lock().unwrap().clone()
    }

    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Published::Snapshot(s) => Some(s),
                Published::Icon(_) => None,
            })
            .collect()
    }

    pub fn icons(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Published::Icon(png) => Some(png),
                Published::Snapshot(_) => None,
            })
            .collect()
    }
}

impl SnapshotSink for RecordingSink {
    fn on_snapshot_published(&self, snapshot: &Snapshot) {
        self.events
            .lock()
            .unwrap()
            .push(Published::Snapshot(Arc::new(snapshot.clone())));
    }

    fn on_render_published(&self, png: &[u8]) {
        self.events.lock().unwrap().push(Published::Icon(png.to_vec()));
    }
}
