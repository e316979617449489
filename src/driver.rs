//! The host execution boundary.
//!
//! The engine consumes a single-test execution primitive from its host:
//! `run(name, body)` creates a child execution unit and blocks the caller
//! until the child completes or signals parallel-deferral, plus primitive
//! implementations of log, set-env, temp-dir, and deadline. The engine wraps
//! these behind each node's override chain but does not reimplement their
//! semantics.
//!
//! [`ThreadDriver`] is the default host: one OS thread per child unit, with
//! an mpsc signal channel deciding between completion and deferral. Log
//! output goes through a [`LogSink`] so it stays testable and injectable.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What a child execution unit reports back to the frame that dispatched it.
pub enum Signal {
    /// The child requested parallel execution; the caller may proceed to its
    /// next sibling. The child resumes when the sibling gate opens.
    Deferred,
    /// The child finished; the payload is whether it passed.
    Done(bool),
}

/// Result of `Driver::run` as observed by the dispatching frame.
pub enum RunOutcome {
    /// The child ran to completion before control returned.
    Completed(bool),
    /// The child deferred itself; the handle must be joined by the enclosing
    /// frame once its sibling gate is released.
    Deferred(JoinHandle<()>),
}

/// Host primitives the engine builds on.
pub trait Driver: Send + Sync {
    /// Runs `body` as a child execution unit, blocking until it either
    /// completes or signals parallel-deferral over `signal`.
    fn run(&self, name: &str, body: Box<dyn FnOnce() + Send>, signal: Receiver<Signal>)
        -> RunOutcome;

    fn log(&self, node: &str, message: &str);

    fn set_env(&self, key: &str, value: &str);

    /// A fresh scratch directory for the calling node.
    fn temp_dir(&self) -> PathBuf;

    /// The wall-clock deadline for the whole run, if one is configured.
    fn deadline(&self) -> Option<Instant>;
}

/// Destination for log output.
pub trait LogSink: Send {
    fn write(&mut self, node: &str, message: &str);
}

/// Default sink: one line per message on stderr.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&mut self, node: &str, message: &str) {
        eprintln!("[{}] {}", node, message);
    }
}

/// A sink that accumulates lines in memory; clones share the buffer.
#[derive(Clone, Default)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogSink for BufferSink {
    fn write(&mut self, node: &str, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("[{}] {}", node, message));
    }
}

/// Default driver over std threads.
pub struct ThreadDriver {
    sink: Mutex<Box<dyn LogSink>>,
    timeout: Option<Duration>,
    started: Instant,
}

impl Default for ThreadDriver {
    fn default() -> Self {
        Self {
            sink: Mutex::new(Box::new(StderrSink)),
            timeout: None,
            started: Instant::now(),
        }
    }
}

impl ThreadDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: impl LogSink + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Driver for ThreadDriver {
    fn run(
        &self,
        name: &str,
        body: Box<dyn FnOnce() + Send>,
        signal: Receiver<Signal>,
    ) -> RunOutcome {
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(body);
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.log(name, &format!("failed to spawn execution unit: {}", e));
                return RunOutcome::Completed(false);
            }
        };
        match signal.recv() {
            Ok(Signal::Done(passed)) => {
                let _ = handle.join();
                RunOutcome::Completed(passed)
            }
            Ok(Signal::Deferred) => RunOutcome::Deferred(handle),
            // Sender dropped without a signal: the frame died before
            // finalizing, count it as failed.
            Err(_) => {
                let _ = handle.join();
                RunOutcome::Completed(false)
            }
        }
    }

    fn log(&self, node: &str, message: &str) {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(node, message);
    }

    fn set_env(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    fn temp_dir(&self) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("gantry-{}-{}", std::process::id(), n));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.started + t)
    }
}
