//! Bounded, pausable worker pool.
//!
//! A fixed number of worker threads drain a bounded queue of jobs. Before
//! starting a job every worker passes through the shared [`PauseGate`]:
//! while the gate is paused workers sleep on a condition variable, and once
//! it is stopped they drop whatever is still queued without running it.
//!
//! # Correctness Invariants
//!
//! - **Stop is sticky**: `Stopped` never transitions back to `Running`.
//! - **No start after stop**: a job dequeued after `stop()` is discarded.
//! - **In-flight jobs finish**: stopping never interrupts a running job.
//! - **Exact accounting**: every submitted job is settled exactly once,
//!   either executed or discarded, so [`CompletionLatch::wait`] returns once
//!   the queue is drained.

use crate::process::panic_message;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateState {
    Running,
    Paused,
    Stopped,
}

/// Open/closed/terminal gate shared by the driver loop and the workers.
#[derive(Debug)]
pub struct PauseGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Running),
            cv: Condvar::new(),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == GateState::Stopped
    }

    /// Closes the gate. Returns `true` if this call moved it from `Running`
    /// to `Paused`.
    pub fn pause(&self) -> bool {
        let mut state = self.state.lock();
        if *state == GateState::Running {
            *state = GateState::Paused;
            true
        } else {
            false
        }
    }

    /// Reopens a paused gate and wakes every blocked waiter.
    pub fn resume(&self) -> bool {
        let mut state = self.state.lock();
        if *state == GateState::Paused {
            *state = GateState::Running;
            self.cv.notify_all();
            true
        } else {
            false
        }
    }

    /// Moves the gate to its terminal state and wakes every blocked waiter.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        if *state == GateState::Stopped {
            return false;
        }
        *state = GateState::Stopped;
        self.cv.notify_all();
        true
    }

    /// Blocks while the gate is paused. Returns `true` if the caller may
    /// proceed, `false` once the gate is stopped.
    pub fn wait_open(&self) -> bool {
        let mut state = self.state.lock();
        while *state == GateState::Paused {
            self.cv.wait(&mut state);
        }
        *state == GateState::Running
    }

    /// Sleeps for `duration` unless the gate is stopped first. Returns
    /// `false` if the sleep was cut short by a stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock();
        while *state != GateState::Stopped {
            if self.cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state != GateState::Stopped
    }
}

/// Counts outstanding jobs and lets a thread block until none are left.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    pending: Mutex<u64>,
    cv: Condvar,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self) {
        *self.pending.lock() += 1;
    }

    pub fn done(&self) {
        let mut pending = self.pending.lock();
        debug_assert!(*pending > 0, "CompletionLatch settled more jobs than it saw");
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.cv.notify_all();
        }
    }

    pub fn pending(&self) -> u64 {
        *self.pending.lock()
    }

    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.cv.wait(&mut pending);
        }
    }

    /// Like [`wait`](Self::wait) with an upper bound. Returns `true` if the
    /// latch reached zero in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.cv.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker pool is stopped, job rejected")]
    Stopped,
    #[error("Worker pool queue is closed")]
    Disconnected,
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Counters reported when the pool shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub executed: u64,
    pub discarded: u64,
    pub panicked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    executed: AtomicU64,
    discarded: AtomicU64,
    panicked: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            executed: self.executed.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    gate: Arc<PauseGate>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    latch: Arc<CompletionLatch>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawns `workers` threads sharing a queue of at most `queue_depth`
    /// waiting jobs. Both values are raised to at least one.
    pub fn new(
        workers: usize,
        queue_depth: usize,
        gate: Arc<PauseGate>,
    ) -> Result<Self, PoolError> {
        let (sender, receiver) = bounded::<Job>(queue_depth.max(1));
        let latch = Arc::new(CompletionLatch::new());
        let counters = Arc::new(Counters::default());

        let mut pool = Self {
            gate,
            sender: Some(sender),
            workers: Vec::new(),
            latch,
            counters,
        };

        for worker_id in 0..workers.max(1) {
            let receiver = receiver.clone();
            let gate = Arc::clone(&pool.gate);
            let latch = Arc::clone(&pool.latch);
            let counters = Arc::clone(&pool.counters);
            let handle = thread::Builder::new()
                .name(format!("gapfuzz-worker-{worker_id}"))
                .spawn(move || worker_loop(receiver, gate, latch, counters))?;
            pool.workers.push(handle);
        }

        Ok(pool)
    }

    pub fn gate(&self) -> &Arc<PauseGate> {
        &self.gate
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job`, blocking while the queue is full.
    ///
    /// Jobs are rejected once the gate is stopped. A job that slips in while
    /// `stop()` races with this call is still settled: the worker that
    /// dequeues it discards it.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.gate.is_stopped() {
            return Err(PoolError::Stopped);
        }
        let sender = self.sender.as_ref().ok_or(PoolError::Disconnected)?;

        self.latch.add();
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        if sender.send(Box::new(job)).is_err() {
            self.counters.submitted.fetch_sub(1, Ordering::SeqCst);
            self.latch.done();
            return Err(PoolError::Disconnected);
        }
        Ok(())
    }

    /// Blocks until every submitted job has been executed or discarded.
    pub fn wait_idle(&self) {
        self.latch.wait();
    }

    pub fn pending(&self) -> u64 {
        self.latch.pending()
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Closes the queue, lets the workers drain it and joins them.
    pub fn join(mut self) -> PoolStats {
        self.shutdown();
        self.counters.snapshot()
    }

    fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("Worker thread {name} terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    receiver: Receiver<Job>,
    gate: Arc<PauseGate>,
    latch: Arc<CompletionLatch>,
    counters: Arc<Counters>,
) {
    for job in receiver.iter() {
        if gate.wait_open() {
            match catch_unwind(AssertUnwindSafe(job)) {
                Ok(()) => {
                    counters.executed.fetch_add(1, Ordering::SeqCst);
                }
                Err(payload) => {
                    counters.panicked.fetch_add(1, Ordering::SeqCst);
                    log::error!("Worker job panicked: {}", panic_message(payload.as_ref()));
                }
            }
        } else {
            counters.discarded.fetch_add(1, Ordering::SeqCst);
        }
        latch.done();
    }
}
