//! Run driver.
//!
//! A [`Fuzzer`] owns the gaps of one run and ties the pieces together: the
//! [`CombinationScheduler`] walks the combination space on a single driver
//! thread, every combination becomes a [`FuzzProcess`](crate::process::FuzzProcess)
//! executed on the [`WorkerPool`], and progress is reported through a
//! [`FuzzerListener`].
//!
//! Notification order per run is `on_started(total)`, any number of
//! `on_completed` / `on_paused` / `on_resumed`, then exactly one
//! `on_run_complete`. A run whose total is zero goes straight from
//! `on_started(0)` to `on_run_complete`.

use crate::gap::GapSet;
use crate::listener::FuzzerListener;
use crate::location::Location;
use crate::pool::{GateState, PauseGate, PoolError, WorkerPool};
use crate::process::{FuzzProcessFactory, run_process};
use crate::scheduler::{CombinationScheduler, SchedulerError};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

pub fn default_threads() -> usize {
    4
}

pub fn default_queue_depth() -> usize {
    64
}

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Upper bound on worker threads. 0 is treated as 1.
    pub threads: usize,
    /// Pause before each dispatch.
    pub delay: Duration,
    /// Combinations allowed to wait in the pool queue.
    pub queue_depth: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            delay: Duration::ZERO,
            queue_depth: default_queue_depth(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FuzzerError {
    #[error("Cannot schedule run: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Worker pool failure: {0}")]
    Pool(#[from] PoolError),
    #[error("Failed to spawn driver thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Driver thread panicked")]
    DriverPanicked,
}

/// Final accounting of a run, handed to `on_run_complete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Size of the combination space.
    pub total: u64,
    /// Combinations handed to the pool.
    pub dispatched: u64,
    /// Combinations whose process ran to a result.
    pub completed: u64,
    /// Completed combinations that errored or panicked.
    pub failed: u64,
    /// Dispatched combinations dropped unstarted because of a stop.
    pub discarded: u64,
    pub stopped: bool,
}

/// Cloneable remote control for a run.
#[derive(Clone)]
pub struct FuzzerControl {
    gate: Arc<PauseGate>,
    listener: Arc<dyn FuzzerListener>,
}

impl FuzzerControl {
    fn new(listener: Arc<dyn FuzzerListener>) -> Self {
        Self {
            gate: Arc::new(PauseGate::new()),
            listener,
        }
    }

    /// Holds back further dispatches and job starts. Jobs already running
    /// finish. Returns `false` if the run was not running.
    pub fn pause(&self) -> bool {
        let paused = self.gate.pause();
        if paused {
            log::info!("Fuzz run paused");
            self.listener.on_paused();
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.gate.resume();
        if resumed {
            log::info!("Fuzz run resumed");
            self.listener.on_resumed();
        }
        resumed
    }

    /// Ends the run. Queued combinations are discarded, running ones finish.
    /// Stopping is permanent.
    pub fn stop(&self) -> bool {
        let stopped = self.gate.stop();
        if stopped {
            log::info!("Fuzz run stopping");
        }
        stopped
    }

    pub fn state(&self) -> GateState {
        self.gate.state()
    }
}

pub struct Fuzzer<L: Location> {
    gaps: GapSet<L>,
    factory: Arc<dyn FuzzProcessFactory<L>>,
    listener: Arc<dyn FuzzerListener>,
    settings: RunSettings,
    control: FuzzerControl,
}

impl<L: Location> Fuzzer<L> {
    pub fn new<F>(
        gaps: GapSet<L>,
        factory: F,
        listener: Arc<dyn FuzzerListener>,
        settings: RunSettings,
    ) -> Self
    where
        F: FuzzProcessFactory<L> + 'static,
    {
        Self {
            gaps,
            factory: Arc::new(factory),
            control: FuzzerControl::new(Arc::clone(&listener)),
            listener,
            settings,
        }
    }

    pub fn gaps(&self) -> &GapSet<L> {
        &self.gaps
    }

    /// Payload lists may still be edited until the run starts.
    pub fn gaps_mut(&mut self) -> &mut GapSet<L> {
        &mut self.gaps
    }

    pub fn control(&self) -> FuzzerControl {
        self.control.clone()
    }

    /// Runs on a dedicated driver thread and returns immediately.
    pub fn start(self) -> Result<FuzzerHandle, FuzzerError> {
        let control = self.control();
        let driver = thread::Builder::new()
            .name("gapfuzz-driver".to_string())
            .spawn(move || self.run())
            .map_err(FuzzerError::Spawn)?;
        Ok(FuzzerHandle { control, driver })
    }

    /// Runs on the calling thread until every combination has settled or
    /// the run was stopped.
    pub fn run(self) -> Result<RunSummary, FuzzerError> {
        let scheduler = CombinationScheduler::new(self.gaps.as_slice())?;
        let total = scheduler.total();
        let gate = Arc::clone(&self.control.gate);

        if total == 0 {
            log::info!("No combinations to run");
            self.listener.on_started(0);
            let summary = RunSummary {
                stopped: gate.is_stopped(),
                ..RunSummary::default()
            };
            self.listener.on_run_complete(&summary);
            return Ok(summary);
        }

        let workers = self
            .settings
            .threads
            .max(1)
            .min(usize::try_from(total).unwrap_or(usize::MAX));
        let pool = WorkerPool::new(workers, self.settings.queue_depth, Arc::clone(&gate))?;
        log::info!(
            "Starting fuzz run: {} gaps, {} combinations, {} workers",
            self.gaps.len(),
            total,
            pool.worker_count()
        );
        self.listener.on_started(total);

        let completed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let dispatched = scheduler.run(&gate, self.settings.delay, |substitutions, nr| {
            let payloads = substitutions.values();
            let process = self.factory.create(substitutions, nr);
            let listener = Arc::clone(&self.listener);
            let completed = Arc::clone(&completed);
            let failed = Arc::clone(&failed);

            let job = move || {
                let result = run_process(nr, payloads, process);
                if result.is_error() {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
                completed.fetch_add(1, Ordering::SeqCst);
                listener.on_completed(&result);
            };

            match pool.submit(job) {
                Ok(()) => ControlFlow::Continue(()),
                Err(PoolError::Stopped) => ControlFlow::Break(()),
                Err(e) => {
                    log::error!("Dropping combination {nr}: {e}");
                    ControlFlow::Break(())
                }
            }
        });

        pool.wait_idle();
        let stats = pool.join();

        let summary = RunSummary {
            total,
            dispatched,
            completed: completed.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst) + stats.panicked,
            discarded: stats.discarded,
            stopped: gate.is_stopped(),
        };
        log::info!(
            "Fuzz run complete: {}/{} dispatched, {} completed, {} failed, {} discarded",
            summary.dispatched,
            summary.total,
            summary.completed,
            summary.failed,
            summary.discarded
        );
        self.listener.on_run_complete(&summary);
        Ok(summary)
    }
}

pub struct FuzzerHandle {
    control: FuzzerControl,
    driver: JoinHandle<Result<RunSummary, FuzzerError>>,
}

impl FuzzerHandle {
    pub fn control(&self) -> FuzzerControl {
        self.control.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }

    /// Waits for the driver thread and returns its summary.
    pub fn join(self) -> Result<RunSummary, FuzzerError> {
        self.driver
            .join()
            .map_err(|_| FuzzerError::DriverPanicked)?
    }
}
