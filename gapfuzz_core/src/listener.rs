use crate::fuzzer::RunSummary;
use crate::process::FuzzResult;
use std::sync::Arc;

/// Observer of a fuzz run's progress.
///
/// Callbacks arrive on the driver thread, on worker threads, and on whatever
/// thread calls pause/resume, so implementations must tolerate concurrent
/// invocation. `on_completed` order follows completion, not dispatch.
pub trait FuzzerListener: Send + Sync {
    /// Fired once, before the first dispatch, with the final combination count.
    fn on_started(&self, total: u64);

    /// Fired when the run moves from running to paused.
    fn on_paused(&self) {}

    /// Fired when a paused run continues.
    fn on_resumed(&self) {}

    /// Fired once per finished combination, including failed ones.
    fn on_completed(&self, result: &FuzzResult);

    /// Fired exactly once, after every dispatched combination has settled.
    fn on_run_complete(&self, summary: &RunSummary);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpListener;

impl FuzzerListener for NoOpListener {
    fn on_started(&self, _total: u64) {}
    fn on_completed(&self, _result: &FuzzResult) {}
    fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// Forwards every callback to each registered listener, in registration order.
#[derive(Default, Clone)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn FuzzerListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn FuzzerListener>) {
        self.listeners.push(listener);
    }

    pub fn with(mut self, listener: Arc<dyn FuzzerListener>) -> Self {
        self.add(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl FuzzerListener for ListenerSet {
    fn on_started(&self, total: u64) {
        for listener in &self.listeners {
            listener.on_started(total);
        }
    }

    fn on_paused(&self) {
        for listener in &self.listeners {
            listener.on_paused();
        }
    }

    fn on_resumed(&self) {
        for listener in &self.listeners {
            listener.on_resumed();
        }
    }

    fn on_completed(&self, result: &FuzzResult) {
        for listener in &self.listeners {
            listener.on_completed(result);
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        for listener in &self.listeners {
            listener.on_run_complete(summary);
        }
    }
}
