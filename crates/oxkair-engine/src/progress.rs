use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::warn;

use oxkair_core::traits::ProgressSink;
use oxkair_core::types::{Phase, ProgressEvent};

/// Share of the bar covered by agent execution; merge fills the rest.
const EXECUTION_SHARE: usize = 90;

#[derive(Debug, Default)]
struct Counters {
    seq: u64,
    completed: usize,
    percent: u8,
}

/// Turns run milestones into ordered progress events.
///
/// Pathway tasks report concurrently, so emission happens under a lock:
/// `seq` is strictly increasing and `percent` never goes backwards.
/// A panicking sink loses that event and nothing else.
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    total_agents: usize,
    counters: Mutex<Counters>,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>, total_agents: usize) -> Self {
        Self {
            sink,
            total_agents,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn phase_started(&self, phase: Phase, label: impl Into<String>) {
        self.emit(phase, None, label.into(), false);
    }

    /// Count one agent as done (succeeded, failed, or skipped).
    pub fn agent_finished(&self, phase: Phase, label: impl Into<String>) {
        self.emit(phase, None, label.into(), true);
    }

    pub fn merge_started(&self, label: impl Into<String>) {
        self.emit(Phase::Merge, Some(95), label.into(), false);
    }

    pub fn finished(&self, label: impl Into<String>) {
        self.emit(Phase::Merge, Some(100), label.into(), false);
    }

    fn emit(&self, phase: Phase, fixed: Option<u8>, label: String, agent_done: bool) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        if agent_done {
            counters.completed += 1;
        }
        let estimate = fixed.unwrap_or_else(|| self.execution_percent(counters.completed));
        counters.percent = counters.percent.max(estimate);
        counters.seq += 1;

        let event = ProgressEvent {
            seq: counters.seq,
            phase,
            percent: counters.percent,
            label,
            timestamp: Utc::now(),
        };
        let sink = &self.sink;
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
            warn!(seq = counters.seq, phase = %phase, "Progress sink panicked, event dropped");
        }
    }

    fn execution_percent(&self, completed: usize) -> u8 {
        if self.total_agents == 0 {
            return EXECUTION_SHARE as u8;
        }
        let done = completed.min(self.total_agents);
        (done * EXECUTION_SHARE / self.total_agents) as u8
    }
}
