//! Test results and the report aggregation boundary.
//!
//! Executed tests end up in a [`ReportSink`]. The sink is the collaborator
//! responsible for rendering and persistence; [`InMemoryReport`] is the
//! thread-safe aggregator used by default and in tests.

mod result;
mod store;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::EventSeverity;

pub use result::{Attachment, ExecutionException, ExecutionResult, TestResult, TestStatus};
pub use store::{ResultStore, StoreError, StoreResult};

/// One line of report narration, appended by the reporting listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStep {
    /// Result the step belongs to, when the event carried one.
    pub test_id: Option<String>,
    pub event_type: String,
    pub severity: EventSeverity,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Receiver of completed test results.
///
/// Implementations must accept concurrent calls from any number of
/// execution threads.
pub trait ReportSink: Send + Sync {
    /// Hand over a terminal result. The sink owns it from here on.
    fn add_test_result(&self, result: TestResult);

    /// Append a narration step. Sinks without step support ignore it.
    fn add_step(&self, _step: ReportStep) {}
}

#[derive(Debug, Default)]
struct Stored {
    by_id: BTreeMap<String, Arc<TestResult>>,
    arrival: VecDeque<String>,
}

/// Thread-safe, append-only result aggregator keyed by test ID.
///
/// Unbounded by default. A [`bounded`](Self::bounded) report keeps only the
/// most recent results and steps, evicting the oldest first.
#[derive(Debug, Default)]
pub struct InMemoryReport {
    results: RwLock<Stored>,
    steps: Mutex<VecDeque<ReportStep>>,
    retained: Option<usize>,
}

impl InMemoryReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retained` results and `retained` steps.
    pub fn bounded(retained: usize) -> Self {
        Self {
            retained: Some(retained.max(1)),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, test_id: &str) -> Option<Arc<TestResult>> {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .get(test_id)
            .cloned()
    }

    /// Snapshot of all results, ordered by test ID.
    pub fn results(&self) -> Vec<Arc<TestResult>> {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .values()
            .cloned()
            .collect()
    }

    /// Results whose `Class.method` equals `test_name`.
    pub fn results_for(&self, test_name: &str) -> Vec<Arc<TestResult>> {
        self.results()
            .into_iter()
            .filter(|r| r.test_name() == test_name)
            .collect()
    }

    pub fn steps(&self) -> Vec<ReportStep> {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn steps_for(&self, test_id: &str) -> Vec<ReportStep> {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.test_id.as_deref() == Some(test_id))
            .cloned()
            .collect()
    }
}

impl ReportSink for InMemoryReport {
    fn add_test_result(&self, result: TestResult) {
        if !result.is_terminal() {
            warn!(
                test_id = result.id(),
                status = result.status().as_label(),
                "report received a result that is not terminal"
            );
        }
        let mut stored = self.results.write().unwrap_or_else(|e| e.into_inner());
        if stored.by_id.contains_key(result.id()) {
            warn!(test_id = result.id(), "duplicate test result ignored");
            return;
        }
        stored.arrival.push_back(result.id().to_string());
        stored.by_id.insert(result.id().to_string(), Arc::new(result));
        if let Some(retained) = self.retained {
            while stored.arrival.len() > retained {
                if let Some(oldest) = stored.arrival.pop_front() {
                    stored.by_id.remove(&oldest);
                }
            }
        }
    }

    fn add_step(&self, step: ReportStep) {
        let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        if self.retained.is_some_and(|retained| steps.len() >= retained) {
            steps.pop_front();
        }
        steps.push_back(step);
    }
}
