//! Built-in listeners: logging, metrics and report narration.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::event::types;
use super::{CsEvent, EventCategory, EventListener, EventSeverity, ListenerError};
use crate::report::{ReportSink, ReportStep};

const RECENT_EVENTS: usize = 100;
const RECENT_FAILURES: usize = 100;

/// Writes every event it receives to the `tracing` log.
pub struct LoggingEventListener {
    minimum_severity: EventSeverity,
    received: AtomicU64,
    recent: Mutex<VecDeque<String>>,
}

impl LoggingEventListener {
    pub const NAME: &'static str = "logging";

    pub fn new() -> Self {
        Self {
            minimum_severity: EventSeverity::Info,
            received: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS)),
        }
    }

    pub fn with_minimum_severity(mut self, severity: EventSeverity) -> Self {
        self.minimum_severity = severity;
        self
    }

    pub fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Last formatted lines, oldest first.
    pub fn recent_events(&self) -> Vec<String> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for LoggingEventListener {
    fn default() -> Self {
        Self::new()
    }
}

impl EventListener for LoggingEventListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn minimum_severity(&self) -> EventSeverity {
        self.minimum_severity
    }

    fn priority(&self) -> i32 {
        100
    }

    fn on_event(&self, event: &CsEvent) -> Result<(), ListenerError> {
        self.received.fetch_add(1, Ordering::Relaxed);
        let line = format!(
            "[{}] {} {}: {}",
            event.severity(),
            event.category(),
            event.event_type(),
            event.description()
        );
        let test = event.context_value("testName").unwrap_or("-");
        match event.severity() {
            EventSeverity::Trace => trace!(event_type = event.event_type(), test, "{}", line),
            EventSeverity::Debug => debug!(event_type = event.event_type(), test, "{}", line),
            EventSeverity::Info => info!(event_type = event.event_type(), test, "{}", line),
            EventSeverity::Warn => warn!(event_type = event.event_type(), test, "{}", line),
            EventSeverity::Error | EventSeverity::Fatal => {
                error!(event_type = event.event_type(), test, "{}", line)
            }
        }
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == RECENT_EVENTS {
            recent.pop_front();
        }
        recent.push_back(line);
        Ok(())
    }
}

/// Aggregated counts kept by [`MetricsEventListener`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestMetricsSnapshot {
    pub events_total: u64,
    pub tests_started: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub tests_skipped: u64,
    pub tests_retried: u64,
    pub flaky_failures: u64,
    pub total_test_duration: Duration,
    pub by_category: BTreeMap<EventCategory, u64>,
    pub by_severity: BTreeMap<EventSeverity, u64>,
    /// Most recent failed tests, oldest first.
    pub failed_tests: VecDeque<String>,
}

impl TestMetricsSnapshot {
    /// Passed share of finished tests, 0.0 when none finished.
    pub fn pass_rate(&self) -> f64 {
        let finished = self.tests_passed + self.tests_failed;
        if finished == 0 {
            0.0
        } else {
            self.tests_passed as f64 / finished as f64
        }
    }
}

/// Counts lifecycle outcomes and event volume.
#[derive(Default)]
pub struct MetricsEventListener {
    state: Mutex<TestMetricsSnapshot>,
}

impl MetricsEventListener {
    pub const NAME: &'static str = "metrics";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TestMetricsSnapshot {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Names of the last failed tests, oldest first.
    pub fn failed_tests(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failed_tests
            .iter()
            .cloned()
            .collect()
    }
}

impl EventListener for MetricsEventListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        50
    }

    fn on_event(&self, event: &CsEvent) -> Result<(), ListenerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.events_total += 1;
        *state.by_category.entry(event.category()).or_default() += 1;
        *state.by_severity.entry(event.severity()).or_default() += 1;

        if event.category() != EventCategory::TestLifecycle {
            return Ok(());
        }
        match event.event_type() {
            types::TEST_STARTED => state.tests_started += 1,
            types::TEST_PASSED => state.tests_passed += 1,
            types::TEST_SKIPPED => state.tests_skipped += 1,
            types::TEST_RETRIED => state.tests_retried += 1,
            types::TEST_FAILED => {
                state.tests_failed += 1;
                if event.metadata_value("flaky") == Some(&Value::Bool(true)) {
                    state.flaky_failures += 1;
                }
                let name = event
                    .context_value("testName")
                    .unwrap_or("unknown")
                    .to_string();
                if state.failed_tests.len() == RECENT_FAILURES {
                    state.failed_tests.pop_front();
                }
                state.failed_tests.push_back(name);
            }
            _ => {}
        }
        if let Some(ms) = event.metadata_value("durationMs").and_then(Value::as_u64) {
            if event.event_type() != types::TEST_STARTED {
                state.total_test_duration += Duration::from_millis(ms);
            }
        }
        Ok(())
    }
}

/// Narrates test activity into a [`ReportSink`] as report steps.
pub struct ReportingEventListener {
    sink: Arc<dyn ReportSink>,
}

impl ReportingEventListener {
    pub const NAME: &'static str = "reporting";

    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self { sink }
    }
}

impl EventListener for ReportingEventListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supported_categories(&self) -> HashSet<EventCategory> {
        HashSet::from([
            EventCategory::TestLifecycle,
            EventCategory::WebDriver,
            EventCategory::ApiTesting,
            EventCategory::Reporting,
        ])
    }

    fn minimum_severity(&self) -> EventSeverity {
        EventSeverity::Info
    }

    fn priority(&self) -> i32 {
        10
    }

    fn on_event(&self, event: &CsEvent) -> Result<(), ListenerError> {
        self.sink.add_step(ReportStep {
            test_id: event.context_value("testId").map(str::to_string),
            event_type: event.event_type().to_string(),
            severity: event.severity(),
            message: event.description(),
            recorded_at: event.timestamp(),
        });
        Ok(())
    }
}
