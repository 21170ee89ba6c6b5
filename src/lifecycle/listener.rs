use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analysis::{FailureAnalysis, FailureAnalyzer};
use crate::events::{types, CsEvent, EventCategory, EventManager, EventSeverity};
use crate::failure::TestFailure;
use crate::report::{ExecutionResult, InMemoryReport, ReportSink, TestResult, TestStatus};

/// Captures the browser screen when a test fails.
pub trait ScreenshotCapture: Send + Sync {
    /// Save a screenshot for `test_name` under `dir` and return its path.
    fn capture(&self, test_name: &str, dir: &Path) -> Result<PathBuf, String>;
}

/// Drives a [`TestResult`] through its states and tells the rest of the
/// framework about it: failure analysis, screenshots, lifecycle events and
/// the report sink.
///
/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct TestListener {
    report: Arc<dyn ReportSink>,
    events: Option<Arc<EventManager>>,
    analyzer: Arc<FailureAnalyzer>,
    screenshots: Option<Arc<dyn ScreenshotCapture>>,
    screenshot_dir: PathBuf,
}

/// Results kept by the report of a default listener.
pub const DEFAULT_RETAINED_RESULTS: usize = 1_000;

fn default_report() -> Arc<InMemoryReport> {
    Arc::new(InMemoryReport::bounded(DEFAULT_RETAINED_RESULTS))
}

impl Default for TestListener {
    /// A listener reporting into a bounded in-memory report.
    fn default() -> Self {
        Self::new(default_report())
    }
}

impl TestListener {
    pub fn new(report: Arc<dyn ReportSink>) -> Self {
        Self {
            report,
            events: None,
            analyzer: Arc::new(FailureAnalyzer::new()),
            screenshots: None,
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }

    pub fn with_report_sink(mut self, report: Arc<dyn ReportSink>) -> Self {
        self.report = report;
        self
    }

    pub fn with_event_manager(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<FailureAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_screenshot_capture(
        mut self,
        capture: Arc<dyn ScreenshotCapture>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        self.screenshots = Some(capture);
        self.screenshot_dir = dir.into();
        self
    }

    pub fn report(&self) -> &Arc<dyn ReportSink> {
        &self.report
    }

    pub fn event_manager(&self) -> Option<&Arc<EventManager>> {
        self.events.as_ref()
    }

    pub fn analyzer(&self) -> &FailureAnalyzer {
        &self.analyzer
    }

    pub fn on_suite_start(&self, suite_id: &str, suite_name: &str, test_count: usize) {
        info!(suite_id, suite = suite_name, tests = test_count, "suite started");
        self.publish(|| {
            CsEvent::new(types::SUITE_STARTED, EventCategory::TestLifecycle, EventSeverity::Info)
                .with_source("testforge")
                .with_context("suiteId", suite_id)
                .with_metadata("suiteName", suite_name)
                .with_metadata("testCount", test_count as u64)
        });
    }

    pub fn on_suite_finish(&self, result: &ExecutionResult) {
        info!(
            suite_id = result.suite_id(),
            total = result.total_tests(),
            passed = result.passed_tests(),
            failed = result.failed_tests(),
            skipped = result.skipped_tests(),
            exceptions = result.exceptions().len(),
            "suite finished"
        );
        let severity = if result.has_failures() {
            EventSeverity::Warn
        } else {
            EventSeverity::Info
        };
        self.publish(|| {
            CsEvent::new(types::SUITE_FINISHED, EventCategory::TestLifecycle, severity)
                .with_source("testforge")
                .with_context("suiteId", result.suite_id())
                .with_metadata("suiteName", result.suite_name())
                .with_metadata("total", result.total_tests() as u64)
                .with_metadata("passed", result.passed_tests() as u64)
                .with_metadata("failed", result.failed_tests() as u64)
                .with_metadata("skipped", result.skipped_tests() as u64)
                .with_metadata("exceptions", result.exceptions().len() as u64)
                .with_metadata("successRate", result.success_rate())
                .with_metadata("durationMs", result.duration().as_millis() as u64)
        });
    }

    pub fn on_test_start(&self, result: &mut TestResult) {
        debug!(test = %result.test_name(), test_id = result.id(), "test started");
        result.add_step("Test started");
        self.publish(|| CsEvent::for_test(types::TEST_STARTED, result));
    }

    pub fn on_test_success(&self, result: &mut TestResult) {
        result.complete(TestStatus::Passed);
        info!(
            test = %result.test_name(),
            duration_ms = result.duration().as_millis() as u64,
            "test passed"
        );
        self.finish(types::TEST_PASSED, result);
    }

    /// Record a failure, classify it (unless an analysis is already
    /// attached), capture a screenshot and report the result as failed.
    pub fn on_test_failure(&self, result: &mut TestResult, failure: &TestFailure) {
        result.record_failure(failure);
        if result.analysis().is_none() {
            let analysis = self.analyze(failure, result);
            result.attach_analysis(analysis);
        }
        self.capture_screenshot(result);
        result.complete(TestStatus::Failed);
        if let Some(analysis) = result.analysis() {
            warn!(
                test = %result.test_name(),
                category = %analysis.category(),
                flakiness = analysis.flakiness_score(),
                error = failure.message(),
                "test failed"
            );
        }
        self.finish(types::TEST_FAILED, result);
    }

    /// The test could not run to a verdict because its class setup failed.
    /// Reported like a failure, without analysis or screenshot.
    pub fn on_test_broken(&self, result: &mut TestResult, failure: &TestFailure) {
        result.record_failure(failure);
        result.add_step(format!("Setup failed: {}", failure.message()));
        result.complete(TestStatus::Broken);
        warn!(test = %result.test_name(), error = failure.message(), "test broken by failed setup");
        self.finish(types::TEST_FAILED, result);
    }

    /// A runner-enforced time limit was hit.
    pub fn on_test_timeout(&self, result: &mut TestResult, failure: &TestFailure) {
        let analysis =
            self.analyzer
                .timed_out_analysis(failure, result.method_name(), result.class_name());
        result.attach_analysis(analysis);
        self.on_test_failure(result, failure);
    }

    pub fn on_test_skipped(&self, result: &mut TestResult, reason: &str) {
        result.record_error(reason);
        result.complete(TestStatus::Skipped);
        info!(test = %result.test_name(), reason, "test skipped");
        self.finish(types::TEST_SKIPPED, result);
    }

    /// A failed attempt that will be run again. Leaves the result in the
    /// retried state; the caller resumes it before the next attempt.
    pub fn on_test_retry(&self, result: &mut TestResult, failure: &TestFailure, analysis: &FailureAnalysis) {
        result.record_failure(failure);
        result.attach_analysis(analysis.clone());
        result.mark_retried();
        result.add_step(format!("Attempt {} failed: {}", result.retry_count(), failure.message()));
        warn!(
            test = %result.test_name(),
            attempt = result.retry_count(),
            category = %analysis.category(),
            "retrying failed test"
        );
        self.publish(|| CsEvent::for_test(types::TEST_RETRIED, result));
    }

    pub fn analyze(&self, failure: &TestFailure, result: &TestResult) -> FailureAnalysis {
        self.analyzer
            .analyze_failure(Some(failure), result.method_name(), result.class_name())
    }

    fn finish(&self, event_type: &str, result: &TestResult) {
        self.publish(|| CsEvent::for_test(event_type, result));
        self.report.add_test_result(result.clone());
    }

    fn capture_screenshot(&self, result: &mut TestResult) {
        let Some(capture) = &self.screenshots else {
            return;
        };
        let test_name = result.test_name();
        match capture.capture(&test_name, &self.screenshot_dir) {
            Ok(path) => {
                let path = path.to_string_lossy().into_owned();
                result.add_attachment("Failure Screenshot", path.clone());
                self.publish(|| {
                    CsEvent::new(types::SCREENSHOT_CAPTURED, EventCategory::WebDriver, EventSeverity::Info)
                        .with_source("testforge")
                        .with_context("testId", result.id())
                        .with_context("testName", test_name.as_str())
                        .with_metadata("path", path.as_str())
                });
            }
            Err(err) => warn!(test = %test_name, error = %err, "failed to capture screenshot"),
        }
    }

    fn publish(&self, build: impl FnOnce() -> CsEvent) {
        if let Some(events) = &self.events {
            events.fire_event(build());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FailureCategory;
    use crate::config::EventConfig;
    use crate::events::MetricsEventListener;
    use crate::failure::FailureKind;
    use crate::report::ExecutionException;
    use std::time::Duration;

    struct FixedScreenshot;

    impl ScreenshotCapture for FixedScreenshot {
        fn capture(&self, test_name: &str, dir: &Path) -> Result<PathBuf, String> {
            Ok(dir.join(format!("{}.png", test_name)))
        }
    }

    struct BrokenScreenshot;

    impl ScreenshotCapture for BrokenScreenshot {
        fn capture(&self, _test_name: &str, _dir: &Path) -> Result<PathBuf, String> {
            Err("no browser session".to_string())
        }
    }

    fn listener() -> (TestListener, Arc<InMemoryReport>) {
        let report = Arc::new(InMemoryReport::new());
        (TestListener::new(report.clone()), report)
    }

    #[test]
    fn test_success_is_reported_passed() {
        let (listener, report) = listener();
        let mut result = TestResult::start("LoginTests", "valid_login");
        listener.on_test_start(&mut result);
        listener.on_test_success(&mut result);

        let stored = report.get(result.id()).unwrap();
        assert_eq!(stored.status(), TestStatus::Passed);
        assert_eq!(stored.steps(), ["Test started"]);
    }

    #[test]
    fn test_failure_is_analyzed_and_screenshot_attached() {
        let (listener, report) = listener();
        let listener = listener.with_screenshot_capture(Arc::new(FixedScreenshot), "shots");
        let mut result = TestResult::start("LoginTests", "valid_login");
        let failure = TestFailure::new(
            FailureKind::ElementNotFound,
            "NoSuchElementException",
            "no such element: Unable to locate element: {\"method\":\"xpath\"}",
        );
        listener.on_test_failure(&mut result, &failure);

        let stored = report.get(result.id()).unwrap();
        assert_eq!(stored.status(), TestStatus::Failed);
        assert_eq!(stored.analysis().unwrap().category(), FailureCategory::FlakyElement);
        assert_eq!(stored.attachments().len(), 1);
        assert!(stored.attachments()[0].path.ends_with("LoginTests.valid_login.png"));
        assert!(stored.stack_trace().unwrap().starts_with("NoSuchElementException"));
    }

    #[test]
    fn test_screenshot_failure_is_not_fatal() {
        let (listener, report) = listener();
        let listener = listener.with_screenshot_capture(Arc::new(BrokenScreenshot), "shots");
        let mut result = TestResult::start("LoginTests", "valid_login");
        listener.on_test_failure(&mut result, &TestFailure::assertion("expected 1 but was 2"));

        let stored = report.get(result.id()).unwrap();
        assert_eq!(stored.status(), TestStatus::Failed);
        assert!(stored.attachments().is_empty());
    }

    #[test]
    fn test_timeout_keeps_prepopulated_analysis() {
        let (listener, report) = listener();
        let mut result = TestResult::start("CheckoutTests", "slow_page");
        let failure = TestFailure::timed_out(Duration::from_millis(100));
        listener.on_test_timeout(&mut result, &failure);

        let analysis = report.get(result.id()).unwrap().analysis().cloned().unwrap();
        assert_eq!(analysis.category(), FailureCategory::FlakyTimeout);
        assert_eq!(analysis.flakiness_score(), 0.8);
    }

    #[test]
    fn test_retry_then_skip() {
        let (listener, report) = listener();
        let mut result = TestResult::start("CartTests", "add_item");
        let failure = TestFailure::other("stale element reference");
        let analysis = listener.analyze(&failure, &result);
        listener.on_test_retry(&mut result, &failure, &analysis);
        assert_eq!(result.status(), TestStatus::Retried);
        assert_eq!(result.retry_count(), 1);
        assert!(report.is_empty());

        assert!(result.resume());
        listener.on_test_skipped(&mut result, "feature flag disabled");
        let stored = report.get(result.id()).unwrap();
        assert_eq!(stored.status(), TestStatus::Skipped);
        assert_eq!(stored.error_message(), Some("feature flag disabled"));
        assert_eq!(stored.retry_count(), 1);
    }

    #[test]
    fn test_lifecycle_events_published() {
        let events = Arc::new(EventManager::new(EventConfig::default().with_async(false)));
        let metrics = Arc::new(MetricsEventListener::new());
        events.register_listener(metrics.clone()).unwrap();
        let (listener, _report) = listener();
        let listener = listener.with_event_manager(events);

        let mut passed = TestResult::start("A", "one");
        listener.on_test_start(&mut passed);
        listener.on_test_success(&mut passed);
        let mut failed = TestResult::start("A", "two");
        listener.on_test_start(&mut failed);
        listener.on_test_failure(&mut failed, &TestFailure::assertion("expected true"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tests_started, 2);
        assert_eq!(snapshot.tests_passed, 1);
        assert_eq!(snapshot.tests_failed, 1);
        assert_eq!(metrics.failed_tests(), vec!["A.two"]);
    }

    #[test]
    fn test_broken_result_is_reported_as_failure_event() {
        let events = Arc::new(EventManager::new(EventConfig::default().with_async(false)));
        let metrics = Arc::new(MetricsEventListener::new());
        events.register_listener(metrics.clone()).unwrap();
        let (listener, report) = listener();
        let listener = listener.with_event_manager(events);

        let mut result = TestResult::start("AdminTests", "list_users");
        listener.on_test_broken(&mut result, &TestFailure::other("login page unavailable"));

        let stored = report.get(result.id()).unwrap();
        assert_eq!(stored.status(), TestStatus::Broken);
        assert_eq!(stored.error_message(), Some("login page unavailable"));
        assert!(stored.analysis().is_none());
        assert_eq!(metrics.snapshot().tests_failed, 1);
    }

    #[test]
    fn test_suite_finish_warns_on_exceptions() {
        let events = Arc::new(EventManager::new(EventConfig::default().with_async(false)));
        let metrics = Arc::new(MetricsEventListener::new());
        events.register_listener(metrics.clone()).unwrap();
        let (listener, _report) = listener();
        let listener = listener.with_event_manager(events);

        let mut passed = TestResult::start("A", "one");
        passed.complete(TestStatus::Passed);
        let clean = ExecutionResult::new("s1", "clean", chrono::Utc::now(), vec![passed.clone()], Vec::new());
        listener.on_suite_finish(&clean);
        let broken = ExecutionResult::new(
            "s2",
            "with exceptions",
            chrono::Utc::now(),
            vec![passed],
            vec![ExecutionException {
                test: Some("A.missing".to_string()),
                message: "no test registered for A.missing".to_string(),
            }],
        );
        listener.on_suite_finish(&broken);

        let by_severity = metrics.snapshot().by_severity;
        assert_eq!(by_severity.get(&EventSeverity::Info), Some(&1));
        assert_eq!(by_severity.get(&EventSeverity::Warn), Some(&1));
    }

    #[test]
    fn test_default_report_is_bounded() {
        let report = default_report();
        for i in 0..DEFAULT_RETAINED_RESULTS + 5 {
            let mut result = TestResult::start("LoadTests", format!("case_{}", i));
            result.complete(TestStatus::Passed);
            report.add_test_result(result);
        }
        assert_eq!(report.len(), DEFAULT_RETAINED_RESULTS);
        assert!(report.results_for("LoadTests.case_0").is_empty());
    }
}
