use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analysis::FailureAnalysis;
use crate::failure::TestFailure;

/// Status of one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
    /// An attempt failed and the test is being run again.
    Retried,
    /// The test could not run to a verdict (setup or harness problem).
    Broken,
}

impl TestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TestStatus::Passed | TestStatus::Failed | TestStatus::Skipped | TestStatus::Broken
        )
    }

    pub fn as_label(self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Running => "running",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Retried => "retried",
            TestStatus::Broken => "broken",
        }
    }
}

/// A named artifact attached to a result (screenshot, log file, video).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub path: String,
}

/// Record of one test-method execution.
///
/// Mutable only while it is not terminal; once [`complete`](Self::complete)
/// has set a terminal status every further mutation is refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    id: String,
    suite_id: Option<String>,
    class_name: String,
    method_name: String,
    status: TestStatus,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    stack_trace: Option<String>,
    retry_count: u32,
    analysis: Option<FailureAnalysis>,
    steps: Vec<String>,
    attachments: Vec<Attachment>,
    parameters: BTreeMap<String, String>,
}

impl TestResult {
    /// Create a result for a test that is starting now.
    pub fn start(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            suite_id: None,
            class_name: class_name.into(),
            method_name: method_name.into(),
            status: TestStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            error_message: None,
            stack_trace: None,
            retry_count: 0,
            analysis: None,
            steps: Vec::new(),
            attachments: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_suite_id(mut self, suite_id: impl Into<String>) -> Self {
        self.suite_id = Some(suite_id.into());
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn suite_id(&self) -> Option<&str> {
        self.suite_id.as_deref()
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// `Class.method`.
    pub fn test_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Wall time between start and end; zero while running.
    pub fn duration(&self) -> Duration {
        self.ended_at
            .and_then(|end| (end - self.started_at).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn analysis(&self) -> Option<&FailureAnalysis> {
        self.analysis.as_ref()
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    fn guard_mutation(&self, what: &str) -> bool {
        if self.is_terminal() {
            warn!(
                test_id = %self.id,
                status = self.status.as_label(),
                "ignoring {} on a completed test result",
                what
            );
            return false;
        }
        true
    }

    pub fn add_step(&mut self, step: impl Into<String>) -> bool {
        if !self.guard_mutation("step") {
            return false;
        }
        self.steps.push(step.into());
        true
    }

    pub fn add_attachment(&mut self, name: impl Into<String>, path: impl Into<String>) -> bool {
        if !self.guard_mutation("attachment") {
            return false;
        }
        self.attachments.push(Attachment {
            name: name.into(),
            path: path.into(),
        });
        true
    }

    /// Stores the message and full trace of a failure.
    pub fn record_failure(&mut self, failure: &TestFailure) -> bool {
        if !self.guard_mutation("failure") {
            return false;
        }
        self.error_message = Some(failure.message().to_string());
        self.stack_trace = Some(failure.stack_trace());
        true
    }

    /// Stores a plain error message with no trace.
    pub fn record_error(&mut self, message: impl Into<String>) -> bool {
        if !self.guard_mutation("error") {
            return false;
        }
        self.error_message = Some(message.into());
        true
    }

    pub fn attach_analysis(&mut self, analysis: FailureAnalysis) -> bool {
        if !self.guard_mutation("analysis") {
            return false;
        }
        self.analysis = Some(analysis);
        true
    }

    /// Marks the current attempt as retried; the next attempt resumes with
    /// [`resume`](Self::resume).
    pub fn mark_retried(&mut self) -> bool {
        if !self.guard_mutation("retry") {
            return false;
        }
        self.status = TestStatus::Retried;
        self.retry_count += 1;
        true
    }

    /// Puts a retried result back into the running state for the next attempt.
    pub fn resume(&mut self) -> bool {
        if !self.guard_mutation("resume") {
            return false;
        }
        self.status = TestStatus::Running;
        self.error_message = None;
        self.stack_trace = None;
        self.analysis = None;
        true
    }

    /// Moves the result to a terminal status. Returns `false` (and changes
    /// nothing) if the result is already terminal or `status` is not terminal.
    pub fn complete(&mut self, status: TestStatus) -> bool {
        if !status.is_terminal() {
            warn!(test_id = %self.id, status = status.as_label(), "not a terminal status");
            return false;
        }
        if !self.guard_mutation("completion") {
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        true
    }
}

/// An infrastructure failure that prevented a test from producing a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionException {
    /// `Class.method` of the affected test, when known.
    pub test: Option<String>,
    pub message: String,
}

/// Aggregate of one suite run, read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    suite_id: String,
    suite_name: String,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    results: Vec<TestResult>,
    exceptions: Vec<ExecutionException>,
}

impl ExecutionResult {
    /// Finalize a suite run that started at `started_at` and ends now.
    pub fn new(
        suite_id: impl Into<String>,
        suite_name: impl Into<String>,
        started_at: DateTime<Utc>,
        results: Vec<TestResult>,
        exceptions: Vec<ExecutionException>,
    ) -> Self {
        Self {
            suite_id: suite_id.into(),
            suite_name: suite_name.into(),
            started_at,
            ended_at: Utc::now(),
            results,
            exceptions,
        }
    }

    pub fn suite_id(&self) -> &str {
        &self.suite_id
    }

    pub fn suite_name(&self) -> &str {
        &self.suite_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn exceptions(&self) -> &[ExecutionException] {
        &self.exceptions
    }

    pub fn total_tests(&self) -> usize {
        self.results.len()
    }

    fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status() == status).count()
    }

    pub fn passed_tests(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    /// Failed and broken tests.
    pub fn failed_tests(&self) -> usize {
        self.count(TestStatus::Failed) + self.count(TestStatus::Broken)
    }

    pub fn skipped_tests(&self) -> usize {
        self.count(TestStatus::Skipped)
    }

    /// Tests whose failure was classified as flaky.
    pub fn flaky_failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status() == TestStatus::Failed)
            .filter(|r| r.analysis().is_some_and(FailureAnalysis::is_flaky))
            .count()
    }

    /// Passed tests as a fraction of all tests (0.0 for an empty suite).
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.passed_tests() as f64 / self.results.len() as f64
    }

    pub fn has_exceptions(&self) -> bool {
        !self.exceptions.is_empty()
    }

    /// Any failed test or any infrastructure exception.
    pub fn has_failures(&self) -> bool {
        self.failed_tests() > 0 || self.has_exceptions()
    }

    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
