use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::report::{TestResult, TestStatus};

/// Well-known event type strings.
pub mod types {
    pub const SUITE_STARTED: &str = "SUITE_STARTED";
    pub const SUITE_FINISHED: &str = "SUITE_FINISHED";
    pub const TEST_STARTED: &str = "TEST_STARTED";
    pub const TEST_PASSED: &str = "TEST_PASSED";
    pub const TEST_FAILED: &str = "TEST_FAILED";
    pub const TEST_SKIPPED: &str = "TEST_SKIPPED";
    pub const TEST_RETRIED: &str = "TEST_RETRIED";
    pub const SCREENSHOT_CAPTURED: &str = "SCREENSHOT_CAPTURED";
    pub const POOL_SATURATED: &str = "POOL_SATURATED";
}

/// Area of the framework an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    TestLifecycle,
    WebDriver,
    ApiTesting,
    Performance,
    Database,
    Reporting,
    Configuration,
    Security,
    System,
    Custom,
}

impl EventCategory {
    pub const ALL: [EventCategory; 10] = [
        EventCategory::TestLifecycle,
        EventCategory::WebDriver,
        EventCategory::ApiTesting,
        EventCategory::Performance,
        EventCategory::Database,
        EventCategory::Reporting,
        EventCategory::Configuration,
        EventCategory::Security,
        EventCategory::System,
        EventCategory::Custom,
    ];

    pub fn as_label(self) -> &'static str {
        match self {
            EventCategory::TestLifecycle => "TEST_LIFECYCLE",
            EventCategory::WebDriver => "WEB_DRIVER",
            EventCategory::ApiTesting => "API_TESTING",
            EventCategory::Performance => "PERFORMANCE",
            EventCategory::Database => "DATABASE",
            EventCategory::Reporting => "REPORTING",
            EventCategory::Configuration => "CONFIGURATION",
            EventCategory::Security => "SECURITY",
            EventCategory::System => "SYSTEM",
            EventCategory::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Ordered event severity, `Trace` lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl EventSeverity {
    pub fn as_label(self) -> &'static str {
        match self {
            EventSeverity::Trace => "TRACE",
            EventSeverity::Debug => "DEBUG",
            EventSeverity::Info => "INFO",
            EventSeverity::Warn => "WARN",
            EventSeverity::Error => "ERROR",
            EventSeverity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A fact published on the event bus.
///
/// Built with the `with_*` methods and then handed to
/// [`EventManager::fire_event`](super::EventManager::fire_event) by value;
/// from that point it is shared read-only between dispatch threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsEvent {
    id: String,
    event_type: String,
    category: EventCategory,
    severity: EventSeverity,
    timestamp: DateTime<Utc>,
    thread_name: String,
    thread_id: String,
    source: String,
    metadata: BTreeMap<String, Value>,
    context: BTreeMap<String, String>,
}

impl CsEvent {
    /// Create an event stamped with the current time and thread.
    pub fn new(event_type: impl Into<String>, category: EventCategory, severity: EventSeverity) -> Self {
        let thread = std::thread::current();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            category,
            severity,
            timestamp: Utc::now(),
            thread_name: thread.name().unwrap_or("unnamed").to_string(),
            thread_id: format!("{:?}", thread.id()),
            source: String::new(),
            metadata: BTreeMap::new(),
            context: BTreeMap::new(),
        }
    }

    /// Lifecycle event describing a test result.
    ///
    /// Context carries `testId`, `testName`, `className`, `methodName` and,
    /// when known, `suiteId`; failed results also carry the analysis in
    /// metadata.
    pub fn for_test(event_type: impl Into<String>, result: &TestResult) -> Self {
        let severity = match result.status() {
            TestStatus::Failed | TestStatus::Broken => EventSeverity::Error,
            TestStatus::Retried | TestStatus::Skipped => EventSeverity::Warn,
            _ => EventSeverity::Info,
        };
        let mut event = Self::new(event_type, EventCategory::TestLifecycle, severity)
            .with_source("testforge")
            .with_context("testId", result.id())
            .with_context("testName", result.test_name())
            .with_context("className", result.class_name())
            .with_context("methodName", result.method_name())
            .with_metadata("status", result.status().as_label())
            .with_metadata("retryCount", result.retry_count());
        if let Some(suite_id) = result.suite_id() {
            event = event.with_context("suiteId", suite_id);
        }
        if result.is_terminal() {
            event = event.with_metadata("durationMs", result.duration().as_millis() as u64);
        }
        if let Some(message) = result.error_message() {
            event = event.with_metadata("message", message);
        }
        if let Some(analysis) = result.analysis() {
            event = event
                .with_metadata("failureCategory", analysis.category().as_label())
                .with_metadata("flakinessScore", analysis.flakiness_score())
                .with_metadata("flaky", analysis.is_flaky());
        }
        event
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn severity(&self) -> EventSeverity {
        self.severity
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// `message` metadata when present, otherwise the event type.
    pub fn description(&self) -> String {
        match self.metadata.get("message") {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => self.event_type.clone(),
        }
    }
}
