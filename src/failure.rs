//! Failures raised by test bodies.
//!
//! A [`TestFailure`] is what a test body returns (or what a caught panic is
//! turned into). The browser-automation collaborator tags each failure with a
//! [`FailureKind`] at the boundary, so classification never has to match on
//! the type names of a particular driver library.

use std::any::Any;
use std::fmt::Write as _;

use thiserror::Error;

/// Closed set of failure kinds produced at the automation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The driver could not find an element.
    ElementNotFound,
    /// A previously located element is no longer attached to the page.
    StaleElement,
    /// A wait inside the test (explicit or implicit) ran out of time.
    Timeout,
    /// The element exists but could not receive the interaction.
    NotInteractable,
    /// The click landed on another element.
    ClickIntercepted,
    /// An unexpected alert dialog was open.
    UnhandledAlert,
    /// An assertion in the test body failed.
    Assertion,
    /// A BDD step definition failed.
    StepDefinition,
    /// The test runner stopped the test for exceeding its time limit.
    TestTimeout,
    /// The test body asked to be skipped.
    Skipped,
    /// The test body panicked.
    Panic,
    /// Anything else.
    Other,
}

/// A failure escaping a test body, with an optional chain of causes.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{type_name}: {message}")]
pub struct TestFailure {
    kind: FailureKind,
    type_name: String,
    message: String,
    frames: Vec<String>,
    #[source]
    cause: Option<Box<TestFailure>>,
}

impl TestFailure {
    /// Create a failure of the given kind.
    ///
    /// `type_name` is the producer's name for the error (for example the
    /// driver's exception or error type); it is kept for reporting only.
    pub fn new(kind: FailureKind, type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    /// Generic failure with no particular kind.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, "TestFailure", message)
    }

    /// Assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, "AssertionError", message)
    }

    /// Failure raised from a BDD step definition.
    pub fn step(message: impl Into<String>) -> Self {
        Self::new(FailureKind::StepDefinition, "StepDefinitionException", message)
    }

    /// Marks the test as skipped rather than failed.
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Skipped, "SkipException", reason)
    }

    /// Runner-enforced timeout of the whole test.
    pub fn timed_out(limit: std::time::Duration) -> Self {
        Self::new(
            FailureKind::TestTimeout,
            "ThreadTimeoutException",
            format!("Method didn't finish within the time-out {}ms", limit.as_millis()),
        )
    }

    /// Converts a caught panic payload into a failure.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "test body panicked with a non-string payload".to_string()
        };
        Self::new(FailureKind::Panic, "panic", message)
    }

    /// Appends a location frame (one line of the trace).
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Attaches the failure that caused this one.
    pub fn with_cause(mut self, cause: TestFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Last path segment of the type name (`a.b.NoSuchElementException` → `NoSuchElementException`).
    pub fn simple_type_name(&self) -> &str {
        self.type_name
            .rsplit(['.', ':'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.type_name)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn cause(&self) -> Option<&TestFailure> {
        self.cause.as_deref()
    }

    /// Iterates over this failure followed by its chain of causes.
    pub fn chain(&self) -> impl Iterator<Item = &TestFailure> {
        std::iter::successors(Some(self), |failure| failure.cause())
    }

    /// Full trace text, each cause introduced by `Caused by:`.
    pub fn stack_trace(&self) -> String {
        let mut trace = String::new();
        for (depth, failure) in self.chain().enumerate() {
            if depth > 0 {
                trace.push_str("Caused by: ");
            }
            let _ = writeln!(trace, "{}", failure);
            for frame in &failure.frames {
                let _ = writeln!(trace, "\tat {}", frame);
            }
        }
        trace
    }
}
