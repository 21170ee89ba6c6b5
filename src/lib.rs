//! Parallel test execution core for UI test automation.
//!
//! `testforge` runs registered test bodies concurrently on a bounded worker
//! pool, classifies failures into flaky and genuine categories, and publishes
//! lifecycle events through an asynchronous event bus to logging, metrics and
//! reporting listeners.
//!
//! # Overview
//!
//! - **ParallelExecutionManager**: submits each test of a suite to the pool and
//!   aggregates the results into an [`ExecutionResult`](report::ExecutionResult)
//! - **FailureAnalyzer**: pattern-based categorization, flakiness scoring and
//!   recommendations
//! - **EventManager**: bounded-queue event bus with per-listener fan-out
//! - **TestListener**: lifecycle bridge that attaches analyses, screenshots and
//!   retries to results
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use testforge::config::ForgeConfig;
//! use testforge::parallel::{ParallelExecutionManager, TestMethod, TestRegistry, TestSuite};
//!
//! let mut registry = TestRegistry::new();
//! registry.register("LoginTests", "valid_login", |_invocation| Ok(()));
//!
//! let manager = ParallelExecutionManager::new(ForgeConfig::default(), Arc::new(registry))?;
//! let suite = TestSuite::new("smoke").with_test(TestMethod::new("LoginTests", "valid_login"));
//! let result = manager.execute_test_suite(suite).await;
//! assert_eq!(result.passed_tests(), 1);
//! ```

pub mod analysis;
pub mod config;
pub mod context;
pub mod events;
pub mod failure;
pub mod lifecycle;
pub mod logging;
pub mod parallel;
pub mod report;

pub use analysis::{FailureAnalysis, FailureAnalyzer, FailureCategory};
pub use config::{ForgeConfig, Properties, PropertySource};
pub use context::ThreadContext;
pub use events::{CsEvent, EventCategory, EventListener, EventManager, EventSeverity};
pub use failure::{FailureKind, TestFailure};
pub use lifecycle::{RetryPolicy, ScreenshotCapture, TestListener};
pub use parallel::{ExecutionError, ParallelExecutionManager, TestMethod, TestRegistry, TestSuite};
pub use report::{ExecutionResult, InMemoryReport, ReportSink, TestResult, TestStatus};
