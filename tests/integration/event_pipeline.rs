//! Integration tests for the event pipeline
//!
//! Test execution publishes lifecycle events; these tests check that they
//! travel through the asynchronous bus to the bundled listeners.

use std::sync::Arc;
use std::time::Duration;

use testforge::config::{EventConfig, ExecutionConfig, ForgeConfig};
use testforge::events::{types, LoggingEventListener, MetricsEventListener, ReportingEventListener};
use testforge::{
    CsEvent, EventCategory, EventManager, EventSeverity, InMemoryReport, ParallelExecutionManager,
    TestFailure, TestMethod, TestRegistry, TestSuite,
};

fn config() -> ForgeConfig {
    ForgeConfig::default().with_execution(
        ExecutionConfig::default()
            .with_pool_name("events")
            .with_core_threads(2)
            .with_max_threads(2)
            .with_monitoring(false),
    )
}

fn event_config() -> EventConfig {
    EventConfig::default()
        .with_listener_threads(2)
        .with_poll_interval(Duration::from_millis(10))
        .with_listener_timeout(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_test_event_reaches_logging_and_metrics() {
    let events = Arc::new(EventManager::new(event_config()));
    let logging = Arc::new(LoggingEventListener::new());
    let metrics = Arc::new(MetricsEventListener::new());
    events.register_listener(logging.clone()).unwrap();
    events.register_listener(metrics.clone()).unwrap();
    events.start().unwrap();

    events.fire_event(
        CsEvent::new(types::TEST_FAILED, EventCategory::TestLifecycle, EventSeverity::Error)
            .with_source("checkout")
            .with_context("testName", "CheckoutTests.pay")
            .with_metadata("message", "no such element: #pay-button"),
    );
    assert!(events.wait_for_idle(Duration::from_secs(5)).await);

    assert_eq!(logging.received_count(), 1);
    assert!(logging.recent_events()[0].contains(types::TEST_FAILED));
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.tests_failed, 1);
    assert_eq!(snapshot.failed_tests, vec!["CheckoutTests.pay"]);
    assert_eq!(events.metrics().processed, 1);

    events.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_suite_run_feeds_listeners() {
    let events = Arc::new(EventManager::new(event_config()));
    let metrics = Arc::new(MetricsEventListener::new());
    let published = Arc::new(InMemoryReport::new());
    events.register_listener(metrics.clone()).unwrap();
    events
        .register_listener(Arc::new(ReportingEventListener::new(published.clone())))
        .unwrap();
    events.start().unwrap();

    let mut registry = TestRegistry::new();
    registry.register("SearchTests", "finds_results", |_| Ok(()));
    registry.register("SearchTests", "filters", |_| {
        Err(TestFailure::other("Timed out after 10 seconds waiting for visibility of #filters"))
    });
    let manager = ParallelExecutionManager::new(config(), Arc::new(registry))
        .unwrap()
        .with_event_manager(Arc::clone(&events));

    let suite = TestSuite::new("search")
        .with_test(TestMethod::new("SearchTests", "finds_results"))
        .with_test(TestMethod::new("SearchTests", "filters"));
    let result = manager.execute_test_suite(suite).await;
    assert_eq!(result.passed_tests(), 1);
    assert_eq!(result.failed_tests(), 1);

    assert!(events.wait_for_idle(Duration::from_secs(5)).await);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.tests_started, 2);
    assert_eq!(snapshot.tests_passed, 1);
    assert_eq!(snapshot.tests_failed, 1);
    assert_eq!(snapshot.flaky_failures, 1);
    assert_eq!(metrics.failed_tests(), vec!["SearchTests.filters"]);
    assert!(!published.steps().is_empty());

    manager.shutdown().await;
    events.shutdown().await;
}
