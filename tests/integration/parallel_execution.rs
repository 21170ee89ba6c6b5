//! Integration tests for parallel suite execution
//!
//! These tests run whole suites through the execution manager and check the
//! aggregate results, the isolation of per-test context and the containment
//! of failures.

use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use testforge::config::{ExecutionConfig, ForgeConfig};
use testforge::{
    ExecutionError, FailureCategory, InMemoryReport, ParallelExecutionManager, TestFailure,
    TestMethod, TestRegistry, TestStatus, TestSuite, ThreadContext,
};

fn config(threads: usize) -> ForgeConfig {
    ForgeConfig::default().with_execution(
        ExecutionConfig::default()
            .with_pool_name("it")
            .with_core_threads(threads)
            .with_max_threads(threads)
            .with_monitoring(false)
            .with_shutdown_timeout(Duration::from_secs(5)),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_suite_yields_one_result_per_test() {
    let mut registry = TestRegistry::new();
    for i in 0..12 {
        registry.register("CatalogTests", format!("item_{}", i), move |_| {
            if i % 4 == 0 {
                Err(TestFailure::assertion(format!("item {} missing", i)))
            } else {
                Ok(())
            }
        });
    }
    let report = Arc::new(InMemoryReport::new());
    let manager = ParallelExecutionManager::new(config(4), Arc::new(registry))
        .unwrap()
        .with_report_sink(report.clone());

    let suite = TestSuite::new("catalog")
        .with_tests((0..12).map(|i| TestMethod::new("CatalogTests", format!("item_{}", i))));
    let result = manager.execute_test_suite(suite).await;

    assert_eq!(result.total_tests(), 12);
    assert_eq!(result.passed_tests(), 9);
    assert_eq!(result.failed_tests(), 3);
    assert!(result.passed_tests() + result.failed_tests() + result.skipped_tests() <= 12);
    assert!(!result.has_exceptions());
    assert!(result.has_failures());
    assert!((result.success_rate() - 0.75).abs() < 1e-9);

    let ids: HashSet<&str> = result.results().iter().map(|r| r.id()).collect();
    assert_eq!(ids.len(), 12);
    assert!(result.results().iter().all(|r| r.suite_id() == Some(result.suite_id())));
    assert_eq!(report.len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_thread_context_isolation() {
    const TESTS: usize = 4;
    // every test waits for all the others, so they are guaranteed to overlap
    let rendezvous = Arc::new(Barrier::new(TESTS));
    let observed: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut registry = TestRegistry::new();
    for i in 0..TESTS {
        let rendezvous = Arc::clone(&rendezvous);
        let observed = Arc::clone(&observed);
        registry.register("ProfileTests", format!("user_{}", i), move |invocation| {
            rendezvous.wait();
            let current = ThreadContext::current()
                .ok_or_else(|| TestFailure::other("no context installed"))?;
            if current.test_id != invocation.context().test_id {
                return Err(TestFailure::other("context leaked between tests"));
            }
            observed.lock().unwrap().push((
                current.test_method.clone().unwrap_or_default(),
                current.test_id.clone().unwrap_or_default(),
            ));
            Ok(())
        });
    }
    let manager = ParallelExecutionManager::new(config(TESTS), Arc::new(registry)).unwrap();

    let suite = TestSuite::new("profiles")
        .with_tests((0..TESTS).map(|i| TestMethod::new("ProfileTests", format!("user_{}", i))));
    let result = manager.execute_test_suite(suite).await;
    assert_eq!(result.passed_tests(), TESTS, "{:?}", result.results());

    let observed = observed.lock().unwrap();
    let methods: HashSet<&str> = observed.iter().map(|(m, _)| m.as_str()).collect();
    let test_ids: HashSet<&str> = observed.iter().map(|(_, id)| id.as_str()).collect();
    assert_eq!(methods.len(), TESTS);
    assert_eq!(test_ids.len(), TESTS);
    for test in result.results() {
        let seen = observed
            .iter()
            .find(|(method, _)| method == test.method_name())
            .map(|(_, id)| id.as_str());
        assert_eq!(seen, Some(test.id()));
    }

    // the worker threads are reused; nothing may linger on this thread either
    assert!(!ThreadContext::is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_test_does_not_abort_siblings() {
    let mut registry = TestRegistry::new();
    registry.register("OrderTests", "panics", |_| panic!("order id was None"));
    registry.register("OrderTests", "stale", |_| {
        Err(TestFailure::other("stale element reference: element is not attached to the page document"))
    });
    registry.register("OrderTests", "passes", |_| Ok(()));
    let manager = ParallelExecutionManager::new(config(2), Arc::new(registry)).unwrap();

    let suite = TestSuite::new("orders")
        .with_test(TestMethod::new("OrderTests", "panics"))
        .with_test(TestMethod::new("OrderTests", "stale"))
        .with_test(TestMethod::new("OrderTests", "passes"))
        .with_test(TestMethod::new("OrderTests", "not_registered"));
    let result = manager.execute_test_suite(suite).await;

    assert_eq!(result.total_tests(), 3);
    assert_eq!(result.passed_tests(), 1);
    assert_eq!(result.failed_tests(), 2);
    assert_eq!(result.exceptions().len(), 1);
    assert!(result.exceptions()[0].message.contains("OrderTests.not_registered"));

    let stale = result
        .results()
        .iter()
        .find(|r| r.method_name() == "stale")
        .unwrap();
    assert_eq!(stale.status(), TestStatus::Failed);
    assert_eq!(stale.analysis().unwrap().category(), FailureCategory::FlakyStale);
    assert!(stale.analysis().unwrap().is_flaky());
    assert_eq!(result.flaky_failures(), 1);
}

#[test]
fn test_single_test_future_from_sync_code() {
    let mut registry = TestRegistry::new();
    registry.register("HealthTests", "ping", |_| Ok(()));
    let manager = ParallelExecutionManager::new(config(1), Arc::new(registry)).unwrap();

    let result = tokio_test::block_on(manager.execute_test(&TestMethod::new("HealthTests", "ping"), None))
        .unwrap();
    assert_eq!(result.status(), TestStatus::Passed);

    manager.shutdown_blocking();
    let rejected = tokio_test::block_on(manager.execute_test(&TestMethod::new("HealthTests", "ping"), None));
    assert_eq!(rejected.err(), Some(ExecutionError::ShuttingDown));
}
