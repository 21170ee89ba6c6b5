//! Parallel execution manager

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{self, join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn};

use super::pool::{Job, PoolStats, WorkerPool};
use super::suite::{TestBody, TestInvocation, TestMethod, TestRegistry, TestSuite};
use super::ExecutionError;
use crate::config::{ForgeConfig, Properties};
use crate::context::ThreadContext;
use crate::events::{types, CsEvent, EventCategory, EventManager, EventSeverity};
use crate::failure::{FailureKind, TestFailure};
use crate::lifecycle::{RetryPolicy, ScreenshotCapture, TestListener};
use crate::report::{ExecutionException, ExecutionResult, ReportSink, TestResult};

type EventSlot = Arc<RwLock<Option<Arc<EventManager>>>>;

/// Runs test methods concurrently on a [`WorkerPool`].
///
/// Every test runs as one unit of work: its [`ThreadContext`] is installed
/// for the duration of the body and cleared afterwards, failures are caught
/// and analyzed, and the finished [`TestResult`] is handed to the report
/// sink. A failing or panicking test never fails the future of a sibling or
/// of the suite; only infrastructure problems surface as
/// [`ExecutionError`].
pub struct ParallelExecutionManager {
    config: ForgeConfig,
    registry: Arc<TestRegistry>,
    pool: Arc<WorkerPool>,
    listener: TestListener,
    events: EventSlot,
    properties: Option<Arc<Properties>>,
    shutting_down: Arc<AtomicBool>,
}

impl ParallelExecutionManager {
    /// Start the worker pool and, when monitoring is enabled, its monitor.
    ///
    /// Results go to a bounded in-memory report until a sink is attached
    /// with [`with_report_sink`](Self::with_report_sink).
    pub fn new(config: ForgeConfig, registry: Arc<TestRegistry>) -> Result<Self, ExecutionError> {
        let pool = Arc::new(WorkerPool::new(config.execution.clone())?);
        let events: EventSlot = Arc::new(RwLock::new(None));
        if config.execution.monitoring_enabled {
            let slot = Arc::clone(&events);
            let pool_name = pool.name().to_string();
            pool.start_monitor(move |stats| publish_pressure(&slot, &pool_name, stats));
        }
        let pool_config = pool.config();
        info!(
            pool = %pool_config.pool_name,
            core_threads = pool_config.core_threads,
            max_threads = pool_config.max_threads,
            thread_limit = pool.thread_limit(),
            keep_alive_secs = pool_config.keep_alive.as_secs(),
            tests = registry.len(),
            "parallel execution manager initialized"
        );
        Ok(Self {
            config,
            registry,
            pool,
            listener: TestListener::default(),
            events,
            properties: None,
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_report_sink(mut self, report: Arc<dyn ReportSink>) -> Self {
        self.listener = self.listener.clone().with_report_sink(report);
        self
    }

    /// Publish lifecycle and pool pressure events on `events`.
    pub fn with_event_manager(mut self, events: Arc<EventManager>) -> Self {
        self.listener = self.listener.clone().with_event_manager(Arc::clone(&events));
        *self.events.write().unwrap_or_else(|e| e.into_inner()) = Some(events);
        self
    }

    /// Replace the lifecycle listener wholesale. An event manager attached
    /// to `listener` also receives pool pressure events.
    pub fn with_listener(mut self, listener: TestListener) -> Self {
        if let Some(events) = listener.event_manager() {
            *self.events.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(events));
        }
        self.listener = listener;
        self
    }

    /// Suite parameters are written to `properties` before the suite runs.
    pub fn with_properties(mut self, properties: Arc<Properties>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_screenshot_capture(
        mut self,
        capture: Arc<dyn ScreenshotCapture>,
        dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        self.listener = self.listener.clone().with_screenshot_capture(capture, dir);
        self
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    pub fn listener(&self) -> &TestListener {
        &self.listener
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Submit one test to the pool.
    ///
    /// The returned future resolves with the finished result, failed tests
    /// included. It fails only when the test cannot be resolved or
    /// scheduled, or when its work was discarded by a forced shutdown.
    pub fn execute_test(
        &self,
        test: &TestMethod,
        suite_id: Option<&str>,
    ) -> BoxFuture<'static, Result<TestResult, ExecutionError>> {
        self.submit(test.clone(), test.parameters.clone(), suite_id.map(str::to_string))
    }

    /// Run every test of `suite` and wait for all of them.
    ///
    /// Disabled tests are reported as skipped without being scheduled; the
    /// others are submitted in ascending priority order.
    pub async fn execute_test_suite(&self, suite: TestSuite) -> ExecutionResult {
        let started_at = Utc::now();
        self.listener
            .on_suite_start(&suite.id, &suite.name, suite.tests.len());

        if let Some(properties) = &self.properties {
            for (key, value) in &suite.parameters {
                properties.set_property(key.clone(), value.clone());
            }
        }

        let mut results = Vec::with_capacity(suite.tests.len());
        for test in suite.disabled_tests() {
            let mut result = TestResult::start(&test.class_name, &test.method_name)
                .with_suite_id(suite.id.clone())
                .with_parameters(suite.parameters_for(test));
            self.listener.on_test_skipped(&mut result, "disabled");
            results.push(result);
        }

        let (names, pending): (Vec<String>, Vec<_>) = suite
            .scheduled_tests()
            .into_iter()
            .map(|test| {
                let future = self.submit(
                    test.clone(),
                    suite.parameters_for(test),
                    Some(suite.id.clone()),
                );
                (test.qualified_name(), future)
            })
            .unzip();
        debug!(suite_id = %suite.id, submitted = names.len(), "suite submitted");

        let mut exceptions = Vec::new();
        for (name, outcome) in names.into_iter().zip(join_all(pending).await) {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(suite_id = %suite.id, test = %name, error = %err, "test could not be executed");
                    exceptions.push(ExecutionException {
                        test: Some(name),
                        message: err.to_string(),
                    });
                }
            }
        }

        let execution = ExecutionResult::new(suite.id, suite.name, started_at, results, exceptions);
        self.listener.on_suite_finish(&execution);
        execution
    }

    fn submit(
        &self,
        test: TestMethod,
        parameters: BTreeMap<String, String>,
        suite_id: Option<String>,
    ) -> BoxFuture<'static, Result<TestResult, ExecutionError>> {
        if self.is_shutting_down() {
            return future::ready(Err(ExecutionError::ShuttingDown)).boxed();
        }
        let body = match self.registry.resolve(&test.class_name, &test.method_name) {
            Ok(body) => body,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let test_name = test.qualified_name();
        let retry = test
            .retry
            .clone()
            .unwrap_or_else(|| RetryPolicy::from(&self.config.retry));
        let unit = UnitOfWork {
            setup: self.registry.setup_for(&test.class_name),
            body,
            retry,
            parameters,
            suite_id,
            pool_name: self.pool.name().to_string(),
            listener: self.listener.clone(),
            test,
        };

        let (done, outcome) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = done.send(unit.run());
        });
        if let Err(err) = self.pool.execute(job) {
            return future::ready(Err(err)).boxed();
        }
        async move {
            outcome
                .await
                .map_err(|_| ExecutionError::Abandoned { test: test_name })
        }
        .boxed()
    }

    /// Two-phase shutdown: stop intake and let queued and running tests
    /// finish within the configured timeout, then discard whatever is still
    /// queued. Never fails; problems are logged.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = Arc::clone(&self.pool);
        let timeout = self.config.execution.shutdown_timeout;
        let drained = tokio::task::spawn_blocking(move || graceful_shutdown(&pool, timeout)).await;
        if let Err(err) = drained {
            error!(error = %err, "pool shutdown task failed, forcing shutdown");
            self.pool.shutdown_now();
        }
    }

    /// Blocking variant of [`shutdown`](Self::shutdown) for callers outside
    /// an async runtime.
    pub fn shutdown_blocking(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        graceful_shutdown(&self.pool, self.config.execution.shutdown_timeout);
    }

    /// Run the two-phase shutdown when the process receives Ctrl-C, then
    /// exit. Only one handler can be installed per process.
    pub fn install_shutdown_hook(&self) -> Result<(), ExecutionError> {
        let pool = Arc::clone(&self.pool);
        let shutting_down = Arc::clone(&self.shutting_down);
        let timeout = self.config.execution.shutdown_timeout;
        ctrlc::set_handler(move || {
            warn!("interrupt received, shutting down test execution");
            if !shutting_down.swap(true, Ordering::SeqCst) {
                graceful_shutdown(&pool, timeout);
            }
            std::process::exit(130);
        })
        .map_err(|err| ExecutionError::HookInstall(err.to_string()))
    }
}

impl Drop for ParallelExecutionManager {
    fn drop(&mut self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.pool.shutdown();
    }
}

fn graceful_shutdown(pool: &WorkerPool, timeout: Duration) {
    pool.shutdown();
    if pool.await_termination(timeout) {
        info!(pool = %pool.name(), "execution pool terminated");
        return;
    }
    let discarded = pool.shutdown_now();
    warn!(
        pool = %pool.name(),
        timeout_secs = timeout.as_secs(),
        discarded,
        "execution pool did not terminate in time, forced shutdown"
    );
}

fn publish_pressure(slot: &EventSlot, pool_name: &str, stats: &PoolStats) {
    let events = slot.read().unwrap_or_else(|e| e.into_inner()).clone();
    if let Some(events) = events {
        events.fire_event(
            CsEvent::new(types::POOL_SATURATED, EventCategory::Performance, EventSeverity::Warn)
                .with_source("testforge")
                .with_context("pool", pool_name)
                .with_metadata("poolSize", stats.pool_size as u64)
                .with_metadata("activeCount", stats.active_count as u64)
                .with_metadata("queueDepth", stats.queue_depth as u64)
                .with_metadata("completedTasks", stats.completed_tasks)
                .with_metadata("submittedTasks", stats.submitted_tasks),
        );
    }
}

/// Numeric part of the current thread's id.
fn thread_number() -> String {
    let id = format!("{:?}", thread::current().id());
    id.trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .to_string()
}

/// Everything a worker needs to run one test to a verdict.
struct UnitOfWork {
    test: TestMethod,
    body: TestBody,
    setup: Option<TestBody>,
    retry: RetryPolicy,
    parameters: BTreeMap<String, String>,
    suite_id: Option<String>,
    pool_name: String,
    listener: TestListener,
}

impl UnitOfWork {
    fn run(self) -> TestResult {
        let unit_name = format!(
            "{}-{}.{}-{}",
            self.pool_name,
            self.test.class_name,
            self.test.method_name,
            thread_number()
        );
        let span = info_span!("test_unit", unit = %unit_name);
        let _span = span.enter();

        let mut result = TestResult::start(&self.test.class_name, &self.test.method_name)
            .with_parameters(self.parameters.clone());
        let mut context = ThreadContext::new()
            .with_execution_id(uuid::Uuid::new_v4().to_string())
            .with_test(&self.test.class_name, &self.test.method_name)
            .with_test_id(result.id())
            .with_parallel(true)
            .with_unit_name(unit_name);
        if let Some(suite_id) = &self.suite_id {
            result = result.with_suite_id(suite_id.clone());
            context = context.with_suite_id(suite_id.clone());
        }
        let _context = context.clone().enter();

        self.listener.on_test_start(&mut result);
        let mut attempt = 0;
        loop {
            let invocation = TestInvocation::new(context.clone(), self.parameters.clone(), attempt);
            let failure = match self.attempt(&invocation) {
                Ok(()) => {
                    self.listener.on_test_success(&mut result);
                    break;
                }
                Err(Attempt::Setup(failure)) | Err(Attempt::Body(failure))
                    if failure.kind() == FailureKind::Skipped =>
                {
                    self.listener.on_test_skipped(&mut result, failure.message());
                    break;
                }
                Err(Attempt::Setup(failure)) => {
                    self.listener.on_test_broken(&mut result, &failure);
                    break;
                }
                Err(Attempt::Body(failure)) => failure,
            };

            let timed_out = failure.kind() == FailureKind::TestTimeout;
            let analysis = if timed_out {
                self.listener.analyzer().timed_out_analysis(
                    &failure,
                    result.method_name(),
                    result.class_name(),
                )
            } else {
                self.listener.analyze(&failure, &result)
            };

            if self.retry.should_retry(attempt, Some(&analysis)) {
                self.listener.on_test_retry(&mut result, &failure, &analysis);
                if !self.retry.delay.is_zero() {
                    thread::sleep(self.retry.delay);
                }
                result.resume();
                attempt += 1;
                continue;
            }

            if timed_out {
                self.listener.on_test_timeout(&mut result, &failure);
            } else {
                result.attach_analysis(analysis);
                self.listener.on_test_failure(&mut result, &failure);
            }
            break;
        }
        result
    }

    /// One run of the class setup and the body. Panics become failures, and
    /// an overrun of the time limit turns the body outcome into a timeout.
    fn attempt(&self, invocation: &TestInvocation) -> Result<(), Attempt> {
        if let Some(setup) = &self.setup {
            guarded(setup, invocation).map_err(Attempt::Setup)?;
        }
        let started = Instant::now();
        let outcome = guarded(&self.body, invocation);

        let Some(limit) = self.test.timeout else {
            return outcome.map_err(Attempt::Body);
        };
        if started.elapsed() <= limit {
            return outcome.map_err(Attempt::Body);
        }
        let failure = match outcome {
            Ok(()) => TestFailure::timed_out(limit),
            Err(failure) if failure.kind() == FailureKind::Skipped => failure,
            Err(failure) => TestFailure::timed_out(limit).with_cause(failure),
        };
        Err(Attempt::Body(failure))
    }
}

/// Where an attempt stopped.
enum Attempt {
    /// Class setup failed; the body never ran.
    Setup(TestFailure),
    Body(TestFailure),
}

fn guarded(body: &TestBody, invocation: &TestInvocation) -> Result<(), TestFailure> {
    catch_unwind(AssertUnwindSafe(|| body(invocation)))
        .unwrap_or_else(|payload| Err(TestFailure::from_panic(payload)))
}
