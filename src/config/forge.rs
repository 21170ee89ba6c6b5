use std::time::Duration;

use tracing::warn;

use super::PropertySource;

pub(crate) fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Settings for the test execution pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Prefix for worker thread names and per-test diagnostic units.
    /// Default: "testforge"
    pub pool_name: String,

    /// Threads kept (until idle for `keep_alive`) once started.
    /// Default: CPU count
    pub core_threads: usize,

    /// Upper bound on pool threads. Only reached when the queue is bounded.
    /// Default: 2x CPU count
    pub max_threads: usize,

    /// Idle time after which a worker exits.
    /// Default: 60 seconds
    pub keep_alive: Duration,

    /// Queue bound; `None` is unbounded.
    /// Default: unbounded
    pub queue_capacity: Option<usize>,

    /// Whether the occupancy monitor runs.
    /// Default: true
    pub monitoring_enabled: bool,

    /// Monitor sampling interval.
    /// Default: 30 seconds
    pub monitor_interval: Duration,

    /// Graceful wait before a forced shutdown.
    /// Default: 60 seconds
    pub shutdown_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let cpus = cpu_count();
        Self {
            pool_name: "testforge".to_string(),
            core_threads: cpus,
            max_threads: cpus * 2,
            keep_alive: Duration::from_secs(60),
            queue_capacity: None,
            monitoring_enabled: true,
            monitor_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_source(source: &dyn PropertySource) -> Self {
        let defaults = Self::default();
        let queue_capacity = match source.get_usize("parallel.queue.capacity", 0) {
            0 => None,
            capacity => Some(capacity),
        };
        Self {
            pool_name: source.get_string("parallel.pool.name", &defaults.pool_name),
            core_threads: source.get_usize("parallel.thread.core", defaults.core_threads),
            max_threads: source.get_usize("parallel.thread.max", defaults.max_threads),
            keep_alive: Duration::from_secs(
                source.get_u64("parallel.thread.keepalive.seconds", defaults.keep_alive.as_secs()),
            ),
            queue_capacity,
            monitoring_enabled: source.get_bool("parallel.monitoring.enabled", true),
            monitor_interval: Duration::from_secs(source.get_u64(
                "parallel.monitoring.interval.seconds",
                defaults.monitor_interval.as_secs(),
            )),
            shutdown_timeout: Duration::from_secs(source.get_u64(
                "parallel.shutdown.timeout.seconds",
                defaults.shutdown_timeout.as_secs(),
            )),
        }
        .normalized()
    }

    /// Clamp sizes into a usable shape: at least one core thread and
    /// `max_threads >= core_threads`.
    pub fn normalized(mut self) -> Self {
        if self.core_threads == 0 {
            warn!("parallel.thread.core must be at least 1, using 1");
            self.core_threads = 1;
        }
        if self.max_threads < self.core_threads {
            warn!(
                core = self.core_threads,
                max = self.max_threads,
                "parallel.thread.max below core size, raising to core size"
            );
            self.max_threads = self.core_threads;
        }
        if self.monitor_interval.is_zero() {
            self.monitor_interval = Duration::from_secs(1);
        }
        self
    }

    pub fn with_pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    pub fn with_core_threads(mut self, threads: usize) -> Self {
        self.core_threads = threads;
        self
    }

    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitoring_enabled = enabled;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Settings for the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    /// Queue events for background dispatch instead of delivering inline.
    /// Default: true
    pub async_enabled: bool,

    /// Bounded event queue size; overflow is dropped.
    /// Default: 10000
    pub queue_capacity: usize,

    /// Allow-list of event types, `"*"` for all.
    /// Default: ["*"]
    pub enabled_event_types: Vec<String>,

    /// Concurrent listener invocations.
    /// Default: CPU count
    pub listener_threads: usize,

    /// Aggregate wait for all listeners of one event.
    /// Default: 30 seconds
    pub listener_timeout: Duration,

    /// How long the dispatcher waits on an empty queue before rechecking state.
    /// Default: 1 second
    pub poll_interval: Duration,

    /// Periodic metrics log; `None` disables it.
    /// Default: disabled
    pub metrics_report_interval: Option<Duration>,

    /// Wait for in-flight dispatch during shutdown.
    /// Default: 10 seconds
    pub shutdown_timeout: Duration,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            async_enabled: true,
            queue_capacity: 10_000,
            enabled_event_types: vec!["*".to_string()],
            listener_threads: cpu_count(),
            listener_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            metrics_report_interval: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl EventConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_source(source: &dyn PropertySource) -> Self {
        let defaults = Self::default();
        let report_secs = source.get_u64("event.metrics.report.interval.seconds", 0);
        Self {
            async_enabled: source.get_bool("event.async.enabled", defaults.async_enabled),
            queue_capacity: source.get_usize("event.queue.capacity", defaults.queue_capacity),
            enabled_event_types: source.get_list("event.enabled.types", &["*"]),
            listener_threads: source.get_usize("event.listener.threads", defaults.listener_threads),
            listener_timeout: Duration::from_secs(source.get_u64(
                "event.listener.timeout.seconds",
                defaults.listener_timeout.as_secs(),
            )),
            poll_interval: Duration::from_millis(source.get_u64(
                "event.poll.interval.millis",
                defaults.poll_interval.as_millis() as u64,
            )),
            metrics_report_interval: (report_secs > 0).then(|| Duration::from_secs(report_secs)),
            shutdown_timeout: Duration::from_secs(source.get_u64(
                "event.shutdown.timeout.seconds",
                defaults.shutdown_timeout.as_secs(),
            )),
        }
        .normalized()
    }

    /// Clamp to usable values: non-empty queue and pool, non-zero poll.
    pub fn normalized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self.listener_threads = self.listener_threads.max(1);
        if self.poll_interval.is_zero() {
            self.poll_interval = Duration::from_millis(1);
        }
        if self.enabled_event_types.is_empty() {
            warn!("event.enabled.types is empty, no event will be dispatched");
        }
        self
    }

    pub fn with_async(mut self, enabled: bool) -> Self {
        self.async_enabled = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_enabled_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_event_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_listener_threads(mut self, threads: usize) -> Self {
        self.listener_threads = threads;
        self
    }

    pub fn with_listener_timeout(mut self, timeout: Duration) -> Self {
        self.listener_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_metrics_report_interval(mut self, interval: Option<Duration>) -> Self {
        self.metrics_report_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Default retry behaviour for tests that do not declare their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first failure.
    /// Default: 0
    pub count: u32,

    /// Pause between attempts.
    /// Default: 1 second
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            count: 0,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    pub fn from_source(source: &dyn PropertySource) -> Self {
        let count = source.get_u64("retry.count", 0);
        Self {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            delay: Duration::from_millis(source.get_u64("retry.delay.millis", 1000)),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// All runtime settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForgeConfig {
    pub execution: ExecutionConfig,
    pub events: EventConfig,
    pub retry: RetryConfig,
}

impl ForgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_source(source: &dyn PropertySource) -> Self {
        Self {
            execution: ExecutionConfig::from_source(source),
            events: EventConfig::from_source(source),
            retry: RetryConfig::from_source(source),
        }
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_events(mut self, events: EventConfig) -> Self {
        self.events = events;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
