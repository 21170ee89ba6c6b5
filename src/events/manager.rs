use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::listener::{RegisteredListener, ALL_EVENT_TYPES};
use super::{CsEvent, EventListener, EventMetrics, EventMetricsSnapshot, ListenerError};
use crate::config::EventConfig;
use crate::failure::TestFailure;

/// Errors returned by [`EventManager`] lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("event manager must be started from within a tokio runtime")]
    NoRuntime,

    #[error("event manager is already running")]
    AlreadyRunning,

    #[error("event manager has been shut down")]
    ShutDown,

    #[error("listener {name} failed to initialize: {source}")]
    ListenerInit {
        name: String,
        #[source]
        source: ListenerError,
    },
}

/// Lifecycle state of an [`EventManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Stopped,
    Running,
    ShutDown,
}

type EventReceiver = mpsc::Receiver<Arc<CsEvent>>;

#[derive(Default)]
struct Workers {
    runtime: Option<Handle>,
    dispatcher: Option<JoinHandle<EventReceiver>>,
    reporter: Option<JoinHandle<()>>,
}

struct Inner {
    config: EventConfig,
    /// `None` when every type is enabled.
    enabled_types: Option<HashSet<String>>,
    listeners: RwLock<HashMap<String, Arc<RegisteredListener>>>,
    metrics: EventMetrics,
    sender: mpsc::Sender<Arc<CsEvent>>,
    /// Parked here while no dispatcher task owns it.
    receiver: Mutex<Option<EventReceiver>>,
    workers: Mutex<Workers>,
    state: Mutex<ManagerState>,
    running: AtomicBool,
    accepting: AtomicBool,
    /// Events queued or being dispatched.
    in_flight: AtomicU64,
    listener_permits: Arc<Semaphore>,
    async_permits: Arc<Semaphore>,
}

/// Publish/subscribe hub between test execution and its observers.
///
/// Events pass the type allow-list, then either go onto a bounded queue
/// drained by a background dispatcher (async mode) or are delivered on the
/// caller's thread (sync mode). Each event is fanned out to every interested
/// listener, highest priority first. Listener failures, panics and slow
/// listeners are contained here and only show up in [`metrics`](Self::metrics).
///
/// Share it behind an `Arc`; dropping the last handle stops the dispatcher.
pub struct EventManager {
    inner: Arc<Inner>,
}

impl EventManager {
    pub fn new(config: EventConfig) -> Self {
        let config = config.normalized();
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let enabled_types = if config
            .enabled_event_types
            .iter()
            .any(|t| t == ALL_EVENT_TYPES)
        {
            None
        } else {
            Some(config.enabled_event_types.iter().cloned().collect())
        };
        let inner = Inner {
            enabled_types,
            listeners: RwLock::new(HashMap::new()),
            metrics: EventMetrics::new(),
            sender,
            receiver: Mutex::new(Some(receiver)),
            workers: Mutex::new(Workers::default()),
            state: Mutex::new(ManagerState::Stopped),
            running: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            in_flight: AtomicU64::new(0),
            listener_permits: Arc::new(Semaphore::new(config.listener_threads)),
            async_permits: Arc::new(Semaphore::new(config.listener_threads)),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &EventConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state() == ManagerState::Running
    }

    /// Initialize and register a listener. A listener with the same name is replaced.
    pub fn register_listener(&self, listener: Arc<dyn EventListener>) -> Result<(), EventError> {
        if self.state() == ManagerState::ShutDown {
            return Err(EventError::ShutDown);
        }
        let name = listener.name().to_string();
        listener
            .initialize()
            .map_err(|source| EventError::ListenerInit {
                name: name.clone(),
                source,
            })?;
        let registered = Arc::new(RegisteredListener::new(listener));
        let previous = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone(), registered);
        if previous.is_some() {
            debug!(listener = %name, "replaced event listener");
        }
        info!(listener = %name, "registered event listener");
        Ok(())
    }

    /// Remove a listener and run its cleanup hook. Returns whether it was registered.
    pub fn unregister_listener(&self, name: &str) -> bool {
        let removed = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        match removed {
            Some(registered) => {
                cleanup(&registered);
                info!(listener = %name, "unregistered event listener");
                true
            }
            None => false,
        }
    }

    pub fn listener_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Events currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.inner.config.queue_capacity - self.inner.sender.capacity()
    }

    pub fn metrics(&self) -> EventMetricsSnapshot {
        let mut snapshot = self.inner.metrics.snapshot();
        snapshot.queue_depth = self.queue_depth();
        snapshot.listener_count = self.listener_count();
        snapshot
    }

    /// Publish an event. Never blocks on listeners in async mode.
    ///
    /// A full queue drops the event. Events published after
    /// [`shutdown`](Self::shutdown) are dropped too.
    pub fn fire_event(&self, event: CsEvent) {
        if !self.admit(&event) {
            return;
        }
        let event = Arc::new(event);
        if !self.inner.config.async_enabled {
            dispatch_inline(&self.inner, &event);
            return;
        }
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.inner.sender.try_send(event) {
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            let event = match err {
                TrySendError::Full(event) | TrySendError::Closed(event) => event,
            };
            let dropped = self.inner.metrics.record_dropped();
            if dropped.is_power_of_two() {
                warn!(
                    event_type = event.event_type(),
                    dropped,
                    capacity = self.inner.config.queue_capacity,
                    "event queue full, dropping event"
                );
            } else {
                debug!(event_type = event.event_type(), "event queue full, dropping event");
            }
        }
    }

    /// Publish an event for dispatch on the async pool, bypassing the queue
    /// and the async mode switch.
    ///
    /// Without a runtime to spawn on the event is delivered inline.
    pub fn fire_event_async(&self, event: CsEvent) {
        if !self.admit(&event) {
            return;
        }
        let event = Arc::new(event);
        let runtime = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok());
        let Some(runtime) = runtime else {
            dispatch_inline(&self.inner, &event);
            return;
        };
        let inner = Arc::clone(&self.inner);
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        runtime.spawn(async move {
            match Arc::clone(&inner.async_permits).acquire_owned().await {
                Ok(_permit) => dispatch(&inner, event).await,
                Err(_) => {
                    inner.metrics.record_dropped();
                }
            }
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Start the background dispatcher on the current tokio runtime.
    pub fn start(&self) -> Result<(), EventError> {
        let runtime = Handle::try_current().map_err(|_| EventError::NoRuntime)?;
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            ManagerState::Running => return Err(EventError::AlreadyRunning),
            ManagerState::ShutDown => return Err(EventError::ShutDown),
            ManagerState::Stopped => {}
        }
        let receiver = self
            .inner
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(EventError::AlreadyRunning)?;

        self.inner.running.store(true, Ordering::SeqCst);
        let dispatcher = runtime.spawn(run_dispatcher(Arc::clone(&self.inner), receiver));
        let reporter = self
            .inner
            .config
            .metrics_report_interval
            .map(|interval| runtime.spawn(report_metrics(Arc::clone(&self.inner), interval)));

        let mut workers = self.inner.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.runtime = Some(runtime);
        workers.dispatcher = Some(dispatcher);
        workers.reporter = reporter;
        *state = ManagerState::Running;
        info!(
            async_enabled = self.inner.config.async_enabled,
            queue_capacity = self.inner.config.queue_capacity,
            listener_threads = self.inner.config.listener_threads,
            "event manager started"
        );
        Ok(())
    }

    /// Stop the dispatcher. Queued events stay queued until the next start
    /// or shutdown.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ManagerState::Running {
                return;
            }
            *state = ManagerState::Stopped;
        }
        self.inner.running.store(false, Ordering::SeqCst);

        let (dispatcher, reporter) = {
            let mut workers = self.inner.workers.lock().unwrap_or_else(|e| e.into_inner());
            (workers.dispatcher.take(), workers.reporter.take())
        };
        if let Some(reporter) = reporter {
            reporter.abort();
        }
        if let Some(dispatcher) = dispatcher {
            match dispatcher.await {
                Ok(receiver) => {
                    *self.inner.receiver.lock().unwrap_or_else(|e| e.into_inner()) = Some(receiver);
                }
                Err(err) => error!(error = %err, "event dispatcher task failed"),
            }
        }
        info!("event manager stopped");
    }

    /// Stop intake, deliver what is still queued, wait for in-flight
    /// deliveries (bounded by the shutdown timeout) and clean up listeners.
    pub async fn shutdown(&self) {
        if self.state() == ManagerState::ShutDown {
            return;
        }
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.stop().await;
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = ManagerState::ShutDown;

        let receiver = self
            .inner
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut receiver) = receiver {
            receiver.close();
            let mut drained = 0usize;
            while drained < self.inner.config.queue_capacity {
                let Ok(event) = receiver.try_recv() else {
                    break;
                };
                dispatch_inline(&self.inner, &event);
                self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
                drained += 1;
            }
            if drained > 0 {
                info!(drained, "processed queued events during shutdown");
            }
        }

        let inner = Arc::clone(&self.inner);
        let pool_size = u32::try_from(inner.config.listener_threads).unwrap_or(u32::MAX);
        let settled = tokio::time::timeout(inner.config.shutdown_timeout, async {
            while inner.in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let _all_idle = inner.listener_permits.acquire_many(pool_size).await;
        })
        .await
        .is_ok();
        if !settled {
            warn!(
                in_flight = inner.in_flight.load(Ordering::SeqCst),
                "event deliveries still running after shutdown timeout, forcing shutdown"
            );
        }
        inner.listener_permits.close();
        inner.async_permits.close();
        inner
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .runtime = None;

        let listeners: Vec<Arc<RegisteredListener>> = inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for registered in &listeners {
            cleanup(registered);
        }
        let metrics = self.metrics();
        info!(
            received = metrics.received,
            processed = metrics.processed,
            dropped = metrics.dropped,
            errors = metrics.errors,
            "event manager shut down"
        );
    }

    /// Wait until every queued or async event has been dispatched.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let in_flight = &self.inner.in_flight;
        tokio::time::timeout(timeout, async {
            while in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    fn admit(&self, event: &CsEvent) -> bool {
        let inner = &self.inner;
        inner.metrics.record_received();
        if !inner.accepting.load(Ordering::SeqCst) {
            inner.metrics.record_dropped();
            debug!(event_type = event.event_type(), "event fired after shutdown, dropping");
            return false;
        }
        let enabled = match &inner.enabled_types {
            Some(types) => types.contains(event.event_type()),
            None => true,
        };
        if !enabled {
            inner.metrics.record_filtered();
            return false;
        }
        true
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(EventConfig::default())
    }
}

impl Drop for EventManager {
    fn drop(&mut self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.running.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    /// Interested, enabled listeners, highest priority first.
    fn targets(&self, event: &CsEvent) -> Vec<Arc<RegisteredListener>> {
        let mut targets: Vec<Arc<RegisteredListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|registered| registered.wants(event))
            .cloned()
            .collect();
        targets.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name().cmp(b.name())));
        targets
    }
}

async fn run_dispatcher(inner: Arc<Inner>, mut receiver: EventReceiver) -> EventReceiver {
    debug!("event dispatcher started");
    while inner.running.load(Ordering::SeqCst) {
        match tokio::time::timeout(inner.config.poll_interval, receiver.recv()).await {
            Ok(Some(event)) => {
                dispatch(&inner, event).await;
                inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(None) => break,
            Err(_) => {}
        }
    }
    debug!("event dispatcher exiting");
    receiver
}

/// Fan an event out on the listener pool and wait, bounded, for every delivery.
async fn dispatch(inner: &Arc<Inner>, event: Arc<CsEvent>) {
    let started = Instant::now();
    let targets = inner.targets(&event);
    if targets.is_empty() {
        inner.metrics.record_without_listener();
        inner.metrics.record_processed(started.elapsed());
        return;
    }

    let deliveries: Vec<JoinHandle<()>> = targets
        .into_iter()
        .map(|target| {
            let inner = Arc::clone(inner);
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                let Ok(_permit) = Arc::clone(&inner.listener_permits).acquire_owned().await else {
                    return;
                };
                let _ = tokio::task::spawn_blocking(move || deliver(&inner, &target, &event)).await;
            })
        })
        .collect();

    if tokio::time::timeout(inner.config.listener_timeout, join_all(deliveries))
        .await
        .is_err()
    {
        inner.metrics.record_timeout();
        warn!(
            event_type = event.event_type(),
            event_id = event.id(),
            timeout_ms = inner.config.listener_timeout.as_millis() as u64,
            "listeners did not finish in time"
        );
    }
    inner.metrics.record_processed(started.elapsed());
}

/// Deliver on the calling thread. A listener cannot be abandoned here, so
/// one that overruns the listener timeout is only counted and logged.
fn dispatch_inline(inner: &Inner, event: &CsEvent) {
    let started = Instant::now();
    let targets = inner.targets(event);
    if targets.is_empty() {
        inner.metrics.record_without_listener();
    }
    let limit = inner.config.listener_timeout;
    for target in &targets {
        let delivery = Instant::now();
        deliver(inner, target, event);
        let elapsed = delivery.elapsed();
        if elapsed > limit {
            inner.metrics.record_timeout();
            warn!(
                listener = target.name(),
                event_type = event.event_type(),
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = limit.as_millis() as u64,
                "listener overran its timeout"
            );
        }
    }
    inner.metrics.record_processed(started.elapsed());
}

fn deliver(inner: &Inner, target: &RegisteredListener, event: &CsEvent) {
    let error = match catch_unwind(AssertUnwindSafe(|| target.listener.on_event(event))) {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(payload) => ListenerError::Panicked(TestFailure::from_panic(payload).message().to_string()),
    };
    inner.metrics.record_error();
    debug!(
        listener = target.name(),
        event_type = event.event_type(),
        error = %error,
        "listener failed"
    );
    if catch_unwind(AssertUnwindSafe(|| target.listener.handle_error(event, &error))).is_err() {
        error!(listener = target.name(), "listener error handler panicked");
    }
}

fn cleanup(registered: &RegisteredListener) {
    if catch_unwind(AssertUnwindSafe(|| registered.listener.cleanup())).is_err() {
        error!(listener = registered.name(), "listener cleanup panicked");
    }
}

async fn report_metrics(inner: Arc<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let metrics = inner.metrics.snapshot();
        info!(
            received = metrics.received,
            processed = metrics.processed,
            filtered = metrics.filtered,
            dropped = metrics.dropped,
            errors = metrics.errors,
            timeouts = metrics.timeouts,
            without_listener = metrics.without_listener,
            avg_processing_us = metrics.average_processing_time.as_micros() as u64,
            queue_depth = inner.config.queue_capacity - inner.sender.capacity(),
            "event metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventCategory, EventSeverity};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        name: String,
        types: Option<HashSet<String>>,
        minimum: Option<EventSeverity>,
        priority: i32,
        fail: bool,
        panic: bool,
        delay: Option<Duration>,
        order: Option<Arc<Mutex<Vec<String>>>>,
        seen: Mutex<Vec<CsEvent>>,
        errors_handled: AtomicUsize,
        cleaned: AtomicBool,
    }

    impl Recorder {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                ..Self::default()
            }
        }

        fn seen_types(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event_type().to_string())
                .collect()
        }

        fn seen_count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl EventListener for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn supported_event_types(&self) -> HashSet<String> {
            self.types
                .clone()
                .unwrap_or_else(|| HashSet::from([ALL_EVENT_TYPES.to_string()]))
        }

        fn minimum_severity(&self) -> EventSeverity {
            self.minimum.unwrap_or(EventSeverity::Trace)
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn on_event(&self, event: &CsEvent) -> Result<(), ListenerError> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if let Some(order) = &self.order {
                order.lock().unwrap().push(self.name.clone());
            }
            self.seen.lock().unwrap().push(event.clone());
            if self.panic {
                panic!("listener exploded");
            }
            if self.fail {
                return Err("listener rejected event".into());
            }
            Ok(())
        }

        fn handle_error(&self, _event: &CsEvent, _error: &ListenerError) {
            self.errors_handled.fetch_add(1, Ordering::SeqCst);
        }

        fn cleanup(&self) {
            self.cleaned.store(true, Ordering::SeqCst);
        }
    }

    fn fast_config() -> EventConfig {
        EventConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_listener_threads(4)
            .with_shutdown_timeout(Duration::from_secs(2))
    }

    fn event(event_type: &str, severity: EventSeverity) -> CsEvent {
        CsEvent::new(event_type, EventCategory::TestLifecycle, severity)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disabled_event_type_never_reaches_listener() {
        let manager = EventManager::new(fast_config().with_enabled_event_types(["TEST_PASSED"]));
        let recorder = Arc::new(Recorder::named("recorder"));
        manager.register_listener(recorder.clone()).unwrap();
        manager.start().unwrap();

        manager.fire_event(event("TEST_FAILED", EventSeverity::Error));
        manager.fire_event(event("TEST_PASSED", EventSeverity::Info));
        assert!(manager.wait_for_idle(Duration::from_secs(5)).await);

        assert_eq!(recorder.seen_types(), vec!["TEST_PASSED"]);
        let metrics = manager.metrics();
        assert_eq!(metrics.received, 2);
        assert_eq!(metrics.filtered, 1);
        assert_eq!(metrics.processed, 1);
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_minimum_severity_filters_events() {
        let manager = EventManager::new(fast_config());
        let recorder = Arc::new(Recorder {
            minimum: Some(EventSeverity::Warn),
            ..Recorder::named("warnings")
        });
        manager.register_listener(recorder.clone()).unwrap();
        manager.start().unwrap();

        for severity in [EventSeverity::Info, EventSeverity::Warn, EventSeverity::Error] {
            manager.fire_event(event("CHECK", severity));
        }
        assert!(manager.wait_for_idle(Duration::from_secs(5)).await);

        let severities: Vec<EventSeverity> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.severity())
            .collect();
        assert_eq!(severities.len(), 2);
        assert!(severities.iter().all(|s| *s >= EventSeverity::Warn));
        assert_eq!(manager.metrics().without_listener, 1);
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wildcard_debug_listener_receives_every_category() {
        let manager = EventManager::new(fast_config());
        let recorder = Arc::new(Recorder {
            minimum: Some(EventSeverity::Debug),
            ..Recorder::named("debug")
        });
        manager.register_listener(recorder.clone()).unwrap();
        manager.start().unwrap();

        for category in EventCategory::ALL {
            manager.fire_event(CsEvent::new("ANY", category, EventSeverity::Debug));
        }
        manager.fire_event(CsEvent::new("ANY", EventCategory::System, EventSeverity::Trace));
        assert!(manager.wait_for_idle(Duration::from_secs(5)).await);

        let categories: HashSet<EventCategory> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.category())
            .collect();
        assert_eq!(categories.len(), EventCategory::ALL.len());
        assert_eq!(recorder.seen_count(), EventCategory::ALL.len());
        manager.shutdown().await;
    }

    #[test]
    fn test_flooding_queue_drops_without_blocking() {
        let manager = EventManager::new(EventConfig::default());
        let recorder = Arc::new(Recorder::named("paused"));
        manager.register_listener(recorder.clone()).unwrap();

        let started = Instant::now();
        for i in 0..10_050 {
            manager.fire_event(event(&format!("EVENT_{}", i % 7), EventSeverity::Info));
        }
        assert!(started.elapsed() < Duration::from_secs(10));

        let metrics = manager.metrics();
        assert_eq!(metrics.received, 10_050);
        assert_eq!(metrics.dropped, 50);
        assert_eq!(metrics.queue_depth, 10_000);
        assert_eq!(recorder.seen_count(), 0);
    }

    #[test]
    fn test_sync_mode_delivers_in_priority_order() {
        let manager = EventManager::new(fast_config().with_async(false));
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [("low", 1), ("high", 10), ("mid", 5)] {
            manager
                .register_listener(Arc::new(Recorder {
                    priority,
                    order: Some(Arc::clone(&order)),
                    ..Recorder::named(name)
                }))
                .unwrap();
        }

        manager.fire_event(event("TEST_STARTED", EventSeverity::Info));
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
        assert_eq!(manager.metrics().processed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_listener_is_isolated() {
        let manager = EventManager::new(fast_config());
        let failing = Arc::new(Recorder {
            fail: true,
            ..Recorder::named("failing")
        });
        let panicking = Arc::new(Recorder {
            panic: true,
            ..Recorder::named("panicking")
        });
        let healthy = Arc::new(Recorder::named("healthy"));
        manager.register_listener(failing.clone()).unwrap();
        manager.register_listener(panicking.clone()).unwrap();
        manager.register_listener(healthy.clone()).unwrap();
        manager.start().unwrap();

        manager.fire_event(event("TEST_FAILED", EventSeverity::Error));
        assert!(manager.wait_for_idle(Duration::from_secs(5)).await);

        assert_eq!(healthy.seen_count(), 1);
        assert_eq!(failing.errors_handled.load(Ordering::SeqCst), 1);
        assert_eq!(panicking.errors_handled.load(Ordering::SeqCst), 1);
        assert_eq!(manager.metrics().errors, 2);
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_listener_times_out() {
        let manager = EventManager::new(fast_config().with_listener_timeout(Duration::from_millis(50)));
        let slow = Arc::new(Recorder {
            delay: Some(Duration::from_millis(300)),
            ..Recorder::named("slow")
        });
        manager.register_listener(slow.clone()).unwrap();
        manager.start().unwrap();

        manager.fire_event(event("TEST_STARTED", EventSeverity::Info));
        assert!(manager.wait_for_idle(Duration::from_secs(5)).await);
        assert_eq!(manager.metrics().timeouts, 1);
        manager.shutdown().await;
        assert_eq!(slow.seen_count(), 1);
    }

    #[test]
    fn test_sync_mode_counts_slow_listener_timeout() {
        let manager = EventManager::new(
            fast_config()
                .with_async(false)
                .with_listener_timeout(Duration::from_millis(20)),
        );
        let slow = Arc::new(Recorder {
            delay: Some(Duration::from_millis(100)),
            priority: 10,
            ..Recorder::named("slow")
        });
        let quick = Arc::new(Recorder::named("quick"));
        manager.register_listener(slow.clone()).unwrap();
        manager.register_listener(quick.clone()).unwrap();

        manager.fire_event(event("TEST_STARTED", EventSeverity::Info));
        let metrics = manager.metrics();
        assert_eq!(metrics.timeouts, 1);
        assert_eq!(metrics.processed, 1);
        assert_eq!(slow.seen_count(), 1);
        assert_eq!(quick.seen_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_events_fired_while_stopped_wait_for_start() {
        let manager = EventManager::new(fast_config());
        let recorder = Arc::new(Recorder::named("recorder"));
        manager.register_listener(recorder.clone()).unwrap();

        for _ in 0..3 {
            manager.fire_event(event("TEST_PASSED", EventSeverity::Info));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert_eq!(manager.queue_depth(), 3);
        assert_eq!(recorder.seen_count(), 0);

        manager.start().unwrap();
        assert!(manager.wait_for_idle(Duration::from_secs(5)).await);
        assert_eq!(recorder.seen_count(), 3);
        assert_eq!(manager.queue_depth(), 0);

        // stopping parks the queue again
        manager.stop().await;
        manager.fire_event(event("TEST_FAILED", EventSeverity::Error));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.seen_count(), 3);
        manager.start().unwrap();
        assert!(manager.wait_for_idle(Duration::from_secs(5)).await);
        assert_eq!(recorder.seen_types().last().map(String::as_str), Some("TEST_FAILED"));
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_drains_queue_and_cleans_up() {
        let manager = EventManager::new(fast_config());
        let recorder = Arc::new(Recorder::named("recorder"));
        manager.register_listener(recorder.clone()).unwrap();

        for _ in 0..5 {
            manager.fire_event(event("TEST_PASSED", EventSeverity::Info));
        }
        assert_eq!(manager.queue_depth(), 5);

        manager.shutdown().await;
        assert_eq!(recorder.seen_count(), 5);
        assert!(recorder.cleaned.load(Ordering::SeqCst));
        assert_eq!(manager.state(), ManagerState::ShutDown);

        manager.fire_event(event("TEST_PASSED", EventSeverity::Info));
        assert_eq!(recorder.seen_count(), 5);
        assert_eq!(manager.metrics().dropped, 1);
        assert_eq!(manager.start(), Err(EventError::ShutDown));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fire_event_async_bypasses_queue() {
        let manager = EventManager::new(fast_config());
        let recorder = Arc::new(Recorder::named("recorder"));
        manager.register_listener(recorder.clone()).unwrap();

        manager.fire_event_async(event("TEST_STARTED", EventSeverity::Info));
        assert!(manager.wait_for_idle(Duration::from_secs(5)).await);
        assert_eq!(recorder.seen_count(), 1);
        assert_eq!(manager.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_start_stop_restart() {
        let manager = EventManager::new(fast_config());
        manager.start().unwrap();
        assert_eq!(manager.start(), Err(EventError::AlreadyRunning));
        manager.stop().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        manager.start().unwrap();
        assert!(manager.is_running());
        manager.shutdown().await;
    }

    #[test]
    fn test_start_requires_runtime() {
        let manager = EventManager::new(fast_config());
        assert_eq!(manager.start(), Err(EventError::NoRuntime));
    }

    #[test]
    fn test_unregister_runs_cleanup() {
        let manager = EventManager::new(fast_config());
        let recorder = Arc::new(Recorder::named("recorder"));
        manager.register_listener(recorder.clone()).unwrap();
        assert_eq!(manager.listener_names(), vec!["recorder"]);

        assert!(manager.unregister_listener("recorder"));
        assert!(!manager.unregister_listener("recorder"));
        assert!(recorder.cleaned.load(Ordering::SeqCst));
        assert_eq!(manager.listener_count(), 0);
    }
}
