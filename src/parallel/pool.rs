//! Worker pool on a dedicated tokio runtime.
//!
//! Test bodies are blocking code, so jobs run on the runtime's blocking
//! threads. With a bounded queue the pool may use up to `max_threads`
//! threads; with an unbounded one it stays at `core_threads`, the way a
//! classic executor never grows past its core size while the queue accepts
//! work. Admission is gated by a semaphore holding one permit per thread and
//! queue slot: a job that finds no permit runs on the submitting thread.
//! Idle threads exit after the keep-alive period.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::{self, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ExecutionError;
use crate::config::ExecutionConfig;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Async scheduler threads of the pool runtime. They only host the monitor.
const SCHEDULER_THREADS: usize = 1;

const TERMINATION_POLL: Duration = Duration::from_millis(5);

/// Point-in-time occupancy of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub largest_pool_size: usize,
    pub active_count: usize,
    pub queue_depth: usize,
    pub completed_tasks: u64,
    pub submitted_tasks: u64,
    pub caller_runs: u64,
}

impl PoolStats {
    /// Queue is building up beyond what the pool can absorb.
    pub fn is_congested(&self, thread_limit: usize) -> bool {
        self.queue_depth > thread_limit.saturating_mul(2)
    }

    /// Every thread busy while work is still waiting.
    pub fn is_saturated(&self, thread_limit: usize) -> bool {
        self.active_count >= thread_limit && self.queue_depth > 0
    }
}

struct Shared {
    config: ExecutionConfig,
    thread_limit: usize,
    threads: AtomicUsize,
    largest: AtomicUsize,
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    submitted: AtomicU64,
    caller_runs: AtomicU64,
    shutdown: AtomicBool,
    discarding: AtomicBool,
}

impl Shared {
    fn stats(&self) -> PoolStats {
        PoolStats {
            pool_size: self.threads.load(Ordering::SeqCst),
            largest_pool_size: self.largest.load(Ordering::SeqCst),
            active_count: self.active.load(Ordering::SeqCst),
            queue_depth: self.queued.load(Ordering::SeqCst),
            completed_tasks: self.completed.load(Ordering::SeqCst),
            submitted_tasks: self.submitted.load(Ordering::SeqCst),
            caller_runs: self.caller_runs.load(Ordering::SeqCst),
        }
    }

    fn is_idle(&self) -> bool {
        self.queued.load(Ordering::SeqCst) == 0 && self.active.load(Ordering::SeqCst) == 0
    }

    fn thread_started(&self) {
        let threads = self.threads.fetch_add(1, Ordering::SeqCst) + 1;
        self.largest.fetch_max(threads, Ordering::SeqCst);
        debug!(pool = %self.config.pool_name, threads, "worker started");
    }

    fn thread_stopped(&self) {
        let threads = self.threads.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(pool = %self.config.pool_name, threads, "worker exiting");
    }

    /// Runs on a blocking thread once the job reaches the head of the queue.
    fn run_queued(&self, job: Job) {
        if self.discarding.load(Ordering::SeqCst) {
            // dropping the job closes its result channel
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        self.queued.fetch_sub(1, Ordering::SeqCst);
        run_job(job);
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn run_on_caller(&self, job: Job) {
        let runs = self.caller_runs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(pool = %self.config.pool_name, caller_runs = runs, "pool saturated, running task on caller thread");
        run_job(job);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn sample<F: Fn(&PoolStats)>(&self, on_pressure: &F) {
        let stats = self.stats();
        let limit = self.thread_limit;
        if stats.is_congested(limit) {
            warn!(
                pool = %self.config.pool_name,
                queue_depth = stats.queue_depth,
                thread_limit = limit,
                "task queue is backing up"
            );
            on_pressure(&stats);
        } else if stats.is_saturated(limit) {
            warn!(
                pool = %self.config.pool_name,
                active = stats.active_count,
                queue_depth = stats.queue_depth,
                "pool saturated"
            );
            on_pressure(&stats);
        } else {
            debug!(
                pool = %self.config.pool_name,
                pool_size = stats.pool_size,
                active = stats.active_count,
                queue_depth = stats.queue_depth,
                completed = stats.completed_tasks,
                submitted = stats.submitted_tasks,
                "pool sample"
            );
        }
    }
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("pool task panicked");
    }
}

fn is_worker_thread(prefix: &str) -> bool {
    thread::current()
        .name()
        .is_some_and(|name| name.starts_with(prefix))
}

fn build_runtime(shared: &Arc<Shared>) -> std::io::Result<Runtime> {
    let config = &shared.config;
    let pool_name = config.pool_name.clone();
    let worker_prefix = format!("{}-worker-", config.pool_name);
    let stop_prefix = worker_prefix.clone();
    let started = Arc::clone(shared);
    let stopped = Arc::clone(shared);
    let spawned = AtomicUsize::new(0);

    runtime::Builder::new_multi_thread()
        .worker_threads(SCHEDULER_THREADS)
        .max_blocking_threads(shared.thread_limit)
        .thread_keep_alive(config.keep_alive)
        .thread_name_fn(move || {
            // the scheduler thread is spawned while the runtime is built
            match spawned.fetch_add(1, Ordering::SeqCst) {
                0 => format!("{}-monitor", pool_name),
                n => format!("{}-worker-{}", pool_name, n - SCHEDULER_THREADS),
            }
        })
        .on_thread_start(move || {
            if is_worker_thread(&worker_prefix) {
                started.thread_started();
            }
        })
        .on_thread_stop(move || {
            if is_worker_thread(&stop_prefix) {
                stopped.thread_stopped();
            }
        })
        .enable_all()
        .build()
}

/// Pool of named blocking threads owned by a private tokio runtime.
pub struct WorkerPool {
    shared: Arc<Shared>,
    runtime: Option<Runtime>,
    handle: Handle,
    /// `None` for an unbounded queue.
    admission: Option<Arc<Semaphore>>,
    monitor_stop: Arc<AtomicBool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(config: ExecutionConfig) -> Result<Self, ExecutionError> {
        let config = config.normalized();
        let thread_limit = match config.queue_capacity {
            Some(_) => config.max_threads,
            None => config.core_threads,
        };
        let admission = config.queue_capacity.map(|capacity| {
            let permits = thread_limit
                .saturating_add(capacity)
                .min(Semaphore::MAX_PERMITS);
            Arc::new(Semaphore::new(permits))
        });
        let shared = Arc::new(Shared {
            thread_limit,
            threads: AtomicUsize::new(0),
            largest: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            caller_runs: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            discarding: AtomicBool::new(false),
            config,
        });
        let runtime = build_runtime(&shared).map_err(|err| ExecutionError::PoolStart {
            pool: shared.config.pool_name.clone(),
            reason: err.to_string(),
        })?;
        debug!(
            pool = %shared.config.pool_name,
            thread_limit,
            queue_capacity = ?shared.config.queue_capacity,
            "worker pool runtime started"
        );
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            shared,
            admission,
            monitor_stop: Arc::new(AtomicBool::new(false)),
            monitor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.shared.config
    }

    pub fn name(&self) -> &str {
        &self.shared.config.pool_name
    }

    /// Threads the pool may run at once.
    pub fn thread_limit(&self) -> usize {
        self.shared.thread_limit
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Submit a job.
    ///
    /// When every thread and queue slot is taken the job runs on the calling
    /// thread before this returns. Fails only once the pool is shut down.
    pub(crate) fn execute(&self, job: Job) -> Result<(), ExecutionError> {
        if self.is_shutdown() {
            return Err(ExecutionError::ShuttingDown);
        }
        self.shared.submitted.fetch_add(1, Ordering::SeqCst);

        let permit = match &self.admission {
            None => None,
            Some(slots) => match Arc::clone(slots).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.shared.run_on_caller(job);
                    return Ok(());
                }
            },
        };

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        // detached: the job reports its own outcome
        drop(self.handle.spawn_blocking(move || {
            let _permit = permit;
            shared.run_queued(job);
        }));
        Ok(())
    }

    /// Start the occupancy monitor. `on_pressure` runs on the pool runtime
    /// whenever a sample shows congestion or saturation.
    pub fn start_monitor<F>(&self, on_pressure: F)
    where
        F: Fn(&PoolStats) + Send + 'static,
    {
        let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        if monitor.is_some() || self.is_shutdown() {
            return;
        }
        self.monitor_stop.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&self.monitor_stop);
        *monitor = Some(self.handle.spawn(async move {
            let interval = shared.config.monitor_interval;
            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(interval).await;
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                shared.sample(&on_pressure);
            }
            debug!(pool = %shared.config.pool_name, "pool monitor stopped");
        }));
    }

    fn stop_monitor(&self) {
        self.monitor_stop.store(true, Ordering::SeqCst);
        let task = self.monitor.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Stop accepting jobs. Queued and running jobs still complete.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::SeqCst) {
            info!(
                pool = %self.shared.config.pool_name,
                queued = self.shared.queued.load(Ordering::SeqCst),
                "pool shutting down"
            );
        }
        self.stop_monitor();
    }

    /// Stop accepting jobs and discard everything still queued. Returns the
    /// number of discarded jobs. Running jobs cannot be interrupted.
    pub fn shutdown_now(&self) -> usize {
        self.shutdown();
        self.shared.discarding.store(true, Ordering::SeqCst);
        let count = self.shared.queued.load(Ordering::SeqCst);
        if count > 0 {
            warn!(pool = %self.shared.config.pool_name, discarded = count, "discarded queued tasks");
        }
        count
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Shut down with nothing left queued or running.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.is_idle()
    }

    /// Block until the pool terminated after shutdown, or `timeout` passed.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_terminated() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(TERMINATION_POLL);
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            // may be dropped from async code, which must not block
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::RwLock;

    fn config(core: usize, max: usize) -> ExecutionConfig {
        ExecutionConfig::default()
            .with_pool_name("test")
            .with_core_threads(core)
            .with_max_threads(max)
            .with_keep_alive(Duration::from_secs(5))
            .with_monitoring(false)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    fn gated(pool: &WorkerPool, gate: &Arc<RwLock<()>>) {
        let gate = Arc::clone(gate);
        pool.execute(Box::new(move || {
            let _open = gate.read();
        }))
        .unwrap();
    }

    #[test]
    fn test_runs_all_jobs() {
        let pool = WorkerPool::new(config(2, 4)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 50);

        let stats = pool.stats();
        assert_eq!(stats.submitted_tasks, 50);
        assert_eq!(stats.completed_tasks, 50);
        assert_eq!(stats.caller_runs, 0);
        assert!(stats.largest_pool_size <= 2);
    }

    #[test]
    fn test_worker_threads_are_named() {
        let pool = WorkerPool::new(config(1, 1)).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        }))
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("test-worker-"), "{}", name);
    }

    #[test]
    fn test_bounded_queue_runs_on_caller_when_full() {
        let pool = WorkerPool::new(config(1, 2).with_queue_capacity(Some(1))).unwrap();
        assert_eq!(pool.thread_limit(), 2);
        let gate = Arc::new(RwLock::new(()));
        let closed = gate.write().unwrap();

        // two threads busy, one job waiting in the queue
        for _ in 0..3 {
            gated(&pool, &gate);
        }
        assert!(wait_until(|| {
            let stats = pool.stats();
            stats.active_count == 2 && stats.queue_depth == 1
        }));

        let caller = thread::current().id();
        let ran_on_caller = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran_on_caller);
        pool.execute(Box::new(move || {
            if thread::current().id() == caller {
                flag.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .unwrap();
        assert_eq!(ran_on_caller.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().caller_runs, 1);

        drop(closed);
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        let stats = pool.stats();
        assert_eq!(stats.completed_tasks, 4);
        assert_eq!(stats.submitted_tasks, 4);
        assert!(stats.largest_pool_size <= 2);
    }

    #[test]
    fn test_unbounded_queue_stays_at_core_size() {
        let pool = WorkerPool::new(config(1, 4)).unwrap();
        assert_eq!(pool.thread_limit(), 1);
        let gate = Arc::new(RwLock::new(()));
        let closed = gate.write().unwrap();
        for _ in 0..3 {
            gated(&pool, &gate);
        }
        assert!(wait_until(|| {
            let stats = pool.stats();
            stats.active_count == 1 && stats.queue_depth == 2
        }));
        let stats = pool.stats();
        assert!(stats.is_saturated(pool.thread_limit()));
        assert_eq!(stats.caller_runs, 0);

        drop(closed);
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.stats().largest_pool_size, 1);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = WorkerPool::new(config(1, 1)).unwrap();
        pool.shutdown();
        assert_eq!(
            pool.execute(Box::new(|| {})),
            Err(ExecutionError::ShuttingDown)
        );
        assert!(pool.is_terminated());
        assert!(pool.await_termination(Duration::from_millis(10)));
    }

    #[test]
    fn test_shutdown_now_discards_queue() {
        let pool = WorkerPool::new(config(1, 1)).unwrap();
        let (release, wait) = mpsc::channel::<()>();
        pool.execute(Box::new(move || {
            let _ = wait.recv();
        }))
        .unwrap();
        assert!(wait_until(|| pool.stats().active_count == 1));

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            pool.execute(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        assert_eq!(pool.shutdown_now(), 3);
        release.send(()).unwrap();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().completed_tasks, 1);
    }

    #[test]
    fn test_idle_workers_time_out() {
        let pool = WorkerPool::new(config(2, 2).with_keep_alive(Duration::from_millis(20))).unwrap();
        let (tx, rx) = mpsc::channel();
        let first = tx.clone();
        pool.execute(Box::new(move || {
            let _ = first.send(());
        }))
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(pool.stats().largest_pool_size >= 1);
        assert!(wait_until(|| pool.stats().pool_size == 0));

        pool.execute(Box::new(move || {
            let _ = tx.send(());
        }))
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(config(1, 1)).unwrap();
        pool.execute(Box::new(|| panic!("job failed"))).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || {
            let _ = tx.send(());
        }))
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_monitor_reports_saturation_until_shutdown() {
        let pool = WorkerPool::new(
            config(1, 1)
                .with_queue_capacity(Some(4))
                .with_monitor_interval(Duration::from_millis(10)),
        )
        .unwrap();
        let samples: Arc<Mutex<Vec<PoolStats>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&samples);
        pool.start_monitor(move |stats| recorded.lock().unwrap().push(*stats));

        let gate = Arc::new(RwLock::new(()));
        let closed = gate.write().unwrap();
        for _ in 0..3 {
            gated(&pool, &gate);
        }
        assert!(wait_until(|| !samples.lock().unwrap().is_empty()));
        let first = samples.lock().unwrap()[0];
        assert!(first.is_saturated(1));
        assert!(first.queue_depth >= 1);

        drop(closed);
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        let seen = samples.lock().unwrap().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(samples.lock().unwrap().len(), seen);
    }

    #[test]
    fn test_pressure_predicates() {
        let stats = PoolStats {
            active_count: 4,
            queue_depth: 9,
            ..PoolStats::default()
        };
        assert!(stats.is_congested(4));
        assert!(stats.is_saturated(4));
        assert!(!PoolStats::default().is_saturated(4));
    }
}
