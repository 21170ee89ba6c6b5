//! Parallel test execution.
//!
//! [`ParallelExecutionManager`] resolves [`TestMethod`] descriptors against a
//! [`TestRegistry`], runs them on a [`WorkerPool`] and aggregates the
//! outcomes of a [`TestSuite`] into an
//! [`ExecutionResult`](crate::report::ExecutionResult).

mod pool;
mod scheduler;
mod suite;

use thiserror::Error;

pub use pool::{PoolStats, WorkerPool};
pub use scheduler::ParallelExecutionManager;
pub use suite::{TestBody, TestInvocation, TestMethod, TestRegistry, TestSuite};

/// Infrastructure errors: a test could not be run to a verdict.
///
/// Test failures are never reported this way; they end up as a failed
/// [`TestResult`](crate::report::TestResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("failed to start worker pool {pool}: {reason}")]
    PoolStart { pool: String, reason: String },

    #[error("no test registered for {class}.{method}")]
    UnknownTest { class: String, method: String },

    #[error("{test} was abandoned before it produced a result")]
    Abandoned { test: String },

    #[error("execution manager is shutting down")]
    ShuttingDown,

    #[error("failed to install shutdown hook: {0}")]
    HookInstall(String),
}
