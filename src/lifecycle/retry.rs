use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::FailureAnalysis;
use crate::config::RetryConfig;

/// How often a failing test is re-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub count: u32,
    /// Fixed pause before each re-run.
    pub delay: Duration,
    /// Only re-run failures classified as flaky.
    pub flaky_only: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            count: 0,
            delay: Duration::from_millis(1000),
            flaky_only: false,
        }
    }

    pub fn new(count: u32) -> Self {
        Self {
            count,
            ..Self::none()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_flaky_only(mut self, flaky_only: bool) -> Self {
        self.flaky_only = flaky_only;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.count.saturating_add(1)
    }

    /// Whether a failure on zero-based `attempt` earns another run.
    pub fn should_retry(&self, attempt: u32, analysis: Option<&FailureAnalysis>) -> bool {
        if attempt >= self.count {
            return false;
        }
        !self.flaky_only || analysis.map_or(false, FailureAnalysis::is_flaky)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.count).with_delay(config.delay)
    }
}
