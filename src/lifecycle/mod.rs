//! Per-test lifecycle handling and retry policy.

mod listener;
mod retry;

pub use listener::{ScreenshotCapture, TestListener, DEFAULT_RETAINED_RESULTS};
pub use retry::RetryPolicy;
