//! Failure classification.
//!
//! Turns a raw [`TestFailure`](crate::failure::TestFailure) into a
//! [`FailureAnalysis`]: a category, a flakiness score in `[0, 1]`, a root-cause
//! sentence and a list of recommendations. Classification runs in three
//! passes, stopping at the first hit:
//!
//! 1. step-definition failures are matched on domain keywords in the message
//! 2. the message and full trace are matched against the category pattern
//!    table, in table order
//! 3. the failure kind reported by the automation boundary is mapped directly
//!
//! Anything left over is [`FailureCategory::Unknown`].

mod analyzer;
mod category;
mod patterns;

pub use analyzer::{FailureAnalysis, FailureAnalyzer, MAX_METADATA_MESSAGE_LEN};
pub use category::FailureCategory;
