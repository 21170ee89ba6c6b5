use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a test failure.
///
/// The first seven variants are presumed to stem from timing or environment
/// non-determinism (flaky); the rest point at a genuine defect or are
/// unclassified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    FlakySync,
    FlakyElement,
    FlakyNetwork,
    FlakyStale,
    FlakyTimeout,
    FlakyAnimation,
    FlakyPopup,
    AssertionFailure,
    DataIssue,
    EnvironmentIssue,
    CodeError,
    FrameworkIssue,
    Unknown,
}

impl FailureCategory {
    /// Every category, in declaration order.
    pub const ALL: [FailureCategory; 13] = [
        FailureCategory::FlakySync,
        FailureCategory::FlakyElement,
        FailureCategory::FlakyNetwork,
        FailureCategory::FlakyStale,
        FailureCategory::FlakyTimeout,
        FailureCategory::FlakyAnimation,
        FailureCategory::FlakyPopup,
        FailureCategory::AssertionFailure,
        FailureCategory::DataIssue,
        FailureCategory::EnvironmentIssue,
        FailureCategory::CodeError,
        FailureCategory::FrameworkIssue,
        FailureCategory::Unknown,
    ];

    pub fn is_flaky(self) -> bool {
        matches!(
            self,
            FailureCategory::FlakySync
                | FailureCategory::FlakyElement
                | FailureCategory::FlakyNetwork
                | FailureCategory::FlakyStale
                | FailureCategory::FlakyTimeout
                | FailureCategory::FlakyAnimation
                | FailureCategory::FlakyPopup
        )
    }

    /// Short human-readable label.
    pub fn description(self) -> &'static str {
        match self {
            FailureCategory::FlakySync => "Synchronization Issue",
            FailureCategory::FlakyElement => "Element Not Found",
            FailureCategory::FlakyNetwork => "Network Issue",
            FailureCategory::FlakyStale => "Stale Element Reference",
            FailureCategory::FlakyTimeout => "Timeout",
            FailureCategory::FlakyAnimation => "Animation Interference",
            FailureCategory::FlakyPopup => "Unexpected Popup",
            FailureCategory::AssertionFailure => "Assertion Failure",
            FailureCategory::DataIssue => "Test Data Issue",
            FailureCategory::EnvironmentIssue => "Environment Issue",
            FailureCategory::CodeError => "Code Error",
            FailureCategory::FrameworkIssue => "Framework Issue",
            FailureCategory::Unknown => "Unknown",
        }
    }

    /// Stable label used in event metadata and serialized reports.
    pub fn as_label(self) -> &'static str {
        match self {
            FailureCategory::FlakySync => "FLAKY_SYNC",
            FailureCategory::FlakyElement => "FLAKY_ELEMENT",
            FailureCategory::FlakyNetwork => "FLAKY_NETWORK",
            FailureCategory::FlakyStale => "FLAKY_STALE",
            FailureCategory::FlakyTimeout => "FLAKY_TIMEOUT",
            FailureCategory::FlakyAnimation => "FLAKY_ANIMATION",
            FailureCategory::FlakyPopup => "FLAKY_POPUP",
            FailureCategory::AssertionFailure => "ASSERTION_FAILURE",
            FailureCategory::DataIssue => "DATA_ISSUE",
            FailureCategory::EnvironmentIssue => "ENVIRONMENT_ISSUE",
            FailureCategory::CodeError => "CODE_ERROR",
            FailureCategory::FrameworkIssue => "FRAMEWORK_ISSUE",
            FailureCategory::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
