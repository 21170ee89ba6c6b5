//! Fixed classification tables.
//!
//! The order of [`CATEGORY_PATTERNS`] is the match priority: the first
//! category with any matching expression wins. It must not be re-sorted.

use super::FailureCategory;

/// Category → case-insensitive regular expressions, in priority order.
pub(crate) const CATEGORY_PATTERNS: &[(FailureCategory, &[&str])] = &[
    (
        FailureCategory::FlakySync,
        &[
            r"element.*not.*clickable",
            r"element.*not.*interactable",
            r"element click intercepted",
            r"other element would receive the click",
            r"element is not ready",
            r"element not visible",
            r"element is not currently visible",
        ],
    ),
    (
        FailureCategory::FlakyElement,
        &[
            r"no such element",
            r"unable to locate element",
            r"element not found",
            r"could not find element",
            r"cannot locate an element",
            r"nosuchelementexception",
        ],
    ),
    (
        FailureCategory::FlakyNetwork,
        &[
            r"connection refused",
            r"connection reset",
            r"connection timed out",
            r"unknownhostexception",
            r"socketexception",
            r"err_connection",
            r"err_name_not_resolved",
            r"network.*unreachable",
            r"failed to establish.*connection",
        ],
    ),
    (
        FailureCategory::FlakyStale,
        &[
            r"stale element reference",
            r"element is not attached to the page document",
            r"staleelementreferenceexception",
            r"element.*no longer.*attached",
        ],
    ),
    (
        FailureCategory::FlakyTimeout,
        &[
            r"timeout",
            r"timed out",
            r"wait.*exceeded",
            r"took too long",
            r"time limit",
        ],
    ),
    (
        FailureCategory::FlakyAnimation,
        &[
            r"animation",
            r"transition.*in progress",
            r"element is moving",
            r"is being animated",
        ],
    ),
    (
        FailureCategory::FlakyPopup,
        &[
            r"unexpected alert",
            r"unhandled alert",
            r"alert.*open",
            r"modal dialog present",
            r"popup",
        ],
    ),
    (
        FailureCategory::AssertionFailure,
        &[
            r"assertion failed",
            r"assertionerror",
            r"expected.*but.*was",
            r"expected.*but.*found",
            r"expected:.*actual:",
            r"assert.*failed",
        ],
    ),
    (
        FailureCategory::DataIssue,
        &[
            r"test data",
            r"data not found",
            r"invalid data",
            r"no.*data.*available",
            r"duplicate key",
            r"numberformatexception",
            r"parse.*error",
        ],
    ),
    (
        FailureCategory::EnvironmentIssue,
        &[
            r"session not created",
            r"chrome not reachable",
            r"browser.*crashed",
            r"driver.*executable",
            r"out of memory",
            r"outofmemoryerror",
            r"permission denied",
            r"disk.*full",
        ],
    ),
    (
        FailureCategory::CodeError,
        &[
            r"nullpointerexception",
            r"null pointer",
            r"classcastexception",
            r"arrayindexoutofbounds",
            r"index out of bounds",
            r"illegalargumentexception",
            r"illegalstateexception",
            r"called `option::unwrap\(\)` on a `none` value",
            r"called `result::unwrap\(\)` on an `err` value",
        ],
    ),
];

/// Fixed root-cause sentence for a category.
pub(crate) fn root_cause(category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::FlakySync => {
            "Element was not ready for interaction when the test tried to use it; the page state and the test were out of sync."
        }
        FailureCategory::FlakyElement => {
            "Element could not be located on the page, either because the locator is wrong or the element had not rendered yet."
        }
        FailureCategory::FlakyNetwork => {
            "A network request failed or was interrupted while the test was running."
        }
        FailureCategory::FlakyStale => {
            "The page was refreshed or re-rendered after the element was located, invalidating the reference."
        }
        FailureCategory::FlakyTimeout => {
            "An operation did not complete within the configured wait time."
        }
        FailureCategory::FlakyAnimation => {
            "An animation or transition was in progress when the test interacted with the page."
        }
        FailureCategory::FlakyPopup => {
            "An unexpected alert, modal or popup blocked the interaction."
        }
        FailureCategory::AssertionFailure => {
            "The application produced a value different from the expected one."
        }
        FailureCategory::DataIssue => {
            "The test data was missing, invalid or in an unexpected state."
        }
        FailureCategory::EnvironmentIssue => {
            "The test environment (browser, driver or host resources) was not in a usable state."
        }
        FailureCategory::CodeError => {
            "A programming error in the test or framework code was hit."
        }
        FailureCategory::FrameworkIssue => {
            "The automation framework itself failed while running the test."
        }
        FailureCategory::Unknown => {
            "The failure could not be classified automatically."
        }
    }
}

/// Fixed recommendations for a category, in display order.
pub(crate) fn recommendations(category: FailureCategory) -> &'static [&'static str] {
    match category {
        FailureCategory::FlakySync => &[
            "Wait for the element to be clickable before interacting with it",
            "Replace fixed sleeps with explicit waits on element state",
            "Scroll the element into view before clicking",
            "Check for overlays or spinners covering the element",
            "Wait for page load and pending AJAX requests to finish",
        ],
        FailureCategory::FlakyElement => &[
            "Verify the locator against the current page markup",
            "Add an explicit wait for the element to be present",
            "Prefer stable attributes such as id or data-testid over positional locators",
            "Check whether the element lives inside an iframe or shadow root",
            "Confirm the test navigated to the expected page first",
        ],
        FailureCategory::FlakyNetwork => &[
            "Check connectivity and availability of the application under test",
            "Add retry handling around network-dependent steps",
            "Increase timeouts for slow backend calls",
            "Mock or stub unstable third-party services",
            "Review proxy and firewall settings of the execution host",
        ],
        FailureCategory::FlakyStale => &[
            "Re-locate the element immediately before interacting with it",
            "Avoid caching element references across page updates",
            "Wait for the page or component to finish re-rendering",
            "Use page objects that resolve locators lazily",
            "Retry the interaction once on a stale reference",
        ],
        FailureCategory::FlakyTimeout => &[
            "Increase the wait timeout for the slow operation",
            "Wait on a specific condition instead of a fixed duration",
            "Check application performance in the test environment",
            "Split long-running steps into smaller verifiable steps",
            "Verify that the expected condition can actually become true",
        ],
        FailureCategory::FlakyAnimation => &[
            "Wait for animations and transitions to complete",
            "Disable animations in the test environment",
            "Wait for the element position to stabilize before clicking",
            "Use explicit waits on the final visual state",
            "Avoid interacting with elements while they are moving",
        ],
        FailureCategory::FlakyPopup => &[
            "Handle expected alerts explicitly in the test flow",
            "Dismiss cookie banners and promotional popups during setup",
            "Check for unexpected modal dialogs before interacting",
            "Configure the browser to block notifications and popups",
            "Add a generic popup handler to the page objects",
        ],
        FailureCategory::AssertionFailure => &[
            "Compare the expected and actual values in the failure message",
            "Verify the test expectation is still correct for the current release",
            "Check whether the application behaviour changed intentionally",
            "Review the test data used to compute the expected value",
            "Reproduce the scenario manually to confirm a defect",
            "File a defect if the application behaviour is wrong",
        ],
        FailureCategory::DataIssue => &[
            "Verify the test data exists in the target environment",
            "Create or reset test data in the test setup",
            "Check data file formats and encodings",
            "Avoid sharing mutable data between parallel tests",
            "Validate data preconditions at the start of the test",
        ],
        FailureCategory::EnvironmentIssue => &[
            "Check the browser and driver versions are compatible",
            "Verify the execution host has enough memory and disk",
            "Restart the browser session or grid node",
            "Check environment configuration and credentials",
            "Run the test on a clean environment to confirm",
        ],
        FailureCategory::CodeError => &[
            "Inspect the stack trace for the failing line",
            "Add null and bounds checks around the failing code",
            "Review recent changes to the test and page-object code",
            "Add unit tests for the helper that failed",
            "Run static analysis on the test code",
        ],
        FailureCategory::FrameworkIssue => &[
            "Check the framework logs around the failure",
            "Verify the framework configuration for this suite",
            "Update the framework to the latest patch release",
            "Reproduce with a minimal test to isolate the framework problem",
            "Report the issue to the framework maintainers",
        ],
        FailureCategory::Unknown => &[
            "Review the full stack trace and logs",
            "Reproduce the failure locally with detailed logging",
            "Capture screenshots and page source at the point of failure",
            "Check recent changes to the application and the test",
            "Add the new failure pattern to the analyzer if it recurs",
        ],
    }
}

/// Extra recommendation for element failures whose message mentions an XPath.
pub(crate) const XPATH_RECOMMENDATION: &str =
    "Consider replacing the XPath locator with a CSS selector or a dedicated test id";

/// Appended to the recommendations of every flaky category.
pub(crate) const FLAKY_RECOMMENDATIONS: [&str; 3] = [
    "Consider implementing retry mechanism for this test",
    "Run test multiple times to confirm flakiness",
    "Add detailed logging to capture the timing of the failure",
];
