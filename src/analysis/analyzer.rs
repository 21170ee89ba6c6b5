use std::collections::BTreeMap;
use std::fmt::Write as _;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::patterns::{
    recommendations, root_cause, CATEGORY_PATTERNS, FLAKY_RECOMMENDATIONS, XPATH_RECOMMENDATION,
};
use super::FailureCategory;
use crate::failure::{FailureKind, TestFailure};

/// Maximum length of the error message kept in analysis metadata.
pub const MAX_METADATA_MESSAGE_LEN: usize = 200;

const NO_FAILURE_ROOT_CAUSE: &str = "No exception information available";

const TIMED_OUT_FLAKINESS: f64 = 0.8;

/// Structured diagnosis of one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    category: FailureCategory,
    root_cause: String,
    recommendations: Vec<String>,
    flakiness_score: f64,
    metadata: BTreeMap<String, String>,
}

impl FailureAnalysis {
    /// Create an analysis; the score is clamped to `[0, 1]`.
    pub fn new(category: FailureCategory, root_cause: impl Into<String>, flakiness_score: f64) -> Self {
        Self {
            category,
            root_cause: root_cause.into(),
            recommendations: Vec::new(),
            flakiness_score: clamp_score(flakiness_score),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    pub fn with_recommendations<I, S>(mut self, recommendations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recommendations
            .extend(recommendations.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn category(&self) -> FailureCategory {
        self.category
    }

    pub fn is_flaky(&self) -> bool {
        self.category.is_flaky()
    }

    pub fn root_cause(&self) -> &str {
        &self.root_cause
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    pub fn flakiness_score(&self) -> f64 {
        self.flakiness_score
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Report block: category, flakiness, root cause and numbered recommendations.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Failure Category: {} ({})",
            self.category.description(),
            self.category
        );
        let _ = writeln!(
            out,
            "Flaky: {} (score {:.2})",
            if self.is_flaky() { "yes" } else { "no" },
            self.flakiness_score
        );
        let _ = writeln!(out, "Root Cause: {}", self.root_cause);
        if !self.recommendations.is_empty() {
            out.push_str("Recommendations:\n");
            for (index, recommendation) in self.recommendations.iter().enumerate() {
                let _ = writeln!(out, "  {}. {}", index + 1, recommendation);
            }
        }
        out
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Pattern-based failure classifier.
///
/// Construction compiles the pattern table once; [`analyze_failure`](Self::analyze_failure)
/// is then a pure function of its inputs and the analyzer can be shared
/// freely between threads.
#[derive(Debug, Clone)]
pub struct FailureAnalyzer {
    patterns: Vec<(FailureCategory, Vec<Regex>)>,
}

impl Default for FailureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureAnalyzer {
    pub fn new() -> Self {
        let patterns = CATEGORY_PATTERNS
            .iter()
            .map(|(category, expressions)| {
                let compiled = expressions
                    .iter()
                    .filter_map(|expression| {
                        RegexBuilder::new(expression)
                            .case_insensitive(true)
                            .build()
                            .ok()
                    })
                    .collect();
                (*category, compiled)
            })
            .collect();
        Self { patterns }
    }

    /// Classify a failure of `test_name` in `class_name`.
    pub fn analyze_failure(
        &self,
        failure: Option<&TestFailure>,
        test_name: &str,
        class_name: &str,
    ) -> FailureAnalysis {
        let Some(failure) = failure else {
            return FailureAnalysis::new(FailureCategory::Unknown, NO_FAILURE_ROOT_CAUSE, 0.0)
                .with_metadata("testName", test_name)
                .with_metadata("className", class_name);
        };

        let combined = combined_text(failure);
        let category = self.categorize(failure, &combined);
        let score = flakiness_score(category, &combined);

        let mut analysis = FailureAnalysis::new(category, root_cause(category), score)
            .with_recommendations(recommendations(category).iter().copied());
        if category == FailureCategory::FlakyElement
            && failure.message().to_lowercase().contains("xpath")
        {
            analysis = analysis.with_recommendation(XPATH_RECOMMENDATION);
        }
        if category.is_flaky() {
            analysis = analysis.with_recommendations(FLAKY_RECOMMENDATIONS);
        }

        let analysis = analysis
            .with_metadata("testName", test_name)
            .with_metadata("className", class_name)
            .with_metadata("exceptionType", failure.simple_type_name())
            .with_metadata("errorMessage", truncate_message(failure.message()));

        debug!(
            test = test_name,
            class = class_name,
            category = %analysis.category(),
            flakiness = analysis.flakiness_score(),
            "failure analyzed"
        );
        analysis
    }

    /// Analysis for a test stopped by its runner time limit.
    ///
    /// Skips pattern matching: the runner already knows the category, and
    /// a generic time-limit message is easy to misclassify.
    pub fn timed_out_analysis(
        &self,
        failure: &TestFailure,
        test_name: &str,
        class_name: &str,
    ) -> FailureAnalysis {
        let category = FailureCategory::FlakyTimeout;
        FailureAnalysis::new(category, root_cause(category), TIMED_OUT_FLAKINESS)
            .with_recommendations(recommendations(category).iter().copied())
            .with_recommendations(FLAKY_RECOMMENDATIONS)
            .with_metadata("testName", test_name)
            .with_metadata("className", class_name)
            .with_metadata("exceptionType", failure.simple_type_name())
            .with_metadata("errorMessage", truncate_message(failure.message()))
    }

    fn categorize(&self, failure: &TestFailure, combined: &str) -> FailureCategory {
        if failure.kind() == FailureKind::StepDefinition {
            if let Some(category) = categorize_step_failure(failure.message()) {
                return category;
            }
        }

        for (category, expressions) in &self.patterns {
            if expressions.iter().any(|re| re.is_match(combined)) {
                return *category;
            }
        }

        categorize_by_kind(failure.kind()).unwrap_or(FailureCategory::Unknown)
    }
}

/// Message followed by the full trace including causes.
fn combined_text(failure: &TestFailure) -> String {
    format!("{}\n{}", failure.message(), failure.stack_trace())
}

fn categorize_step_failure(message: &str) -> Option<FailureCategory> {
    let message = message.to_lowercase();
    if message.contains("i should see") && message.contains("element") {
        return Some(FailureCategory::FlakyElement);
    }
    if message.contains("element not found") || message.contains("unable to locate") {
        return Some(FailureCategory::FlakyElement);
    }
    if message.contains("timeout") || message.contains("timed out") {
        return Some(FailureCategory::FlakyTimeout);
    }
    if message.contains("not clickable") || message.contains("not interactable") {
        return Some(FailureCategory::FlakySync);
    }
    None
}

fn categorize_by_kind(kind: FailureKind) -> Option<FailureCategory> {
    match kind {
        FailureKind::ElementNotFound => Some(FailureCategory::FlakyElement),
        FailureKind::StaleElement => Some(FailureCategory::FlakyStale),
        FailureKind::Timeout | FailureKind::TestTimeout => Some(FailureCategory::FlakyTimeout),
        FailureKind::NotInteractable | FailureKind::ClickIntercepted => {
            Some(FailureCategory::FlakySync)
        }
        FailureKind::UnhandledAlert => Some(FailureCategory::FlakyPopup),
        FailureKind::Assertion => Some(FailureCategory::AssertionFailure),
        FailureKind::StepDefinition
        | FailureKind::Skipped
        | FailureKind::Panic
        | FailureKind::Other => None,
    }
}

fn flakiness_score(category: FailureCategory, combined: &str) -> f64 {
    let text = combined.to_lowercase();
    let mut score: f64 = if category.is_flaky() { 0.7 } else { 0.2 };

    if text.contains("intermittent") || text.contains("sometimes") {
        score += 0.2;
    }
    if text.contains("timing") || text.contains("race condition") {
        score += 0.15;
    }
    if text.contains("retry") || text.contains("retrying") {
        score += 0.1;
    }
    if text.contains("always fails") || text.contains("consistently") {
        score -= 0.3;
    }
    if text.contains("compilation") || text.contains("syntax") {
        score -= 0.4;
    }

    clamp_score(score)
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_METADATA_MESSAGE_LEN {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_METADATA_MESSAGE_LEN).collect();
    truncated.push_str("...");
    truncated
}
