//! Scalar quality score and the before/after delta used by the decision gate.

use crate::core::types::QualityMeasurement;

/// Issue count recorded when the linter could not run at all.
///
/// Large enough that any candidate scored with it is rejected.
pub const LINT_FAILURE_SENTINEL: u32 = 9999;

/// Points awarded for a passing test suite.
const TESTS_PASSED_POINTS: f64 = 100.0;

/// Map a measurement to a score: 100 for passing tests, minus one per lint issue.
///
/// There is no floor; heavily linted repositories score below zero.
pub fn score(measurement: &QualityMeasurement) -> f64 {
    let base = if measurement.tests_passed {
        TESTS_PASSED_POINTS
    } else {
        0.0
    };
    base - f64::from(measurement.lint_issue_count)
}

/// Signed percentage change from `before` to `after`, relative to `|before|`.
///
/// A zero baseline has no meaningful percentage: any positive `after` counts as
/// a full 100% improvement and anything else as no change.
pub fn delta(before: f64, after: f64) -> f64 {
    if before == 0.0 {
        return if after > 0.0 { 100.0 } else { 0.0 };
    }
    (after - before) / before.abs() * 100.0
}

/// True when `delta` meets the configured improvement margin.
pub fn meets_margin(delta: f64, improvement_margin: f64) -> bool {
    delta >= improvement_margin
}
