//! Validation gate: does a run's accuracy clear a threshold?

use serde::Serialize;

use crate::version::{RunMetrics, accuracy};

/// Outcome of checking one metric map against one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GateVerdict {
  pub accuracy: f64,
  pub required: f64,
  pub passed:   bool,
}

/// `true` iff `metrics["accuracy"]` (default `0.0`) is at least `threshold`.
pub fn passes(metrics: &RunMetrics, threshold: f64) -> bool {
  check(metrics, threshold).passed
}

/// Like [`passes`], keeping the observed and required values for reporting.
pub fn check(metrics: &RunMetrics, threshold: f64) -> GateVerdict {
  let accuracy = accuracy(metrics);
  GateVerdict { accuracy, required: threshold, passed: accuracy >= threshold }
}
