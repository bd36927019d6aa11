//! Model versions, training runs, and stage-transition history.
//!
//! A version is an immutable pointer at a training run plus an artifact.
//! Only its stage and description ever change, and versions are never
//! deleted: superseded ones move to [`Stage::Archived`].

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

/// Monotonic registry-assigned version number. Higher is newer.
pub type VersionId = u64;

/// Metric name → value, produced once by a training run.
pub type RunMetrics = BTreeMap<String, f64>;

/// The metric consulted by every gate.
pub const ACCURACY: &str = "accuracy";

/// Look up `accuracy`, treating a missing key as `0.0`.
pub fn accuracy(metrics: &RunMetrics) -> f64 {
  metrics.get(ACCURACY).copied().unwrap_or(0.0)
}

// ─── Runs ────────────────────────────────────────────────────────────────────

/// Opaque identifier of a training run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  /// A fresh id for runs recorded without one from the trainer.
  pub fn generate() -> Self { Self(Uuid::new_v4().simple().to_string()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for RunId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// A recorded training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub run_id:     RunId,
  pub started_at: DateTime<Utc>,
  pub metrics:    RunMetrics,
  pub params:     BTreeMap<String, String>,
}

/// Input to [`crate::registry::ModelRegistry::create_run`].
#[derive(Debug, Clone)]
pub struct NewRun {
  /// Trainer-supplied id; generated when absent.
  pub run_id:     Option<RunId>,
  /// Defaults to now when absent.
  pub started_at: Option<DateTime<Utc>>,
  pub metrics:    RunMetrics,
  pub params:     BTreeMap<String, String>,
}

impl NewRun {
  pub fn new(metrics: RunMetrics) -> Self {
    Self {
      run_id: None,
      started_at: None,
      metrics,
      params: BTreeMap::new(),
    }
  }

  pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
    self.started_at = Some(at);
    self
  }

  /// Resolve the optional fields into a concrete [`Run`].
  pub fn into_run(self) -> Run {
    Run {
      run_id:     self.run_id.unwrap_or_else(RunId::generate),
      started_at: self.started_at.unwrap_or_else(Utc::now),
      metrics:    self.metrics,
      params:     self.params,
    }
  }
}

// ─── Versions ────────────────────────────────────────────────────────────────

/// A registered model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
  pub version_id:      VersionId,
  pub run_id:          RunId,
  pub stage:           Stage,
  pub description:     String,
  /// Where the serialised model lives (local path or `file://` URI).
  pub artifact_uri:    Option<String>,
  /// Hex SHA-256 of the artifact bytes at registration time.
  pub artifact_sha256: Option<String>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

/// Input to [`crate::registry::ModelRegistry::register_version`].
/// The stage is always [`Stage::Initial`]; it is not accepted from callers.
#[derive(Debug, Clone)]
pub struct NewVersion {
  pub run_id:          RunId,
  pub artifact_uri:    Option<String>,
  pub artifact_sha256: Option<String>,
}

impl NewVersion {
  pub fn new(run_id: RunId) -> Self {
    Self { run_id, artifact_uri: None, artifact_sha256: None }
  }
}

// ─── History ─────────────────────────────────────────────────────────────────

/// One stage change, appended by the registry on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
  pub version_id: VersionId,
  pub from:       Stage,
  pub to:         Stage,
  pub at:         DateTime<Utc>,
}
