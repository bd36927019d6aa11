//! The `ModelRegistry` trait.
//!
//! The trait is implemented by registry backends (e.g.
//! `stagewise-store-sqlite`, or [`crate::memory::InMemoryRegistry`] in tests).
//! The deployment and retraining workflows depend on this abstraction, not on
//! any concrete backend.

use std::future::Future;

use crate::{
  error::RegistryError,
  stage::Stage,
  version::{
    ModelVersion, NewRun, NewVersion, Run, RunId, RunMetrics, StageTransition,
    VersionId,
  },
};

/// Abstraction over a model tracking + registry backend.
///
/// Versions are append-only; the only mutations are stage transitions and
/// description updates. Every stage change is also appended to the
/// transition history.
///
/// All methods return `Send` futures so the trait can be used from a
/// multi-threaded runtime (e.g. behind `axum`).
pub trait ModelRegistry: Send + Sync {
  // ── Runs ──────────────────────────────────────────────────────────────

  /// Record a finished training run and its metrics.
  fn create_run(
    &self,
    input: NewRun,
  ) -> impl Future<Output = Result<Run, RegistryError>> + Send + '_;

  /// Retrieve a run by id. Returns `None` if not found.
  fn get_run(
    &self,
    run_id: RunId,
  ) -> impl Future<Output = Result<Option<Run>, RegistryError>> + Send + '_;

  /// Metrics of a run; an unknown run yields an empty map.
  fn get_run_metrics(
    &self,
    run_id: RunId,
  ) -> impl Future<Output = Result<RunMetrics, RegistryError>> + Send + '_ {
    async move {
      Ok(
        self
          .get_run(run_id)
          .await?
          .map(|run| run.metrics)
          .unwrap_or_default(),
      )
    }
  }

  // ── Versions ──────────────────────────────────────────────────────────

  /// Register a new version in [`Stage::Initial`].
  fn register_version(
    &self,
    input: NewVersion,
  ) -> impl Future<Output = Result<ModelVersion, RegistryError>> + Send + '_;

  /// Retrieve a version by id. Returns `None` if not found.
  fn get_version(
    &self,
    version_id: VersionId,
  ) -> impl Future<Output = Result<Option<ModelVersion>, RegistryError>> + Send + '_;

  /// List versions, optionally restricted to one stage, highest id first.
  fn list_versions(
    &self,
    stage: Option<Stage>,
  ) -> impl Future<Output = Result<Vec<ModelVersion>, RegistryError>> + Send + '_;

  /// Move `version_id` to `stage`.
  ///
  /// With `archive_existing`, every other version currently in `stage` is
  /// moved to [`Stage::Archived`] by the same call.
  fn transition_stage(
    &self,
    version_id: VersionId,
    stage: Stage,
    archive_existing: bool,
  ) -> impl Future<Output = Result<ModelVersion, RegistryError>> + Send + '_;

  /// Whether `transition_stage(.., archive_existing = true)` applies the
  /// archive and the assignment as one atomic step.
  fn atomic_archive(&self) -> bool { false }

  /// Replace a version's free-text description. Metadata only.
  fn update_description(
    &self,
    version_id: VersionId,
    description: String,
  ) -> impl Future<Output = Result<(), RegistryError>> + Send + '_;

  // ── History ───────────────────────────────────────────────────────────

  /// Every recorded stage change, oldest first.
  fn list_transitions(
    &self,
  ) -> impl Future<Output = Result<Vec<StageTransition>, RegistryError>> + Send + '_;
}
