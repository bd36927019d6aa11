//! Deployment orchestrator: gated promotions and rollback.
//!
//! ```text
//!   Initial ──(staging gate)──▶ Staging ──(production gate)──▶ Production
//!      └──────────(production gate, staging skipped)──────────────▲
//!   Archived ◀── superseded occupants of Staging / Production
//!   Archived ──(rollback, no gate)──▶ Production
//! ```

use std::{collections::BTreeSet, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
  error::DeployError,
  gate,
  registry::ModelRegistry,
  settings::DeploySettings,
  stage::Stage,
  transition::TransitionEngine,
  version::{ModelVersion, RunMetrics, VersionId},
};

// ─── Results ─────────────────────────────────────────────────────────────────

/// A version that passed its gate and now occupies `stage`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Promotion {
  pub version_id:      VersionId,
  pub stage:           Stage,
  pub accuracy:        f64,
  /// Promoted to production straight from `Initial`.
  pub skipped_staging: bool,
}

/// A completed rollback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rollback {
  /// The version now serving.
  pub version_id: VersionId,
  /// The production occupant it replaced, if there was one.
  pub replaced:   Option<VersionId>,
}

/// The serving version and the metrics of its run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionInfo {
  pub version: ModelVersion,
  pub metrics: RunMetrics,
}

// ─── Deployer ────────────────────────────────────────────────────────────────

pub struct Deployer<R> {
  engine:   TransitionEngine<R>,
  settings: DeploySettings,
}

impl<R: ModelRegistry> Deployer<R> {
  pub fn new(registry: Arc<R>, settings: DeploySettings) -> Self {
    Self { engine: TransitionEngine::new(registry), settings }
  }

  pub fn registry(&self) -> &Arc<R> { self.engine.registry() }

  pub fn settings(&self) -> &DeploySettings { &self.settings }

  /// Gate the newest `Initial` version against the staging threshold and
  /// move it to `Staging`.
  pub async fn promote_to_staging(&self) -> Result<Promotion, DeployError> {
    info!("deploying model to Staging");
    let candidate = self
      .latest_in(Stage::Initial)
      .await?
      .ok_or(DeployError::NoCandidateModel { stage: Stage::Initial })?;

    self
      .promote(candidate, Stage::Staging, self.settings.staging_threshold, false)
      .await
  }

  /// Gate a version against the production threshold and move it to
  /// `Production`.
  ///
  /// Without an explicit version the `Staging` occupant is used. If Staging
  /// is empty the newest `Initial` version is taken instead; that path skips
  /// the staging gate and is reported as such.
  pub async fn promote_to_production(
    &self,
    version_id: Option<VersionId>,
  ) -> Result<Promotion, DeployError> {
    info!(?version_id, "deploying model to Production");

    let (candidate, skipped_staging) = match version_id {
      Some(id) => {
        let v = self
          .registry()
          .get_version(id)
          .await?
          .ok_or(DeployError::VersionNotFound(id))?;
        (v, false)
      }
      None => match self.latest_in(Stage::Staging).await? {
        Some(v) => {
          info!(version = v.version_id, "using model from Staging");
          (v, false)
        }
        None => {
          let v = self
            .latest_in(Stage::Initial)
            .await?
            .ok_or(DeployError::NoCandidateModel { stage: Stage::Staging })?;
          warn!(
            version = v.version_id,
            "no model in Staging; promoting newest Initial version directly, \
             skipping Staging"
          );
          (v, true)
        }
      },
    };

    self
      .promote(
        candidate,
        Stage::Production,
        self.settings.production_threshold,
        skipped_staging,
      )
      .await
  }

  /// Put a previous version back into `Production` without re-validating.
  ///
  /// With no target, the candidate set is every version that has ever
  /// entered Production and is now in Production or Archived. The newest
  /// one older than the current occupant wins.
  pub async fn rollback(
    &self,
    target: Option<VersionId>,
  ) -> Result<Rollback, DeployError> {
    info!(?target, "rolling back production model");
    let replaced = self.latest_in(Stage::Production).await?.map(|v| v.version_id);

    let version_id = match target {
      Some(id) => id,
      None => self.previous_production(replaced).await?,
    };

    self.engine.transition(version_id, Stage::Production).await?;
    self
      .describe(
        version_id,
        format!(
          "Rolled back to Production{} - {}",
          replaced.map(|r| format!(" from v{r}")).unwrap_or_default(),
          Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        ),
      )
      .await;

    info!(version = version_id, ?replaced, "rolled back production model");
    Ok(Rollback { version_id, replaced })
  }

  /// The current production version with its run metrics, if any.
  pub async fn production_info(&self) -> Result<Option<ProductionInfo>, DeployError> {
    let Some(version) = self.latest_in(Stage::Production).await? else {
      info!("no model currently in Production");
      return Ok(None);
    };
    let metrics = self.registry().get_run_metrics(version.run_id.clone()).await?;
    Ok(Some(ProductionInfo { version, metrics }))
  }

  // ── Internals ───────────────────────────────────────────────────────────

  async fn latest_in(&self, stage: Stage) -> Result<Option<ModelVersion>, DeployError> {
    Ok(self.registry().list_versions(Some(stage)).await?.into_iter().next())
  }

  async fn promote(
    &self,
    candidate: ModelVersion,
    stage: Stage,
    threshold: f64,
    skipped_staging: bool,
  ) -> Result<Promotion, DeployError> {
    let version_id = candidate.version_id;
    let metrics = self.registry().get_run_metrics(candidate.run_id).await?;

    let verdict = gate::check(&metrics, threshold);
    if !verdict.passed {
      warn!(
        version = version_id,
        stage = %stage,
        accuracy = verdict.accuracy,
        required = verdict.required,
        "model did not meet threshold; deployment aborted"
      );
      return Err(DeployError::ValidationFailed {
        version:  version_id,
        accuracy: verdict.accuracy,
        required: verdict.required,
      });
    }
    info!(
      version = version_id,
      accuracy = verdict.accuracy,
      required = verdict.required,
      "model validation passed"
    );

    self.engine.transition(version_id, stage).await?;
    self
      .describe(
        version_id,
        format!(
          "Deployed to {stage} - Accuracy: {:.4} - {}",
          verdict.accuracy,
          Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        ),
      )
      .await;

    info!(version = version_id, stage = %stage, "model version deployed");
    Ok(Promotion {
      version_id,
      stage,
      accuracy: verdict.accuracy,
      skipped_staging,
    })
  }

  async fn previous_production(
    &self,
    incumbent: Option<VersionId>,
  ) -> Result<VersionId, DeployError> {
    let ever_production: BTreeSet<VersionId> = self
      .registry()
      .list_transitions()
      .await?
      .into_iter()
      .filter(|t| t.to == Stage::Production)
      .map(|t| t.version_id)
      .collect();

    // Highest id first.
    let candidates: Vec<VersionId> = self
      .registry()
      .list_versions(None)
      .await?
      .into_iter()
      .filter(|v| ever_production.contains(&v.version_id))
      .filter(|v| matches!(v.stage, Stage::Production | Stage::Archived))
      .map(|v| v.version_id)
      .collect();

    if candidates.len() < 2 {
      warn!("no previous version available for rollback");
      return Err(DeployError::NoPreviousVersion);
    }

    match incumbent {
      Some(current) => candidates
        .into_iter()
        .find(|id| *id < current)
        .ok_or(DeployError::NoPreviousVersion),
      None => Ok(candidates[1]),
    }
  }

  /// Descriptions are metadata; failing to write one is logged only.
  async fn describe(&self, version_id: VersionId, text: String) {
    if let Err(e) = self.registry().update_description(version_id, text).await {
      warn!(version = version_id, error = %e, "could not add description");
    }
  }
}
