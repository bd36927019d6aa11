//! Retraining scheduler: retrain when due, compare with production, and
//! promote the new model when it is better.
//!
//! The schedule has no state of its own. "Last trained" is the start time
//! of the run behind the highest-numbered version in the registry, so the
//! scheduler recovers purely from registry content.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
  deploy::Deployer,
  error::{DeployError, RetrainError},
  notify::{Notification, Notifier},
  registry::ModelRegistry,
  settings::RetrainSettings,
  stage::Stage,
  train::Trainer,
  version::{RunId, RunMetrics, VersionId, accuracy},
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrainOutcome {
  /// Not due yet; nothing was touched.
  Skipped {
    last_training: Option<DateTime<Utc>>,
  },
  Completed(RetrainReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainReport {
  pub run_id:             RunId,
  pub new_metrics:        RunMetrics,
  pub production_metrics: Option<RunMetrics>,
  /// New accuracy minus production accuracy; `0.0` with no production model.
  pub improvement:        f64,
  pub is_better:          bool,
  pub deployment:         DeploymentOutcome,
  pub finished_at:        DateTime<Utc>,
}

/// How far the new model got through the promotion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeploymentOutcome {
  Deployed {
    staging_version:    VersionId,
    production_version: VersionId,
  },
  /// Staged, but the production step failed. A valid end state.
  StagedOnly {
    staging_version: VersionId,
    reason:          DeployFailure,
  },
  NotStaged {
    reason: DeployFailure,
  },
  NotAttempted {
    reason: SkipReason,
  },
}

impl DeploymentOutcome {
  pub fn deployed(&self) -> bool { matches!(self, Self::Deployed { .. }) }

  /// The promotion step that went wrong, if one did.
  pub fn failure(&self) -> Option<&DeployFailure> {
    match self {
      Self::StagedOnly { reason, .. } | Self::NotStaged { reason } => Some(reason),
      Self::Deployed { .. } | Self::NotAttempted { .. } => None,
    }
  }
}

/// A [`DeployError`] captured in a report.
///
/// Gate rejections and missing candidates are `recoverable`; outages and
/// inconsistent registries are not, and callers should surface them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployFailure {
  /// Snake-case variant name, e.g. `validation_failed`.
  pub kind:        &'static str,
  pub recoverable: bool,
  pub message:     String,
}

impl From<&DeployError> for DeployFailure {
  fn from(e: &DeployError) -> Self {
    Self {
      kind:        e.into(),
      recoverable: e.is_recoverable(),
      message:     e.to_string(),
    }
  }
}

impl fmt::Display for DeployFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.message) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  AutoDeployDisabled,
  NotBetter,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::AutoDeployDisabled => "auto_deploy disabled",
      Self::NotBetter => "new model not better",
    })
  }
}

// ─── Comparison ──────────────────────────────────────────────────────────────

/// `(is_better, improvement)` of `new` against the production metrics.
pub fn compare(
  new: &RunMetrics,
  production: Option<&RunMetrics>,
  min_improvement: f64,
) -> (bool, f64) {
  match production {
    None => (true, 0.0),
    Some(prod) => {
      let improvement = accuracy(new) - accuracy(prod);
      (improvement >= min_improvement, improvement)
    }
  }
}

// ─── Retrainer ───────────────────────────────────────────────────────────────

pub struct Retrainer<R, T, N> {
  deployer: Deployer<R>,
  trainer:  T,
  notifier: N,
  settings: RetrainSettings,
}

impl<R, T, N> Retrainer<R, T, N>
where
  R: ModelRegistry,
  T: Trainer,
  N: Notifier,
{
  pub fn new(
    deployer: Deployer<R>,
    trainer: T,
    notifier: N,
    settings: RetrainSettings,
  ) -> Self {
    info!(
      interval_days = settings.interval_days,
      auto_deploy = settings.auto_deploy,
      min_improvement = settings.min_improvement,
      "retraining scheduler initialised"
    );
    Self { deployer, trainer, notifier, settings }
  }

  /// Start time of the run behind the newest registered version.
  pub async fn last_training(&self) -> Result<Option<DateTime<Utc>>, RetrainError> {
    let registry = self.deployer.registry();
    let Some(newest) = registry.list_versions(None).await?.into_iter().next() else {
      info!("no previous models found; first training");
      return Ok(None);
    };

    match registry.get_run(newest.run_id.clone()).await? {
      Some(run) => Ok(Some(run.started_at)),
      None => {
        warn!(
          version = newest.version_id,
          run_id = %newest.run_id,
          "newest version has no recorded run; last training date unknown"
        );
        Ok(None)
      }
    }
  }

  /// True when nothing was trained yet or the interval has elapsed.
  pub async fn should_retrain(&self) -> Result<bool, RetrainError> {
    Ok(self.due_at(self.last_training().await?, Utc::now()))
  }

  fn due_at(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(last) = last else {
      info!("retraining needed: no previous training found");
      return true;
    };
    let days = (now - last).num_days();
    let due = days >= self.settings.interval_days;
    info!(
      days_since_training = days,
      interval_days = self.settings.interval_days,
      due,
      "checked retraining schedule"
    );
    due
  }

  /// Run one retraining cycle.
  ///
  /// Deployment problems after a successful training run are part of the
  /// report, not errors. Training failures and registry outages before
  /// training are errors.
  pub async fn retrain_and_deploy(
    &self,
    force: bool,
  ) -> Result<RetrainOutcome, RetrainError> {
    info!(force, "starting retraining workflow");

    if !force {
      let last = self.last_training().await?;
      if !self.due_at(last, Utc::now()) {
        info!("retraining not needed at this time");
        return Ok(RetrainOutcome::Skipped { last_training: last });
      }
    }

    let production_metrics = self.production_metrics().await?;

    info!("training new model");
    let trained = match self.trainer.train().await {
      Ok(t) => t,
      Err(e) => {
        error!(error = %e, "training failed");
        self
          .send(Notification {
            subject: "Stagewise: Retraining Failed".into(),
            body:    format!(
              "Automatic retraining failed:\n\nTraining failed: {e}\n\n\
               Please check logs for details."
            ),
          })
          .await;
        return Err(RetrainError::TrainingFailed(e));
      }
    };
    info!(
      run_id = %trained.run_id,
      accuracy = accuracy(&trained.metrics),
      "new model trained"
    );

    let (is_better, improvement) = compare(
      &trained.metrics,
      production_metrics.as_ref(),
      self.settings.min_improvement,
    );
    info!(
      production_accuracy = production_metrics.as_ref().map(accuracy),
      new_accuracy = accuracy(&trained.metrics),
      improvement,
      required = self.settings.min_improvement,
      is_better,
      "compared new model with production"
    );

    let deployment = if !self.settings.auto_deploy {
      info!("auto-deploy is disabled; model trained but not deployed");
      DeploymentOutcome::NotAttempted { reason: SkipReason::AutoDeployDisabled }
    } else if !is_better {
      warn!("new model is not better than production; keeping production model");
      DeploymentOutcome::NotAttempted { reason: SkipReason::NotBetter }
    } else {
      self.deploy(trained.version_id).await
    };

    let report = RetrainReport {
      run_id: trained.run_id,
      new_metrics: trained.metrics,
      production_metrics,
      improvement,
      is_better,
      deployment,
      finished_at: Utc::now(),
    };

    self.send(summary(&report)).await;
    info!(
      run_id = %report.run_id,
      improvement = report.improvement,
      deployed = report.deployment.deployed(),
      "retraining workflow completed"
    );
    Ok(RetrainOutcome::Completed(report))
  }

  async fn production_metrics(&self) -> Result<Option<RunMetrics>, RetrainError> {
    let registry = self.deployer.registry();
    let Some(prod) = registry
      .list_versions(Some(Stage::Production))
      .await?
      .into_iter()
      .next()
    else {
      info!("no model in Production; any new model counts as better");
      return Ok(None);
    };
    Ok(Some(registry.get_run_metrics(prod.run_id).await?))
  }

  async fn deploy(&self, trained_version: Option<VersionId>) -> DeploymentOutcome {
    info!("auto-deploying new model");
    let staged = match self.deployer.promote_to_staging().await {
      Ok(p) => p,
      Err(e) => {
        log_deploy_failure(Stage::Staging, &e);
        return DeploymentOutcome::NotStaged { reason: (&e).into() };
      }
    };
    if let Some(expected) = trained_version
      && expected != staged.version_id
    {
      warn!(
        expected,
        staged = staged.version_id,
        "staged version differs from the one just trained"
      );
    }

    match self.deployer.promote_to_production(Some(staged.version_id)).await {
      Ok(p) => DeploymentOutcome::Deployed {
        staging_version:    staged.version_id,
        production_version: p.version_id,
      },
      Err(e) => {
        log_deploy_failure(Stage::Production, &e);
        DeploymentOutcome::StagedOnly {
          staging_version: staged.version_id,
          reason:          (&e).into(),
        }
      }
    }
  }

  /// Notifications never fail the caller.
  async fn send(&self, notification: Notification) {
    if let Err(e) = self.notifier.notify(notification).await {
      warn!(error = %e, "could not send notification");
    }
  }
}

fn log_deploy_failure(stage: Stage, e: &DeployError) {
  if e.is_recoverable() {
    warn!(stage = %stage, error = %e, "model not promoted");
  } else {
    error!(stage = %stage, error = %e, "promotion failed");
  }
}

fn fmt_metric(metrics: &RunMetrics, key: &str) -> String {
  metrics
    .get(key)
    .map(|v| format!("{v:.4}"))
    .unwrap_or_else(|| "N/A".into())
}

fn summary(report: &RetrainReport) -> Notification {
  let new = &report.new_metrics;
  let performance = format!(
    "New Model Performance:\n  Accuracy: {}\n  F1 Score: {}\n  Precision: {}\n  Recall: {}\n",
    fmt_metric(new, "accuracy"),
    fmt_metric(new, "f1_score"),
    fmt_metric(new, "precision"),
    fmt_metric(new, "recall"),
  );
  let production = report
    .production_metrics
    .as_ref()
    .map(|m| fmt_metric(m, "accuracy"))
    .unwrap_or_else(|| "N/A".into());

  let reason = match &report.deployment {
    DeploymentOutcome::Deployed { staging_version, production_version } => {
      return Notification {
        subject: "Stagewise: Model Retrained and Deployed".into(),
        body:    format!(
          "Model retraining completed successfully!\n\n{performance}\n\
           Improvement: {:+.4}\n\nDeployment:\n  Staging Version: {staging_version}\n  \
           Production Version: {production_version}\n",
          report.improvement,
        ),
      };
    }
    DeploymentOutcome::StagedOnly { staging_version, reason } => {
      format!("staged as version {staging_version} but not promoted: {reason}")
    }
    DeploymentOutcome::NotStaged { reason } => reason.to_string(),
    DeploymentOutcome::NotAttempted { reason } => reason.to_string(),
  };

  Notification {
    subject: "Stagewise: Model Retrained (Not Deployed)".into(),
    body:    format!(
      "Model retraining completed, but the new model was not deployed.\n\n\
       {performance}\nProduction Model Accuracy: {production}\n\
       Improvement: {:+.4}\nReason: {reason}\n",
      report.improvement,
    ),
  }
}
