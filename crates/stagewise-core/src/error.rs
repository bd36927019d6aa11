//! Error types for `stagewise-core`.

use std::time::Duration;

use strum::IntoStaticStr;
use thiserror::Error;

use crate::{
  stage::Stage,
  version::{RunId, VersionId},
};

/// A failed call into a registry backend.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("registry unavailable: {0}")]
  Unavailable(String),

  #[error("registry call `{op}` timed out after {after:?}")]
  Timeout { op: &'static str, after: Duration },

  #[error("model version not found: {0}")]
  VersionNotFound(VersionId),

  #[error("run not found: {0}")]
  RunNotFound(RunId),

  #[error("registry backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RegistryError {
  pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Backend(Box::new(e))
  }
}

/// Failure of a single stage transition.
#[derive(Debug, Error)]
pub enum TransitionError {
  #[error("stage {0} cannot be targeted directly")]
  InvalidTarget(Stage),

  #[error("model version not found: {0}")]
  VersionNotFound(VersionId),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  /// The assignment failed and restoring the archived incumbents failed too.
  #[error(
    "stage {stage} left inconsistent while moving version {version}: {detail}"
  )]
  Inconsistent {
    version: VersionId,
    stage:   Stage,
    detail:  String,
  },
}

/// Typed failure of a deployment operation.
#[derive(Debug, Error, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeployError {
  #[error("no candidate model version in stage {stage}")]
  NoCandidateModel { stage: Stage },

  #[error(
    "version {version} failed validation: accuracy {accuracy:.4} < required {required:.4}"
  )]
  ValidationFailed {
    version:  VersionId,
    accuracy: f64,
    required: f64,
  },

  #[error("no previous production version to roll back to")]
  NoPreviousVersion,

  #[error("model version not found: {0}")]
  VersionNotFound(VersionId),

  #[error("stage {0} cannot be targeted directly")]
  InvalidTarget(Stage),

  #[error(transparent)]
  RegistryUnavailable(RegistryError),

  #[error(transparent)]
  Inconsistent(TransitionError),
}

impl From<RegistryError> for DeployError {
  fn from(e: RegistryError) -> Self {
    match e {
      RegistryError::VersionNotFound(v) => Self::VersionNotFound(v),
      other => Self::RegistryUnavailable(other),
    }
  }
}

impl From<TransitionError> for DeployError {
  fn from(e: TransitionError) -> Self {
    match e {
      TransitionError::InvalidTarget(s) => Self::InvalidTarget(s),
      TransitionError::VersionNotFound(v) => Self::VersionNotFound(v),
      TransitionError::Registry(r) => r.into(),
      e @ TransitionError::Inconsistent { .. } => Self::Inconsistent(e),
    }
  }
}

impl DeployError {
  /// Expected outcomes a caller reports rather than treats as an outage.
  pub fn is_recoverable(&self) -> bool {
    matches!(
      self,
      Self::NoCandidateModel { .. }
        | Self::ValidationFailed { .. }
        | Self::NoPreviousVersion
    )
  }
}

/// Fatal failure of one retraining cycle.
#[derive(Debug, Error)]
pub enum RetrainError {
  #[error("training failed: {0}")]
  TrainingFailed(#[source] crate::train::TrainError),

  #[error(transparent)]
  RegistryUnavailable(#[from] RegistryError),
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
