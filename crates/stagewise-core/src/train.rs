//! The training capability the retraining scheduler invokes.
//!
//! Training itself happens outside this crate. A [`Trainer`] runs it, makes
//! sure the resulting run and model version are in the registry, and hands
//! back the run id and metrics.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  error::RegistryError,
  version::{RunId, RunMetrics, VersionId},
};

/// What a finished training run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedRun {
  pub run_id:     RunId,
  pub metrics:    RunMetrics,
  /// The version registered for this run, when the trainer registered one.
  pub version_id: Option<VersionId>,
}

#[derive(Debug, Error)]
pub enum TrainError {
  #[error("{0}")]
  Failed(String),

  #[error("trainer produced no usable result: {0}")]
  BadOutput(String),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Other(Box<dyn std::error::Error + Send + Sync>),
}

pub trait Trainer: Send + Sync {
  /// Train, record, and register one model.
  fn train(&self) -> impl Future<Output = Result<TrainedRun, TrainError>> + Send + '_;
}
