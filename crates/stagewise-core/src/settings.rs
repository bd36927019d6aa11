//! Tunables for the deployment and retraining workflows.
//!
//! Loaded by the binary from `config.yaml` and passed by value into the
//! workflows; nothing in this crate reads the process environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Accuracy gates for the two promotion steps.
///
/// Deployments of this workflow have used 0.35/0.40 and 0.70/0.80; the
/// defaults are the former and every deployment is expected to set its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
  pub staging_threshold:    f64,
  pub production_threshold: f64,
}

impl Default for DeploySettings {
  fn default() -> Self {
    Self { staging_threshold: 0.35, production_threshold: 0.40 }
  }
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
  #[error("threshold {name} = {value} is outside [0, 1]")]
  OutOfRange { name: &'static str, value: f64 },

  #[error(
    "production_threshold ({production}) must be above staging_threshold ({staging})"
  )]
  GatesOutOfOrder { staging: f64, production: f64 },

  #[error("retraining interval must be at least one day")]
  ZeroInterval,
}

impl DeploySettings {
  pub fn validate(&self) -> Result<(), SettingsError> {
    for (name, value) in [
      ("staging_threshold", self.staging_threshold),
      ("production_threshold", self.production_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(SettingsError::OutOfRange { name, value });
      }
    }
    if self.production_threshold <= self.staging_threshold {
      return Err(SettingsError::GatesOutOfOrder {
        staging:    self.staging_threshold,
        production: self.production_threshold,
      });
    }
    Ok(())
  }
}

/// Schedule and promotion policy for automatic retraining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainSettings {
  pub interval_days:      i64,
  pub auto_deploy:        bool,
  /// New accuracy minus production accuracy must reach this to count as
  /// better.
  pub min_improvement:    f64,
  /// Where outcome notifications go; none are sent when unset.
  pub notification_email: Option<String>,
}

impl Default for RetrainSettings {
  fn default() -> Self {
    Self {
      interval_days:      30,
      auto_deploy:        true,
      min_improvement:    0.0,
      notification_email: None,
    }
  }
}

impl RetrainSettings {
  pub fn validate(&self) -> Result<(), SettingsError> {
    if self.interval_days < 1 {
      return Err(SettingsError::ZeroInterval);
    }
    Ok(())
  }
}
