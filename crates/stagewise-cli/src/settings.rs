//! Runtime configuration, read from `config.yaml` and `STAGEWISE__*`
//! environment variables.
//!
//! ```yaml
//! mlflow:
//!   tracking_uri: sqlite:///mlflow.db
//!   model_name: churn-classifier
//! deployment:
//!   staging_threshold: 0.35
//!   production_threshold: 0.40
//! retraining:
//!   interval_days: 30
//!   auto_deploy: true
//!   min_improvement: 0.01
//!   notification_email: ml-team@example.com
//! training:
//!   command: ["python", "src/train_model.py"]
//! registry_timeout_secs: 30
//! serve:
//!   host: 127.0.0.1
//!   port: 8080
//! ```
//!
//! Sections this binary does not know about are ignored, so the file can be
//! shared with the training job.

use std::{path::Path, time::Duration};

use anyhow::Context as _;
use serde::Deserialize;
use stagewise_core::settings::{DeploySettings, RetrainSettings};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub mlflow:                TrackingSettings,
  pub deployment:            DeploySettings,
  pub retraining:            RetrainSettings,
  pub training:              TrainingSettings,
  pub registry_timeout_secs: u64,
  pub serve:                 ServeSettings,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      mlflow:                TrackingSettings::default(),
      deployment:            DeploySettings::default(),
      retraining:            RetrainSettings::default(),
      training:              TrainingSettings::default(),
      registry_timeout_secs: 30,
      serve:                 ServeSettings::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
  pub tracking_uri: Option<String>,
  pub model_name:   String,
}

impl Default for TrackingSettings {
  fn default() -> Self {
    Self { tracking_uri: None, model_name: "model".into() }
  }
}

/// How to launch a training run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
  /// Program and arguments. Must print a JSON summary line on stdout.
  pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeSettings {
  pub host: String,
  pub port: u16,
}

impl Default for ServeSettings {
  fn default() -> Self {
    Self { host: "127.0.0.1".into(), port: 8080 }
  }
}

impl Settings {
  /// Read `path` (optional) overlaid with the process environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::load_with(path, environment())
  }

  fn load_with(path: &Path, env: config::Environment) -> anyhow::Result<Self> {
    let settings: Self = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(env)
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?
      .try_deserialize()
      .context("failed to deserialise settings")?;

    settings.deployment.validate().context("invalid deployment settings")?;
    settings.retraining.validate().context("invalid retraining settings")?;
    Ok(settings)
  }

  pub fn registry_timeout(&self) -> Duration { Duration::from_secs(self.registry_timeout_secs) }
}

fn environment() -> config::Environment {
  config::Environment::with_prefix("STAGEWISE")
    .separator("__")
    .try_parsing(true)
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn no_env() -> config::Environment { environment().source(Some(HashMap::new())) }

  #[test]
  fn missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let s = Settings::load_with(&dir.path().join("absent.yaml"), no_env()).unwrap();
    assert_eq!(s.deployment, DeploySettings::default());
    assert_eq!(s.retraining.interval_days, 30);
    assert_eq!(s.registry_timeout_secs, 30);
    assert_eq!(s.serve.port, 8080);
    assert!(s.mlflow.tracking_uri.is_none());
    assert!(s.training.command.is_empty());
  }

  #[test]
  fn yaml_sections_are_read_and_unknown_ones_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
      &path,
      "mlflow:\n  tracking_uri: sqlite:///runs.db\n  model_name: churn\n\
       deployment:\n  staging_threshold: 0.7\n  production_threshold: 0.8\n\
       retraining:\n  interval_days: 7\n  min_improvement: 0.01\n\
       training:\n  command: [python, train.py]\n\
       data:\n  path: data/raw.csv\n",
    )
    .unwrap();

    let s = Settings::load_with(&path, no_env()).unwrap();
    assert_eq!(s.mlflow.tracking_uri.as_deref(), Some("sqlite:///runs.db"));
    assert_eq!(s.mlflow.model_name, "churn");
    assert_eq!(s.deployment.staging_threshold, 0.7);
    assert_eq!(s.retraining.interval_days, 7);
    assert!(s.retraining.auto_deploy);
    assert_eq!(s.training.command, vec!["python", "train.py"]);
  }

  #[test]
  fn environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment().source(Some(HashMap::from([
      ("STAGEWISE__REGISTRY_TIMEOUT_SECS".to_string(), "5".to_string()),
      ("STAGEWISE__SERVE__PORT".to_string(), "9000".to_string()),
    ])));
    let s = Settings::load_with(&dir.path().join("absent.yaml"), env).unwrap();
    assert_eq!(s.registry_timeout(), Duration::from_secs(5));
    assert_eq!(s.serve.port, 9000);
  }

  #[test]
  fn inverted_gates_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
      &path,
      "deployment:\n  staging_threshold: 0.9\n  production_threshold: 0.4\n",
    )
    .unwrap();
    assert!(Settings::load_with(&path, no_env()).is_err());
  }
}
