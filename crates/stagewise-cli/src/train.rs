//! Running the external training job and recording what it produced.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  process::Stdio,
  sync::Arc,
};

use serde::Deserialize;
use stagewise_core::{
  predict::digest_file,
  registry::ModelRegistry,
  train::{TrainError, TrainedRun, Trainer},
  version::{NewRun, NewVersion, RunId, RunMetrics},
};
use tokio::process::Command;
use tracing::{info, warn};

/// The JSON summary a training job prints as its last stdout line.
///
/// ```json
/// {"metrics": {"accuracy": 0.84, "f1_score": 0.81},
///  "params": {"n_estimators": "100"},
///  "artifact": "models/model.json"}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainingSummary {
  #[serde(default)]
  pub run_id:   Option<String>,
  pub metrics:  RunMetrics,
  #[serde(default)]
  pub params:   BTreeMap<String, String>,
  #[serde(default)]
  pub artifact: Option<PathBuf>,
}

impl TrainingSummary {
  /// The last stdout line that parses as a summary.
  pub fn from_stdout(stdout: &str) -> Option<Self> {
    stdout
      .lines()
      .rev()
      .map(str::trim)
      .filter(|l| l.starts_with('{'))
      .find_map(|l| serde_json::from_str(l).ok())
  }
}

/// Record a run for `summary` and register a version pointing at its artifact.
pub async fn record<R: ModelRegistry>(
  registry: &R,
  summary: TrainingSummary,
) -> Result<TrainedRun, TrainError> {
  let (artifact_uri, artifact_sha256) = match &summary.artifact {
    Some(path) => {
      let path = absolute(path);
      let digest = digest_file(&path)
        .await
        .map_err(|e| TrainError::BadOutput(e.to_string()))?;
      (Some(path.display().to_string()), Some(digest))
    }
    None => {
      warn!("training produced no artifact; the version cannot serve predictions");
      (None, None)
    }
  };

  let mut input = NewRun::new(summary.metrics);
  input.run_id = summary.run_id.map(RunId::new);
  input.params = summary.params;
  let run = registry.create_run(input).await?;

  let version = registry
    .register_version(NewVersion {
      run_id: run.run_id.clone(),
      artifact_uri,
      artifact_sha256,
    })
    .await?;

  info!(
    run_id = %run.run_id,
    version = version.version_id,
    "recorded training run and registered model version"
  );
  Ok(TrainedRun {
    run_id:     run.run_id,
    metrics:    run.metrics,
    version_id: Some(version.version_id),
  })
}

fn absolute(path: &Path) -> PathBuf {
  std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Runs `training.command` and registers its output.
pub struct CommandTrainer<R> {
  registry: Arc<R>,
  command:  Vec<String>,
}

impl<R: ModelRegistry> CommandTrainer<R> {
  pub fn new(registry: Arc<R>, command: Vec<String>) -> Self { Self { registry, command } }
}

impl<R: ModelRegistry> Trainer for CommandTrainer<R> {
  async fn train(&self) -> Result<TrainedRun, TrainError> {
    let Some((program, args)) = self.command.split_first() else {
      return Err(TrainError::Failed("training.command is not configured".into()));
    };

    info!(%program, ?args, "launching training job");
    let output = Command::new(program)
      .args(args)
      .stdin(Stdio::null())
      .stderr(Stdio::piped())
      .stdout(Stdio::piped())
      .output()
      .await
      .map_err(|e| TrainError::Failed(format!("could not start {program}: {e}")))?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
      let tail: Vec<&str> = tail.into_iter().rev().collect();
      return Err(TrainError::Failed(format!(
        "{program} exited with {}\n{}",
        output.status,
        tail.join("\n")
      )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary = TrainingSummary::from_stdout(&stdout).ok_or_else(|| {
      TrainError::BadOutput("no JSON summary line on stdout".into())
    })?;
    record(self.registry.as_ref(), summary).await
  }
}

#[cfg(test)]
mod tests {
  use stagewise_core::{Stage, memory::InMemoryRegistry, predict::sha256_hex};

  use super::*;

  #[test]
  fn summary_is_last_json_line() {
    let out = "epoch 1\n{\"not\": \"a summary\"}\n{\"metrics\": {\"accuracy\": 0.8}}\ndone\n";
    let s = TrainingSummary::from_stdout(out).unwrap();
    assert_eq!(s.metrics["accuracy"], 0.8);
    assert!(TrainingSummary::from_stdout("no json here").is_none());
  }

  #[tokio::test]
  async fn record_registers_artifact_with_digest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    std::fs::write(&path, b"{}").unwrap();

    let registry = InMemoryRegistry::new();
    let trained = record(&registry, TrainingSummary {
      run_id:   Some("run-1".into()),
      metrics:  RunMetrics::from([("accuracy".to_string(), 0.9)]),
      params:   BTreeMap::new(),
      artifact: Some(path.clone()),
    })
    .await
    .unwrap();

    assert_eq!(trained.run_id, RunId::new("run-1"));
    let v = registry.get_version(trained.version_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(v.stage, Stage::Initial);
    assert_eq!(v.artifact_sha256, Some(sha256_hex(b"{}")));
  }

  #[tokio::test]
  async fn unconfigured_command_fails() {
    let trainer = CommandTrainer::new(Arc::new(InMemoryRegistry::new()), vec![]);
    assert!(matches!(trainer.train().await, Err(TrainError::Failed(_))));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn shell_command_output_is_registered() {
    let registry = Arc::new(InMemoryRegistry::new());
    let trainer = CommandTrainer::new(registry.clone(), vec![
      "sh".into(),
      "-c".into(),
      r#"echo training; echo '{"metrics": {"accuracy": 0.77}}'"#.into(),
    ]);
    let trained = trainer.train().await.unwrap();
    assert_eq!(trained.metrics["accuracy"], 0.77);
    assert_eq!(registry.list_versions(None).await.unwrap().len(), 1);

    let failing = CommandTrainer::new(registry, vec!["sh".into(), "-c".into(), "exit 3".into()]);
    assert!(matches!(failing.train().await, Err(TrainError::Failed(_))));
  }
}
