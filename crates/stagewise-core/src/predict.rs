//! Serving predictions from the model currently in a stage.

use std::{
  io::{BufRead, Write},
  path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  error::RegistryError,
  forest::{ForestError, ForestModel},
  registry::ModelRegistry,
  stage::Stage,
  version::{ModelVersion, VersionId},
};

/// One input row: feature name to value.
pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum PredictError {
  #[error("no model in {stage}")]
  NoModel { stage: Stage },

  #[error("version {0} has no artifact")]
  NoArtifact(VersionId),

  #[error("could not read artifact {path}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("artifact of version {version} has digest {actual}, expected {expected}")]
  DigestMismatch {
    version:  VersionId,
    expected: String,
    actual:   String,
  },

  #[error(transparent)]
  Forest(#[from] ForestError),

  #[error("record is missing feature {0:?}")]
  MissingFeature(String),

  #[error("feature {0:?} is not a number")]
  NonNumericFeature(String),

  #[error("line {line}: {source}")]
  BadLine {
    line:   usize,
    #[source]
    source: serde_json::Error,
  },

  #[error("could not write predictions")]
  Output(#[source] std::io::Error),

  #[error(transparent)]
  Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
  pub prediction:  Value,
  pub probability: f64,
}

/// Lowercase hex SHA-256 of an artifact.
pub fn sha256_hex(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

/// Local path of an artifact URI; a bare path or `file://` URI.
pub fn artifact_path(uri: &str) -> PathBuf {
  PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// A loaded model together with the version it came from.
#[derive(Debug, Clone)]
pub struct Predictor {
  version: ModelVersion,
  model:   ForestModel,
}

impl Predictor {
  /// Load the model currently occupying `stage`.
  pub async fn for_stage<R: ModelRegistry>(
    registry: &R,
    stage: Stage,
  ) -> Result<Self, PredictError> {
    let version = registry
      .list_versions(Some(stage))
      .await?
      .into_iter()
      .next()
      .ok_or(PredictError::NoModel { stage })?;

    let uri = version
      .artifact_uri
      .as_deref()
      .ok_or(PredictError::NoArtifact(version.version_id))?;
    let path = artifact_path(uri);
    let bytes = tokio::fs::read(&path)
      .await
      .map_err(|source| PredictError::Io { path: path.clone(), source })?;

    let predictor = Self::from_artifact(version, &bytes)?;
    info!(
      version = predictor.version.version_id,
      stage = %stage,
      path = %path.display(),
      trees = predictor.model.trees.len(),
      "loaded model"
    );
    Ok(predictor)
  }

  /// Build from artifact bytes, checking them against the recorded digest.
  pub fn from_artifact(version: ModelVersion, bytes: &[u8]) -> Result<Self, PredictError> {
    if let Some(expected) = &version.artifact_sha256 {
      let actual = sha256_hex(bytes);
      if !actual.eq_ignore_ascii_case(expected) {
        return Err(PredictError::DigestMismatch {
          version: version.version_id,
          expected: expected.clone(),
          actual,
        });
      }
    }
    let model = ForestModel::from_slice(bytes)?;
    Ok(Self { version, model })
  }

  pub fn version(&self) -> &ModelVersion { &self.version }

  pub fn model(&self) -> &ForestModel { &self.model }

  /// Classify one record. Fields the model does not use are ignored.
  pub fn predict(&self, record: &Record) -> Result<Prediction, PredictError> {
    let sample = self
      .model
      .features
      .iter()
      .map(|name| match record.get(name) {
        None | Some(Value::Null) => Err(PredictError::MissingFeature(name.clone())),
        Some(Value::Bool(b)) => Ok(f64::from(u8::from(*b))),
        Some(v) => v
          .as_f64()
          .ok_or_else(|| PredictError::NonNumericFeature(name.clone())),
      })
      .collect::<Result<Vec<_>, _>>()?;

    let (label, probability) = self.model.predict(&sample);
    Ok(Prediction { prediction: label.clone(), probability })
  }

  pub fn predict_batch(&self, records: &[Record]) -> Result<Vec<Prediction>, PredictError> {
    records.iter().map(|r| self.predict(r)).collect()
  }

  /// Read JSON Lines records, write each back with `prediction` and
  /// `probability` added. Blank lines are skipped. Returns the row count.
  pub fn predict_jsonl(
    &self,
    input: impl BufRead,
    mut output: impl Write,
  ) -> Result<usize, PredictError> {
    let mut rows = 0;
    for (i, line) in input.lines().enumerate() {
      let line = line.map_err(|source| PredictError::Io {
        path: PathBuf::from("<input>"),
        source,
      })?;
      if line.trim().is_empty() {
        continue;
      }
      let mut record: Record = serde_json::from_str(&line)
        .map_err(|source| PredictError::BadLine { line: i + 1, source })?;
      let p = self.predict(&record)?;
      record.insert("prediction".into(), p.prediction);
      record.insert("probability".into(), p.probability.into());

      serde_json::to_writer(&mut output, &record)
        .map_err(|e| PredictError::Output(e.into()))?;
      output.write_all(b"\n").map_err(PredictError::Output)?;
      rows += 1;
    }
    output.flush().map_err(PredictError::Output)?;
    debug!(rows, "wrote predictions");
    Ok(rows)
  }
}

/// Hash a file on disk, for registering an artifact.
pub async fn digest_file(path: &Path) -> Result<String, PredictError> {
  let bytes = tokio::fs::read(path).await.map_err(|source| PredictError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use serde_json::json;

  use super::*;
  use crate::{
    memory::InMemoryRegistry,
    testing::metrics,
    version::{NewRun, NewVersion},
  };

  fn artifact() -> Vec<u8> {
    json!({
      "features": ["tenure", "charges"],
      "classes": [0, 1],
      "trees": [{ "nodes": [
        { "feature": 0, "threshold": 12.0, "left": 1, "right": 2 },
        { "value": [1.0, 3.0] },
        { "value": [4.0, 1.0] }
      ]}]
    })
    .to_string()
    .into_bytes()
  }

  async fn registry_with_model(
    bytes: &[u8],
    recorded_digest: Option<String>,
  ) -> (InMemoryRegistry, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    std::fs::write(&path, bytes).unwrap();

    let registry = InMemoryRegistry::new();
    let run = registry.create_run(NewRun::new(metrics(0.9))).await.unwrap();
    let v = registry
      .register_version(NewVersion {
        run_id:          run.run_id,
        artifact_uri:    Some(format!("file://{}", path.display())),
        artifact_sha256: recorded_digest,
      })
      .await
      .unwrap();
    registry
      .transition_stage(v.version_id, Stage::Production, true)
      .await
      .unwrap();
    (registry, dir)
  }

  fn record(value: Value) -> Record { value.as_object().unwrap().clone() }

  #[tokio::test]
  async fn loads_production_model_and_predicts() {
    let bytes = artifact();
    let (registry, _dir) = registry_with_model(&bytes, Some(sha256_hex(&bytes))).await;
    let p = Predictor::for_stage(&registry, Stage::Production).await.unwrap();

    let out = p.predict(&record(json!({"tenure": 3, "charges": 70.5, "id": "a"}))).unwrap();
    assert_eq!(out.prediction, json!(1));
    assert!((out.probability - 0.75).abs() < 1e-12);

    let batch = p
      .predict_batch(&[record(json!({"tenure": 24, "charges": 1})), record(json!({"tenure": 1, "charges": 1}))])
      .unwrap();
    assert_eq!(batch[0].prediction, json!(0));
    assert_eq!(batch[1].prediction, json!(1));
  }

  #[tokio::test]
  async fn digest_mismatch_is_rejected() {
    let bytes = artifact();
    let (registry, _dir) = registry_with_model(&bytes, Some(sha256_hex(b"other"))).await;
    let err = Predictor::for_stage(&registry, Stage::Production).await.unwrap_err();
    assert!(matches!(err, PredictError::DigestMismatch { .. }));
  }

  #[tokio::test]
  async fn empty_stage_has_no_model() {
    let registry = InMemoryRegistry::new();
    let err = Predictor::for_stage(&registry, Stage::Staging).await.unwrap_err();
    assert!(matches!(err, PredictError::NoModel { stage: Stage::Staging }));
  }

  #[tokio::test]
  async fn missing_feature_is_reported() {
    let bytes = artifact();
    let (registry, _dir) = registry_with_model(&bytes, None).await;
    let p = Predictor::for_stage(&registry, Stage::Production).await.unwrap();
    let err = p.predict(&record(json!({"tenure": 3}))).unwrap_err();
    assert!(matches!(err, PredictError::MissingFeature(f) if f == "charges"));
    let err = p.predict(&record(json!({"tenure": "3", "charges": 1}))).unwrap_err();
    assert!(matches!(err, PredictError::NonNumericFeature(f) if f == "tenure"));
  }

  #[tokio::test]
  async fn jsonl_rows_gain_prediction_fields() {
    let bytes = artifact();
    let (registry, _dir) = registry_with_model(&bytes, None).await;
    let p = Predictor::for_stage(&registry, Stage::Production).await.unwrap();

    let input = "{\"tenure\": 30, \"charges\": 20, \"id\": 7}\n\n{\"tenure\": 2, \"charges\": 99}\n";
    let mut out = Vec::new();
    let rows = p.predict_jsonl(Cursor::new(input), &mut out).unwrap();
    assert_eq!(rows, 2);

    let lines: Vec<Value> = String::from_utf8(out)
      .unwrap()
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect();
    assert_eq!(lines[0]["id"], json!(7));
    assert_eq!(lines[0]["prediction"], json!(0));
    assert!((lines[0]["probability"].as_f64().unwrap() - 0.8).abs() < 1e-12);
    assert_eq!(lines[1]["prediction"], json!(1));

    let err = p.predict_jsonl(Cursor::new("not json\n"), Vec::new()).unwrap_err();
    assert!(matches!(err, PredictError::BadLine { line: 1, .. }));
  }
}
