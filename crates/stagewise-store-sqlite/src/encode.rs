//! Encoding and decoding helpers between domain types and the plain-text
//! and integer representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Metrics and params are compact JSON.
//! Stages use the registry's traditional labels, with `None` for a freshly
//! registered version.

use chrono::{DateTime, Utc};
use stagewise_core::{
  Stage,
  version::{ModelVersion, Run, RunId, RunMetrics, StageTransition, VersionId},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Ids ─────────────────────────────────────────────────────────────────────

/// Ids past `i64::MAX` cannot be in the table; they map to an id no row has.
pub fn encode_id(id: VersionId) -> i64 { i64::try_from(id).unwrap_or(-1) }

pub fn decode_id(raw: i64) -> Result<VersionId> {
  VersionId::try_from(raw).map_err(|_| Error::BadId(raw))
}

// ─── Stage ───────────────────────────────────────────────────────────────────

pub fn encode_stage(stage: Stage) -> &'static str {
  match stage {
    Stage::Initial => "None",
    Stage::Staging => "Staging",
    Stage::Production => "Production",
    Stage::Archived => "Archived",
  }
}

/// Every stored label that decodes to `stage`, padded to two for `IN (?, ?)`.
pub fn stage_labels(stage: Stage) -> [&'static str; 2] {
  match stage {
    Stage::Production => ["Production", "GNU_Production"],
    other => [encode_stage(other); 2],
  }
}

pub fn decode_stage(s: &str) -> Result<Stage> {
  match s {
    "None" => Ok(Stage::Initial),
    "Staging" => Ok(Stage::Staging),
    // Older databases used a prefixed label for Production.
    "Production" | "GNU_Production" => Ok(Stage::Production),
    "Archived" => Ok(Stage::Archived),
    other => Err(Error::UnknownStage(other.to_owned())),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Columns selected for every version query, in `RawVersion` order.
pub const VERSION_COLUMNS: &str = "version_id, run_id, stage, description, \
  artifact_uri, artifact_sha256, created_at, updated_at";

/// Raw values read directly from a `model_versions` row.
pub struct RawVersion {
  pub version_id:      i64,
  pub run_id:          String,
  pub stage:           String,
  pub description:     String,
  pub artifact_uri:    Option<String>,
  pub artifact_sha256: Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
}

impl RawVersion {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      version_id:      row.get(0)?,
      run_id:          row.get(1)?,
      stage:           row.get(2)?,
      description:     row.get(3)?,
      artifact_uri:    row.get(4)?,
      artifact_sha256: row.get(5)?,
      created_at:      row.get(6)?,
      updated_at:      row.get(7)?,
    })
  }

  pub fn into_version(self) -> Result<ModelVersion> {
    Ok(ModelVersion {
      version_id:      decode_id(self.version_id)?,
      run_id:          RunId::new(self.run_id),
      stage:           decode_stage(&self.stage)?,
      description:     self.description,
      artifact_uri:    self.artifact_uri,
      artifact_sha256: self.artifact_sha256,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `runs` row.
pub struct RawRun {
  pub run_id:     String,
  pub started_at: String,
  pub metrics:    String,
  pub params:     String,
}

impl RawRun {
  pub fn into_run(self) -> Result<Run> {
    let metrics: RunMetrics = serde_json::from_str(&self.metrics)?;
    Ok(Run {
      run_id: RunId::new(self.run_id),
      started_at: decode_dt(&self.started_at)?,
      metrics,
      params: serde_json::from_str(&self.params)?,
    })
  }
}

/// Raw values read directly from a `stage_transitions` row.
pub struct RawTransition {
  pub version_id: i64,
  pub from_stage: String,
  pub to_stage:   String,
  pub at:         String,
}

impl RawTransition {
  pub fn into_transition(self) -> Result<StageTransition> {
    Ok(StageTransition {
      version_id: decode_id(self.version_id)?,
      from:       decode_stage(&self.from_stage)?,
      to:         decode_stage(&self.to_stage)?,
      at:         decode_dt(&self.at)?,
    })
  }
}
