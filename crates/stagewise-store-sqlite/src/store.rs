//! [`SqliteRegistry`], the SQLite implementation of [`ModelRegistry`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tracing::{debug, info};

use stagewise_core::{
  RegistryError, Stage,
  registry::ModelRegistry,
  version::{ModelVersion, NewRun, NewVersion, Run, RunId, StageTransition, VersionId},
};

use crate::{
  Error, Result,
  encode::{
    RawRun, RawTransition, RawVersion, VERSION_COLUMNS, encode_dt, encode_id, encode_stage,
    stage_labels,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A model registry backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteRegistry {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteRegistry {
  /// Open (or create) a registry at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    info!(path = %path.display(), "opened sqlite registry");
    Ok(store)
  }

  /// Open an in-memory registry; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Runs ──────────────────────────────────────────────────────────────────

  async fn insert_run(&self, input: NewRun) -> Result<Run> {
    let run = input.into_run();

    let id_str      = run.run_id.as_str().to_owned();
    let started_str = encode_dt(run.started_at);
    let metrics_str = serde_json::to_string(&run.metrics)?;
    let params_str  = serde_json::to_string(&run.params)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO runs (run_id, started_at, metrics, params) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, started_str, metrics_str, params_str],
        )?;
        Ok(())
      })
      .await?;

    debug!(run_id = %run.run_id, "recorded run");
    Ok(run)
  }

  async fn fetch_run(&self, run_id: RunId) -> Result<Option<Run>> {
    let id_str = run_id.as_str().to_owned();

    let raw: Option<RawRun> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT run_id, started_at, metrics, params FROM runs WHERE run_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawRun {
                  run_id:     row.get(0)?,
                  started_at: row.get(1)?,
                  metrics:    row.get(2)?,
                  params:     row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRun::into_run).transpose()
  }

  // ── Versions ──────────────────────────────────────────────────────────────

  async fn insert_version(&self, input: NewVersion) -> Result<ModelVersion> {
    let run_id = input.run_id.clone();
    let id_str = input.run_id.as_str().to_owned();
    let now    = encode_dt(Utc::now());

    let raw: Option<RawVersion> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let known = tx
          .query_row(
            "SELECT 1 FROM runs WHERE run_id = ?1",
            rusqlite::params![id_str],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if !known {
          return Ok(None);
        }

        tx.execute(
          "INSERT INTO model_versions (
             run_id, stage, description, artifact_uri, artifact_sha256,
             created_at, updated_at
           ) VALUES (?1, 'None', '', ?2, ?3, ?4, ?4)",
          rusqlite::params![id_str, input.artifact_uri, input.artifact_sha256, now],
        )?;
        let raw = select_version(&tx, tx.last_insert_rowid())?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    let version = raw.ok_or(Error::RunNotFound(run_id))?.into_version()?;
    info!(version = version.version_id, run_id = %version.run_id, "registered model version");
    Ok(version)
  }

  async fn fetch_version(&self, version_id: VersionId) -> Result<Option<ModelVersion>> {
    let id = encode_id(version_id);

    let raw: Option<RawVersion> = self
      .conn
      .call(move |conn| Ok(select_version(conn, id)?))
      .await?;

    raw.map(RawVersion::into_version).transpose()
  }

  async fn fetch_versions(&self, stage: Option<Stage>) -> Result<Vec<ModelVersion>> {
    let labels = stage.map(stage_labels);

    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let rows = if let Some([a, b]) = labels {
          let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions
             WHERE stage IN (?1, ?2)
             ORDER BY version_id DESC"
          ))?;
          stmt
            .query_map(rusqlite::params![a, b], RawVersion::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions ORDER BY version_id DESC"
          ))?;
          stmt
            .query_map([], RawVersion::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVersion::into_version).collect()
  }

  /// Archive incumbents (optionally) and assign `stage` in one transaction.
  async fn move_version(
    &self,
    version_id: VersionId,
    stage: Stage,
    archive_existing: bool,
  ) -> Result<ModelVersion> {
    let id       = encode_id(version_id);
    let target   = encode_stage(stage);
    let labels   = stage_labels(stage);
    let archived = encode_stage(Stage::Archived);
    let archive  = archive_existing && stage != Stage::Archived;
    let now      = encode_dt(Utc::now());

    let raw: Option<RawVersion> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(current) = select_version(&tx, id)? else {
          return Ok(None);
        };

        if archive {
          let incumbents: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
              "SELECT version_id, stage FROM model_versions
               WHERE stage IN (?1, ?2) AND version_id != ?3",
            )?;
            stmt
              .query_map(rusqlite::params![labels[0], labels[1], id], |r| {
                Ok((r.get(0)?, r.get(1)?))
              })?
              .collect::<rusqlite::Result<_>>()?
          };
          for (other, from) in incumbents {
            tx.execute(
              "UPDATE model_versions SET stage = ?2, updated_at = ?3 WHERE version_id = ?1",
              rusqlite::params![other, archived, now],
            )?;
            record_transition(&tx, other, &from, archived, &now)?;
          }
        }

        if !labels.contains(&current.stage.as_str()) {
          tx.execute(
            "UPDATE model_versions SET stage = ?2, updated_at = ?3 WHERE version_id = ?1",
            rusqlite::params![id, target, now],
          )?;
          record_transition(&tx, id, &current.stage, target, &now)?;
        }

        let updated = select_version(&tx, id)?;
        tx.commit()?;
        Ok(updated)
      })
      .await?;

    raw.ok_or(Error::VersionNotFound(version_id))?.into_version()
  }

  async fn set_description(&self, version_id: VersionId, description: String) -> Result<()> {
    let id  = encode_id(version_id);
    let now = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE model_versions SET description = ?2, updated_at = ?3 WHERE version_id = ?1",
          rusqlite::params![id, description, now],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::VersionNotFound(version_id));
    }
    Ok(())
  }

  // ── History ───────────────────────────────────────────────────────────────

  async fn fetch_transitions(&self) -> Result<Vec<StageTransition>> {
    let raws: Vec<RawTransition> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT version_id, from_stage, to_stage, at
           FROM stage_transitions ORDER BY transition_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawTransition {
              version_id: row.get(0)?,
              from_stage: row.get(1)?,
              to_stage:   row.get(2)?,
              at:         row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTransition::into_transition).collect()
  }
}

fn select_version(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<RawVersion>> {
  conn
    .query_row(
      &format!("SELECT {VERSION_COLUMNS} FROM model_versions WHERE version_id = ?1"),
      rusqlite::params![id],
      RawVersion::from_row,
    )
    .optional()
}

fn record_transition(
  conn: &rusqlite::Connection,
  id: i64,
  from: &str,
  to: &str,
  at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO stage_transitions (version_id, from_stage, to_stage, at)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![id, from, to, at],
  )?;
  Ok(())
}

// ─── ModelRegistry impl ──────────────────────────────────────────────────────

impl ModelRegistry for SqliteRegistry {
  async fn create_run(&self, input: NewRun) -> Result<Run, RegistryError> {
    Ok(self.insert_run(input).await?)
  }

  async fn get_run(&self, run_id: RunId) -> Result<Option<Run>, RegistryError> {
    Ok(self.fetch_run(run_id).await?)
  }

  async fn register_version(&self, input: NewVersion) -> Result<ModelVersion, RegistryError> {
    Ok(self.insert_version(input).await?)
  }

  async fn get_version(
    &self,
    version_id: VersionId,
  ) -> Result<Option<ModelVersion>, RegistryError> {
    Ok(self.fetch_version(version_id).await?)
  }

  async fn list_versions(
    &self,
    stage: Option<Stage>,
  ) -> Result<Vec<ModelVersion>, RegistryError> {
    Ok(self.fetch_versions(stage).await?)
  }

  async fn transition_stage(
    &self,
    version_id: VersionId,
    stage: Stage,
    archive_existing: bool,
  ) -> Result<ModelVersion, RegistryError> {
    Ok(self.move_version(version_id, stage, archive_existing).await?)
  }

  fn atomic_archive(&self) -> bool { true }

  async fn update_description(
    &self,
    version_id: VersionId,
    description: String,
  ) -> Result<(), RegistryError> {
    Ok(self.set_description(version_id, description).await?)
  }

  async fn list_transitions(&self) -> Result<Vec<StageTransition>, RegistryError> {
    Ok(self.fetch_transitions().await?)
  }
}
