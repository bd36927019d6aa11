//! Handlers for registry browsing.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/versions` | Optional `?stage=initial\|staging\|production\|archived`, any case |
//! | `GET`  | `/versions/{id}` | 404 if not found |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use stagewise_core::{Stage, registry::ModelRegistry, version::{ModelVersion, VersionId}};

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub stage: Option<String>,
}

impl ListParams {
  /// Parsed like the CLI's `--stage`, case-insensitively.
  fn stage(&self) -> Result<Option<Stage>, ApiError> {
    self
      .stage
      .as_deref()
      .map(|s| {
        s.parse::<Stage>()
          .map_err(|_| ApiError::BadRequest(format!("unknown stage {s:?}")))
      })
      .transpose()
  }
}

/// `GET /versions[?stage=<stage>]`, highest id first.
pub async fn list<R: ModelRegistry>(
  State(state): State<AppState<R>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<ModelVersion>>, ApiError> {
  let stage = params.stage()?;
  Ok(Json(state.registry.list_versions(stage).await?))
}

/// `GET /versions/{id}`
pub async fn get_one<R: ModelRegistry>(
  State(state): State<AppState<R>>,
  Path(id): Path<VersionId>,
) -> Result<Json<ModelVersion>, ApiError> {
  let version = state
    .registry
    .get_version(id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("model version {id} not found")))?;
  Ok(Json(version))
}
