//! Handlers for the loaded model.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/model` | Version, features and classes of the loaded model |
//! | `POST` | `/predict` | One record object, or an array of them |

use axum::{Json, extract::State};
use serde::Serialize;
use serde_json::Value;
use stagewise_core::{
  predict::{Prediction, Record},
  registry::ModelRegistry,
  version::ModelVersion,
};

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct ModelInfo {
  pub version:  ModelVersion,
  pub features: Vec<String>,
  pub classes:  Vec<Value>,
}

/// `GET /model`
pub async fn model<R: ModelRegistry>(State(state): State<AppState<R>>) -> Json<ModelInfo> {
  let p = &state.predictor;
  Json(ModelInfo {
    version:  p.version().clone(),
    features: p.model().features.clone(),
    classes:  p.model().classes.clone(),
  })
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PredictResponse {
  One(Prediction),
  Many(Vec<Prediction>),
}

/// `POST /predict`: body is a record or an array of records.
pub async fn predict<R: ModelRegistry>(
  State(state): State<AppState<R>>,
  Json(body): Json<Value>,
) -> Result<Json<PredictResponse>, ApiError> {
  let response = match body {
    Value::Object(record) => PredictResponse::One(state.predictor.predict(&record)?),
    Value::Array(items) => {
      let records = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
          Value::Object(record) => Ok(record),
          _ => Err(ApiError::BadRequest(format!("item {i} is not an object"))),
        })
        .collect::<Result<Vec<Record>, _>>()?;
      PredictResponse::Many(state.predictor.predict_batch(&records)?)
    }
    _ => {
      return Err(ApiError::BadRequest(
        "expected a record object or an array of records".into(),
      ));
    }
  };
  Ok(Json(response))
}
