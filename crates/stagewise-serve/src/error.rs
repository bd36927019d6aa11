//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use stagewise_core::{RegistryError, predict::PredictError};
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error("prediction failed: {0}")]
  Predict(#[source] PredictError),
}

impl From<PredictError> for ApiError {
  fn from(e: PredictError) -> Self {
    match e {
      PredictError::MissingFeature(_) | PredictError::NonNumericFeature(_) => {
        ApiError::BadRequest(e.to_string())
      }
      PredictError::Registry(e) => ApiError::Registry(e),
      other => ApiError::Predict(other),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Registry(RegistryError::VersionNotFound(_)) => StatusCode::NOT_FOUND,
      ApiError::Registry(RegistryError::Unavailable(_) | RegistryError::Timeout { .. }) => {
        StatusCode::SERVICE_UNAVAILABLE
      }
      ApiError::Registry(_) | ApiError::Predict(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
