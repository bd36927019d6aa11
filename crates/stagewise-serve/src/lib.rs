//! HTTP prediction service for Stagewise.
//!
//! Serves the model that occupied a stage when the service started, plus
//! read-only views of the registry. Auth and TLS are the caller's
//! responsibility.

pub mod error;
pub mod predict;
pub mod versions;

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::State,
  routing::{get, post},
};
use serde_json::{Value, json};
use stagewise_core::{
  Stage,
  predict::{PredictError, Predictor},
  registry::ModelRegistry,
};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<R> {
  pub registry:  Arc<R>,
  pub predictor: Arc<Predictor>,
  pub stage:     Stage,
}

impl<R> Clone for AppState<R> {
  fn clone(&self) -> Self {
    Self {
      registry:  self.registry.clone(),
      predictor: self.predictor.clone(),
      stage:     self.stage,
    }
  }
}

impl<R: ModelRegistry> AppState<R> {
  /// Load the model currently in `stage`.
  pub async fn load(registry: Arc<R>, stage: Stage) -> Result<Self, PredictError> {
    let predictor = Predictor::for_stage(registry.as_ref(), stage).await?;
    Ok(Self { registry, predictor: Arc::new(predictor), stage })
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the service router.
pub fn router<R: ModelRegistry + 'static>(state: AppState<R>) -> Router {
  Router::new()
    .route("/health", get(health::<R>))
    .route("/versions", get(versions::list::<R>))
    .route("/versions/{id}", get(versions::get_one::<R>))
    .route("/model", get(predict::model::<R>))
    .route("/predict", post(predict::predict::<R>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// `GET /health`
async fn health<R: ModelRegistry>(State(state): State<AppState<R>>) -> Json<Value> {
  Json(json!({
    "status": "ok",
    "stage": state.stage,
    "model_version": state.predictor.version().version_id,
  }))
}

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use stagewise_core::{
    memory::InMemoryRegistry,
    predict::sha256_hex,
    version::{NewRun, NewVersion, RunMetrics},
  };
  use tower::ServiceExt as _;

  const ARTIFACT: &str = r#"{
    "features": ["tenure", "charges"],
    "classes": [0, 1],
    "trees": [{ "nodes": [
      { "feature": 0, "threshold": 12.0, "left": 1, "right": 2 },
      { "value": [1.0, 3.0] },
      { "value": [4.0, 1.0] }
    ]}]
  }"#;

  async fn make_state() -> (AppState<InMemoryRegistry>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    std::fs::write(&path, ARTIFACT).unwrap();

    let registry = Arc::new(InMemoryRegistry::new());
    let run = registry
      .create_run(NewRun::new(RunMetrics::from([("accuracy".to_string(), 0.9)])))
      .await
      .unwrap();
    let v = registry
      .register_version(NewVersion {
        run_id:          run.run_id,
        artifact_uri:    Some(path.display().to_string()),
        artifact_sha256: Some(sha256_hex(ARTIFACT.as_bytes())),
      })
      .await
      .unwrap();
    registry
      .transition_stage(v.version_id, Stage::Production, true)
      .await
      .unwrap();

    let state = AppState::load(registry, Stage::Production).await.unwrap();
    (state, dir)
  }

  async fn send(
    state: AppState<InMemoryRegistry>,
    method: &str,
    uri: &str,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let resp = router(state).oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
      .await
      .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn health_reports_loaded_version() {
    let (state, _dir) = make_state().await;
    let (status, body) = send(state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["stage"], "production");
    assert_eq!(body["model_version"], 1);
  }

  #[tokio::test]
  async fn predict_single_record() {
    let (state, _dir) = make_state().await;
    let (status, body) = send(
      state,
      "POST",
      "/predict",
      Some(json!({"tenure": 3, "charges": 80.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 1);
    assert_eq!(body["probability"], 0.75);
  }

  #[tokio::test]
  async fn predict_batch_of_records() {
    let (state, _dir) = make_state().await;
    let (status, body) = send(
      state,
      "POST",
      "/predict",
      Some(json!([{"tenure": 30, "charges": 1}, {"tenure": 1, "charges": 1}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["prediction"], 0);
    assert_eq!(body[1]["prediction"], 1);
  }

  #[tokio::test]
  async fn missing_feature_is_bad_request() {
    let (state, _dir) = make_state().await;
    let (status, body) =
      send(state, "POST", "/predict", Some(json!({"tenure": 3}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("charges"));
  }

  #[tokio::test]
  async fn scalar_body_is_bad_request() {
    let (state, _dir) = make_state().await;
    let (status, _) = send(state, "POST", "/predict", Some(json!(42))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn versions_can_be_filtered_and_fetched() {
    let (state, _dir) = make_state().await;
    let (status, body) = send(state.clone(), "GET", "/versions?stage=production", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(state.clone(), "GET", "/versions?stage=staging", None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send(state.clone(), "GET", "/versions/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stage"], "production");

    let (status, _) = send(state, "GET", "/versions/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn stage_filter_ignores_case() {
    let (state, _dir) = make_state().await;
    for uri in ["/versions?stage=Production", "/versions?stage=PRODUCTION"] {
      let (status, body) = send(state.clone(), "GET", uri, None).await;
      assert_eq!(status, StatusCode::OK);
      assert_eq!(body.as_array().unwrap().len(), 1);
    }

    let (status, body) = send(state, "GET", "/versions?stage=canary", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("canary"));
  }

  #[tokio::test]
  async fn model_describes_features() {
    let (state, _dir) = make_state().await;
    let (status, body) = send(state, "GET", "/model", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["features"], json!(["tenure", "charges"]));
    assert_eq!(body["version"]["version_id"], 1);
  }

  #[tokio::test]
  async fn no_model_in_stage_fails_to_load() {
    let registry = Arc::new(InMemoryRegistry::new());
    let err = AppState::load(registry, Stage::Staging).await.err().unwrap();
    assert!(matches!(err, PredictError::NoModel { .. }));
  }
}
