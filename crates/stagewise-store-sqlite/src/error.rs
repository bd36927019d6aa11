//! Error type for `stagewise-store-sqlite`.

use stagewise_core::{
  RegistryError,
  version::{RunId, VersionId},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown stage label {0:?}")]
  UnknownStage(String),

  #[error("stored id {0} is negative")]
  BadId(i64),

  #[error("model version not found: {0}")]
  VersionNotFound(VersionId),

  #[error("run not found: {0}")]
  RunNotFound(RunId),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for RegistryError {
  fn from(e: Error) -> Self {
    match e {
      Error::VersionNotFound(id) => RegistryError::VersionNotFound(id),
      Error::RunNotFound(id) => RegistryError::RunNotFound(id),
      Error::Database(tokio_rusqlite::Error::ConnectionClosed) => {
        RegistryError::Unavailable("database connection closed".into())
      }
      other => RegistryError::backend(other),
    }
  }
}
