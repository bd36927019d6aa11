//! Deadline enforcement for registry calls.
//!
//! [`TimedRegistry`] wraps any backend and bounds each call with
//! [`tokio::time::timeout`]; a call that runs past its deadline fails with
//! [`RegistryError::Timeout`] instead of hanging.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::{
  error::RegistryError,
  registry::ModelRegistry,
  stage::Stage,
  version::{
    ModelVersion, NewRun, NewVersion, Run, RunId, StageTransition, VersionId,
  },
};

/// Run `fut`, failing with [`RegistryError::Timeout`] after `after`.
pub async fn with_deadline<T>(
  op: &'static str,
  after: Duration,
  fut: impl Future<Output = Result<T, RegistryError>>,
) -> Result<T, RegistryError> {
  match tokio::time::timeout(after, fut).await {
    Ok(result) => result,
    Err(_) => {
      warn!(op, ?after, "registry call exceeded its deadline");
      Err(RegistryError::Timeout { op, after })
    }
  }
}

/// A [`ModelRegistry`] whose every call carries the same deadline.
pub struct TimedRegistry<R> {
  inner:   R,
  timeout: Duration,
}

impl<R: ModelRegistry> TimedRegistry<R> {
  pub fn new(inner: R, timeout: Duration) -> Self { Self { inner, timeout } }

  pub fn inner(&self) -> &R { &self.inner }
}

impl<R: ModelRegistry> ModelRegistry for TimedRegistry<R> {
  async fn create_run(&self, input: NewRun) -> Result<Run, RegistryError> {
    with_deadline("create_run", self.timeout, self.inner.create_run(input)).await
  }

  async fn get_run(&self, run_id: RunId) -> Result<Option<Run>, RegistryError> {
    with_deadline("get_run", self.timeout, self.inner.get_run(run_id)).await
  }

  async fn register_version(
    &self,
    input: NewVersion,
  ) -> Result<ModelVersion, RegistryError> {
    with_deadline(
      "register_version",
      self.timeout,
      self.inner.register_version(input),
    )
    .await
  }

  async fn get_version(
    &self,
    version_id: VersionId,
  ) -> Result<Option<ModelVersion>, RegistryError> {
    with_deadline("get_version", self.timeout, self.inner.get_version(version_id))
      .await
  }

  async fn list_versions(
    &self,
    stage: Option<Stage>,
  ) -> Result<Vec<ModelVersion>, RegistryError> {
    with_deadline("list_versions", self.timeout, self.inner.list_versions(stage))
      .await
  }

  async fn transition_stage(
    &self,
    version_id: VersionId,
    stage: Stage,
    archive_existing: bool,
  ) -> Result<ModelVersion, RegistryError> {
    with_deadline(
      "transition_stage",
      self.timeout,
      self.inner.transition_stage(version_id, stage, archive_existing),
    )
    .await
  }

  fn atomic_archive(&self) -> bool { self.inner.atomic_archive() }

  async fn update_description(
    &self,
    version_id: VersionId,
    description: String,
  ) -> Result<(), RegistryError> {
    with_deadline(
      "update_description",
      self.timeout,
      self.inner.update_description(version_id, description),
    )
    .await
  }

  async fn list_transitions(&self) -> Result<Vec<StageTransition>, RegistryError> {
    with_deadline("list_transitions", self.timeout, self.inner.list_transitions())
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{memory::InMemoryRegistry, testing::FlakyRegistry};

  #[tokio::test]
  async fn slow_call_times_out() {
    let flaky = FlakyRegistry::new();
    flaky.set_delay(Duration::from_millis(200));
    let timed = TimedRegistry::new(flaky, Duration::from_millis(20));

    let err = timed.list_versions(None).await.unwrap_err();
    assert!(matches!(err, RegistryError::Timeout { op: "list_versions", .. }));
  }

  #[tokio::test]
  async fn fast_calls_pass_through() {
    let timed =
      TimedRegistry::new(InMemoryRegistry::new(), Duration::from_secs(5));
    assert!(timed.list_versions(None).await.unwrap().is_empty());
    assert!(timed.atomic_archive());
  }
}
