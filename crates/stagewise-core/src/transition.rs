//! Stage transition engine.
//!
//! Every stage mutation in the system goes through [`TransitionEngine`]. It
//! keeps the singleton stages (`Staging`, `Production`) to exactly one
//! occupant by archiving the incumbent as part of each transition.
//!
//! Transitions are serialised by a process-local lock. Other processes
//! writing the same registry are not coordinated with.
//!
//! A timed-out assignment may still commit on the backend after the caller
//! has given up. The engine reads the version back before reporting, so a
//! late commit is returned as success and an unconfirmed one as
//! [`TransitionError::Inconsistent`].

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
  error::{RegistryError, TransitionError},
  registry::ModelRegistry,
  stage::Stage,
  version::{ModelVersion, VersionId},
};

pub struct TransitionEngine<R> {
  registry: Arc<R>,
  lock:     Mutex<()>,
}

impl<R: ModelRegistry> TransitionEngine<R> {
  pub fn new(registry: Arc<R>) -> Self {
    Self { registry, lock: Mutex::new(()) }
  }

  pub fn registry(&self) -> &Arc<R> { &self.registry }

  /// Move `version_id` into `target`, archiving whatever held it before.
  pub async fn transition(
    &self,
    version_id: VersionId,
    target: Stage,
  ) -> Result<ModelVersion, TransitionError> {
    if !target.is_promotion_target() {
      return Err(TransitionError::InvalidTarget(target));
    }

    let _guard = self.lock.lock().await;

    let version = self
      .registry
      .get_version(version_id)
      .await?
      .ok_or(TransitionError::VersionNotFound(version_id))?;

    if version.stage == target {
      info!(version = version_id, stage = %target, "version already in target stage");
      return Ok(version);
    }

    info!(
      version = version_id,
      from = %version.stage,
      to = %target,
      "transitioning model version"
    );

    if self.registry.atomic_archive() {
      return self.assign(version_id, target, true).await;
    }

    self.transition_in_steps(version_id, target).await
  }

  /// Archive incumbents one by one, then assign. A failed assignment puts
  /// the incumbents back.
  async fn transition_in_steps(
    &self,
    version_id: VersionId,
    target: Stage,
  ) -> Result<ModelVersion, TransitionError> {
    let incumbents: Vec<VersionId> = self
      .registry
      .list_versions(Some(target))
      .await?
      .into_iter()
      .map(|v| v.version_id)
      .filter(|id| *id != version_id)
      .collect();

    let mut archived = Vec::with_capacity(incumbents.len());
    for id in incumbents {
      match self.registry.transition_stage(id, Stage::Archived, false).await {
        Ok(_) => archived.push(id),
        Err(e) => {
          self.restore(&archived, target, version_id).await?;
          return Err(e.into());
        }
      }
    }

    match self.assign(version_id, target, false).await {
      Ok(v) => Ok(v),
      // An unconfirmed write may still land; incumbents stay archived.
      Err(e @ TransitionError::Inconsistent { .. }) => Err(e),
      Err(e) => {
        warn!(
          version = version_id,
          stage = %target,
          error = %e,
          "assignment failed after archiving incumbents; restoring"
        );
        self.restore(&archived, target, version_id).await?;
        Err(e)
      }
    }
  }

  /// Assign `target`, settling a timed-out call by reading the version back.
  async fn assign(
    &self,
    version_id: VersionId,
    target: Stage,
    archive_existing: bool,
  ) -> Result<ModelVersion, TransitionError> {
    match self
      .registry
      .transition_stage(version_id, target, archive_existing)
      .await
    {
      Ok(v) => Ok(v),
      Err(e @ RegistryError::Timeout { .. }) => self.settle(version_id, target, e).await,
      Err(e) => Err(e.into()),
    }
  }

  async fn settle(
    &self,
    version_id: VersionId,
    target: Stage,
    timeout: RegistryError,
  ) -> Result<ModelVersion, TransitionError> {
    warn!(
      version = version_id,
      stage = %target,
      error = %timeout,
      "transition timed out; reading back its outcome"
    );
    let observed = self.registry.get_version(version_id).await;
    if let Ok(Some(v)) = &observed
      && v.stage == target
    {
      warn!(version = version_id, stage = %target, "transition committed after its deadline");
      return Ok(v.clone());
    }

    let detail = match observed {
      Ok(Some(v)) => format!("{timeout}; version still in {}", v.stage),
      Ok(None) => format!("{timeout}; version no longer exists"),
      Err(e) => format!("{timeout}; read-back failed: {e}"),
    };
    error!(
      version = version_id,
      stage = %target,
      %detail,
      "transition outcome unconfirmed; registry may be inconsistent"
    );
    Err(TransitionError::Inconsistent { version: version_id, stage: target, detail })
  }

  async fn restore(
    &self,
    archived: &[VersionId],
    target: Stage,
    version_id: VersionId,
  ) -> Result<(), TransitionError> {
    for &id in archived {
      if let Err(e) = self.registry.transition_stage(id, target, false).await {
        error!(
          version = version_id,
          incumbent = id,
          stage = %target,
          error = %e,
          "could not restore archived incumbent; registry is inconsistent"
        );
        return Err(TransitionError::Inconsistent {
          version: version_id,
          stage:   target,
          detail:  format!("incumbent {id} left archived: {e}"),
        });
      }
    }
    Ok(())
  }
}
