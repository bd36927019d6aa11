//! [`InMemoryRegistry`], a process-local [`ModelRegistry`].
//!
//! Used by tests and by anything that wants the full registry contract
//! without a database file. All state sits behind one mutex, so
//! archive-then-assign is atomic.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Mutex, MutexGuard},
};

use chrono::Utc;

use crate::{
  error::RegistryError,
  registry::ModelRegistry,
  stage::Stage,
  version::{
    ModelVersion, NewRun, NewVersion, Run, RunId, StageTransition, VersionId,
  },
};

#[derive(Default)]
struct State {
  runs:        HashMap<RunId, Run>,
  versions:    BTreeMap<VersionId, ModelVersion>,
  transitions: Vec<StageTransition>,
  next_id:     VersionId,
}

/// A registry held entirely in memory.
#[derive(Default)]
pub struct InMemoryRegistry {
  state: Mutex<State>,
}

impl InMemoryRegistry {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> Result<MutexGuard<'_, State>, RegistryError> {
    self
      .state
      .lock()
      .map_err(|_| RegistryError::Unavailable("registry state poisoned".into()))
  }
}

impl ModelRegistry for InMemoryRegistry {
  async fn create_run(&self, input: NewRun) -> Result<Run, RegistryError> {
    let run = input.into_run();
    self.lock()?.runs.insert(run.run_id.clone(), run.clone());
    Ok(run)
  }

  async fn get_run(&self, run_id: RunId) -> Result<Option<Run>, RegistryError> {
    Ok(self.lock()?.runs.get(&run_id).cloned())
  }

  async fn register_version(
    &self,
    input: NewVersion,
  ) -> Result<ModelVersion, RegistryError> {
    let mut state = self.lock()?;
    if !state.runs.contains_key(&input.run_id) {
      return Err(RegistryError::RunNotFound(input.run_id));
    }

    state.next_id += 1;
    let now = Utc::now();
    let version = ModelVersion {
      version_id:      state.next_id,
      run_id:          input.run_id,
      stage:           Stage::Initial,
      description:     String::new(),
      artifact_uri:    input.artifact_uri,
      artifact_sha256: input.artifact_sha256,
      created_at:      now,
      updated_at:      now,
    };
    state.versions.insert(version.version_id, version.clone());
    Ok(version)
  }

  async fn get_version(
    &self,
    version_id: VersionId,
  ) -> Result<Option<ModelVersion>, RegistryError> {
    Ok(self.lock()?.versions.get(&version_id).cloned())
  }

  async fn list_versions(
    &self,
    stage: Option<Stage>,
  ) -> Result<Vec<ModelVersion>, RegistryError> {
    Ok(
      self
        .lock()?
        .versions
        .values()
        .rev()
        .filter(|v| stage.is_none_or(|s| v.stage == s))
        .cloned()
        .collect(),
    )
  }

  async fn transition_stage(
    &self,
    version_id: VersionId,
    stage: Stage,
    archive_existing: bool,
  ) -> Result<ModelVersion, RegistryError> {
    let mut state = self.lock()?;
    if !state.versions.contains_key(&version_id) {
      return Err(RegistryError::VersionNotFound(version_id));
    }

    let now = Utc::now();
    let State { versions, transitions, .. } = &mut *state;

    if archive_existing && stage != Stage::Archived {
      for other in versions.values_mut() {
        if other.version_id != version_id && other.stage == stage {
          transitions.push(StageTransition {
            version_id: other.version_id,
            from:       other.stage,
            to:         Stage::Archived,
            at:         now,
          });
          other.stage = Stage::Archived;
          other.updated_at = now;
        }
      }
    }

    let version = versions
      .get_mut(&version_id)
      .ok_or(RegistryError::VersionNotFound(version_id))?;
    if version.stage != stage {
      transitions.push(StageTransition {
        version_id,
        from: version.stage,
        to: stage,
        at: now,
      });
      version.stage = stage;
      version.updated_at = now;
    }
    Ok(version.clone())
  }

  fn atomic_archive(&self) -> bool { true }

  async fn update_description(
    &self,
    version_id: VersionId,
    description: String,
  ) -> Result<(), RegistryError> {
    let mut state = self.lock()?;
    let version = state
      .versions
      .get_mut(&version_id)
      .ok_or(RegistryError::VersionNotFound(version_id))?;
    version.description = description;
    version.updated_at = Utc::now();
    Ok(())
  }

  async fn list_transitions(&self) -> Result<Vec<StageTransition>, RegistryError> {
    Ok(self.lock()?.transitions.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::version::RunMetrics;

  async fn registered(registry: &InMemoryRegistry) -> ModelVersion {
    let run = registry.create_run(NewRun::new(RunMetrics::new())).await.unwrap();
    registry.register_version(NewVersion::new(run.run_id)).await.unwrap()
  }

  #[tokio::test]
  async fn version_ids_are_monotonic_and_listed_newest_first() {
    let r = InMemoryRegistry::new();
    let a = registered(&r).await;
    let b = registered(&r).await;
    assert!(b.version_id > a.version_id);

    let ids: Vec<_> = r
      .list_versions(None)
      .await
      .unwrap()
      .into_iter()
      .map(|v| v.version_id)
      .collect();
    assert_eq!(ids, vec![b.version_id, a.version_id]);
  }

  #[tokio::test]
  async fn register_requires_known_run() {
    let r = InMemoryRegistry::new();
    let err = r
      .register_version(NewVersion::new(RunId::new("nope")))
      .await
      .unwrap_err();
    assert!(matches!(err, RegistryError::RunNotFound(_)));
  }

  #[tokio::test]
  async fn archive_existing_moves_incumbent_and_records_history() {
    let r = InMemoryRegistry::new();
    let a = registered(&r).await;
    let b = registered(&r).await;

    r.transition_stage(a.version_id, Stage::Production, true).await.unwrap();
    r.transition_stage(b.version_id, Stage::Production, true).await.unwrap();

    let prod = r.list_versions(Some(Stage::Production)).await.unwrap();
    assert_eq!(prod.len(), 1);
    assert_eq!(prod[0].version_id, b.version_id);

    let archived = r.get_version(a.version_id).await.unwrap().unwrap();
    assert_eq!(archived.stage, Stage::Archived);

    let history = r.list_transitions().await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].to, Stage::Archived);
  }

  #[tokio::test]
  async fn unknown_run_metrics_are_empty() {
    let r = InMemoryRegistry::new();
    let metrics = r.get_run_metrics(RunId::new("missing")).await.unwrap();
    assert!(metrics.is_empty());
  }
}
