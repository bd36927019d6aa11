//! Test doubles shared by the unit tests in this crate.

use std::{
  collections::HashSet,
  sync::Mutex,
  time::Duration,
};

use crate::{
  error::RegistryError,
  memory::InMemoryRegistry,
  registry::ModelRegistry,
  stage::Stage,
  version::{
    ModelVersion, NewRun, NewVersion, Run, RunId, RunMetrics, StageTransition,
    VersionId,
  },
};

/// Record a run with the given accuracy and register a version for it.
pub async fn register<R: ModelRegistry>(registry: &R, accuracy: f64) -> VersionId {
  let run = registry
    .create_run(NewRun::new(metrics(accuracy)))
    .await
    .unwrap();
  registry
    .register_version(NewVersion::new(run.run_id))
    .await
    .unwrap()
    .version_id
}

pub fn metrics(accuracy: f64) -> RunMetrics {
  RunMetrics::from([
    ("accuracy".to_string(), accuracy),
    ("f1_score".to_string(), accuracy - 0.01),
  ])
}

#[derive(Default)]
struct Faults {
  down:               bool,
  failing_versions:   HashSet<VersionId>,
  unrestorable:       HashSet<VersionId>,
  delay:              Option<Duration>,
  slow_assign:        Option<SlowAssign>,
  atomic:             bool,
  transition_calls:   usize,
}

#[derive(Clone, Copy)]
struct SlowAssign {
  delay:   Duration,
  commits: bool,
}

/// An [`InMemoryRegistry`] that applies archive and assign as separate
/// calls and can be told to fail specific operations.
#[derive(Default)]
pub struct FlakyRegistry {
  inner:  InMemoryRegistry,
  faults: Mutex<Faults>,
}

impl FlakyRegistry {
  pub fn new() -> Self { Self::default() }

  /// Every call fails with [`RegistryError::Unavailable`].
  pub fn set_down(&self, down: bool) { self.faults.lock().unwrap().down = down; }

  /// Any transition of `version` fails.
  pub fn fail_transitions_of(&self, version: VersionId) {
    self.faults.lock().unwrap().failing_versions.insert(version);
  }

  /// Moving `version` out of `Archived` fails.
  pub fn fail_restores_of(&self, version: VersionId) {
    self.faults.lock().unwrap().unrestorable.insert(version);
  }

  /// Sleep before answering `list_versions`.
  pub fn set_delay(&self, delay: Duration) {
    self.faults.lock().unwrap().delay = Some(delay);
  }

  /// Answer assignments (moves to any stage but `Archived`) only after
  /// `delay`. With `commits`, the change is applied before the wait, so a
  /// caller that gives up early still leaves it in place; without, it is
  /// never applied.
  pub fn set_slow_assign(&self, delay: Duration, commits: bool) {
    self.faults.lock().unwrap().slow_assign = Some(SlowAssign { delay, commits });
  }

  /// Report archive-then-assign as a single atomic call.
  pub fn set_atomic(&self, atomic: bool) { self.faults.lock().unwrap().atomic = atomic; }

  pub fn transition_calls(&self) -> usize {
    self.faults.lock().unwrap().transition_calls
  }

  fn check_up(&self) -> Result<(), RegistryError> {
    if self.faults.lock().unwrap().down {
      return Err(RegistryError::Unavailable("injected outage".into()));
    }
    Ok(())
  }
}

impl ModelRegistry for FlakyRegistry {
  async fn create_run(&self, input: NewRun) -> Result<Run, RegistryError> {
    self.check_up()?;
    self.inner.create_run(input).await
  }

  async fn get_run(&self, run_id: RunId) -> Result<Option<Run>, RegistryError> {
    self.check_up()?;
    self.inner.get_run(run_id).await
  }

  async fn register_version(
    &self,
    input: NewVersion,
  ) -> Result<ModelVersion, RegistryError> {
    self.check_up()?;
    self.inner.register_version(input).await
  }

  async fn get_version(
    &self,
    version_id: VersionId,
  ) -> Result<Option<ModelVersion>, RegistryError> {
    self.check_up()?;
    self.inner.get_version(version_id).await
  }

  async fn list_versions(
    &self,
    stage: Option<Stage>,
  ) -> Result<Vec<ModelVersion>, RegistryError> {
    self.check_up()?;
    let delay = self.faults.lock().unwrap().delay;
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    self.inner.list_versions(stage).await
  }

  async fn transition_stage(
    &self,
    version_id: VersionId,
    stage: Stage,
    archive_existing: bool,
  ) -> Result<ModelVersion, RegistryError> {
    self.check_up()?;
    let slow = {
      let mut faults = self.faults.lock().unwrap();
      faults.transition_calls += 1;
      let restoring =
        stage != Stage::Archived && faults.unrestorable.contains(&version_id);
      if faults.failing_versions.contains(&version_id) || restoring {
        return Err(RegistryError::Unavailable(format!(
          "injected failure moving {version_id} to {stage}"
        )));
      }
      faults.slow_assign.filter(|_| stage != Stage::Archived)
    };

    let Some(slow) = slow else {
      return self
        .inner
        .transition_stage(version_id, stage, archive_existing)
        .await;
    };
    let applied = if slow.commits {
      Some(self.inner.transition_stage(version_id, stage, archive_existing).await)
    } else {
      None
    };
    tokio::time::sleep(slow.delay).await;
    applied.unwrap_or_else(|| {
      Err(RegistryError::Unavailable(format!("write of {version_id} to {stage} was lost")))
    })
  }

  fn atomic_archive(&self) -> bool { self.faults.lock().unwrap().atomic }

  async fn update_description(
    &self,
    version_id: VersionId,
    description: String,
  ) -> Result<(), RegistryError> {
    self.check_up()?;
    self.inner.update_description(version_id, description).await
  }

  async fn list_transitions(&self) -> Result<Vec<StageTransition>, RegistryError> {
    self.check_up()?;
    self.inner.list_transitions().await
  }
}
