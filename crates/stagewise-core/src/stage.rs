//! Deployment stages a model version moves through.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Lifecycle stage of a registered model version.
///
/// Ordered `Initial → Staging → Production`; superseded versions land in
/// `Archived`. The backend's own spelling of each stage is the registry
/// adapter's concern, never this enum's.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Stage {
  /// Newly registered, not yet validated.
  Initial,
  /// Passed the staging gate.
  Staging,
  /// Passed the production gate; the serving model.
  Production,
  /// Previously held `Staging` or `Production` and was superseded.
  Archived,
}

impl Stage {
  /// Stages that hold at most one version at a time.
  pub fn is_singleton(self) -> bool {
    matches!(self, Self::Staging | Self::Production)
  }

  /// Stages reachable through the public transition operation.
  pub fn is_promotion_target(self) -> bool { self.is_singleton() }
}
