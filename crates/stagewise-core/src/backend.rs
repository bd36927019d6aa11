//! Choosing the registry backend.
//!
//! The process environment is read exactly once, into an [`EnvSnapshot`].
//! [`resolve_backend`] is a pure function of that snapshot and the
//! configured tracking URI, so every rule can be tested without touching
//! real environment variables.

use std::{fmt, path::PathBuf};

use tracing::{info, warn};

/// Default local registry location.
pub const DEFAULT_SQLITE_URI: &str = "sqlite:///mlflow.db";

/// Tokens that people leave in templates instead of a real credential.
const PLACEHOLDER_TOKENS: &[&str] = &["YOUR_TOKEN", "YOUR_DATABRICKS_ACCESS_TOKEN_HERE"];

/// The environment variables that influence backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
  /// Running under CI (`GITHUB_ACTIONS=true` or `CI=true`).
  pub ci:               bool,
  /// `FORCE_DATABRICKS=true`: allow a remote backend even under CI.
  pub force_remote:     bool,
  /// `MLFLOW_TRACKING_URI`.
  pub tracking_uri:     Option<String>,
  /// `DATABRICKS_HOST`, or `DATABRICKS_SERVER_HOSTNAME`.
  pub databricks_host:  Option<String>,
  /// `DATABRICKS_TOKEN`, or `DATABRICKS_ACCESS_TOKEN`.
  pub databricks_token: Option<String>,
}

impl EnvSnapshot {
  /// Read the process environment.
  pub fn capture() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Build a snapshot from any key lookup.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let is_true = |key: &str| {
      non_empty(key).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    };

    Self {
      ci:               is_true("GITHUB_ACTIONS") || is_true("CI"),
      force_remote:     is_true("FORCE_DATABRICKS"),
      tracking_uri:     non_empty("MLFLOW_TRACKING_URI"),
      databricks_host:  non_empty("DATABRICKS_HOST")
        .or_else(|| non_empty("DATABRICKS_SERVER_HOSTNAME")),
      databricks_token: non_empty("DATABRICKS_TOKEN")
        .or_else(|| non_empty("DATABRICKS_ACCESS_TOKEN")),
    }
  }

  fn has_remote_credentials(&self) -> bool {
    match (&self.databricks_host, &self.databricks_token) {
      (Some(_), Some(token)) => !PLACEHOLDER_TOKENS.contains(&token.as_str()),
      _ => false,
    }
  }
}

/// Where the registry lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
  /// A SQLite database file.
  Sqlite { path: PathBuf },
  /// A hosted tracking server. Not supported by this build.
  Remote { uri: String },
}

impl Backend {
  /// Interpret a tracking URI.
  ///
  /// `sqlite:///rel/path` and `sqlite:////abs/path` name a database file.
  /// `file:///dir` names a directory holding `registry.db`. Anything else
  /// is remote.
  pub fn from_uri(uri: &str) -> Self {
    if let Some(rest) = uri.strip_prefix("sqlite:///") {
      return Self::Sqlite { path: PathBuf::from(rest) };
    }
    if let Some(rest) = uri.strip_prefix("file://") {
      return Self::Sqlite { path: PathBuf::from(rest).join("registry.db") };
    }
    Self::Remote { uri: uri.to_string() }
  }

  fn default_local() -> Self { Self::from_uri(DEFAULT_SQLITE_URI) }
}

impl fmt::Display for Backend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Sqlite { path } => write!(f, "sqlite:///{}", path.display()),
      Self::Remote { uri } => f.write_str(uri),
    }
  }
}

/// Which rule picked the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
  CiForcesLocal,
  EnvLocalUri,
  RemoteWithCredentials,
  RemoteWithoutCredentials,
  EnvUri,
  ConfigUri,
  Default,
}

impl fmt::Display for Reason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::CiForcesLocal => {
        "CI detected; using local SQLite (set FORCE_DATABRICKS=true to override)"
      }
      Self::EnvLocalUri => "local tracking URI from MLFLOW_TRACKING_URI",
      Self::RemoteWithCredentials => "databricks requested and credentials present",
      Self::RemoteWithoutCredentials => {
        "databricks requested but credentials missing; falling back to local SQLite"
      }
      Self::EnvUri => "tracking URI from MLFLOW_TRACKING_URI",
      Self::ConfigUri => "tracking URI from configuration",
      Self::Default => "no tracking URI configured; using local SQLite",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDecision {
  pub backend: Backend,
  pub reason:  Reason,
}

/// Pick the registry backend. Rules apply in order; the first match wins.
pub fn resolve_backend(env: &EnvSnapshot, config_uri: Option<&str>) -> BackendDecision {
  let decision = decide(env, config_uri.filter(|u| !u.trim().is_empty()));
  if decision.reason == Reason::RemoteWithoutCredentials {
    warn!(backend = %decision.backend, reason = %decision.reason, "resolved registry backend");
  } else {
    info!(backend = %decision.backend, reason = %decision.reason, "resolved registry backend");
  }
  decision
}

fn decide(env: &EnvSnapshot, config_uri: Option<&str>) -> BackendDecision {
  let pick = |backend, reason| BackendDecision { backend, reason };
  let env_uri = env.tracking_uri.as_deref();

  if env.ci && !env.force_remote {
    return pick(Backend::default_local(), Reason::CiForcesLocal);
  }

  if let Some(uri) = env_uri
    && (uri.starts_with("sqlite:///") || uri.starts_with("file:///"))
  {
    return pick(Backend::from_uri(uri), Reason::EnvLocalUri);
  }

  if env_uri == Some("databricks") || config_uri == Some("databricks") {
    return if env.has_remote_credentials() {
      pick(Backend::Remote { uri: "databricks".into() }, Reason::RemoteWithCredentials)
    } else {
      pick(Backend::default_local(), Reason::RemoteWithoutCredentials)
    };
  }

  if let Some(uri) = env_uri {
    return pick(Backend::from_uri(uri), Reason::EnvUri);
  }

  match config_uri {
    Some(uri) => pick(Backend::from_uri(uri), Reason::ConfigUri),
    None => pick(Backend::default_local(), Reason::Default),
  }
}
