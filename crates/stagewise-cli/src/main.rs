//! `stagewise`: staged deployment, retraining and serving of models.
//!
//! # Usage
//!
//! ```text
//! stagewise deploy --stage staging
//! stagewise deploy --stage production [--version N]
//! stagewise deploy --stage rollback [--version N]
//! stagewise deploy --stage info
//! stagewise retrain [--force]
//! stagewise register --metric accuracy=0.84 --artifact models/model.json
//! stagewise versions [--stage production]
//! stagewise predict --input data.jsonl [--output predictions.jsonl]
//! stagewise serve [--stage production] [--port 8080]
//! ```
//!
//! Settings come from `config.yaml` (or `--config`) and `STAGEWISE__*`
//! environment variables. The registry location is chosen from
//! `mlflow.tracking_uri` and the tracking environment variables.

mod mail;
mod report;
mod settings;
mod train;

use std::{
  collections::BTreeMap,
  fs::File,
  io::{self, BufReader, BufWriter},
  path::{Path, PathBuf},
  process::ExitCode,
  sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use stagewise_core::{
  DeployError, RetrainError, Stage,
  backend::{Backend, EnvSnapshot, resolve_backend},
  deploy::Deployer,
  predict::Predictor,
  registry::ModelRegistry,
  retrain::{RetrainOutcome, Retrainer},
  timed::TimedRegistry,
  version::{RunMetrics, VersionId},
};
use stagewise_serve::AppState;
use stagewise_store_sqlite::SqliteRegistry;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use crate::{
  mail::Outbox,
  settings::Settings,
  train::{CommandTrainer, TrainingSummary},
};

type Registry = TimedRegistry<SqliteRegistry>;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "stagewise", author, version, about = "Staged model deployment")]
struct Cli {
  /// Path to the YAML configuration file.
  #[arg(short, long, default_value = "config.yaml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Promote, inspect or roll back the served model.
  Deploy {
    #[arg(long, value_enum)]
    stage:   DeployAction,
    /// Version to promote or roll back to; defaults to the usual candidate.
    #[arg(long)]
    version: Option<VersionId>,
  },

  /// Retrain when due and promote the new model if it is better.
  Retrain {
    /// Retrain even if the interval has not elapsed.
    #[arg(long)]
    force: bool,
  },

  /// Record a finished training run and register its model.
  Register {
    /// Metric as `name=value`; `accuracy` is the one the gates read.
    #[arg(long = "metric", value_name = "NAME=VALUE", required = true, value_parser = parse_metric)]
    metrics:  Vec<(String, f64)>,
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    params:   Vec<(String, String)>,
    /// Serialised model file.
    #[arg(long)]
    artifact: Option<PathBuf>,
    #[arg(long)]
    run_id:   Option<String>,
  },

  /// List registered versions, newest first.
  Versions {
    #[arg(long)]
    stage: Option<Stage>,
  },

  /// Score a JSON Lines file with the model in a stage.
  Predict {
    #[arg(long, default_value = "production")]
    stage:  Stage,
    #[arg(long)]
    input:  PathBuf,
    /// Defaults to stdout.
    #[arg(long)]
    output: Option<PathBuf>,
  },

  /// Serve predictions over HTTP.
  Serve {
    #[arg(long, default_value = "production")]
    stage: Stage,
    #[arg(long)]
    host:  Option<String>,
    #[arg(long)]
    port:  Option<u16>,
  },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeployAction {
  Staging,
  Production,
  /// Older name for `production`.
  #[value(name = "GNU_Production")]
  GnuProduction,
  Info,
  Rollback,
}

fn parse_metric(s: &str) -> Result<(String, f64), String> {
  let (name, value) = parse_param(s)?;
  let value = value
    .parse::<f64>()
    .map_err(|e| format!("metric {name}: {e}"))?;
  Ok((name, value))
}

fn parse_param(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
    _ => Err(format!("expected NAME=VALUE, got {s:?}")),
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;
  let registry = Arc::new(open_registry(&settings, &EnvSnapshot::capture()).await?);
  info!(model = %settings.mlflow.model_name, "registry ready");

  match cli.command {
    Command::Deploy { stage, version } => deploy(registry, &settings, stage, version).await,
    Command::Retrain { force } => retrain(registry, &settings, force).await,
    Command::Register { metrics, params, artifact, run_id } => {
      let summary = TrainingSummary {
        run_id,
        metrics: metrics.into_iter().collect::<RunMetrics>(),
        params: params.into_iter().collect::<BTreeMap<_, _>>(),
        artifact,
      };
      let trained = train::record(registry.as_ref(), summary)
        .await
        .context("failed to register model")?;
      if let Some(v) = trained.version_id {
        println!("Registered version {v} for run {}", trained.run_id);
      }
      Ok(ExitCode::SUCCESS)
    }
    Command::Versions { stage } => {
      let list = registry.list_versions(stage).await.context("failed to list versions")?;
      report::versions(&list);
      Ok(ExitCode::SUCCESS)
    }
    Command::Predict { stage, input, output } => {
      predict(registry, stage, &input, output.as_deref()).await
    }
    Command::Serve { stage, host, port } => {
      let state = AppState::load(registry, stage)
        .await
        .with_context(|| format!("failed to load the {stage} model"))?;
      let address = format!(
        "{}:{}",
        host.unwrap_or_else(|| settings.serve.host.clone()),
        port.unwrap_or(settings.serve.port),
      );

      info!("Listening on http://{address}");
      let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
      axum::serve(listener, stagewise_serve::router(state))
        .await
        .context("server error")?;
      Ok(ExitCode::SUCCESS)
    }
  }
}

async fn open_registry(settings: &Settings, env: &EnvSnapshot) -> anyhow::Result<Registry> {
  let decision = resolve_backend(env, settings.mlflow.tracking_uri.as_deref());
  let path = match decision.backend {
    Backend::Sqlite { path } => expand_tilde(&path),
    Backend::Remote { uri } => anyhow::bail!(
      "tracking backend {uri} is not supported by this build; \
       set mlflow.tracking_uri to a sqlite:/// URI"
    ),
  };

  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteRegistry::open(&path)
    .await
    .with_context(|| format!("failed to open registry at {}", path.display()))?;
  Ok(TimedRegistry::new(store, settings.registry_timeout()))
}

// ─── Commands ────────────────────────────────────────────────────────────────

/// Exit status of a command, kept apart from [`ExitCode`] so it can be
/// compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
  Success,
  Failure,
}

impl From<Status> for ExitCode {
  fn from(status: Status) -> Self {
    match status {
      Status::Success => ExitCode::SUCCESS,
      Status::Failure => ExitCode::FAILURE,
    }
  }
}

/// Any deployment error fails the command: gate rejections, missing
/// candidates and registry failures alike.
fn deploy_status<T>(result: &Result<T, DeployError>) -> Status {
  match result {
    Ok(_) => Status::Success,
    Err(_) => Status::Failure,
  }
}

/// Completed and skipped cycles succeed unless a promotion step hit an
/// unrecoverable error. Training and registry errors fail.
fn retrain_status(result: &Result<RetrainOutcome, RetrainError>) -> Status {
  match result {
    Ok(RetrainOutcome::Completed(report))
      if report.deployment.failure().is_some_and(|f| !f.recoverable) =>
    {
      Status::Failure
    }
    Ok(_) => Status::Success,
    Err(_) => Status::Failure,
  }
}

async fn deploy(
  registry: Arc<Registry>,
  settings: &Settings,
  action: DeployAction,
  version: Option<VersionId>,
) -> anyhow::Result<ExitCode> {
  let deployer = Deployer::new(registry, settings.deployment);
  Ok(run_deploy(&deployer, action, version).await.into())
}

async fn run_deploy<R: ModelRegistry>(
  deployer: &Deployer<R>,
  action: DeployAction,
  version: Option<VersionId>,
) -> Status {
  let result = match action {
    DeployAction::Staging => {
      if version.is_some() {
        warn!("--version is ignored for staging; the newest registered version is promoted");
      }
      deployer.promote_to_staging().await.map(|p| report::promotion(&p))
    }
    DeployAction::Production | DeployAction::GnuProduction => deployer
      .promote_to_production(version)
      .await
      .map(|p| report::promotion(&p)),
    DeployAction::Info => deployer
      .production_info()
      .await
      .map(|info| report::production_info(info.as_ref())),
    DeployAction::Rollback => deployer.rollback(version).await.map(|r| report::rollback(&r)),
  };

  if let Err(e) = &result {
    report::deploy_failure(e);
  }
  deploy_status(&result)
}

async fn retrain(
  registry: Arc<Registry>,
  settings: &Settings,
  force: bool,
) -> anyhow::Result<ExitCode> {
  let retrainer = Retrainer::new(
    Deployer::new(registry.clone(), settings.deployment),
    CommandTrainer::new(registry, settings.training.command.clone()),
    Outbox::new(settings.retraining.notification_email.as_deref()),
    settings.retraining.clone(),
  );

  let result = retrainer.retrain_and_deploy(force).await;
  let status = retrain_status(&result);
  match result {
    Ok(outcome) => {
      report::retrain(&outcome);
      if status == Status::Failure {
        eprintln!("Retraining finished, but deployment hit a registry failure.");
      }
    }
    Err(e) => {
      let e = anyhow::Error::from(e);
      error!(error = %format!("{e:#}"), "retraining failed");
      eprintln!("Retraining failed: {e:#}");
    }
  }
  Ok(status.into())
}

async fn predict(
  registry: Arc<Registry>,
  stage: Stage,
  input: &Path,
  output: Option<&Path>,
) -> anyhow::Result<ExitCode> {
  let predictor = Predictor::for_stage(registry.as_ref(), stage)
    .await
    .with_context(|| format!("failed to load the {stage} model"))?;

  let reader = BufReader::new(
    File::open(input).with_context(|| format!("failed to open {}", input.display()))?,
  );
  let rows = tokio::task::block_in_place(|| match output {
    Some(path) => {
      let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
      Ok::<_, anyhow::Error>(predictor.predict_jsonl(reader, BufWriter::new(file))?)
    }
    None => Ok(predictor.predict_jsonl(reader, io::stdout().lock())?),
  })?;

  info!(
    rows,
    version = predictor.version().version_id,
    stage = %stage,
    "scored input"
  );
  Ok(ExitCode::SUCCESS)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory as _;

  use super::*;

  #[test]
  fn cli_is_well_formed() { Cli::command().debug_assert(); }

  #[test]
  fn legacy_production_stage_name_parses() {
    let cli = Cli::try_parse_from(["stagewise", "deploy", "--stage", "GNU_Production"]).unwrap();
    assert!(matches!(cli.command, Command::Deploy {
      stage: DeployAction::GnuProduction,
      version: None,
    }));
  }

  #[test]
  fn register_collects_metrics() {
    let cli = Cli::try_parse_from([
      "stagewise",
      "register",
      "--metric",
      "accuracy=0.84",
      "--metric",
      "f1_score=0.8",
      "--param",
      "n_estimators=100",
    ])
    .unwrap();
    let Command::Register { metrics, params, .. } = cli.command else {
      panic!("expected register");
    };
    assert_eq!(metrics, vec![
      (String::from("accuracy"), 0.84),
      (String::from("f1_score"), 0.8),
    ]);
    assert_eq!(params, vec![(String::from("n_estimators"), String::from("100"))]);
  }

  #[test]
  fn malformed_pairs_are_rejected() {
    assert!(parse_metric("accuracy").is_err());
    assert!(parse_metric("accuracy=high").is_err());
    assert!(parse_param("=x").is_err());
  }

  #[test]
  fn stages_parse_case_insensitively() {
    let cli = Cli::try_parse_from(["stagewise", "versions", "--stage", "Staging"]).unwrap();
    assert!(matches!(cli.command, Command::Versions { stage: Some(Stage::Staging) }));
  }

  // ─── Exit status ───────────────────────────────────────────────────────────

  mod status {
    use chrono::Utc;
    use stagewise_core::{
      RegistryError,
      memory::InMemoryRegistry,
      retrain::{DeployFailure, DeploymentOutcome, RetrainReport, SkipReason},
      settings::DeploySettings,
      train::TrainError,
      version::{NewRun, NewVersion, RunId},
    };

    use super::*;

    fn deployer() -> Deployer<InMemoryRegistry> {
      Deployer::new(Arc::new(InMemoryRegistry::new()), DeploySettings::default())
    }

    async fn register(d: &Deployer<InMemoryRegistry>, accuracy: f64) -> VersionId {
      let registry = d.registry();
      let run = registry
        .create_run(NewRun::new(RunMetrics::from([("accuracy".to_string(), accuracy)])))
        .await
        .unwrap();
      registry.register_version(NewVersion::new(run.run_id)).await.unwrap().version_id
    }

    fn completed(deployment: DeploymentOutcome) -> Result<RetrainOutcome, RetrainError> {
      Ok(RetrainOutcome::Completed(RetrainReport {
        run_id: RunId::new("run-1"),
        new_metrics: RunMetrics::new(),
        production_metrics: None,
        improvement: 0.0,
        is_better: true,
        deployment,
        finished_at: Utc::now(),
      }))
    }

    #[tokio::test]
    async fn info_without_a_production_model_succeeds() {
      let d = deployer();
      assert_eq!(run_deploy(&d, DeployAction::Info, None).await, Status::Success);
    }

    #[tokio::test]
    async fn missing_candidate_fails() {
      let d = deployer();
      assert_eq!(run_deploy(&d, DeployAction::Staging, None).await, Status::Failure);
      assert_eq!(run_deploy(&d, DeployAction::Production, None).await, Status::Failure);
      assert_eq!(run_deploy(&d, DeployAction::Rollback, None).await, Status::Failure);
    }

    #[tokio::test]
    async fn gate_rejection_fails_and_a_pass_succeeds() {
      let d = deployer();
      register(&d, 0.10).await;
      assert_eq!(run_deploy(&d, DeployAction::Staging, None).await, Status::Failure);

      register(&d, 0.90).await;
      assert_eq!(run_deploy(&d, DeployAction::Staging, None).await, Status::Success);
      assert_eq!(run_deploy(&d, DeployAction::GnuProduction, None).await, Status::Success);
      assert_eq!(run_deploy(&d, DeployAction::Info, None).await, Status::Success);
    }

    #[test]
    fn registry_failure_during_deploy_fails() {
      let outage: Result<(), _> =
        Err(DeployError::from(RegistryError::Unavailable("connection refused".into())));
      assert_eq!(deploy_status(&outage), Status::Failure);
    }

    #[test]
    fn retrain_outcomes_map_to_exit_status() {
      let skipped = Ok(RetrainOutcome::Skipped { last_training: None });
      assert_eq!(retrain_status(&skipped), Status::Success);

      let deployed = completed(DeploymentOutcome::Deployed {
        staging_version:    1,
        production_version: 1,
      });
      assert_eq!(retrain_status(&deployed), Status::Success);

      let not_better = completed(DeploymentOutcome::NotAttempted { reason: SkipReason::NotBetter });
      assert_eq!(retrain_status(&not_better), Status::Success);

      let gated = completed(DeploymentOutcome::StagedOnly {
        staging_version: 1,
        reason:          DeployFailure::from(&DeployError::ValidationFailed {
          version:  1,
          accuracy: 0.75,
          required: 0.80,
        }),
      });
      assert_eq!(retrain_status(&gated), Status::Success);

      let outage = completed(DeploymentOutcome::NotStaged {
        reason: DeployFailure::from(&DeployError::from(RegistryError::Unavailable(
          "injected outage".into(),
        ))),
      });
      assert_eq!(retrain_status(&outage), Status::Failure);
    }

    #[test]
    fn retrain_errors_fail() {
      let training = Err(RetrainError::TrainingFailed(TrainError::Failed("exit 1".into())));
      assert_eq!(retrain_status(&training), Status::Failure);

      let registry = Err(RetrainError::RegistryUnavailable(RegistryError::Unavailable(
        "down".into(),
      )));
      assert_eq!(retrain_status(&registry), Status::Failure);
    }
  }
}
