//! Human-readable command output.

use stagewise_core::{
  DeployError,
  deploy::{ProductionInfo, Promotion, Rollback},
  retrain::{DeploymentOutcome, RetrainOutcome},
  version::{ModelVersion, accuracy},
};

const RULE: &str = "======================================================================";

pub fn promotion(p: &Promotion) {
  println!("\n✓ Model version {} deployed to {}", p.version_id, p.stage);
  println!("  Accuracy: {:.4}", p.accuracy);
  if p.skipped_staging {
    println!("  (promoted straight from registration; Staging was empty)");
  }
}

pub fn rollback(r: &Rollback) {
  match r.replaced {
    Some(old) => println!("\n✓ Production rolled back from version {old} to {}", r.version_id),
    None => println!("\n✓ Version {} restored to Production", r.version_id),
  }
}

pub fn production_info(info: Option<&ProductionInfo>) {
  let Some(info) = info else {
    println!("\n⚠ No model currently in Production");
    println!("  Deploy a model first with: --stage production");
    return;
  };
  let v = &info.version;
  println!("\n{RULE}\nProduction Model Information\n{RULE}");
  println!("version: {}", v.version_id);
  println!("run_id: {}", v.run_id);
  println!("stage: {}", v.stage);
  println!("description: {}", v.description);
  for (name, value) in &info.metrics {
    println!("{name}: {value:.4}");
  }
  println!("{RULE}");
}

pub fn deploy_failure(e: &DeployError) {
  println!("\n✗ Deployment failed: {e}");
  match e {
    DeployError::NoCandidateModel { .. } => {
      println!("  Register a trained model first (`stagewise register` or `stagewise retrain`).");
    }
    DeployError::ValidationFailed { .. } => {
      println!("  The model stays where it was; nothing was changed.");
    }
    DeployError::NoPreviousVersion => {
      println!("  Rollback needs a version that served in Production before the current one.");
    }
    _ => {}
  }
}

pub fn versions(list: &[ModelVersion]) {
  if list.is_empty() {
    println!("No model versions registered.");
    return;
  }
  println!("{:>7}  {:<10}  {:<32}  {:<20}  description", "version", "stage", "run", "updated");
  for v in list {
    println!(
      "{:>7}  {:<10}  {:<32}  {:<20}  {}",
      v.version_id,
      v.stage.to_string(),
      v.run_id.as_str(),
      v.updated_at.format("%Y-%m-%d %H:%M:%S"),
      v.description,
    );
  }
}

pub fn retrain(outcome: &RetrainOutcome) {
  println!("\n{RULE}\nRETRAINING SUMMARY\n{RULE}");
  match outcome {
    RetrainOutcome::Skipped { last_training } => {
      println!("Status: skipped");
      if let Some(at) = last_training {
        println!("Last training: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
      }
    }
    RetrainOutcome::Completed(r) => {
      println!("Status: completed");
      println!("Run: {}", r.run_id);
      println!("New Model Accuracy: {:.4}", accuracy(&r.new_metrics));
      if let Some(prod) = &r.production_metrics {
        println!("Production Model Accuracy: {:.4}", accuracy(prod));
      }
      println!("Improvement: {:+.4}", r.improvement);
      println!("Deployed: {}", r.deployment.deployed());
      match &r.deployment {
        DeploymentOutcome::Deployed { production_version, .. } => {
          println!("Production Version: {production_version}");
        }
        DeploymentOutcome::StagedOnly { staging_version, reason } => {
          println!("Staging Version: {staging_version}");
          println!("Reason: {reason}");
        }
        DeploymentOutcome::NotStaged { reason } => println!("Reason: {reason}"),
        DeploymentOutcome::NotAttempted { reason } => println!("Reason: {reason}"),
      }
    }
  }
  println!("{RULE}");
}
