//! Best-effort outcome notifications.

use std::future::Future;

use thiserror::Error;
use tracing::info;

/// A message for whoever watches the retraining job.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub subject: String,
  pub body:    String,
}

#[derive(Debug, Error)]
#[error("notification not delivered: {0}")]
pub struct NotifyError(pub String);

pub trait Notifier: Send + Sync {
  fn notify(
    &self,
    notification: Notification,
  ) -> impl Future<Output = Result<(), NotifyError>> + Send + '_;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
    info!(
      subject = %notification.subject,
      "no notification target configured; logging instead\n{}",
      notification.body
    );
    Ok(())
  }
}
