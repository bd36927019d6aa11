//! Notification delivery through the system `mail` command.

use std::process::Stdio;

use stagewise_core::notify::{LogNotifier, Notification, Notifier, NotifyError};
use tokio::{io::AsyncWriteExt as _, process::Command};
use tracing::info;

/// Pipes the body into `mail -s <subject> <recipient>`.
pub struct MailNotifier {
  recipient: String,
}

impl MailNotifier {
  pub fn new(recipient: impl Into<String>) -> Self { Self { recipient: recipient.into() } }
}

impl Notifier for MailNotifier {
  async fn notify(&self, n: Notification) -> Result<(), NotifyError> {
    let mut child = Command::new("mail")
      .arg("-s")
      .arg(&n.subject)
      .arg(&self.recipient)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|e| NotifyError(format!("could not run mail: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
      stdin
        .write_all(n.body.as_bytes())
        .await
        .map_err(|e| NotifyError(e.to_string()))?;
    }
    let status = child.wait().await.map_err(|e| NotifyError(e.to_string()))?;
    if !status.success() {
      return Err(NotifyError(format!("mail exited with {status}")));
    }
    info!(to = %self.recipient, subject = %n.subject, "notification sent");
    Ok(())
  }
}

/// Mail when a recipient is configured, otherwise the log.
pub enum Outbox {
  Mail(MailNotifier),
  Log(LogNotifier),
}

impl Outbox {
  pub fn new(recipient: Option<&str>) -> Self {
    match recipient {
      Some(to) => Self::Mail(MailNotifier::new(to)),
      None => Self::Log(LogNotifier),
    }
  }
}

impl Notifier for Outbox {
  async fn notify(&self, n: Notification) -> Result<(), NotifyError> {
    match self {
      Self::Mail(m) => m.notify(n).await,
      Self::Log(l) => l.notify(n).await,
    }
  }
}
