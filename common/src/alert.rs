// Alert composition and delivery
//
// Email is the only user-visible failure channel. Digest alerts collect every
// failure of a pass into one message and honor the disable-alerts marker;
// severe errors are sent immediately and unconditionally.

use crate::config::SmtpConfig;
use crate::errors::AlertError;
use crate::models::{FailureRecord, GlobalConfig, SevereError};
use crate::suppress::AlertSwitch;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Alert notification interface
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert message to every recipient
    async fn notify(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), AlertError>;
}

/// SMTP notifier delivering through a relay host
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AlertError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| AlertError::InvalidAddress {
                address: config.from.clone(),
                reason: e.to_string(),
            })?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(skip(self, body))]
    async fn notify(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), AlertError> {
        if recipients.is_empty() {
            return Err(AlertError::NoRecipients);
        }

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject);
        for recipient in recipients {
            let to = recipient
                .parse::<Mailbox>()
                .map_err(|e| AlertError::InvalidAddress {
                    address: recipient.clone(),
                    reason: e.to_string(),
                })?;
            builder = builder.to(to);
        }
        let message = builder
            .body(body.to_string())
            .map_err(|e| AlertError::BuildFailed(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AlertError::SendFailed(e.to_string()))?;

        info!(recipients = recipients.len(), "Alert email sent");
        Ok(())
    }
}

/// Log-based notifier (default when no SMTP relay is configured)
///
/// Writes the alert at ERROR level so it still reaches an operator through
/// the structured log stream.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), AlertError> {
        error!(
            subject = subject,
            recipients = ?recipients,
            body = body,
            "ALERT (no SMTP relay configured)"
        );
        Ok(())
    }
}

/// Outcome of a digest attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestOutcome {
    /// No failures this pass, nothing to send
    NoFailures,
    /// Failures existed but the disable-alerts marker silenced the digest
    Suppressed,
    Sent,
}

/// Assembles and routes alerts for one scheduler invocation
pub struct Alerter {
    notifier: Arc<dyn Notifier>,
    subject: String,
    recipients: Vec<String>,
    print_error: bool,
    switch: AlertSwitch,
}

impl Alerter {
    pub fn new(notifier: Arc<dyn Notifier>, global: &GlobalConfig) -> Self {
        Self {
            notifier,
            subject: global.subject.clone(),
            recipients: global.alert.clone(),
            print_error: global.print_error,
            switch: AlertSwitch::new(global.disable_alerts.clone()),
        }
    }

    /// Send the end-of-pass digest, honoring the suppression marker
    #[instrument(skip(self, failures), fields(failures = failures.len()))]
    pub async fn send_digest(
        &self,
        failures: &[FailureRecord],
    ) -> Result<DigestOutcome, AlertError> {
        if failures.is_empty() {
            return Ok(DigestOutcome::NoFailures);
        }
        if self.switch.is_disabled() {
            // Deliberate silence: no email, no retry
            warn!(
                marker = %self.switch.path().display(),
                failures = failures.len(),
                "Digest suppressed by disable-alerts marker"
            );
            return Ok(DigestOutcome::Suppressed);
        }

        let body = self.compose_digest(failures);
        self.notifier
            .notify(&self.subject, &body, &self.recipients)
            .await?;
        Ok(DigestOutcome::Sent)
    }

    /// Send a severe error immediately, bypassing suppression
    #[instrument(skip(self))]
    pub async fn send_severe(&self, severe: &SevereError) -> Result<(), AlertError> {
        let mut body = String::from("SEVERE scheduler error\n\n");
        if let Some(task) = &severe.task {
            body.push_str(&format!("task: {}\n", task));
        }
        body.push_str(&format!("at:   {}\n", severe.at.to_rfc3339()));
        body.push_str(&format!("\n{}\n", severe.message));

        self.notifier
            .notify(&self.subject, &body, &self.recipients)
            .await
    }

    fn compose_digest(&self, failures: &[FailureRecord]) -> String {
        let mut body = format!(
            "{} failure(s) detected during task scheduling pass\n\n",
            failures.len()
        );

        if self.print_error {
            for failure in failures {
                body.push_str(&failure.describe());
                body.push('\n');
            }
        } else {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for failure in failures {
                *counts.entry(failure.task.as_str()).or_insert(0) += 1;
            }
            for (task, count) in counts {
                body.push_str(&format!("task {}: {} failure(s)\n", task, count));
            }
        }

        body
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::models::FailureKind;
    use chrono::Utc;
    use std::path::PathBuf;

    fn global(dir: &std::path::Path) -> GlobalConfig {
        GlobalConfig {
            subject: "TWiki SSAWG index".to_string(),
            alert: vec!["aca@cfa.harvard.edu".to_string()],
            timeout_seconds: 600,
            heartbeat_timeout_seconds: 3600,
            loop_count: 1,
            print_error: true,
            data_dir: dir.to_path_buf(),
            log_dir: dir.join("logs"),
            bin_dir: dir.join("bin"),
            master_log: dir.join("logs/master.log"),
            heartbeat: dir.join("heartbeat"),
            disable_alerts: dir.join("disable_alerts"),
            timezone: chrono_tz::UTC,
        }
    }

    fn pattern_failure(task: &str) -> FailureRecord {
        FailureRecord {
            task: task.to_string(),
            kind: FailureKind::Pattern {
                file: PathBuf::from("/logs/twiki-wg.log"),
                pattern: "failed".to_string(),
                line: "scrape failed".to_string(),
            },
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_digest_sent_with_subject_and_recipients() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let alerter = Alerter::new(notifier.clone(), &global(dir.path()));

        let outcome = alerter
            .send_digest(&[pattern_failure("twiki-wg")])
            .await
            .unwrap();
        assert_eq!(outcome, DigestOutcome::Sent);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (subject, body, recipients) = &sent[0];
        assert_eq!(subject, "TWiki SSAWG index");
        assert_eq!(recipients, &vec!["aca@cfa.harvard.edu".to_string()]);
        assert!(body.contains("twiki-wg"));
        assert!(body.contains("scrape failed"));
    }

    #[tokio::test]
    async fn test_no_failures_means_no_digest() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let alerter = Alerter::new(notifier.clone(), &global(dir.path()));

        let outcome = alerter.send_digest(&[]).await.unwrap();
        assert_eq!(outcome, DigestOutcome::NoFailures);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_marker_suppresses_digest_silently() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path());
        AlertSwitch::new(g.disable_alerts.clone()).disable().unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let alerter = Alerter::new(notifier.clone(), &g);

        let outcome = alerter
            .send_digest(&[pattern_failure("twiki-wg")])
            .await
            .unwrap();
        assert_eq!(outcome, DigestOutcome::Suppressed);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_severe_bypasses_marker() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path());
        AlertSwitch::new(g.disable_alerts.clone()).disable().unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let alerter = Alerter::new(notifier.clone(), &g);

        alerter
            .send_severe(&SevereError::new(
                Some("twiki-wg"),
                "Failed to open log file",
            ))
            .await
            .unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("SEVERE"));
        assert!(sent[0].1.contains("Failed to open log file"));
    }

    #[tokio::test]
    async fn test_summarized_digest_without_print_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = global(dir.path());
        g.print_error = false;

        let notifier = Arc::new(RecordingNotifier::default());
        let alerter = Alerter::new(notifier.clone(), &g);

        alerter
            .send_digest(&[
                pattern_failure("twiki-wg"),
                pattern_failure("twiki-wg"),
                pattern_failure("trending"),
            ])
            .await
            .unwrap();

        let sent = notifier.sent.lock().unwrap();
        let body = &sent[0].1;
        assert!(body.contains("task twiki-wg: 2 failure(s)"));
        assert!(body.contains("task trending: 1 failure(s)"));
        // Matched lines are summarized, not echoed
        assert!(!body.contains("scrape failed"));
    }

    #[test]
    fn test_smtp_notifier_rejects_bad_from_address() {
        let config = SmtpConfig {
            enabled: true,
            host: "localhost".to_string(),
            port: 25,
            from: "not an address".to_string(),
        };
        assert!(matches!(
            SmtpNotifier::new(&config),
            Err(AlertError::InvalidAddress { .. })
        ));
    }
}
