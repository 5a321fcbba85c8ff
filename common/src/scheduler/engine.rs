// Scheduler engine implementation
//
// One engine instance owns one invocation: it runs the task list
// `loop_count` times, routing each pass's failures to the alerter. Tasks run
// sequentially in task-file order; nothing a single task does can abort the
// pass, only its own remaining commands.

use crate::alert::{Alerter, DigestOutcome, Notifier};
use crate::errors::WatchError;
use crate::executor::TaskExecutor;
use crate::heartbeat::Heartbeat;
use crate::models::{PassSummary, SevereError};
use crate::taskfile::TaskFile;
use crate::watcher::LogWatcher;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Main scheduler engine
pub struct SchedulerEngine {
    taskfile: TaskFile,
    executor: TaskExecutor,
    watcher: LogWatcher,
    alerter: Alerter,
    heartbeat: Heartbeat,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl SchedulerEngine {
    /// Create an engine for a loaded task file
    ///
    /// Creates the data and log directories and primes the watcher offsets,
    /// so log content from earlier invocations is never rescanned.
    pub fn new(taskfile: TaskFile, notifier: Arc<dyn Notifier>) -> Result<Self, WatchError> {
        let global = &taskfile.global;
        for dir in [&global.data_dir, &global.log_dir] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to create directory");
            }
        }

        let watcher = LogWatcher::new(&taskfile.tasks)?;
        let executor = TaskExecutor::new(global.clone());
        let alerter = Alerter::new(notifier, global);
        let heartbeat = Heartbeat::new(
            global.heartbeat.clone(),
            Duration::from_secs(global.heartbeat_timeout_seconds),
        );

        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Ok(Self {
            taskfile,
            executor,
            watcher,
            alerter,
            heartbeat,
            shutdown_tx,
        })
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request a graceful stop after the current pass
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// A cloneable handle that requests a graceful stop when called
    pub fn shutdown_handle(&self) -> impl Fn() + Send + 'static {
        let tx = self.shutdown_tx.clone();
        move || {
            let _ = tx.send(());
        }
    }

    /// Run all configured passes, sleeping to the next minute tick between them
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<Vec<PassSummary>, anyhow::Error> {
        let loop_count = self.taskfile.global.loop_count;
        info!(
            loop_count = loop_count,
            tasks = self.taskfile.tasks.len(),
            "Starting scheduler engine"
        );

        let mut shutdown_rx = self.shutdown_receiver();
        let mut summaries = Vec::with_capacity(loop_count as usize);

        for iteration in 1..=loop_count {
            let now = Utc::now().with_timezone(&self.taskfile.global.timezone);
            let summary = self.run_pass(now).await;
            info!(
                iteration = iteration,
                pass_id = %summary.pass_id,
                tasks_run = summary.tasks_run,
                failures = summary.failures.len(),
                severe = summary.severe.len(),
                "Pass complete"
            );
            summaries.push(summary);

            if iteration < loop_count {
                let delay = seconds_until_next_minute(Utc::now());
                debug!(delay_ms = delay.as_millis() as u64, "Sleeping until next tick");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping scheduler");
                        break;
                    }
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(summaries)
    }

    /// Run one full pass over the task list at the given instant
    #[instrument(skip(self), fields(at = %at))]
    pub async fn run_pass(&mut self, at: DateTime<Tz>) -> PassSummary {
        let pass_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut failures = Vec::new();
        let mut severe = Vec::new();
        let mut tasks_run = 0;
        let mut tasks_skipped = 0;

        // A stale heartbeat means a previous scheduler process may be hung;
        // this is the one condition surfaced even when everything else is
        // silent.
        match self.heartbeat.staleness() {
            Ok(Some(age)) => {
                let err = SevereError::new(
                    None,
                    format!(
                        "Heartbeat file {} is stale: last updated {}s ago (limit {}s)",
                        self.heartbeat.path().display(),
                        age.as_secs(),
                        self.taskfile.global.heartbeat_timeout_seconds
                    ),
                );
                self.raise_severe(&mut severe, err).await;
            }
            Ok(None) => {}
            Err(e) => {
                let err = SevereError::new(
                    None,
                    format!(
                        "Failed to check heartbeat file {}: {}",
                        self.heartbeat.path().display(),
                        e
                    ),
                );
                self.raise_severe(&mut severe, err).await;
            }
        }
        if let Err(e) = self.heartbeat.beat() {
            warn!(error = %e, "Failed to touch heartbeat file");
        }

        // Tasks and their command lists are strictly ordered; one task's
        // failure never aborts the pass
        let tasks = self.taskfile.tasks.clone();
        for task in &tasks {
            if !task.is_due(at.clone()) {
                debug!(task = %task.name, "Not due this tick, skipping");
                tasks_skipped += 1;
                continue;
            }

            tasks_run += 1;
            match self.executor.run(task).await {
                Ok(run) => {
                    if let Err(e) = self.executor.append_master_log(&run) {
                        self.raise_severe(
                            &mut severe,
                            SevereError::new(Some(&task.name), e.to_string()),
                        )
                        .await;
                    }
                    failures.extend(run.failure_records());
                    match self.watcher.scan(&task.name) {
                        Ok(records) => failures.extend(records),
                        Err(e) => {
                            self.raise_severe(
                                &mut severe,
                                SevereError::new(Some(&task.name), e.to_string()),
                            )
                            .await;
                        }
                    }
                }
                Err(e) => {
                    // Could not log or launch at all: alert immediately,
                    // bypassing the normal pattern check
                    self.raise_severe(
                        &mut severe,
                        SevereError::new(Some(&task.name), e.to_string()),
                    )
                    .await;
                }
            }
        }

        let (digest_sent, suppressed) = match self.alerter.send_digest(&failures).await {
            Ok(DigestOutcome::Sent) => (true, false),
            Ok(DigestOutcome::Suppressed) => (false, true),
            Ok(DigestOutcome::NoFailures) => (false, false),
            Err(e) => {
                error!(error = %e, "Failed to send digest alert");
                (false, false)
            }
        };

        PassSummary {
            pass_id,
            started_at,
            tasks_run,
            tasks_skipped,
            failures,
            severe,
            digest_sent,
            suppressed,
        }
    }

    async fn raise_severe(&self, severe: &mut Vec<SevereError>, err: SevereError) {
        error!(task = ?err.task, message = %err.message, "Severe scheduler error");
        if let Err(e) = self.alerter.send_severe(&err).await {
            error!(error = %e, "Failed to send severe alert");
        }
        severe.push(err);
    }
}

/// Duration until the next minute boundary after `now`
pub fn seconds_until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute =
        u64::from(now.second()) * 1_000 + u64::from(now.timestamp_subsec_millis());
    Duration::from_millis(60_000u64.saturating_sub(into_minute).max(1))
}
