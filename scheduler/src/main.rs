// Scheduler binary entry point

use common::alert::{LogNotifier, Notifier, SmtpNotifier};
use common::config::Settings;
use common::scheduler::SchedulerEngine;
use common::substitution::env_snapshot;
use common::taskfile::TaskFile;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration first so the log level is honored
    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Failed to load settings ({}), using defaults", e);
        Settings::default()
    });

    common::telemetry::init_logging(&settings.observability.log_level)?;

    info!("Starting task scheduler");

    if let Err(e) = settings.validate() {
        error!(error = %e, "Invalid settings");
        return Err(e.into());
    }

    // An explicit CLI argument overrides the configured task-file path
    let taskfile_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.scheduler.taskfile.clone());

    info!(taskfile = %taskfile_path.display(), "Loading task file");
    let env = env_snapshot();
    let taskfile = TaskFile::load(&taskfile_path, &env).map_err(|e| {
        error!(error = %e, "Failed to load task file");
        e
    })?;

    info!(
        tasks = taskfile.tasks.len(),
        loop_count = taskfile.global.loop_count,
        log_dir = %taskfile.global.log_dir.display(),
        recipients = taskfile.global.alert.len(),
        "Task file loaded"
    );

    // Alerts go over SMTP when a relay is configured, otherwise to the log
    let notifier: Arc<dyn Notifier> = if settings.smtp.enabled {
        Arc::new(SmtpNotifier::new(&settings.smtp).map_err(|e| {
            error!(error = %e, "Failed to initialize SMTP notifier");
            e
        })?)
    } else {
        warn!("SMTP disabled, alerts will be written to the log");
        Arc::new(LogNotifier)
    };

    let mut engine = SchedulerEngine::new(taskfile, notifier).map_err(|e| {
        error!(error = %e, "Failed to initialize scheduler engine");
        e
    })?;
    info!("Scheduler engine created");

    // Graceful shutdown on Ctrl+C: finish the current pass, skip the rest
    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C signal, initiating graceful shutdown");
            shutdown();
        }
    });

    let summaries = engine.start().await.map_err(|e| {
        error!(error = %e, "Scheduler error");
        e
    })?;

    let failures: usize = summaries.iter().map(|s| s.failures.len()).sum();
    let severe: usize = summaries.iter().map(|s| s.severe.len()).sum();
    info!(
        passes = summaries.len(),
        failures = failures,
        severe = severe,
        "Scheduler finished"
    );

    Ok(())
}
