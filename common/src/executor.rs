// Task executor
//
// Runs a task's commands sequentially via /bin/sh with combined stdout/stderr
// redirected to the task's log file, a single deadline across the whole
// command list, and forced termination of the child on timeout.

use crate::errors::ExecutionError;
use crate::models::{CommandRun, CommandStatus, GlobalConfig, Task, TaskRun};
use chrono::Utc;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument, warn};

/// Executes task command lists against a loaded global configuration
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    global: GlobalConfig,
}

impl TaskExecutor {
    pub fn new(global: GlobalConfig) -> Self {
        Self { global }
    }

    /// Run all of a task's commands for one tick
    ///
    /// Returns `Ok` with per-command outcomes for ordinary failures (non-zero
    /// exit, timeout). An `Err` is severe: the log could not be opened or a
    /// command could not be launched at all.
    #[instrument(skip(self, task), fields(task = %task.name))]
    pub async fn run(&self, task: &Task) -> Result<TaskRun, ExecutionError> {
        let started_at = Utc::now();
        let log_path = task.log_path(&self.global);

        let mut log_file = match &log_path {
            Some(path) => Some(open_log(path)?),
            None => None,
        };
        let log_offset = match (&log_file, &log_path) {
            (Some(file), Some(path)) => {
                file.metadata()
                    .map_err(|e| ExecutionError::LogOpenFailed {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?
                    .len()
            }
            _ => 0,
        };

        if let Some(file) = log_file.as_mut() {
            writeln!(file, "# {} task {}", started_at.to_rfc3339(), task.name)?;
        }

        let deadline = Instant::now() + task.timeout(&self.global);
        let timeout_secs = task.timeout(&self.global).as_secs();
        let mut commands = Vec::with_capacity(task.commands.len());
        let mut abort_rest = false;

        for command in &task.commands {
            if abort_rest {
                commands.push(CommandRun {
                    command: command.clone(),
                    status: CommandStatus::Skipped,
                });
                continue;
            }

            debug!(command = %command, "Running command");
            let status = self
                .run_command(command, log_file.as_ref(), deadline)
                .await?;

            match &status {
                CommandStatus::Failed { code } => {
                    warn!(command = %command, code = ?code, "Command failed");
                    // With context set, a failing command aborts the rest of
                    // this run; otherwise the remaining commands still execute
                    if task.context {
                        abort_rest = true;
                    }
                }
                CommandStatus::TimedOut => {
                    warn!(
                        command = %command,
                        timeout_secs = timeout_secs,
                        "Task deadline expired, child terminated"
                    );
                    abort_rest = true;
                }
                _ => {}
            }

            commands.push(CommandRun {
                command: command.clone(),
                status,
            });
        }

        drop(log_file);
        let log_segment = match &log_path {
            Some(path) => read_segment(path, log_offset),
            None => String::new(),
        };

        let run = TaskRun {
            task: task.name.clone(),
            started_at,
            commands,
            log_segment,
        };
        info!(
            task = %task.name,
            succeeded = run.succeeded(),
            commands = run.commands.len(),
            "Task run finished"
        );
        Ok(run)
    }

    /// Spawn one command and wait for it under the shared deadline
    async fn run_command(
        &self,
        command: &str,
        log_file: Option<&std::fs::File>,
        deadline: Instant,
    ) -> Result<CommandStatus, ExecutionError> {
        let (stdout, stderr) = match log_file {
            Some(file) => {
                let clone_err = |e: std::io::Error| ExecutionError::SpawnFailed {
                    command: command.to_string(),
                    reason: e.to_string(),
                };
                (
                    Stdio::from(file.try_clone().map_err(clone_err)?),
                    Stdio::from(file.try_clone().map_err(clone_err)?),
                )
            }
            None => (Stdio::null(), Stdio::null()),
        };

        let path_var = match std::env::var("PATH") {
            Ok(path) => format!("{}:{}", self.global.bin_dir.display(), path),
            Err(_) => self.global.bin_dir.display().to_string(),
        };

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .env("PATH", path_var)
            .current_dir(&self.global.data_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(CommandStatus::Success),
            Ok(Ok(status)) => Ok(CommandStatus::Failed {
                code: status.code(),
            }),
            Ok(Err(e)) => Err(ExecutionError::Io(e)),
            Err(_) => {
                // Deadline expired mid-command: kill the child process tree
                if let Err(e) = child.start_kill() {
                    warn!(command = %command, error = %e, "Failed to kill timed-out child");
                }
                let _ = child.wait().await;
                Ok(CommandStatus::TimedOut)
            }
        }
    }

    /// Append a run's log segment to the master log under a task header
    pub fn append_master_log(&self, run: &TaskRun) -> Result<(), ExecutionError> {
        let path = &self.global.master_log;
        let master_err = |e: std::io::Error| ExecutionError::MasterLogFailed {
            path: path.clone(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(master_err)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(master_err)?;

        writeln!(
            file,
            ">>> {} task {}",
            run.started_at.to_rfc3339(),
            run.task
        )
        .map_err(master_err)?;
        file.write_all(run.log_segment.as_bytes()).map_err(master_err)?;
        if !run.log_segment.ends_with('\n') {
            writeln!(file).map_err(master_err)?;
        }
        Ok(())
    }
}

fn open_log(path: &Path) -> Result<std::fs::File, ExecutionError> {
    let open_err = |e: std::io::Error| ExecutionError::LogOpenFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(open_err)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(open_err)
}

fn read_segment(path: &Path, offset: u64) -> String {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return String::new(),
    };
    if file.seek(SeekFrom::Start(offset)).is_err() {
        return String::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}
