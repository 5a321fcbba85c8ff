use crate::schedule::CronExpr;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// Helper functions for Tz serialization
fn serialize_tz<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&tz.to_string())
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Tz::from_str(&s).map_err(serde::de::Error::custom)
}

fn default_timezone() -> Tz {
    chrono_tz::UTC
}

// ============================================================================
// Task-file models
// ============================================================================

/// Process-wide settings from the task file's top-level key-value block
///
/// Loaded once per run, immutable thereafter. All paths are absolute by the
/// time this struct exists: `$ENV{NAME}` references are interpolated and
/// relative paths resolved during parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Subject line for alert emails
    pub subject: String,
    /// Alert recipient addresses
    pub alert: Vec<String>,
    /// Default per-task timeout in seconds
    pub timeout_seconds: u64,
    /// Maximum allowed age of the heartbeat file in seconds
    pub heartbeat_timeout_seconds: u64,
    /// How many times to run the full task list per invocation
    pub loop_count: u32,
    /// Echo every matched error line into the alert body (vs per-task counts)
    pub print_error: bool,
    /// Data directory root
    pub data_dir: PathBuf,
    /// Log directory root
    pub log_dir: PathBuf,
    /// Directory prepended to PATH for task commands
    pub bin_dir: PathBuf,
    /// Master log aggregating all task runs
    pub master_log: PathBuf,
    /// Liveness marker file
    pub heartbeat: PathBuf,
    /// Alert-suppression marker file
    pub disable_alerts: PathBuf,
    /// Timezone in which cron fields are evaluated
    #[serde(
        serialize_with = "serialize_tz",
        deserialize_with = "deserialize_tz",
        default = "default_timezone"
    )]
    pub timezone: Tz,
}

/// Where a task's combined command output goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogDestination {
    /// `<task_name>.log` under the log directory
    Default,
    /// Explicit path (resolved under the log directory when relative)
    Path { path: PathBuf },
    /// Output is discarded and no pattern check is possible
    Disabled,
}

/// A named, ordered list of shell commands run together on a schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    /// Shell-invocable command strings, run sequentially in order
    pub commands: Vec<String>,
    /// Primary schedule expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<CronExpr>,
    /// Gating expression evaluated before execution is attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_cron: Option<CronExpr>,
    /// When set, a failing command aborts the remaining commands of this run
    pub context: bool,
    pub log: LogDestination,
    /// Per-task timeout override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    pub error_rules: Vec<ErrorRule>,
}

impl Task {
    /// Resolved log path, or None when logging is disabled
    pub fn log_path(&self, global: &GlobalConfig) -> Option<PathBuf> {
        match &self.log {
            LogDestination::Default => {
                Some(global.log_dir.join(format!("{}.log", self.name)))
            }
            LogDestination::Path { path } => Some(resolve_under(&global.log_dir, path)),
            LogDestination::Disabled => None,
        }
    }

    /// Effective timeout for this task
    pub fn timeout(&self, global: &GlobalConfig) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(global.timeout_seconds))
    }

    /// Whether this task is eligible to run at the given instant
    ///
    /// When both `cron` and `check_cron` are present, both must match; a
    /// missing expression matches every tick, so a task with neither runs on
    /// every pass.
    pub fn is_due(&self, at: DateTime<Tz>) -> bool {
        let check_ok = self
            .check_cron
            .as_ref()
            .map(|c| c.matches_at(at.clone()))
            .unwrap_or(true);
        let cron_ok = self
            .cron
            .as_ref()
            .map(|c| c.matches_at(at))
            .unwrap_or(true);
        check_ok && cron_ok
    }
}

/// A target log file plus the patterns that mark a failed run
///
/// A rule matches when any pattern matches any line appended since the last
/// check; the first matching pattern wins per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRule {
    pub file: PathBuf,
    pub patterns: Vec<String>,
}

/// Resolve a path under a root unless it is already absolute
pub fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

// ============================================================================
// Execution models
// ============================================================================

/// Outcome of a single command within a task run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Failed { code: Option<i32> },
    TimedOut,
    /// Not executed because an earlier command failed (context set) or the
    /// task deadline had already expired
    Skipped,
}

/// One executed (or skipped) command with its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRun {
    pub command: String,
    pub status: CommandStatus,
}

/// Result of one task run within a pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub commands: Vec<CommandRun>,
    /// Log content appended by this run, copied into the master log
    pub log_segment: String,
}

impl TaskRun {
    /// Execution-level failure records (exit status, timeout) for this run
    pub fn failure_records(&self) -> Vec<FailureRecord> {
        self.commands
            .iter()
            .filter_map(|c| match &c.status {
                CommandStatus::Failed { code } => Some(FailureKind::ExitStatus {
                    command: c.command.clone(),
                    code: *code,
                }),
                CommandStatus::TimedOut => None, // reported once per run below
                _ => None,
            })
            .chain(
                self.commands
                    .iter()
                    .find(|c| c.status == CommandStatus::TimedOut)
                    .map(|c| FailureKind::Timeout {
                        command: c.command.clone(),
                    }),
            )
            .map(|kind| FailureRecord {
                task: self.task.clone(),
                kind,
                at: self.started_at,
            })
            .collect()
    }

    pub fn succeeded(&self) -> bool {
        self.commands
            .iter()
            .all(|c| c.status == CommandStatus::Success)
    }
}

// ============================================================================
// Failure models
// ============================================================================

/// What kind of failure a record describes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// An error pattern matched a newly appended log line
    Pattern {
        file: PathBuf,
        pattern: String,
        line: String,
    },
    /// A command exited non-zero
    ExitStatus {
        command: String,
        code: Option<i32>,
    },
    /// The task exceeded its timeout and was terminated
    Timeout { command: String },
}

/// A single failure observed during a pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub task: String,
    pub kind: FailureKind,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    /// One-line description used in alert bodies and logs
    pub fn describe(&self) -> String {
        match &self.kind {
            FailureKind::Pattern {
                file,
                pattern,
                line,
            } => format!(
                "task {}: pattern '{}' matched in {}: {}",
                self.task,
                pattern,
                file.display(),
                line
            ),
            FailureKind::ExitStatus { command, code } => match code {
                Some(code) => {
                    format!("task {}: command '{}' exited {}", self.task, command, code)
                }
                None => format!(
                    "task {}: command '{}' killed by signal",
                    self.task, command
                ),
            },
            FailureKind::Timeout { command } => format!(
                "task {}: timed out while running '{}'",
                self.task, command
            ),
        }
    }
}

/// An infrastructure-level failure that always alerts immediately
///
/// Log open failures, launch failures, and heartbeat staleness bypass the
/// disable-alerts marker: they mean the scheduler itself may be unable to
/// report through the normal channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SevereError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SevereError {
    pub fn new(task: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            task: task.map(str::to_string),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Result of one full pass over the task list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassSummary {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub tasks_run: usize,
    pub tasks_skipped: usize,
    pub failures: Vec<FailureRecord>,
    pub severe: Vec<SevereError>,
    /// Whether a digest was sent (false when no failures, or suppressed)
    pub digest_sent: bool,
    /// Whether the disable-alerts marker suppressed a digest
    pub suppressed: bool,
}
