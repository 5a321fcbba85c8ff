// Task-file loading and parsing
//
// The task file is line-oriented: a top-level key-value block for global
// settings plus repeated `task <name> { ... }` blocks. `$ENV{NAME}` references
// in directory, exec, and log fields are interpolated against an environment
// snapshot at load time, so the loaded definitions are immutable and fully
// resolved.

use crate::errors::ConfigError;
use crate::models::{resolve_under, ErrorRule, GlobalConfig, LogDestination, Task};
use crate::substitution::EnvInterpolator;
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// A fully loaded and validated task file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFile {
    pub global: GlobalConfig,
    pub tasks: Vec<Task>,
}

impl TaskFile {
    /// Read and parse a task file from disk
    pub fn load(path: &Path, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file = parse(&content, env)?;
        info!(
            path = %path.display(),
            tasks = file.tasks.len(),
            "Task file loaded"
        );
        Ok(file)
    }

    /// Look up a task by name
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

fn err(line: usize, message: impl Into<String>) -> ConfigError {
    ConfigError::ParseError {
        line,
        message: message.into(),
    }
}

#[derive(Debug, PartialEq)]
enum State {
    Top,
    Task,
    Check,
    Error,
}

#[derive(Debug, Default)]
struct RawTask {
    name: String,
    line: usize,
    commands: Vec<String>,
    cron: Option<String>,
    check_cron: Option<String>,
    context: bool,
    log: Option<LogDestination>,
    timeout_seconds: Option<u64>,
    /// (file, pattern) pairs in file order
    rules: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct RawGlobal {
    pairs: Vec<(usize, String, String)>,
}

/// Parse task-file content against an environment snapshot
pub fn parse(content: &str, env: &HashMap<String, String>) -> Result<TaskFile, ConfigError> {
    let interp = EnvInterpolator::new()?;

    let mut state = State::Top;
    let mut global = RawGlobal::default();
    let mut tasks: Vec<RawTask> = Vec::new();
    let mut current: Option<RawTask> = None;
    let mut last_line = 0;

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match state {
            State::Top => {
                if let Some(rest) = line.strip_prefix("task ") {
                    let name = rest
                        .trim()
                        .strip_suffix('{')
                        .ok_or_else(|| err(line_no, "expected '{' after task name"))?
                        .trim()
                        .to_string();
                    if name.is_empty() {
                        return Err(err(line_no, "task name is empty"));
                    }
                    if tasks.iter().any(|t: &RawTask| t.name == name) {
                        return Err(err(line_no, format!("duplicate task '{}'", name)));
                    }
                    current = Some(RawTask {
                        name,
                        line: line_no,
                        ..RawTask::default()
                    });
                    state = State::Task;
                } else {
                    let (key, value) = split_pair(line, line_no)?;
                    global.pairs.push((line_no, key, value));
                }
            }
            State::Task => {
                if line == "}" {
                    tasks.push(current.take().ok_or_else(|| err(line_no, "no open task"))?);
                    state = State::Top;
                } else if line == "check {" {
                    state = State::Check;
                } else {
                    let task =
                        current.as_mut().ok_or_else(|| err(line_no, "no open task"))?;
                    let (key, value) = split_pair(line, line_no)?;
                    apply_task_key(task, &key, &value, line_no, &interp, env)?;
                }
            }
            State::Check => {
                if line == "}" {
                    state = State::Task;
                } else if line == "error {" {
                    state = State::Error;
                } else {
                    return Err(err(line_no, "expected 'error {' or '}' inside check block"));
                }
            }
            State::Error => {
                if line == "}" {
                    state = State::Check;
                } else {
                    let task =
                        current.as_mut().ok_or_else(|| err(line_no, "no open task"))?;
                    let (file, pattern) = split_pair(line, line_no)?;
                    let file = interp.interpolate(&file, env)?;
                    Regex::new(&pattern).map_err(|e| ConfigError::InvalidPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })?;
                    task.rules.push((file, pattern));
                }
            }
        }
    }

    if state != State::Top {
        return Err(err(last_line, "unclosed block at end of file"));
    }

    let global = build_global(global, &interp, env)?;
    let tasks = tasks
        .into_iter()
        .map(|raw| finish_task(raw, &global))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TaskFile { global, tasks })
}

fn split_pair(line: &str, line_no: usize) -> Result<(String, String), ConfigError> {
    let (key, value) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| err(line_no, format!("expected 'key value', got '{}'", line)))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(err(line_no, format!("missing value for '{}'", key)));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_u64(value: &str, key: &str, line_no: usize) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| err(line_no, format!("invalid number for '{}': '{}'", key, value)))
}

fn parse_flag(value: &str, key: &str, line_no: usize) -> Result<bool, ConfigError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(err(
            line_no,
            format!("invalid value for '{}': expected 0 or 1, got '{}'", key, value),
        )),
    }
}

fn apply_task_key(
    task: &mut RawTask,
    key: &str,
    value: &str,
    line_no: usize,
    interp: &EnvInterpolator,
    env: &HashMap<String, String>,
) -> Result<(), ConfigError> {
    let unique = |slot_taken: bool| -> Result<(), ConfigError> {
        if slot_taken {
            Err(err(line_no, format!("duplicate key '{}'", key)))
        } else {
            Ok(())
        }
    };

    match key {
        "exec" => {
            task.commands.push(interp.interpolate(value, env)?);
        }
        "cron" => {
            unique(task.cron.is_some())?;
            task.cron = Some(value.to_string());
        }
        "check_cron" => {
            unique(task.check_cron.is_some())?;
            task.check_cron = Some(value.to_string());
        }
        "context" => {
            task.context = parse_flag(value, key, line_no)?;
        }
        "log" => {
            unique(task.log.is_some())?;
            task.log = Some(if value == "none" {
                LogDestination::Disabled
            } else {
                LogDestination::Path {
                    path: PathBuf::from(interp.interpolate(value, env)?),
                }
            });
        }
        "timeout" => {
            unique(task.timeout_seconds.is_some())?;
            task.timeout_seconds = Some(parse_u64(value, key, line_no)?);
        }
        _ => {
            return Err(err(
                line_no,
                format!("unknown key '{}' in task '{}'", key, task.name),
            ));
        }
    }
    Ok(())
}

fn build_global(
    raw: RawGlobal,
    interp: &EnvInterpolator,
    env: &HashMap<String, String>,
) -> Result<GlobalConfig, ConfigError> {
    let mut subject: Option<String> = None;
    let mut alert: Vec<String> = Vec::new();
    let mut timeout_seconds: Option<u64> = None;
    let mut heartbeat_timeout_seconds: Option<u64> = None;
    let mut loop_count: Option<u32> = None;
    let mut print_error: Option<bool> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut log_dir: Option<PathBuf> = None;
    let mut bin_dir: Option<PathBuf> = None;
    let mut master_log: Option<PathBuf> = None;
    let mut heartbeat: Option<PathBuf> = None;
    let mut disable_alerts: Option<PathBuf> = None;
    let mut timezone: Option<Tz> = None;

    for (line_no, key, value) in raw.pairs {
        let unique = |taken: bool| -> Result<(), ConfigError> {
            if taken {
                Err(err(line_no, format!("duplicate key '{}'", key)))
            } else {
                Ok(())
            }
        };

        match key.as_str() {
            "subject" => {
                unique(subject.is_some())?;
                subject = Some(value);
            }
            // Repeatable; a single line may also carry several addresses
            "alert" => {
                alert.extend(value.split_whitespace().map(str::to_string));
            }
            "timeout" => {
                unique(timeout_seconds.is_some())?;
                timeout_seconds = Some(parse_u64(&value, &key, line_no)?);
            }
            "heartbeat_timeout" => {
                unique(heartbeat_timeout_seconds.is_some())?;
                heartbeat_timeout_seconds = Some(parse_u64(&value, &key, line_no)?);
            }
            "loop_count" => {
                unique(loop_count.is_some())?;
                loop_count = Some(parse_u64(&value, &key, line_no)? as u32);
            }
            "print_error" => {
                unique(print_error.is_some())?;
                print_error = Some(parse_flag(&value, &key, line_no)?);
            }
            "data_dir" => {
                unique(data_dir.is_some())?;
                data_dir = Some(PathBuf::from(interp.interpolate(&value, env)?));
            }
            "log_dir" => {
                unique(log_dir.is_some())?;
                log_dir = Some(PathBuf::from(interp.interpolate(&value, env)?));
            }
            "bin_dir" => {
                unique(bin_dir.is_some())?;
                bin_dir = Some(PathBuf::from(interp.interpolate(&value, env)?));
            }
            "master_log" => {
                unique(master_log.is_some())?;
                master_log = Some(PathBuf::from(interp.interpolate(&value, env)?));
            }
            "heartbeat" => {
                unique(heartbeat.is_some())?;
                heartbeat = Some(PathBuf::from(interp.interpolate(&value, env)?));
            }
            "disable_alerts" => {
                unique(disable_alerts.is_some())?;
                disable_alerts = Some(PathBuf::from(interp.interpolate(&value, env)?));
            }
            "timezone" => {
                unique(timezone.is_some())?;
                timezone = Some(Tz::from_str(&value).map_err(|_| {
                    err(line_no, format!("invalid timezone '{}'", value))
                })?);
            }
            _ => {
                return Err(err(line_no, format!("unknown global key '{}'", key)));
            }
        }
    }

    let data_dir =
        data_dir.ok_or_else(|| ConfigError::InvalidConfiguration("data_dir is required".into()))?;
    let log_dir = log_dir
        .map(|p| resolve_under(&data_dir, &p))
        .unwrap_or_else(|| data_dir.join("logs"));
    let bin_dir = bin_dir
        .map(|p| resolve_under(&data_dir, &p))
        .unwrap_or_else(|| data_dir.join("bin"));
    let master_log = resolve_under(
        &log_dir,
        &master_log.unwrap_or_else(|| PathBuf::from("master.log")),
    );
    let heartbeat = resolve_under(
        &data_dir,
        &heartbeat.unwrap_or_else(|| PathBuf::from("heartbeat")),
    );
    let disable_alerts = resolve_under(
        &data_dir,
        &disable_alerts.unwrap_or_else(|| PathBuf::from("disable_alerts")),
    );

    let loop_count = loop_count.unwrap_or(1);
    if loop_count == 0 {
        return Err(ConfigError::InvalidConfiguration(
            "loop_count must be greater than 0".into(),
        ));
    }
    let timeout_seconds = timeout_seconds.unwrap_or(600);
    if timeout_seconds == 0 {
        return Err(ConfigError::InvalidConfiguration(
            "timeout must be greater than 0".into(),
        ));
    }

    Ok(GlobalConfig {
        subject: subject.unwrap_or_else(|| "Task schedule alert".to_string()),
        alert,
        timeout_seconds,
        heartbeat_timeout_seconds: heartbeat_timeout_seconds.unwrap_or(3600),
        loop_count,
        print_error: print_error.unwrap_or(true),
        data_dir,
        log_dir,
        bin_dir,
        master_log,
        heartbeat,
        disable_alerts,
        timezone: timezone.unwrap_or(chrono_tz::UTC),
    })
}

fn finish_task(raw: RawTask, global: &GlobalConfig) -> Result<Task, ConfigError> {
    if raw.commands.is_empty() {
        return Err(err(
            raw.line,
            format!("task '{}' has no exec commands", raw.name),
        ));
    }

    let cron = raw
        .cron
        .map(|s| s.parse::<crate::schedule::CronExpr>())
        .transpose()
        .map_err(ConfigError::Schedule)?;
    let check_cron = raw
        .check_cron
        .map(|s| s.parse::<crate::schedule::CronExpr>())
        .transpose()
        .map_err(ConfigError::Schedule)?;

    // Error lines for the same file aggregate into one rule, file order kept
    let mut error_rules: Vec<ErrorRule> = Vec::new();
    for (file, pattern) in raw.rules {
        let file = resolve_under(&global.log_dir, Path::new(&file));
        match error_rules.iter_mut().find(|r| r.file == file) {
            Some(rule) => rule.patterns.push(pattern),
            None => error_rules.push(ErrorRule {
                file,
                patterns: vec![pattern],
            }),
        }
    }

    Ok(Task {
        name: raw.name,
        commands: raw.commands,
        cron,
        check_cron,
        context: raw.context,
        log: raw.log.unwrap_or(LogDestination::Default),
        timeout_seconds: raw.timeout_seconds,
        error_rules,
    })
}
