// Error handling framework

use std::path::PathBuf;
use thiserror::Error;

/// Task-file and settings loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read task file '{path}': {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error("Invalid error pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Cron expression '{expression}' has {found} fields, expected 5")]
    WrongFieldCount { expression: String, found: usize },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Environment interpolation errors
#[derive(Error, Debug)]
pub enum SubstitutionError {
    #[error("Undefined environment variable(s) in template: {variables:?}. Template: {template}")]
    UndefinedVariable {
        variables: Vec<String>,
        template: String,
    },

    #[error("Regex compilation error: {0}")]
    RegexError(String),
}

/// Task execution errors
///
/// `LogOpenFailed` and `SpawnFailed` are severe: they mean the task could not
/// even produce a log to watch, so they are alerted immediately instead of
/// going through the pattern check.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to open log file '{path}': {reason}")]
    LogOpenFailed { path: PathBuf, reason: String },

    #[error("Failed to launch command '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Execution timeout after {0} seconds")]
    Timeout(u64),

    #[error("Failed to append to master log '{path}': {reason}")]
    MasterLogFailed { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Log watching errors
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to read log file '{path}': {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Invalid error pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Alert delivery errors
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Invalid alert address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build alert message: {0}")]
    BuildFailed(String),

    #[error("Failed to send alert: {0}")]
    SendFailed(String),

    #[error("No alert recipients configured")]
    NoRecipients,
}
