// Log watcher
//
// Scans each task's log output against its error rules after every run.
// Only lines appended since the last check are examined: a byte offset per
// target file is primed at engine start, so historical log content never
// produces failure records.

use crate::errors::WatchError;
use crate::models::{FailureKind, FailureRecord, Task};
use chrono::Utc;
use regex::RegexSet;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// An error rule with its patterns compiled for matching
#[derive(Debug)]
struct CompiledRule {
    file: PathBuf,
    patterns: Vec<String>,
    set: RegexSet,
}

/// Offset-tracking scanner over the task logs
#[derive(Debug)]
pub struct LogWatcher {
    /// Rules per task, in task-file order
    rules: HashMap<String, Vec<CompiledRule>>,
    /// Byte offset of the next unscanned position per target file
    offsets: HashMap<PathBuf, u64>,
}

impl LogWatcher {
    /// Compile all task rules and prime offsets at the current file lengths
    pub fn new(tasks: &[Task]) -> Result<Self, WatchError> {
        let mut rules: HashMap<String, Vec<CompiledRule>> = HashMap::new();
        let mut offsets: HashMap<PathBuf, u64> = HashMap::new();

        for task in tasks {
            let mut compiled = Vec::with_capacity(task.error_rules.len());
            for rule in &task.error_rules {
                let set = RegexSet::new(&rule.patterns).map_err(|e| {
                    WatchError::InvalidPattern {
                        pattern: rule.patterns.join(", "),
                        reason: e.to_string(),
                    }
                })?;
                offsets
                    .entry(rule.file.clone())
                    .or_insert_with(|| file_len(&rule.file));
                compiled.push(CompiledRule {
                    file: rule.file.clone(),
                    patterns: rule.patterns.clone(),
                    set,
                });
            }
            rules.insert(task.name.clone(), compiled);
        }

        Ok(Self { rules, offsets })
    }

    /// Scan a task's rule targets for lines appended since the last check
    ///
    /// The first matching pattern wins per line: one line produces at most
    /// one failure record per rule.
    #[instrument(skip(self))]
    pub fn scan(&mut self, task_name: &str) -> Result<Vec<FailureRecord>, WatchError> {
        let rules = match self.rules.get(task_name) {
            Some(rules) => rules,
            None => return Ok(Vec::new()),
        };

        let mut records = Vec::new();
        for rule in rules {
            let offset = self.offsets.entry(rule.file.clone()).or_insert(0);
            let appended = read_appended(&rule.file, offset)?;
            if appended.is_empty() {
                continue;
            }
            debug!(
                file = %rule.file.display(),
                bytes = appended.len(),
                "Scanning appended log content"
            );

            for line in appended.lines() {
                if let Some(idx) = rule.set.matches(line).iter().next() {
                    records.push(FailureRecord {
                        task: task_name.to_string(),
                        kind: FailureKind::Pattern {
                            file: rule.file.clone(),
                            pattern: rule.patterns[idx].clone(),
                            line: line.to_string(),
                        },
                        at: Utc::now(),
                    });
                }
            }
        }

        Ok(records)
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read content appended past `offset`, advancing it
///
/// A file shorter than the stored offset was truncated and is rescanned from
/// the start. A missing file yields nothing.
fn read_appended(path: &Path, offset: &mut u64) -> Result<String, WatchError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => {
            return Err(WatchError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    let read_err = |e: std::io::Error| WatchError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let len = file.metadata().map_err(read_err)?.len();
    if len < *offset {
        *offset = 0;
    }
    if len == *offset {
        return Ok(String::new());
    }

    file.seek(SeekFrom::Start(*offset)).map_err(read_err)?;
    let mut buf = Vec::with_capacity((len - *offset) as usize);
    file.read_to_end(&mut buf).map_err(read_err)?;
    *offset = len;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorRule, LogDestination};
    use std::fs::OpenOptions;
    use std::io::Write;

    fn task_with_rules(name: &str, file: &Path, patterns: &[&str]) -> Task {
        Task {
            name: name.to_string(),
            commands: vec!["true".to_string()],
            cron: None,
            check_cron: None,
            context: false,
            log: LogDestination::Default,
            timeout_seconds: None,
            error_rules: vec![ErrorRule {
                file: file.to_path_buf(),
                patterns: patterns.iter().map(|p| p.to_string()).collect(),
            }],
        }
    }

    fn append(path: &Path, content: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_historical_content_is_not_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("t.log");
        append(&log, "failed before the watcher existed\n");

        let tasks = vec![task_with_rules("t", &log, &["failed"])];
        let mut watcher = LogWatcher::new(&tasks).unwrap();

        assert!(watcher.scan("t").unwrap().is_empty());
    }

    #[test]
    fn test_appended_line_produces_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("twiki-wg.log");
        let tasks = vec![task_with_rules("twiki-wg", &log, &["failed"])];
        let mut watcher = LogWatcher::new(&tasks).unwrap();

        append(&log, "scrape failed: connection reset\n");
        let records = watcher.scan("twiki-wg").unwrap();
        assert_eq!(records.len(), 1);
        match &records[0].kind {
            FailureKind::Pattern {
                file,
                pattern,
                line,
            } => {
                assert_eq!(file, &log);
                assert_eq!(pattern, "failed");
                assert_eq!(line, "scrape failed: connection reset");
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_scan_advances_offset() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("t.log");
        let tasks = vec![task_with_rules("t", &log, &["failed"])];
        let mut watcher = LogWatcher::new(&tasks).unwrap();

        append(&log, "failed once\n");
        assert_eq!(watcher.scan("t").unwrap().len(), 1);
        // Same content, nothing new appended
        assert!(watcher.scan("t").unwrap().is_empty());

        append(&log, "failed twice\n");
        assert_eq!(watcher.scan("t").unwrap().len(), 1);
    }

    #[test]
    fn test_first_matching_pattern_wins_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("t.log");
        let tasks = vec![task_with_rules("t", &log, &["fail", "warn"])];
        let mut watcher = LogWatcher::new(&tasks).unwrap();

        // Both patterns match this line; only the first is reported
        append(&log, "warn: fail imminent\n");
        let records = watcher.scan("t").unwrap();
        assert_eq!(records.len(), 1);
        match &records[0].kind {
            FailureKind::Pattern { pattern, .. } => assert_eq!(pattern, "fail"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_each_matching_line_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("t.log");
        let tasks = vec![task_with_rules("t", &log, &["failed"])];
        let mut watcher = LogWatcher::new(&tasks).unwrap();

        append(&log, "failed a\nok\nfailed b\n");
        assert_eq!(watcher.scan("t").unwrap().len(), 2);
    }

    #[test]
    fn test_truncated_file_rescans_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("t.log");
        let tasks = vec![task_with_rules("t", &log, &["failed"])];
        let mut watcher = LogWatcher::new(&tasks).unwrap();

        append(&log, "a long line of healthy output\n");
        assert!(watcher.scan("t").unwrap().is_empty());

        // Log rotation truncates the file; the shorter new content counts
        std::fs::write(&log, "failed\n").unwrap();
        assert_eq!(watcher.scan("t").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("never-created.log");
        let tasks = vec![task_with_rules("t", &log, &["failed"])];
        let mut watcher = LogWatcher::new(&tasks).unwrap();

        assert!(watcher.scan("t").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_task_yields_nothing() {
        let tasks: Vec<Task> = vec![];
        let mut watcher = LogWatcher::new(&tasks).unwrap();
        assert!(watcher.scan("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_regex_patterns_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("t.log");
        let tasks = vec![task_with_rules("t", &log, &[r"(?i)traceback", r"exit [1-9]"])];
        let mut watcher = LogWatcher::new(&tasks).unwrap();

        append(&log, "Traceback (most recent call last):\nexit 0\nexit 2\n");
        let records = watcher.scan("t").unwrap();
        assert_eq!(records.len(), 2);
    }
}
