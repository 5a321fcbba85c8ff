// Scheduler liveness marker
//
// The heartbeat file's age is the one signal that reaches a human even when
// everything else is silent: if the scheduler process hangs or dies, the file
// stops being touched and the next invocation raises a severe alert.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Handle on the heartbeat file with its staleness threshold
#[derive(Debug, Clone)]
pub struct Heartbeat {
    path: PathBuf,
    max_age: Duration,
}

impl Heartbeat {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Touch the marker, resetting its age
    pub fn beat(&self) -> io::Result<()> {
        std::fs::write(&self.path, format!("{}\n", chrono::Utc::now().to_rfc3339()))
    }

    /// Age of the marker beyond the threshold, if stale
    ///
    /// A missing marker means the scheduler has not run yet and is not
    /// treated as stale.
    pub fn staleness(&self) -> io::Result<Option<Duration>> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let modified = metadata.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.max_age {
            Ok(Some(age))
        } else {
            Ok(None)
        }
    }
}
