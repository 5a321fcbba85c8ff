// Alert suppression marker
//
// A filesystem-level boolean: the marker's mere presence silences digest
// alerts. It must persist across process invocations and is typically
// created by an operator and removed by a scheduled task, so it is modeled
// as an external resource with read/create/delete operations rather than as
// in-process state. The runner only ever reads it.

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Handle on the disable-alerts marker file
#[derive(Debug, Clone)]
pub struct AlertSwitch {
    path: PathBuf,
}

impl AlertSwitch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether digest alerts are currently suppressed
    pub fn is_disabled(&self) -> bool {
        self.path.exists()
    }

    /// Create the marker, silencing digest alerts until cleared
    pub fn disable(&self) -> io::Result<()> {
        std::fs::write(&self.path, format!("disabled {}\n", Utc::now().to_rfc3339()))?;
        info!(path = %self.path.display(), "Alerts disabled");
        Ok(())
    }

    /// Remove the marker; a missing marker is not an error
    pub fn enable(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Alerts re-enabled");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
