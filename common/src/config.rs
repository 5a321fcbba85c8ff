// Process configuration with layered sources (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main settings structure for the scheduler process
///
/// These are deployment-level knobs (where the task file lives, how alert
/// mail leaves the box, log verbosity). The task file itself carries the
/// scheduling policy and is loaded separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub smtp: SmtpConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Path to the task file
    pub taskfile: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// When false, alerts go to the structured log instead of SMTP
    #[serde(default)]
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// From address for alert mail
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.scheduler.taskfile.as_os_str().is_empty() {
            return Err("Task file path cannot be empty".to_string());
        }

        if self.smtp.enabled {
            if self.smtp.host.is_empty() {
                return Err("SMTP host cannot be empty when SMTP is enabled".to_string());
            }
            if self.smtp.port == 0 {
                return Err("SMTP port must be greater than 0".to_string());
            }
            if self.smtp.from.is_empty() {
                return Err("SMTP from address cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings {
                taskfile: PathBuf::from("config/tasks.cfg"),
            },
            smtp: SmtpConfig {
                enabled: false,
                host: "localhost".to_string(),
                port: 25,
                from: "task-scheduler@localhost".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_taskfile() {
        let mut settings = Settings::default();
        settings.scheduler.taskfile = PathBuf::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_enabled_smtp_without_host() {
        let mut settings = Settings::default();
        settings.smtp.enabled = true;
        settings.smtp.host = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_smtp_port() {
        let mut settings = Settings::default();
        settings.smtp.enabled = true;
        settings.smtp.port = 0;
        assert!(settings.validate().is_err());
    }
}
