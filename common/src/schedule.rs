// Schedule parsing and matching module
//
// Task schedules use the classic five-field cron form
// (minute hour day-of-month month day-of-week) supporting `*` and lists.
// Matching is a pure function of (expression, timestamp) so it can be tested
// independently of execution.

use crate::errors::ScheduleError;
use chrono::{DateTime, TimeZone, Timelike};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A parsed five-field cron expression
///
/// The underlying `cron` crate expects a seconds field, so a literal `0` is
/// prefixed before parsing; a tick therefore matches at most once per minute.
#[derive(Debug, Clone)]
pub struct CronExpr {
    expression: String,
    schedule: CronSchedule,
}

impl CronExpr {
    /// The original five-field expression text
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Check whether this expression matches the given instant
    ///
    /// The instant is truncated to its minute before matching, so any time
    /// within a matching minute counts as a hit.
    pub fn matches_at<Tz: TimeZone>(&self, at: DateTime<Tz>) -> bool {
        let minute = at
            .clone()
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at);
        self.schedule.includes(minute)
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expression = s.trim().to_string();
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            let found = fields.len();
            return Err(ScheduleError::WrongFieldCount {
                expression,
                found,
            });
        }

        let with_seconds = format!("0 {}", fields.join(" "));
        let schedule = CronSchedule::from_str(&with_seconds).map_err(|e| {
            ScheduleError::InvalidCronExpression {
                expression: expression.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            expression,
            schedule,
        })
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Serialize for CronExpr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.expression)
    }
}

impl<'de> Deserialize<'de> for CronExpr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
