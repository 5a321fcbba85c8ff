// Common library for shared code across the scheduler binary and tests

pub mod alert;
pub mod config;
pub mod errors;
pub mod executor;
pub mod heartbeat;
pub mod models;
pub mod schedule;
pub mod scheduler;
pub mod substitution;
pub mod suppress;
pub mod taskfile;
pub mod telemetry;
pub mod watcher;
