//! Per-job logger channel.
//!
//! Handler bodies log through [`JobContext::log`](crate::jobs::JobContext::log).
//! Each entry is published on the job's event stream and handed to a
//! [`LogSink`]; the default sink forwards to `tracing`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::jobs::types::JobName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub job: JobName,
    pub job_id: Uuid,
    pub timestamp: jiff::Timestamp,
}

/// Destination for job log entries
pub trait LogSink: Send + Sync {
    fn log(&self, entry: &LogEntry);
}

/// Forwards job log entries to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, entry: &LogEntry) {
        match entry.level {
            LogLevel::Debug => {
                tracing::debug!(job = %entry.job, job_id = %entry.job_id, "{}", entry.message)
            }
            LogLevel::Info => {
                tracing::info!(job = %entry.job, job_id = %entry.job_id, "{}", entry.message)
            }
            LogLevel::Warn => {
                tracing::warn!(job = %entry.job, job_id = %entry.job_id, "{}", entry.message)
            }
            LogLevel::Error => {
                tracing::error!(job = %entry.job, job_id = %entry.job_id, "{}", entry.message)
            }
        }
    }
}

impl LogSink for mpsc::UnboundedSender<LogEntry> {
    fn log(&self, entry: &LogEntry) {
        // A closed receiver only means nobody is collecting anymore
        let _ = self.send(entry.clone());
    }
}
