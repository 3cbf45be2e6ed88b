//! Audit log — one record per execution-gateway invocation.
//!
//! Every invocation, whatever its outcome, appends exactly one
//! [`ExecutionRecord`]. The log lives in memory behind a mutex and is
//! mirrored to disk as a single JSON array, rewritten in full on each
//! append and capped at the most recent 1,000 entries. Persistence is
//! best effort: a write failure is logged and swallowed, never surfaced
//! to the invocation that triggered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Most recent entries kept; older ones are dropped on append.
pub const AUDIT_LOG_CAP: usize = 1_000;

/// Terminal status of one gateway invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Recorded before execution when nothing has been decided yet.
    Attempted,
    Success,
    /// Failed validation (unknown or disallowed action).
    Rejected,
    RateLimited,
    /// User declined confirmation. Not an error.
    Cancelled,
    /// The action itself failed.
    ExecutionError,
    /// Dry-run mode: gates walked, execution skipped.
    DryRun,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Attempted => "attempted",
            RecordStatus::Success => "success",
            RecordStatus::Rejected => "rejected",
            RecordStatus::RateLimited => "rate-limited",
            RecordStatus::Cancelled => "cancelled",
            RecordStatus::ExecutionError => "execution-error",
            RecordStatus::DryRun => "dry-run",
        }
    }
}

/// Who asked for the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorSource {
    /// An interactive user at the CLI.
    Human,
    /// The agent loop or a scheduled heartbeat run.
    Agent,
}

/// One audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,

    /// Session name the invocation belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    pub user: String,
    pub host: String,
    pub source: ActorSource,

    /// The action text, e.g. `delete_file(path=/tmp/x)`.
    pub action: String,

    pub status: RecordStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Whether the user (or auto-confirm) approved a prompting tier.
    pub confirmed: bool,

    pub duration_ms: u64,
}

impl ExecutionRecord {
    /// A fresh record with ambient context filled in and status
    /// `Attempted`; the gateway finalizes the rest.
    pub fn new(action: impl Into<String>, source: ActorSource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session: None,
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".into()),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into()),
            source,
            action: action.into(),
            status: RecordStatus::Attempted,
            output: None,
            error: None,
            confirmed: false,
            duration_ms: 0,
        }
    }
}

/// The capped, persisted audit log.
pub struct AuditLog {
    path: Option<PathBuf>,
    entries: Mutex<Vec<ExecutionRecord>>,
}

impl AuditLog {
    /// Open the log at `path`, loading any existing entries. A corrupt
    /// or missing file starts the log empty.
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    /// Memory-only log (tests, ephemeral runs).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn load_from_disk(path: &PathBuf) -> Vec<ExecutionRecord> {
        let raw = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<ExecutionRecord>>(&raw) {
            Ok(mut entries) => {
                if entries.len() > AUDIT_LOG_CAP {
                    let excess = entries.len() - AUDIT_LOG_CAP;
                    entries.drain(..excess);
                }
                entries
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt audit log, starting empty");
                Vec::new()
            }
        }
    }

    /// Append one record, enforce the cap, and rewrite the file.
    pub fn append(&self, record: ExecutionRecord) {
        info!(
            action = %record.action,
            status = record.status.as_str(),
            source = ?record.source,
            duration_ms = record.duration_ms,
            "AUDIT"
        );

        let snapshot = {
            let mut entries = self.entries.lock().unwrap();
            entries.push(record);
            if entries.len() > AUDIT_LOG_CAP {
                let excess = entries.len() - AUDIT_LOG_CAP;
                entries.drain(..excess);
            }
            entries.clone()
        };

        if let Some(path) = &self.path {
            if let Err(e) = Self::persist(path, &snapshot) {
                warn!(path = %path.display(), error = %e, "Audit log write failed");
            }
        }
    }

    fn persist(path: &PathBuf, entries: &[ExecutionRecord]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(path, json)
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<ExecutionRecord> {
        self.entries.lock().unwrap().clone()
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<ExecutionRecord> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().take(n).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
