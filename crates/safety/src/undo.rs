//! Reversible-operation history and the undo walk.
//!
//! Actions that change the filesystem hand the gateway a [`ReversibleOp`]
//! describing how to invert what they did. The history keeps the most
//! recent `capacity` of those, mirrored to disk as a JSON array the same
//! way the audit log is. `undo(count)` walks newest-first over entries not
//! yet undone and applies each inversion; an entry that cannot be inverted
//! (a delete that took no backup, a rename that failed) keeps
//! `undone == false` and is reported rather than silently skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use wardclaw_core::{ReversalKind, ReversibleOp, SafetyError};

/// One recorded reversible operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredReversal {
    pub id: String,
    pub timestamp: DateTime<Utc>,

    /// The action text that produced this, e.g. `move_file(from=a, to=b)`.
    pub action: String,

    pub op: ReversibleOp,

    /// Set once the inversion has been applied. Undone entries are never
    /// re-attempted.
    pub undone: bool,
}

/// The result of attempting to invert one entry.
#[derive(Debug, Clone, Serialize)]
pub struct UndoOutcome {
    pub action: String,
    pub kind: ReversalKind,
    pub target: PathBuf,
    pub undone: bool,
    pub detail: String,
}

/// Capped history of reversible operations.
pub struct UndoHistory {
    capacity: usize,
    path: Option<PathBuf>,
    entries: Mutex<VecDeque<StoredReversal>>,
}

impl UndoHistory {
    /// Open the history at `path`, loading any existing entries.
    pub fn new(path: PathBuf, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = Self::load_from_disk(&path);
        while entries.len() > capacity {
            entries.pop_front();
        }
        Self {
            capacity,
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    /// Memory-only history (tests, ephemeral runs).
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            path: None,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn load_from_disk(path: &Path) -> VecDeque<StoredReversal> {
        let raw = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return VecDeque::new(),
        };
        match serde_json::from_str::<Vec<StoredReversal>>(&raw) {
            Ok(entries) => entries.into(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt undo log, starting empty");
                VecDeque::new()
            }
        }
    }

    fn persist_locked(&self, entries: &VecDeque<StoredReversal>) {
        let Some(path) = &self.path else {
            return;
        };
        let snapshot: Vec<&StoredReversal> = entries.iter().collect();
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            std::fs::write(path, json)
        })();
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Undo log write failed");
        }
    }

    /// Record a reversible operation, dropping the oldest entry past
    /// capacity.
    pub fn record(&self, action: impl Into<String>, op: ReversibleOp) {
        let entry = StoredReversal {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: action.into(),
            op,
            undone: false,
        };
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        self.persist_locked(&entries);
    }

    /// Invert up to `count` of the newest operations not yet undone.
    ///
    /// Returns one outcome per entry attempted, newest first. An entry
    /// whose inversion fails (or that carries no way to invert) keeps
    /// `undone == false` and will be seen again by a later, wider undo.
    pub fn undo(&self, count: usize) -> Result<Vec<UndoOutcome>, SafetyError> {
        let mut entries = self.entries.lock().unwrap();

        let pending: Vec<usize> = entries
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, e)| !e.undone)
            .take(count)
            .map(|(i, _)| i)
            .collect();

        if pending.is_empty() {
            return Err(SafetyError::NothingToUndo);
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for index in pending {
            let entry = &mut entries[index];
            let (undone, detail) = apply_inversion(&entry.op);
            if undone {
                entry.undone = true;
                info!(action = %entry.action, "Undid operation");
            } else {
                warn!(action = %entry.action, detail = %detail, "Undo failed");
            }
            outcomes.push(UndoOutcome {
                action: entry.action.clone(),
                kind: entry.op.kind,
                target: entry.op.target.clone(),
                undone,
                detail,
            });
        }

        self.persist_locked(&entries);
        Ok(outcomes)
    }

    /// Entries still eligible for undo.
    pub fn pending_count(&self) -> usize {
        self.entries.lock().unwrap().iter().filter(|e| !e.undone).count()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<StoredReversal> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

/// Apply the inversion for one operation. Returns (undone, detail).
fn apply_inversion(op: &ReversibleOp) -> (bool, String) {
    match op.kind {
        ReversalKind::Create | ReversalKind::Copy => match std::fs::remove_file(&op.target) {
            Ok(()) => (true, format!("removed {}", op.target.display())),
            Err(e) => (false, format!("could not remove {}: {e}", op.target.display())),
        },
        ReversalKind::Move => {
            let Some(original) = &op.original else {
                return (false, "original location unknown".into());
            };
            match std::fs::rename(&op.target, original) {
                Ok(()) => (
                    true,
                    format!("moved {} back to {}", op.target.display(), original.display()),
                ),
                Err(e) => (
                    false,
                    format!("could not move {} back: {e}", op.target.display()),
                ),
            }
        }
        ReversalKind::Delete => {
            let Some(backup) = &op.backup else {
                return (false, "deleted without a backup; cannot restore".into());
            };
            match std::fs::rename(backup, &op.target) {
                Ok(()) => (true, format!("restored {}", op.target.display())),
                Err(e) => (
                    false,
                    format!("could not restore {}: {e}", op.target.display()),
                ),
            }
        }
    }
}
