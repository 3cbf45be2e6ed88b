//! One-time import from the legacy flat-file session format.
//!
//! Earlier builds kept sessions under `~/.wardclaw/history/`: an
//! `index.json` array of session metadata plus one JSON transcript file
//! per session. On first start with an empty SQLite store the whole
//! directory is imported, then the index is renamed to
//! `index.json.migrated` so the import never runs twice. A session that
//! fails to parse is counted and skipped; it does not abort the rest.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};
use wardclaw_core::error::SessionError;
use wardclaw_core::message::{Message, Role};
use wardclaw_core::session::{SessionStore, SessionSummary};

use crate::store::SqliteSessionStore;

/// Index file name inside the legacy directory.
pub const LEGACY_INDEX_FILE: &str = "index.json";

/// Suffix appended to the index once the import has run.
pub const MIGRATED_SUFFIX: &str = ".migrated";

/// What the import did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub imported: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct LegacyIndexEntry {
    name: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    /// Transcript file name, relative to the legacy directory.
    file: String,
}

#[derive(Debug, Deserialize)]
struct LegacyMessage {
    role: String,
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Import legacy sessions if (and only if) the index exists and the
/// primary store is empty. Returns `Ok(None)` when nothing was attempted.
pub async fn migrate_if_needed(
    store: &SqliteSessionStore,
    legacy_dir: &Path,
) -> Result<Option<MigrationReport>, SessionError> {
    let index_path = legacy_dir.join(LEGACY_INDEX_FILE);
    if !index_path.exists() {
        return Ok(None);
    }

    if store.session_count().await? > 0 {
        info!(
            index = %index_path.display(),
            "Legacy index present but store is not empty, skipping import"
        );
        return Ok(None);
    }

    let raw = std::fs::read_to_string(&index_path)
        .map_err(|e| SessionError::Migration(format!("read index: {e}")))?;
    let entries: Vec<LegacyIndexEntry> = serde_json::from_str(&raw)
        .map_err(|e| SessionError::Migration(format!("parse index: {e}")))?;

    let mut report = MigrationReport::default();
    for entry in &entries {
        match import_session(store, legacy_dir, entry).await {
            Ok(()) => report.imported += 1,
            Err(e) => {
                warn!(session = %entry.name, error = %e, "Skipping legacy session");
                report.failed += 1;
            }
        }
    }

    // Mark the index so the import never repeats. Best effort: if this
    // fails, the session_count gate above still prevents re-import.
    let migrated_path = index_path.with_file_name(format!("{LEGACY_INDEX_FILE}{MIGRATED_SUFFIX}"));
    if let Err(e) = std::fs::rename(&index_path, &migrated_path) {
        warn!(error = %e, "Could not rename legacy index after import");
    }

    info!(
        imported = report.imported,
        failed = report.failed,
        "Legacy session import complete"
    );
    Ok(Some(report))
}

async fn import_session(
    store: &SqliteSessionStore,
    legacy_dir: &Path,
    entry: &LegacyIndexEntry,
) -> Result<(), SessionError> {
    let transcript_path = legacy_dir.join(&entry.file);
    let raw = std::fs::read_to_string(&transcript_path)
        .map_err(|e| SessionError::Migration(format!("read transcript: {e}")))?;
    let legacy_messages: Vec<LegacyMessage> = serde_json::from_str(&raw)
        .map_err(|e| SessionError::Migration(format!("parse transcript: {e}")))?;

    let messages: Vec<Message> = legacy_messages
        .iter()
        .map(|m| {
            let role = m.role.parse().unwrap_or(Role::User);
            let mut message = Message::new(role, &m.content);
            if let Some(ts) = &m.timestamp {
                message.timestamp = parse_or_now(ts);
            }
            message
        })
        .collect();

    let mut summary = SessionSummary::new(
        &entry.name,
        entry.provider.as_deref().unwrap_or("unknown"),
        entry.model.as_deref().unwrap_or("unknown"),
    );
    summary.system_prompt = entry.system_prompt.clone();
    if let Some(ts) = &entry.created_at {
        summary.created_at = parse_or_now(ts);
    }
    if let Some(ts) = &entry.updated_at {
        summary.updated_at = parse_or_now(ts);
    }
    summary.message_count = messages.len();

    store.save(&summary, &messages).await
}

fn parse_or_now(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
