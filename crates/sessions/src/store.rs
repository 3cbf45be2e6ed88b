//! SQLite session store with FTS5 full-text search.
//!
//! One database file, three tables:
//! - `sessions` — session metadata, keyed by unique name
//! - `messages` — transcript rows referencing their session
//! - `messages_fts` — FTS5 virtual table for ranked keyword search (BM25)
//!
//! Triggers keep the FTS index in sync on insert/delete/update, so search
//! never sees messages that were replaced or cascade-deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};
use wardclaw_core::error::SessionError;
use wardclaw_core::message::{Message, Role};
use wardclaw_core::session::{SearchHit, SessionRecord, SessionStore, SessionSummary};

/// Maximum bytes of content quoted into a fallback search snippet.
const SNIPPET_MAX_LEN: usize = 160;

/// The production session store.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (or create) the store at the given path.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn new(path: &str) -> Result<Self, SessionError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| SessionError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Session store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, SessionError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                iid           INTEGER PRIMARY KEY AUTOINCREMENT,
                name          TEXT UNIQUE NOT NULL,
                provider      TEXT NOT NULL,
                model         TEXT NOT NULL,
                system_prompt TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Migration(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                iid            INTEGER PRIMARY KEY AUTOINCREMENT,
                session_iid    INTEGER NOT NULL REFERENCES sessions(iid) ON DELETE CASCADE,
                id             TEXT NOT NULL,
                role           TEXT NOT NULL,
                content        TEXT NOT NULL,
                timestamp      TEXT NOT NULL,
                token_estimate INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Migration(format!("messages table: {e}")))?;

        // External-content FTS5 table synced via triggers
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
                content,
                content='messages',
                content_rowid='iid',
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Migration(format!("FTS5 table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
                INSERT INTO messages_fts(rowid, content)
                VALUES (new.iid, new.content);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Migration(format!("insert trigger: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
                INSERT INTO messages_fts(messages_fts, rowid, content)
                VALUES ('delete', old.iid, old.content);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Migration(format!("delete trigger: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
                INSERT INTO messages_fts(messages_fts, rowid, content)
                VALUES ('delete', old.iid, old.content);
                INSERT INTO messages_fts(rowid, content)
                VALUES (new.iid, new.content);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Migration(format!("update trigger: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Migration(format!("updated_at index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Migration(format!("session index: {e}")))?;

        debug!("Session store migrations complete");
        Ok(())
    }

    /// Number of stored sessions. Used to gate legacy migration.
    pub async fn session_count(&self) -> Result<usize, SessionError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| SessionError::Storage(format!("cnt column: {e}")))?;
        Ok(cnt as usize)
    }

    fn parse_timestamp(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<SessionSummary, SessionError> {
        let column = |e: sqlx::Error| SessionError::Storage(format!("session column: {e}"));

        let name: String = row.try_get("name").map_err(column)?;
        let provider: String = row.try_get("provider").map_err(column)?;
        let model: String = row.try_get("model").map_err(column)?;
        let system_prompt: Option<String> = row.try_get("system_prompt").map_err(column)?;
        let created_at: String = row.try_get("created_at").map_err(column)?;
        let updated_at: String = row.try_get("updated_at").map_err(column)?;
        let message_count: i64 = row.try_get("message_count").map_err(column)?;

        Ok(SessionSummary {
            name,
            provider,
            model,
            system_prompt,
            created_at: Self::parse_timestamp(&created_at),
            updated_at: Self::parse_timestamp(&updated_at),
            message_count: message_count as usize,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, SessionError> {
        let column = |e: sqlx::Error| SessionError::Storage(format!("message column: {e}"));

        let id: String = row.try_get("id").map_err(column)?;
        let role_str: String = row.try_get("role").map_err(column)?;
        let content: String = row.try_get("content").map_err(column)?;
        let timestamp: String = row.try_get("timestamp").map_err(column)?;

        Ok(Message {
            id,
            role: role_str.parse().unwrap_or(Role::User),
            content,
            timestamp: Self::parse_timestamp(&timestamp),
        })
    }

    /// Build a safe FTS5 query from user text: each word stripped to
    /// alphanumerics, quoted, and prefix-matched, joined with implicit AND.
    fn sanitize_fts_query(text: &str) -> String {
        text.split_whitespace()
            .map(|w| {
                let clean: String = w
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if clean.is_empty() {
                    return String::new();
                }
                format!("\"{clean}\"*")
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Substring fallback when FTS cannot rank (punctuation-only queries,
    /// FTS syntax the sanitizer let through). Ordered by recency, score 0.
    async fn search_like(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, SessionError> {
        let escaped = keyword
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");

        let rows = sqlx::query(
            r#"
            SELECT s.name AS session_name, m.role, m.content, m.timestamp
            FROM messages m
            JOIN sessions s ON s.iid = m.session_iid
            WHERE m.content LIKE ?1 ESCAPE '\'
            ORDER BY m.timestamp DESC
            LIMIT ?2
            "#,
        )
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(format!("LIKE search: {e}")))?;

        let column = |e: sqlx::Error| SessionError::Storage(format!("search column: {e}"));
        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let content: String = row.try_get("content").map_err(column)?;
            let timestamp: String = row.try_get("timestamp").map_err(column)?;
            hits.push(SearchHit {
                session_name: row.try_get("session_name").map_err(column)?,
                role: row.try_get("role").map_err(column)?,
                snippet: excerpt(&content, keyword, SNIPPET_MAX_LEN),
                timestamp: Self::parse_timestamp(&timestamp),
                score: 0.0,
            });
        }
        Ok(hits)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(
        &self,
        summary: &SessionSummary,
        messages: &[Message],
    ) -> Result<(), SessionError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SessionError::Storage(format!("begin save: {e}")))?;

        // Upsert by name. created_at keeps the original; everything else
        // is refreshed from this save. updated_at comes from the summary so
        // imports can preserve historical ordering.
        sqlx::query(
            r#"
            INSERT INTO sessions (name, provider, model, system_prompt, created_at, updated_at, message_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(name) DO UPDATE SET
                provider = excluded.provider,
                model = excluded.model,
                system_prompt = excluded.system_prompt,
                updated_at = excluded.updated_at,
                message_count = excluded.message_count
            "#,
        )
        .bind(&summary.name)
        .bind(&summary.provider)
        .bind(&summary.model)
        .bind(&summary.system_prompt)
        .bind(summary.created_at.to_rfc3339())
        .bind(summary.updated_at.to_rfc3339())
        .bind(messages.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| SessionError::Storage(format!("session upsert: {e}")))?;

        let row = sqlx::query("SELECT iid FROM sessions WHERE name = ?1")
            .bind(&summary.name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(format!("session iid lookup: {e}")))?;
        let session_iid: i64 = row
            .try_get("iid")
            .map_err(|e| SessionError::Storage(format!("iid column: {e}")))?;

        // Full replace: the stored transcript always matches this save.
        sqlx::query("DELETE FROM messages WHERE session_iid = ?1")
            .bind(session_iid)
            .execute(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(format!("message clear: {e}")))?;

        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO messages (session_iid, id, role, content, timestamp, token_estimate)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(session_iid)
            .bind(&message.id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.timestamp.to_rfc3339())
            .bind(message.estimated_tokens() as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(format!("message insert: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| SessionError::Storage(format!("commit save: {e}")))?;

        debug!(session = %summary.name, messages = messages.len(), "Session saved");
        Ok(())
    }

    async fn resume(&self, name: Option<&str>) -> Result<Option<SessionRecord>, SessionError> {
        let row = match name {
            Some(n) => sqlx::query("SELECT * FROM sessions WHERE name = ?1")
                .bind(n)
                .fetch_optional(&self.pool)
                .await,
            None => {
                sqlx::query("SELECT * FROM sessions ORDER BY updated_at DESC, iid DESC LIMIT 1")
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .map_err(|e| SessionError::Storage(format!("session lookup: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let summary = Self::row_to_summary(&row)?;
        let session_iid: i64 = row
            .try_get("iid")
            .map_err(|e| SessionError::Storage(format!("iid column: {e}")))?;

        let message_rows =
            sqlx::query("SELECT * FROM messages WHERE session_iid = ?1 ORDER BY iid")
                .bind(session_iid)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SessionError::Storage(format!("message load: {e}")))?;

        let messages = message_rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SessionRecord { summary, messages }))
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>, SessionError> {
        let rows =
            sqlx::query("SELECT * FROM sessions ORDER BY updated_at DESC, iid DESC LIMIT ?1")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SessionError::Storage(format!("session list: {e}")))?;

        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<SearchHit>, SessionError> {
        if keyword.trim().is_empty() {
            return Ok(vec![]);
        }

        let fts_query = Self::sanitize_fts_query(keyword);
        if fts_query.is_empty() {
            return self.search_like(keyword, limit).await;
        }

        let result = sqlx::query(
            r#"
            SELECT s.name AS session_name, m.role, m.timestamp,
                   snippet(messages_fts, 0, '', '', '…', 12) AS snip,
                   bm25(messages_fts) AS rank
            FROM messages_fts f
            JOIN messages m ON m.iid = f.rowid
            JOIN sessions s ON s.iid = m.session_iid
            WHERE messages_fts MATCH ?1
            ORDER BY rank
            LIMIT ?2
            "#,
        )
        .bind(&fts_query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "FTS search failed, falling back to substring match");
                return self.search_like(keyword, limit).await;
            }
        };

        let column = |e: sqlx::Error| SessionError::Storage(format!("search column: {e}"));
        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let timestamp: String = row.try_get("timestamp").map_err(column)?;
            // bm25() is negative (lower = better); flip so higher = better
            let rank: f64 = row.try_get("rank").unwrap_or(0.0);
            hits.push(SearchHit {
                session_name: row.try_get("session_name").map_err(column)?,
                role: row.try_get("role").map_err(column)?,
                snippet: row.try_get("snip").map_err(column)?,
                timestamp: Self::parse_timestamp(&timestamp),
                score: -rank,
            });
        }
        Ok(hits)
    }

    async fn rename(&self, old: &str, new: &str) -> Result<bool, SessionError> {
        let taken = sqlx::query("SELECT 1 FROM sessions WHERE name = ?1")
            .bind(new)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("rename check: {e}")))?;
        if taken.is_some() {
            warn!(old, new, "Rename target already exists");
            return Ok(false);
        }

        let result = sqlx::query("UPDATE sessions SET name = ?1 WHERE name = ?2")
            .bind(new)
            .bind(old)
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("rename: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, name: &str) -> Result<bool, SessionError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SessionError::Storage(format!("begin delete: {e}")))?;

        let row = sqlx::query("SELECT iid FROM sessions WHERE name = ?1")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(format!("delete lookup: {e}")))?;

        let Some(row) = row else {
            return Ok(false);
        };
        let session_iid: i64 = row
            .try_get("iid")
            .map_err(|e| SessionError::Storage(format!("iid column: {e}")))?;

        // Explicit message delete so the FTS delete trigger fires row by
        // row; the FK cascade stays as a schema-level backstop.
        sqlx::query("DELETE FROM messages WHERE session_iid = ?1")
            .bind(session_iid)
            .execute(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(format!("message delete: {e}")))?;

        sqlx::query("DELETE FROM sessions WHERE iid = ?1")
            .bind(session_iid)
            .execute(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(format!("session delete: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| SessionError::Storage(format!("commit delete: {e}")))?;

        debug!(session = %name, "Session deleted");
        Ok(true)
    }
}

/// Byte offset in `content` of the first case-insensitive `keyword`
/// match. Folds per char on both sides while scanning the original, so
/// the offset stays valid in `content` even where lowercasing changes
/// byte lengths (`İ` folds to `i` plus a combining dot).
fn find_case_insensitive(content: &str, keyword: &str) -> Option<usize> {
    let needle: Vec<char> = keyword.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return None;
    }
    content.char_indices().map(|(i, _)| i).find(|&i| {
        let mut hay = content[i..].chars().flat_map(char::to_lowercase);
        needle.iter().all(|&n| hay.next() == Some(n))
    })
}

/// Bounded excerpt around the first (case-insensitive) keyword hit,
/// clamped to char boundaries.
fn excerpt(content: &str, keyword: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        return content.to_string();
    }

    let hit = find_case_insensitive(content, keyword).unwrap_or(0);

    let mut start = hit.saturating_sub(max_len / 3);
    while start < content.len() && !content.is_char_boundary(start) {
        start += 1;
    }
    let mut end = (start + max_len).min(content.len());
    while end < content.len() && !content.is_char_boundary(end) {
        end += 1;
    }

    let mut out = String::new();
    if start > 0 {
        out.push('…');
    }
    out.push_str(&content[start..end]);
    if end < content.len() {
        out.push('…');
    }
    out
}
