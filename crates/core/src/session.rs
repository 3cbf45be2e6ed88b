//! SessionStore trait — persistent conversation transcripts.
//!
//! A session is a named transcript plus the metadata needed to resume it
//! (provider, model, system prompt). Saving replaces the whole message set;
//! there is no per-message append path, so a resumed session always matches
//! what the caller last handed over.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::message::Message;

/// Session metadata refreshed on every save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Unique session name (user-chosen or auto-generated).
    pub name: String,

    /// Which provider the session was running against.
    pub provider: String,

    /// Which model.
    pub model: String,

    /// System prompt in effect, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Number of messages in the stored transcript.
    pub message_count: usize,
}

/// A full session: metadata plus the ordered transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub summary: SessionSummary,
    pub messages: Vec<Message>,
}

/// One full-text search match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The session the match belongs to.
    pub session_name: String,

    /// The role of the matching message.
    pub role: String,

    /// A bounded snippet of the matching content.
    pub snippet: String,

    /// When the matching message was written.
    pub timestamp: DateTime<Utc>,

    /// Relevance score; higher is better. Recency-based when the backing
    /// store cannot rank.
    #[serde(default)]
    pub score: f64,
}

/// The session persistence contract.
///
/// Implementations: SQLite (primary). All operations are keyed by session
/// name, which is unique.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create or fully replace the named session.
    async fn save(
        &self,
        summary: &SessionSummary,
        messages: &[Message],
    ) -> std::result::Result<(), SessionError>;

    /// Load a session by name, or the most recently updated one when no
    /// name is given. `Ok(None)` when nothing matches.
    async fn resume(
        &self,
        name: Option<&str>,
    ) -> std::result::Result<Option<SessionRecord>, SessionError>;

    /// List session metadata, most recently updated first.
    async fn list(&self, limit: usize) -> std::result::Result<Vec<SessionSummary>, SessionError>;

    /// Keyword search over message content across all sessions.
    async fn search(
        &self,
        keyword: &str,
        limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, SessionError>;

    /// Rename a session. Returns false when `old` does not exist or `new`
    /// is already taken.
    async fn rename(&self, old: &str, new: &str) -> std::result::Result<bool, SessionError>;

    /// Delete a session and all its messages. Returns false when it does
    /// not exist.
    async fn delete(&self, name: &str) -> std::result::Result<bool, SessionError>;
}

impl SessionSummary {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            provider: provider.into(),
            model: model.into(),
            system_prompt: None,
            created_at: now,
            updated_at: now,
            message_count: 0,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}
