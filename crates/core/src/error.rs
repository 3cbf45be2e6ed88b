//! Error types for the wardclaw domain.
//!
//! One enum per bounded context, all built on `thiserror`. Where a
//! subsystem carries another's failures (the agent loop sees provider
//! and safety errors), `#[from]` conversions keep `?` working across
//! the crate boundary.

use thiserror::Error;

/// Failures raised by the chat-completion backends.
///
/// The retry layer treats `Network`, `Timeout`, `MalformedResponse`, and
/// 5xx `Api` errors as transient; everything else fails fast.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Malformed or empty provider response: {0}")]
    MalformedResponse(String),

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Backend process failed: {0}")]
    Process(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl ProviderError {
    /// Whether a retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::MalformedResponse(_) => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

/// Failures raised by pure tools and the tool registry.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },
}

/// Failures raised by the agent loop itself.
///
/// `Cancelled` declines and step/token exhaustion are normal run outcomes
/// carried in the run result, not errors; these variants cover the cases
/// where the loop genuinely cannot continue.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Budget exceeded: {reason}")]
    BudgetExceeded { reason: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Safety error: {0}")]
    Safety(#[from] SafetyError),

    #[error("Run aborted")]
    Aborted,
}

/// Failures raised by the safety catalog, execution gateway, and undo log.
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Rate limited: retry in {wait_secs}s")]
    RateLimited { wait_secs: u64 },

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Action execution failed: {0}")]
    Execution(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Operation cannot be undone: {0}")]
    NotUndoable(String),
}

/// Failures raised by the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Legacy migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
