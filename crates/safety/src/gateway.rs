//! Execution gateway — the only path by which actions run.
//!
//! Every invocation walks the same gates in order: rate check, catalog
//! validation, confirmation (tier-dependent), execution, audit. Whatever
//! happens at any gate, exactly one [`ExecutionRecord`] is appended for
//! the invocation, and reversible operations land in the undo history.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use wardclaw_core::{ActionRegistry, Params, SafetyError};

use crate::audit::{ActorSource, AuditLog, ExecutionRecord, RecordStatus};
use crate::catalog::SafetyCatalog;
use crate::rate_limit::{Admission, RateLimiter};
use crate::undo::{UndoHistory, UndoOutcome};

/// Longest output stored in an audit record. The caller still gets the
/// full output in the [`ExecutionOutcome`].
const RECORD_OUTPUT_CAP: usize = 500;

/// Longest rendered parameter value in an action description.
const PARAM_RENDER_CAP: usize = 60;

/// Asks the user whether a gated action may proceed.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Declines everything. The default for non-interactive runs, where a
/// prompt would hang forever.
pub struct DenyAll;

#[async_trait]
impl Confirmer for DenyAll {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Approves everything without asking.
pub struct ApproveAll;

#[async_trait]
impl Confirmer for ApproveAll {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// What one gateway invocation produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub status: RecordStatus,
}

struct Staged {
    status: RecordStatus,
    success: bool,
    output: String,
    error: Option<String>,
}

impl Staged {
    fn rejected(error: impl Into<String>) -> Self {
        Self {
            status: RecordStatus::Rejected,
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// The gated dispatcher for side-effecting actions.
pub struct ExecutionGateway {
    catalog: SafetyCatalog,
    actions: ActionRegistry,
    rate_limiter: RateLimiter,
    audit: AuditLog,
    undo: UndoHistory,
    confirmer: Box<dyn Confirmer>,
    auto_confirm: bool,
    dry_run: bool,
    session: Option<String>,
}

impl ExecutionGateway {
    /// A gateway over `actions` with the built-in catalog, a 10-per-minute
    /// rate limit, and memory-only audit and undo logs. Production callers
    /// swap those in with the `with_*` builders.
    pub fn new(actions: ActionRegistry, confirmer: Box<dyn Confirmer>) -> Self {
        Self {
            catalog: SafetyCatalog::builtin(),
            actions,
            rate_limiter: RateLimiter::new(10, Duration::from_secs(60)),
            audit: AuditLog::in_memory(),
            undo: UndoHistory::in_memory(50),
            confirmer,
            auto_confirm: false,
            dry_run: false,
            session: None,
        }
    }

    pub fn with_catalog(mut self, catalog: SafetyCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_rate_limit(mut self, max: usize, window: Duration) -> Self {
        self.rate_limiter = RateLimiter::new(max, window);
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_undo(mut self, undo: UndoHistory) -> Self {
        self.undo = undo;
        self
    }

    pub fn with_auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_session(mut self, name: impl Into<String>) -> Self {
        self.session = Some(name.into());
        self
    }

    /// Run one action through the gates. Never fails outright: rejections,
    /// rate limits, declines, and action failures all come back as an
    /// outcome, and each appends its one audit record.
    pub async fn execute(
        &self,
        name: &str,
        params: &Params,
        source: ActorSource,
    ) -> ExecutionOutcome {
        let started = std::time::Instant::now();
        let action_text = describe_invocation(name, params);
        let mut record = ExecutionRecord::new(&action_text, source);
        record.session = self.session.clone();

        let staged = self.run_gates(name, params, &action_text, &mut record).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        record.status = staged.status;
        record.duration_ms = duration_ms;
        record.error = staged.error.clone();
        if !staged.output.is_empty() {
            record.output = Some(truncate(&staged.output, RECORD_OUTPUT_CAP));
        }
        self.audit.append(record);

        ExecutionOutcome {
            success: staged.success,
            output: staged.output,
            error: staged.error,
            duration_ms,
            status: staged.status,
        }
    }

    async fn run_gates(
        &self,
        name: &str,
        params: &Params,
        action_text: &str,
        record: &mut ExecutionRecord,
    ) -> Staged {
        // Gate 1: rate limit
        if let Admission::Rejected { wait } = self.rate_limiter.try_admit() {
            let wait_secs = wait.as_secs_f64().ceil().max(1.0) as u64;
            warn!(action = name, wait_secs, "Rate limited");
            return Staged {
                status: RecordStatus::RateLimited,
                success: false,
                output: String::new(),
                error: Some(SafetyError::RateLimited { wait_secs }.to_string()),
            };
        }

        // Gate 2: validation
        let Some(entry) = self.catalog.lookup(name) else {
            warn!(action = name, "Action not in safety catalog");
            return Staged::rejected(SafetyError::UnknownAction(name.to_string()).to_string());
        };
        let Some(action) = self.actions.get(name) else {
            warn!(action = name, "Action in catalog but not registered");
            return Staged::rejected(SafetyError::UnknownAction(name.to_string()).to_string());
        };

        // Gate 3: confirmation. Read-only actions never prompt; dry runs
        // preview without prompting.
        if entry.tier.needs_confirmation() && !self.dry_run {
            if self.auto_confirm {
                record.confirmed = true;
                debug!(action = name, "Auto-confirmed");
            } else {
                let prompt = format!("Allow {action_text}? [{}]", entry.tier);
                if self.confirmer.confirm(&prompt).await {
                    record.confirmed = true;
                } else {
                    return Staged {
                        status: RecordStatus::Cancelled,
                        success: false,
                        output: String::new(),
                        error: Some(SafetyError::Cancelled.to_string()),
                    };
                }
            }
        }

        // Gate 4: execution
        if self.dry_run {
            return Staged {
                status: RecordStatus::DryRun,
                success: true,
                output: format!("(dry run) would execute {action_text}"),
                error: None,
            };
        }

        match action.invoke(params).await {
            Ok(outcome) => {
                if let Some(reversal) = outcome.reversal {
                    self.undo.record(action_text, reversal);
                }
                Staged {
                    status: if outcome.success {
                        RecordStatus::Success
                    } else {
                        RecordStatus::ExecutionError
                    },
                    success: outcome.success,
                    output: outcome.output,
                    error: outcome.error,
                }
            }
            Err(e) => Staged {
                status: RecordStatus::ExecutionError,
                success: false,
                output: String::new(),
                error: Some(e.to_string()),
            },
        }
    }

    /// Invert up to `count` recent operations. Errors with
    /// [`SafetyError::NothingToUndo`] when nothing is pending.
    pub fn undo(&self, count: usize) -> Result<Vec<UndoOutcome>, SafetyError> {
        self.undo.undo(count)
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn undo_history(&self) -> &UndoHistory {
        &self.undo
    }

    pub fn catalog(&self) -> &SafetyCatalog {
        &self.catalog
    }

    /// Signature lines for the system prompt, one per registered action.
    pub fn prompt_lines(&self) -> Vec<String> {
        self.actions.prompt_lines()
    }
}

/// `name(k=v, ...)` with long values shortened. `serde_json::Map` iterates
/// sorted, so the rendering is deterministic.
fn describe_invocation(name: &str, params: &Params) -> String {
    if params.is_empty() {
        return format!("{name}()");
    }
    let rendered: Vec<String> = params
        .iter()
        .map(|(k, v)| {
            let value = match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            };
            format!("{k}={}", truncate(&value, PARAM_RENDER_CAP))
        })
        .collect();
    format!("{name}({})", rendered.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}…")
}
