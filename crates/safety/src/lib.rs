//! # Wardclaw Safety
//!
//! The safety layer between the agent and anything with side effects:
//!
//! - **Catalog** ([`SafetyCatalog`]): which actions exist and what tier of
//!   caution each demands.
//! - **Gateway** ([`ExecutionGateway`]): the single dispatch path. Rate
//!   check, validation, confirmation, execution, audit, in that order,
//!   with exactly one [`ExecutionRecord`] per invocation.
//! - **Undo** ([`UndoHistory`]): reversible filesystem operations and the
//!   newest-first undo walk.
//! - **Actions** ([`builtin_actions`]): the built-in side-effecting
//!   capabilities (file management, notes, working memory).

pub mod actions;
pub mod audit;
pub mod catalog;
pub mod gateway;
pub mod rate_limit;
pub mod undo;

pub use actions::builtin_actions;
pub use audit::{ActorSource, AuditLog, ExecutionRecord, RecordStatus, AUDIT_LOG_CAP};
pub use catalog::{SafetyCatalog, SafetyCatalogEntry, SafetyTier};
pub use gateway::{ApproveAll, Confirmer, DenyAll, ExecutionGateway, ExecutionOutcome};
pub use rate_limit::{Admission, RateLimiter};
pub use undo::{StoredReversal, UndoHistory, UndoOutcome};
