//! # Wardclaw Core
//!
//! Domain types, traits, and error definitions for the wardclaw task agent.
//! Nothing in this crate touches a network, a database, or a terminal: it
//! pins down the model that every other crate implements against.
//!
//! Each subsystem boundary is a trait at this layer (providers, session
//! stores, tools, actions), so backends swap behind configuration and
//! tests can stand in mocks without real services. Crates depend inward
//! on core, never sideways on each other's internals.

pub mod action;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod session;

// Re-export key types at crate root for ergonomics
pub use action::{
    Action, ActionOutcome, ActionRegistry, ParamSpec, Params, ReversalKind, ReversibleOp, Tool,
    ToolRegistry,
};
pub use error::{AgentError, ProviderError, SafetyError, SessionError, ToolError};
pub use memory::{SharedMemory, WorkingMemory};
pub use message::{Message, Role, Transcript};
pub use provider::{ChatRequest, ChatResponse, Provider, StreamChunk, Usage};
pub use session::{SearchHit, SessionRecord, SessionStore, SessionSummary};
