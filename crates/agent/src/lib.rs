//! The agent loop — the heart of Wardclaw.
//!
//! The agent follows a **Plan → Act → Observe** cycle:
//!
//! 1. **Trim** the transcript to the context budget
//! 2. **Send** it to the provider with a fresh system prompt
//! 3. **Parse** the reply into one directive (ACTION, ASK, DONE, STUCK)
//! 4. **If ACTION**: run the tool or safety-gated action, append the
//!    observation, loop back to step 1
//! 5. **If DONE or STUCK**: return the run result
//!
//! The loop is bounded by a step cap and a token budget, honors a
//! cooperative abort flag, and always terminates with a clean
//! [`AgentRunResult`]. The [`heartbeat`] module reuses the same loop to
//! run persisted tasks on a schedule with nobody watching.

pub mod context;
pub mod heartbeat;
pub mod loop_runner;
pub mod parser;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{ContextBudget, TrimResult, estimate_transcript, trim_transcript};
pub use heartbeat::{
    HeartbeatOutcome, HeartbeatTask, Schedule, load_tasks, run_due_tasks, save_tasks,
};
pub use loop_runner::{
    AbortReason, AgentLoop, AgentRunResult, AgentStep, AskHandler, StepKind,
};
pub use parser::{Directive, ParsedReply, parse_reply};
