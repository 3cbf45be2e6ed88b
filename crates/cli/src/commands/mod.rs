//! Subcommand implementations, one module per command.

pub mod audit;
pub mod chat;
pub mod common;
pub mod config_cmd;
pub mod heartbeat;
pub mod run;
pub mod sessions;
pub mod undo;
