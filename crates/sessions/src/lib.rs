//! Session persistence for wardclaw.
//!
//! The primary store is SQLite with FTS5 keyword search. A one-time
//! import handles the legacy flat-file format.

pub mod legacy;
pub mod store;

pub use legacy::{migrate_if_needed, MigrationReport};
pub use store::SqliteSessionStore;
