//! Working memory — the agent's run-scoped key/value scratchpad.
//!
//! The model reads and writes this only through the `memory_store` and
//! `memory_recall` actions; nothing else mutates it during a run. The loop
//! surfaces the key list in every observation and renders a snapshot into
//! the system prompt, so stored facts survive context trimming. On
//! interactive continuation the same memory is carried into the next run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Handle shared between the agent loop and the memory actions.
pub type SharedMemory = Arc<Mutex<WorkingMemory>>;

/// Ordered key/value store. Keys iterate sorted, which keeps prompts and
/// observations deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingMemory {
    entries: BTreeMap<String, String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh memory in the shared handle the loop hands out.
    pub fn shared() -> SharedMemory {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Store a value, returning what it replaced.
    pub fn store(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn recall(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
