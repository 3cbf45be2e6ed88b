//! Safety catalog — static risk classification for every known action.
//!
//! The catalog is reference data: built once at startup, never mutated.
//! The execution gateway consults it to decide whether an action needs
//! user confirmation; an action missing from the catalog is always
//! rejected.

use std::collections::HashMap;

/// Risk tier controlling the confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    /// No side effects outside the process. Never prompts.
    ReadOnly,
    /// Creates or modifies resources in recoverable ways. Prompts unless
    /// pre-approved.
    SafeWrite,
    /// Destructive or hard to reverse. Prompts unless pre-approved.
    RequiresConfirmation,
}

impl SafetyTier {
    /// Whether this tier goes through the confirmation gate.
    pub fn needs_confirmation(&self) -> bool {
        !matches!(self, SafetyTier::ReadOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyTier::ReadOnly => "read-only",
            SafetyTier::SafeWrite => "safe-write",
            SafetyTier::RequiresConfirmation => "requires-confirmation",
        }
    }
}

impl std::fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog row: what an action is and how risky it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyCatalogEntry {
    pub name: &'static str,
    pub tier: SafetyTier,
    pub category: &'static str,
    pub description: &'static str,
}

/// The built-in action classification.
const BUILTIN_ENTRIES: &[SafetyCatalogEntry] = &[
    SafetyCatalogEntry {
        name: "create_file",
        tier: SafetyTier::SafeWrite,
        category: "filesystem",
        description: "Create a file with the given content",
    },
    SafetyCatalogEntry {
        name: "copy_file",
        tier: SafetyTier::SafeWrite,
        category: "filesystem",
        description: "Copy a file to a new location",
    },
    SafetyCatalogEntry {
        name: "move_file",
        tier: SafetyTier::RequiresConfirmation,
        category: "filesystem",
        description: "Move or rename a file",
    },
    SafetyCatalogEntry {
        name: "delete_file",
        tier: SafetyTier::RequiresConfirmation,
        category: "filesystem",
        description: "Delete a file (backed up to the trash directory first)",
    },
    SafetyCatalogEntry {
        name: "write_note",
        tier: SafetyTier::SafeWrite,
        category: "documents",
        description: "Append a timestamped note to a notes file",
    },
    SafetyCatalogEntry {
        name: "memory_store",
        tier: SafetyTier::ReadOnly,
        category: "memory",
        description: "Store a named value in working memory",
    },
    SafetyCatalogEntry {
        name: "memory_recall",
        tier: SafetyTier::ReadOnly,
        category: "memory",
        description: "Recall a named value from working memory",
    },
];

/// Lookup table over the catalog entries. Read-only after construction.
pub struct SafetyCatalog {
    entries: HashMap<&'static str, SafetyCatalogEntry>,
}

impl SafetyCatalog {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        let entries = BUILTIN_ENTRIES.iter().map(|e| (e.name, *e)).collect();
        Self { entries }
    }

    /// An empty catalog (tests).
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add an entry. Only useful before the catalog is shared.
    pub fn with_entry(mut self, entry: SafetyCatalogEntry) -> Self {
        self.entries.insert(entry.name, entry);
        self
    }

    /// Look up an action's classification.
    pub fn lookup(&self, name: &str) -> Option<&SafetyCatalogEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by name for stable display.
    pub fn entries(&self) -> Vec<&SafetyCatalogEntry> {
        let mut all: Vec<&SafetyCatalogEntry> = self.entries.values().collect();
        all.sort_by_key(|e| e.name);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup() {
        let catalog = SafetyCatalog::builtin();
        let entry = catalog.lookup("delete_file").unwrap();
        assert_eq!(entry.tier, SafetyTier::RequiresConfirmation);
        assert_eq!(entry.category, "filesystem");

        assert!(catalog.lookup("format_disk").is_none());
    }

    #[test]
    fn tiers_gate_confirmation() {
        assert!(!SafetyTier::ReadOnly.needs_confirmation());
        assert!(SafetyTier::SafeWrite.needs_confirmation());
        assert!(SafetyTier::RequiresConfirmation.needs_confirmation());
    }

    #[test]
    fn memory_actions_never_prompt() {
        let catalog = SafetyCatalog::builtin();
        for name in ["memory_store", "memory_recall"] {
            let entry = catalog.lookup(name).unwrap();
            assert_eq!(entry.tier, SafetyTier::ReadOnly);
        }
    }

    #[test]
    fn builtin_names_are_unique() {
        let catalog = SafetyCatalog::builtin();
        assert_eq!(catalog.len(), BUILTIN_ENTRIES.len());
    }

    #[test]
    fn entries_sorted_by_name() {
        let catalog = SafetyCatalog::builtin();
        let names: Vec<&str> = catalog.entries().iter().map(|e| e.name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn custom_entry() {
        let catalog = SafetyCatalog::empty().with_entry(SafetyCatalogEntry {
            name: "send_email",
            tier: SafetyTier::RequiresConfirmation,
            category: "communication",
            description: "Send an email",
        });
        assert!(catalog.contains("send_email"));
        assert_eq!(catalog.len(), 1);
    }
}
