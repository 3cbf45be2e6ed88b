//! Built-in actions — the side-effecting capabilities the gateway dispatches.
//!
//! Filesystem actions report expected failures (missing file, existing
//! destination) inside the [`ActionOutcome`], never as `Err`; the gateway
//! records either way. Actions that change the filesystem attach the
//! [`ReversibleOp`] that inverts them. The memory actions close over the
//! run's [`SharedMemory`] and are the only writers it has.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::warn;
use wardclaw_core::action::optional_str;
use wardclaw_core::{
    Action, ActionOutcome, ActionRegistry, ParamSpec, Params, ReversalKind, ReversibleOp,
    SafetyError, SharedMemory,
};

/// Register every built-in action. `trash_dir` receives delete backups;
/// `memory` is the run's working memory.
pub fn builtin_actions(trash_dir: PathBuf, memory: SharedMemory) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(Box::new(CreateFileAction));
    registry.register(Box::new(CopyFileAction));
    registry.register(Box::new(MoveFileAction));
    registry.register(Box::new(DeleteFileAction { trash_dir }));
    registry.register(Box::new(WriteNoteAction));
    registry.register(Box::new(MemoryStoreAction {
        memory: memory.clone(),
    }));
    registry.register(Box::new(MemoryRecallAction { memory }));
    registry
}

async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Create a new file. Refuses to overwrite: the recorded inversion removes
/// the target, which must never destroy pre-existing data.
pub struct CreateFileAction;

#[async_trait]
impl Action for CreateFileAction {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("path", "Where to create the file"),
            ParamSpec::optional("content", "Initial content (default empty)"),
        ]
    }

    async fn invoke(&self, params: &Params) -> Result<ActionOutcome, SafetyError> {
        let Some(path) = optional_str(params, "path") else {
            return Ok(ActionOutcome::failure("missing required parameter 'path'"));
        };
        let content = optional_str(params, "content").unwrap_or("");
        let target = PathBuf::from(path);

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(ActionOutcome::failure(format!(
                "{path} already exists; refusing to overwrite"
            )));
        }
        if let Err(e) = ensure_parent(&target).await {
            return Ok(ActionOutcome::failure(format!(
                "could not create parent directory for {path}: {e}"
            )));
        }
        if let Err(e) = tokio::fs::write(&target, content).await {
            return Ok(ActionOutcome::failure(format!(
                "could not write {path}: {e}"
            )));
        }

        Ok(ActionOutcome::ok_reversible(
            format!("created {path} ({} bytes)", content.len()),
            ReversibleOp {
                kind: ReversalKind::Create,
                target,
                original: None,
                backup: None,
            },
        ))
    }
}

/// Copy a file to a new location that must not already exist.
pub struct CopyFileAction;

#[async_trait]
impl Action for CopyFileAction {
    fn name(&self) -> &str {
        "copy_file"
    }

    fn description(&self) -> &str {
        "Copy a file to a new location"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("from", "Source path"),
            ParamSpec::required("to", "Destination path"),
        ]
    }

    async fn invoke(&self, params: &Params) -> Result<ActionOutcome, SafetyError> {
        let Some(from) = optional_str(params, "from") else {
            return Ok(ActionOutcome::failure("missing required parameter 'from'"));
        };
        let Some(to) = optional_str(params, "to") else {
            return Ok(ActionOutcome::failure("missing required parameter 'to'"));
        };
        let source = PathBuf::from(from);
        let dest = PathBuf::from(to);

        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Ok(ActionOutcome::failure(format!("{from} does not exist")));
        }
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(ActionOutcome::failure(format!(
                "{to} already exists; refusing to overwrite"
            )));
        }
        if let Err(e) = ensure_parent(&dest).await {
            return Ok(ActionOutcome::failure(format!(
                "could not create parent directory for {to}: {e}"
            )));
        }
        match tokio::fs::copy(&source, &dest).await {
            Ok(bytes) => Ok(ActionOutcome::ok_reversible(
                format!("copied {from} to {to} ({bytes} bytes)"),
                ReversibleOp {
                    kind: ReversalKind::Copy,
                    target: dest,
                    original: None,
                    backup: None,
                },
            )),
            Err(e) => Ok(ActionOutcome::failure(format!(
                "could not copy {from} to {to}: {e}"
            ))),
        }
    }
}

/// Move (rename) a file. The inversion renames it back.
pub struct MoveFileAction;

#[async_trait]
impl Action for MoveFileAction {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Move a file to a new location"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("from", "Source path"),
            ParamSpec::required("to", "Destination path"),
        ]
    }

    async fn invoke(&self, params: &Params) -> Result<ActionOutcome, SafetyError> {
        let Some(from) = optional_str(params, "from") else {
            return Ok(ActionOutcome::failure("missing required parameter 'from'"));
        };
        let Some(to) = optional_str(params, "to") else {
            return Ok(ActionOutcome::failure("missing required parameter 'to'"));
        };
        let source = PathBuf::from(from);
        let dest = PathBuf::from(to);

        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Ok(ActionOutcome::failure(format!("{from} does not exist")));
        }
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(ActionOutcome::failure(format!(
                "{to} already exists; refusing to overwrite"
            )));
        }
        if let Err(e) = ensure_parent(&dest).await {
            return Ok(ActionOutcome::failure(format!(
                "could not create parent directory for {to}: {e}"
            )));
        }
        match tokio::fs::rename(&source, &dest).await {
            Ok(()) => Ok(ActionOutcome::ok_reversible(
                format!("moved {from} to {to}"),
                ReversibleOp {
                    kind: ReversalKind::Move,
                    target: dest,
                    original: Some(source),
                    backup: None,
                },
            )),
            Err(e) => Ok(ActionOutcome::failure(format!(
                "could not move {from} to {to}: {e}"
            ))),
        }
    }
}

/// Delete a file, stashing a backup copy in the trash directory first.
/// If the backup cannot be taken the delete still proceeds, but the
/// recorded operation carries no backup and cannot be undone.
pub struct DeleteFileAction {
    pub trash_dir: PathBuf,
}

impl DeleteFileAction {
    async fn take_backup(&self, source: &Path) -> Option<PathBuf> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        let stamped = format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S%3f"), name);
        let backup = self.trash_dir.join(stamped);

        if let Err(e) = tokio::fs::create_dir_all(&self.trash_dir).await {
            warn!(error = %e, "Could not create trash directory; deleting without backup");
            return None;
        }
        match tokio::fs::copy(source, &backup).await {
            Ok(_) => Some(backup),
            Err(e) => {
                warn!(path = %source.display(), error = %e, "Backup failed; deleting without backup");
                None
            }
        }
    }
}

#[async_trait]
impl Action for DeleteFileAction {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file (a backup is kept in the trash directory)"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("path", "File to delete")]
    }

    async fn invoke(&self, params: &Params) -> Result<ActionOutcome, SafetyError> {
        let Some(path) = optional_str(params, "path") else {
            return Ok(ActionOutcome::failure("missing required parameter 'path'"));
        };
        let target = PathBuf::from(path);

        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(ActionOutcome::failure(format!("{path} does not exist")));
        }

        let backup = self.take_backup(&target).await;
        if let Err(e) = tokio::fs::remove_file(&target).await {
            return Ok(ActionOutcome::failure(format!(
                "could not delete {path}: {e}"
            )));
        }

        let output = match &backup {
            Some(b) => format!("deleted {path} (backup at {})", b.display()),
            None => format!("deleted {path} (no backup taken)"),
        };
        Ok(ActionOutcome::ok_reversible(
            output,
            ReversibleOp {
                kind: ReversalKind::Delete,
                target,
                original: None,
                backup,
            },
        ))
    }
}

/// Append a timestamped note to a text file, creating it if needed.
pub struct WriteNoteAction;

#[async_trait]
impl Action for WriteNoteAction {
    fn name(&self) -> &str {
        "write_note"
    }

    fn description(&self) -> &str {
        "Append a timestamped note to a file"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("path", "Note file to append to"),
            ParamSpec::required("text", "Note text"),
        ]
    }

    async fn invoke(&self, params: &Params) -> Result<ActionOutcome, SafetyError> {
        let Some(path) = optional_str(params, "path") else {
            return Ok(ActionOutcome::failure("missing required parameter 'path'"));
        };
        let Some(text) = optional_str(params, "text") else {
            return Ok(ActionOutcome::failure("missing required parameter 'text'"));
        };
        let target = PathBuf::from(path);

        let existed = tokio::fs::try_exists(&target).await.unwrap_or(false);
        if let Err(e) = ensure_parent(&target).await {
            return Ok(ActionOutcome::failure(format!(
                "could not create parent directory for {path}: {e}"
            )));
        }

        let note = format!("[{}] {text}\n", Utc::now().format("%Y-%m-%d %H:%M UTC"));
        let mut contents = if existed {
            match tokio::fs::read_to_string(&target).await {
                Ok(c) => c,
                Err(e) => {
                    return Ok(ActionOutcome::failure(format!(
                        "could not read {path}: {e}"
                    )));
                }
            }
        } else {
            String::new()
        };
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&note);

        if let Err(e) = tokio::fs::write(&target, contents).await {
            return Ok(ActionOutcome::failure(format!(
                "could not write {path}: {e}"
            )));
        }

        // Appending to an existing file is not inverted; only creation is.
        let outcome = if existed {
            ActionOutcome::ok(format!("appended note to {path}"))
        } else {
            ActionOutcome::ok_reversible(
                format!("created {path} with note"),
                ReversibleOp {
                    kind: ReversalKind::Create,
                    target,
                    original: None,
                    backup: None,
                },
            )
        };
        Ok(outcome)
    }
}

/// Store a value in working memory.
pub struct MemoryStoreAction {
    pub memory: SharedMemory,
}

#[async_trait]
impl Action for MemoryStoreAction {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn description(&self) -> &str {
        "Store a value in working memory under a key"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("key", "Memory key"),
            ParamSpec::required("value", "Value to remember"),
        ]
    }

    async fn invoke(&self, params: &Params) -> Result<ActionOutcome, SafetyError> {
        let Some(key) = optional_str(params, "key") else {
            return Ok(ActionOutcome::failure("missing required parameter 'key'"));
        };
        let Some(value) = optional_str(params, "value") else {
            return Ok(ActionOutcome::failure("missing required parameter 'value'"));
        };

        let replaced = self.memory.lock().unwrap().store(key, value);
        let output = match replaced {
            Some(_) => format!("updated '{key}' ({} chars)", value.len()),
            None => format!("stored '{key}' ({} chars)", value.len()),
        };
        Ok(ActionOutcome::ok(output))
    }
}

/// Recall a value from working memory.
pub struct MemoryRecallAction {
    pub memory: SharedMemory,
}

#[async_trait]
impl Action for MemoryRecallAction {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Recall a value from working memory by key"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("key", "Memory key to look up")]
    }

    async fn invoke(&self, params: &Params) -> Result<ActionOutcome, SafetyError> {
        let Some(key) = optional_str(params, "key") else {
            return Ok(ActionOutcome::failure("missing required parameter 'key'"));
        };

        let value = self.memory.lock().unwrap().recall(key).map(str::to_string);
        match value {
            Some(v) => Ok(ActionOutcome::ok(v)),
            None => Ok(ActionOutcome::failure(format!(
                "nothing stored under '{key}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wardclaw_core::WorkingMemory;

    fn params(pairs: &[(&str, &str)]) -> Params {
        let mut p = Params::new();
        for (k, v) in pairs {
            p.insert(k.to_string(), serde_json::Value::String(v.to_string()));
        }
        p
    }

    #[tokio::test]
    async fn create_file_writes_and_records_reversal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.txt");
        let outcome = CreateFileAction
            .invoke(&params(&[
                ("path", path.to_str().unwrap()),
                ("content", "hello"),
            ]))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        let reversal = outcome.reversal.unwrap();
        assert_eq!(reversal.kind, ReversalKind::Create);
        assert_eq!(reversal.target, path);
    }

    #[tokio::test]
    async fn create_file_refuses_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("have.txt");
        std::fs::write(&path, "original").unwrap();

        let outcome = CreateFileAction
            .invoke(&params(&[("path", path.to_str().unwrap())]))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("already exists"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[tokio::test]
    async fn create_file_makes_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/deep.txt");
        let outcome = CreateFileAction
            .invoke(&params(&[("path", path.to_str().unwrap())]))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_param_is_a_failure_outcome() {
        let outcome = CreateFileAction.invoke(&Params::new()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("'path'"));
    }

    #[tokio::test]
    async fn copy_file_copies_and_protects_destination() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("src.txt");
        let to = dir.path().join("dst.txt");
        std::fs::write(&from, "data").unwrap();

        let outcome = CopyFileAction
            .invoke(&params(&[
                ("from", from.to_str().unwrap()),
                ("to", to.to_str().unwrap()),
            ]))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "data");
        assert!(from.exists());
        assert_eq!(outcome.reversal.unwrap().kind, ReversalKind::Copy);

        // Second copy onto the same destination is refused
        let again = CopyFileAction
            .invoke(&params(&[
                ("from", from.to_str().unwrap()),
                ("to", to.to_str().unwrap()),
            ]))
            .await
            .unwrap();
        assert!(!again.success);
    }

    #[tokio::test]
    async fn copy_missing_source_fails() {
        let dir = tempdir().unwrap();
        let outcome = CopyFileAction
            .invoke(&params(&[
                ("from", dir.path().join("nope.txt").to_str().unwrap()),
                ("to", dir.path().join("out.txt").to_str().unwrap()),
            ]))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn move_file_records_original_location() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("here.txt");
        let to = dir.path().join("there.txt");
        std::fs::write(&from, "payload").unwrap();

        let outcome = MoveFileAction
            .invoke(&params(&[
                ("from", from.to_str().unwrap()),
                ("to", to.to_str().unwrap()),
            ]))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(!from.exists() && to.exists());
        let reversal = outcome.reversal.unwrap();
        assert_eq!(reversal.kind, ReversalKind::Move);
        assert_eq!(reversal.original, Some(from));
        assert_eq!(reversal.target, to);
    }

    #[tokio::test]
    async fn delete_file_backs_up_into_trash() {
        let dir = tempdir().unwrap();
        let trash = dir.path().join("trash");
        let target = dir.path().join("doomed.txt");
        std::fs::write(&target, "precious").unwrap();

        let action = DeleteFileAction {
            trash_dir: trash.clone(),
        };
        let outcome = action
            .invoke(&params(&[("path", target.to_str().unwrap())]))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(!target.exists());
        let reversal = outcome.reversal.unwrap();
        assert_eq!(reversal.kind, ReversalKind::Delete);
        let backup = reversal.backup.unwrap();
        assert!(backup.starts_with(&trash));
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "precious");
    }

    #[tokio::test]
    async fn delete_missing_file_fails() {
        let dir = tempdir().unwrap();
        let action = DeleteFileAction {
            trash_dir: dir.path().join("trash"),
        };
        let outcome = action
            .invoke(&params(&[(
                "path",
                dir.path().join("ghost.txt").to_str().unwrap(),
            )]))
            .await
            .unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn write_note_appends_and_only_first_write_is_reversible() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");

        let first = WriteNoteAction
            .invoke(&params(&[
                ("path", path.to_str().unwrap()),
                ("text", "first thought"),
            ]))
            .await
            .unwrap();
        assert!(first.success);
        assert!(first.reversal.is_some());

        let second = WriteNoteAction
            .invoke(&params(&[
                ("path", path.to_str().unwrap()),
                ("text", "second thought"),
            ]))
            .await
            .unwrap();
        assert!(second.success);
        assert!(second.reversal.is_none());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first thought"));
        assert!(contents.contains("second thought"));
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn memory_store_and_recall_round_trip() {
        let memory = WorkingMemory::shared();
        let store = MemoryStoreAction {
            memory: memory.clone(),
        };
        let recall = MemoryRecallAction {
            memory: memory.clone(),
        };

        let stored = store
            .invoke(&params(&[("key", "city"), ("value", "Lisbon")]))
            .await
            .unwrap();
        assert!(stored.success);
        assert!(stored.output.contains("stored 'city'"));

        let hit = recall.invoke(&params(&[("key", "city")])).await.unwrap();
        assert!(hit.success);
        assert_eq!(hit.output, "Lisbon");

        let miss = recall.invoke(&params(&[("key", "planet")])).await.unwrap();
        assert!(!miss.success);
        assert!(miss.error.unwrap().contains("planet"));
    }

    #[tokio::test]
    async fn builtin_registry_has_all_seven() {
        let dir = tempdir().unwrap();
        let registry = builtin_actions(dir.path().join("trash"), WorkingMemory::shared());
        for name in [
            "create_file",
            "copy_file",
            "move_file",
            "delete_file",
            "write_note",
            "memory_store",
            "memory_recall",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }
}
