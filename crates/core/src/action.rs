//! Tool and Action traits — the unified dispatch boundary.
//!
//! A **tool** is a pure computation or lookup with no external side effects;
//! the agent loop invokes it directly. An **action** affects external state
//! (files, services) and must route through the safety-gated execution
//! gateway. Both are opaque callables registered by name and described to
//! the model in the system prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{SafetyError, ToolError};

/// Named parameters for a tool or action invocation.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Describes one parameter of a tool or action, for prompt enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            description: description.into(),
        }
    }
}

/// Fetch a required string parameter, with a uniform error message.
pub fn require_str<'a>(params: &'a Params, key: &str) -> std::result::Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required parameter '{key}'")))
}

/// Fetch an optional string parameter.
pub fn optional_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// The kind of a reversible filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReversalKind {
    Create,
    Copy,
    Move,
    Delete,
}

/// Enough information to invert one reversible operation.
///
/// Produced by the action that performed the operation (only it knows e.g.
/// the backup path it wrote) and recorded by the execution gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversibleOp {
    pub kind: ReversalKind,

    /// The path the operation produced or removed.
    pub target: PathBuf,

    /// For Move: where the resource lived before.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<PathBuf>,

    /// For Delete: where a backup copy was stashed, if one was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

/// The uniform result contract of the action boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the action did what was asked.
    pub success: bool,

    /// Human-readable output.
    pub output: String,

    /// Error text when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set when the action performed a reversible operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal: Option<ReversibleOp>,
}

impl ActionOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            reversal: None,
        }
    }

    pub fn ok_reversible(output: impl Into<String>, reversal: ReversibleOp) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            reversal: Some(reversal),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            reversal: None,
        }
    }
}

/// A pure, side-effect-free capability invoked directly by the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calc", "now").
    fn name(&self) -> &str;

    /// A one-line description sent to the model.
    fn description(&self) -> &str;

    /// The parameters this tool accepts.
    fn params(&self) -> Vec<ParamSpec>;

    /// Run the computation.
    async fn invoke(&self, params: &Params) -> std::result::Result<String, ToolError>;
}

/// A side-effecting capability; always dispatched through the execution
/// gateway, never invoked directly by the loop.
#[async_trait]
pub trait Action: Send + Sync {
    /// The unique name of this action (e.g., "create_file", "move_file").
    fn name(&self) -> &str;

    /// A one-line description sent to the model.
    fn description(&self) -> &str;

    /// The parameters this action accepts.
    fn params(&self) -> Vec<ParamSpec>;

    /// Perform the side effect. Expected failures (missing file, bad path)
    /// are reported inside the outcome, not as `Err`.
    async fn invoke(&self, params: &Params) -> std::result::Result<ActionOutcome, SafetyError>;
}

fn signature(name: &str, description: &str, params: &[ParamSpec]) -> String {
    let rendered: Vec<String> = params
        .iter()
        .map(|p| {
            if p.required {
                p.name.clone()
            } else {
                format!("{}?", p.name)
            }
        })
        .collect();
    format!("{}({}) - {}", name, rendered.join(", "), description)
}

/// A registry of pure tools, looked up by name.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Invoke a tool by name. Unknown names are a typed error.
    pub async fn invoke(
        &self,
        name: &str,
        params: &Params,
    ) -> std::result::Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(params).await
    }

    /// One `name(params) - description` line per tool, sorted, for the
    /// system prompt.
    pub fn prompt_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|t| signature(t.name(), t.description(), &t.params()))
            .collect();
        lines.sort();
        lines
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A registry of side-effecting actions, looked up by name.
///
/// The execution gateway owns the only `invoke` path; the agent loop sees
/// this registry only through the gateway.
pub struct ActionRegistry {
    actions: HashMap<String, Box<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action. Replaces any existing action with the same name.
    pub fn register(&mut self, action: Box<dyn Action>) {
        let name = action.name().to_string();
        self.actions.insert(name, action);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions.get(name).map(|a| a.as_ref())
    }

    /// One `name(params) - description` line per action, sorted, for the
    /// system prompt.
    pub fn prompt_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .actions
            .values()
            .map(|a| signature(a.name(), a.description(), &a.params()))
            .collect();
        lines.sort();
        lines
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase the given text"
        }
        fn params(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("text", "Text to transform")]
        }
        async fn invoke(&self, params: &Params) -> std::result::Result<String, ToolError> {
            Ok(require_str(params, "text")?.to_uppercase())
        }
    }

    fn params_with(key: &str, value: &str) -> Params {
        let mut p = Params::new();
        p.insert(key.into(), serde_json::Value::String(value.into()));
        p
    }

    #[tokio::test]
    async fn registry_invokes_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(UpperTool));
        let out = registry
            .invoke("upper", &params_with("text", "abc"))
            .await
            .unwrap();
        assert_eq!(out, "ABC");
    }

    #[tokio::test]
    async fn registry_rejects_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", &Params::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_required_param_is_invalid_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(UpperTool));
        let err = registry.invoke("upper", &Params::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn prompt_lines_mark_optional_params() {
        struct NoteAction;

        #[async_trait]
        impl Action for NoteAction {
            fn name(&self) -> &str {
                "write_note"
            }
            fn description(&self) -> &str {
                "Write a note"
            }
            fn params(&self) -> Vec<ParamSpec> {
                vec![
                    ParamSpec::required("path", "Where to write"),
                    ParamSpec::optional("title", "Note title"),
                ]
            }
            async fn invoke(
                &self,
                _params: &Params,
            ) -> std::result::Result<ActionOutcome, SafetyError> {
                Ok(ActionOutcome::ok("noted"))
            }
        }

        let mut registry = ActionRegistry::new();
        registry.register(Box::new(NoteAction));
        let lines = registry.prompt_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("write_note(path, title?)"));
    }

    #[test]
    fn outcome_constructors() {
        let ok = ActionOutcome::ok("created");
        assert!(ok.success && ok.error.is_none());

        let failed = ActionOutcome::failure("no such directory");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("no such directory"));
    }
}
