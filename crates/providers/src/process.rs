//! Process-backed provider implementation.
//!
//! Delegates completion to an external executable: the rendered prompt goes
//! to the child's standard input, and whatever the child prints (stdout,
//! with stderr appended) becomes the completion. No streaming and no token
//! accounting: usage is always reported as zero.
//!
//! Useful for local model runners (`llama-cli`, `ollama run`, custom
//! scripts) that speak plain text rather than HTTP.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use wardclaw_core::error::ProviderError;
use wardclaw_core::message::Role;
use wardclaw_core::provider::{ChatRequest, ChatResponse, Provider, Usage};

/// Provider that shells out to an external command for each completion.
pub struct ProcessProvider {
    name: String,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessProvider {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            timeout,
        }
    }

    /// Flatten the request into a plain-text prompt the child can read
    /// from stdin. Deterministic: same request, same prompt.
    fn render_prompt(request: &ChatRequest) -> String {
        let mut prompt = String::new();

        if let Some(system) = &request.system_prompt {
            prompt.push_str(system);
            prompt.push_str("\n\n");
        }

        for message in &request.messages {
            let label = match message.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }

        prompt.push_str("Assistant:");
        prompt
    }
}

#[async_trait]
impl Provider for ProcessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let prompt = Self::render_prompt(&request);
        debug!(
            provider = %self.name,
            command = %self.command,
            prompt_bytes = prompt.len(),
            "Spawning process backend"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::Process(format!("failed to spawn '{}': {e}", self.command))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ProviderError::Process(format!("failed to write prompt: {e}")))?;
            // Close stdin so the child sees EOF
            drop(stdin);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "process backend exceeded {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ProviderError::Process(format!("failed to read output: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %self.command, exit_code = code, "Process backend failed");
            return Err(ProviderError::Process(format!(
                "'{}' exited with code {code}: {}",
                self.command,
                stderr.trim()
            )));
        }

        let content = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            format!("{}\n[stderr]: {}", stdout.trim(), stderr.trim())
        };

        if content.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "process backend produced no output".into(),
            ));
        }

        Ok(ChatResponse {
            content,
            model: self.command.clone(),
            usage: Usage::default(),
            stop_reason: Some("end_turn".into()),
        })
    }

    // stream() deliberately uses the trait default: one done-chunk wrapping
    // complete(). Process backends have no incremental framing to expose.
}
