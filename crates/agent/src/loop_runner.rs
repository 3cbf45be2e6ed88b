//! The agent loop: Plan → Act → Observe until done.
//!
//! Each iteration trims the transcript to the context budget, asks the
//! provider for a reply, parses it into a [`Directive`], and either
//! dispatches one tool/action, relays a question to the user, or ends the
//! run. Every reply consumes one step except an `ASK:` that a handler
//! actually answers, so a run is bounded by `max_steps` completions plus
//! the answered questions. Termination is always a clean
//! [`AgentRunResult`]; only provider transport failures surface as `Err`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use wardclaw_config::AgentConfig;
use wardclaw_core::{
    AgentError, ChatRequest, Message, Params, Provider, SharedMemory, ToolRegistry, WorkingMemory,
};
use wardclaw_safety::{ActorSource, ExecutionGateway};

use crate::context::{ContextBudget, trim_transcript};
use crate::parser::{Directive, parse_reply};

const GOAL_LOG_CHARS: usize = 80;
const MEMORY_VALUE_CHARS: usize = 120;

/// Whether a step ran a direct tool or a safety-gated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Tool,
    Action,
}

/// One executed tool or action invocation within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    /// 0-based position among executed steps.
    pub index: usize,
    pub kind: StepKind,
    pub name: String,
    /// The parsed parameters, as a JSON object.
    pub params: serde_json::Value,
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
}

/// Why a run ended without the model declaring DONE or STUCK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The step cap was reached.
    MaxSteps,
    /// The pinned transcript prefix no longer fits the context budget.
    TokenBudget,
    /// The abort flag was raised between iterations.
    Aborted,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::MaxSteps => "MaxSteps",
            AbortReason::TokenBudget => "TokenBudget",
            AbortReason::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    /// Executed tool/action steps, in order.
    pub steps: Vec<AgentStep>,
    /// Completions consumed, answered questions excluded.
    pub steps_taken: usize,
    /// True only when the model declared DONE.
    pub success: bool,
    /// The DONE/STUCK text, or a description of why the loop stopped.
    pub summary: String,
    /// Set when the loop, not the model, ended the run.
    pub abort_reason: Option<AbortReason>,
    /// The conversation as it stood at termination, for session persistence.
    pub transcript: Vec<Message>,
}

/// Relays an `ASK:` question to whoever is driving the run.
///
/// Returning `None` means nobody answered; the loop then nudges the model
/// to decide on its own, and that reply consumes a step like any other.
#[async_trait]
pub trait AskHandler: Send + Sync {
    async fn ask(&self, question: &str) -> Option<String>;
}

/// Drives one goal to completion against a provider.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    gateway: Arc<ExecutionGateway>,
    memory: SharedMemory,
    budget: ContextBudget,
    max_steps: usize,
    max_observation_chars: usize,
    abort: Arc<AtomicBool>,
    ask: Option<Arc<dyn AskHandler>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        gateway: Arc<ExecutionGateway>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            gateway,
            memory: WorkingMemory::shared(),
            budget: ContextBudget::default(),
            max_steps: 15,
            max_observation_chars: 1500,
            abort: Arc::new(AtomicBool::new(false)),
            ask: None,
        }
    }

    /// Apply the agent section of the config in one shot.
    pub fn with_config(mut self, config: &AgentConfig) -> Self {
        self.max_steps = config.max_steps as usize;
        self.max_observation_chars = config.max_observation_chars;
        self.budget = ContextBudget::from_config(config);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_budget(mut self, budget: ContextBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_observation_chars(mut self, max: usize) -> Self {
        self.max_observation_chars = max;
        self
    }

    /// Share an abort flag; raising it stops the run at the next
    /// iteration boundary.
    pub fn with_abort_handle(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_ask_handler(mut self, handler: Arc<dyn AskHandler>) -> Self {
        self.ask = Some(handler);
        self
    }

    /// Use an existing working memory instead of a fresh one. The same
    /// handle must back the registered memory actions for store/recall to
    /// be visible here.
    pub fn with_memory(mut self, memory: SharedMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn memory(&self) -> SharedMemory {
        Arc::clone(&self.memory)
    }

    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn gateway(&self) -> &ExecutionGateway {
        &self.gateway
    }

    /// Run one goal from scratch.
    pub async fn run(&self, goal: &str) -> Result<AgentRunResult, AgentError> {
        info!(goal = %truncate_chars(goal, GOAL_LOG_CHARS), "agent run started");
        self.drive(vec![Message::user(goal)]).await
    }

    /// Run a follow-up goal that knows how the previous run ended. The
    /// working memory handle carries over on its own; this only frames the
    /// opening turn.
    pub async fn continue_with(
        &self,
        prior: &AgentRunResult,
        goal: &str,
    ) -> Result<AgentRunResult, AgentError> {
        let keys = self.memory.lock().unwrap().keys().join(", ");
        let opening = format!(
            "Previous run finished after {} steps: {}\nWorking memory keys: [{}]\n\nNew request: {}",
            prior.steps_taken, prior.summary, keys, goal
        );
        info!(goal = %truncate_chars(goal, GOAL_LOG_CHARS), "agent run continued");
        self.drive(vec![Message::user(opening)]).await
    }

    async fn drive(&self, mut transcript: Vec<Message>) -> Result<AgentRunResult, AgentError> {
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut steps_taken = 0usize;

        loop {
            if self.abort.load(Ordering::SeqCst) {
                info!(steps = steps_taken, "agent run aborted");
                return Ok(AgentRunResult {
                    steps,
                    steps_taken,
                    success: false,
                    summary: "Aborted by request before completion.".to_string(),
                    abort_reason: Some(AbortReason::Aborted),
                    transcript,
                });
            }
            if steps_taken >= self.max_steps {
                info!(steps = steps_taken, "agent run hit the step cap");
                return Ok(AgentRunResult {
                    steps,
                    steps_taken,
                    success: false,
                    summary: format!("Stopped after {steps_taken} steps without reaching DONE."),
                    abort_reason: Some(AbortReason::MaxSteps),
                    transcript,
                });
            }

            let trimmed = match trim_transcript(&transcript, &self.budget) {
                Ok(trimmed) => trimmed,
                Err(AgentError::BudgetExceeded { reason }) => {
                    warn!(%reason, "context budget exhausted");
                    return Ok(AgentRunResult {
                        steps,
                        steps_taken,
                        success: false,
                        summary: format!("Stopped: context budget exhausted: {reason}"),
                        abort_reason: Some(AbortReason::TokenBudget),
                        transcript,
                    });
                }
                Err(other) => return Err(other),
            };
            if trimmed.trimmed {
                debug!(
                    removed = trimmed.removed_count,
                    final_tokens = trimmed.final_tokens,
                    "transcript trimmed to budget"
                );
            }

            let mut request = ChatRequest::new(&self.model, trimmed.messages)
                .with_system_prompt(self.system_prompt())
                .with_temperature(self.temperature);
            if let Some(max_tokens) = self.max_tokens {
                request = request.with_max_tokens(max_tokens);
            }

            let response = self.provider.complete(request).await?;
            transcript.push(Message::assistant(&response.content));
            let parsed = parse_reply(&response.content);

            if let Some(plan) = &parsed.plan {
                info!(%plan, "agent plan");
            }
            if let Some(thought) = &parsed.thought {
                debug!(%thought, "agent thought");
            }

            match parsed.directive {
                Directive::Done(text) => {
                    steps_taken += 1;
                    let summary = if text.is_empty() {
                        "Done.".to_string()
                    } else {
                        text
                    };
                    info!(steps = steps_taken, "agent run finished");
                    return Ok(AgentRunResult {
                        steps,
                        steps_taken,
                        success: true,
                        summary,
                        abort_reason: None,
                        transcript,
                    });
                }
                Directive::Stuck(text) => {
                    steps_taken += 1;
                    let summary = if text.is_empty() {
                        "Stuck with no explanation given.".to_string()
                    } else {
                        text
                    };
                    info!(steps = steps_taken, "agent declared itself stuck");
                    return Ok(AgentRunResult {
                        steps,
                        steps_taken,
                        success: false,
                        summary,
                        abort_reason: None,
                        transcript,
                    });
                }
                Directive::Ask(question) => {
                    let answer = match &self.ask {
                        Some(handler) => handler.ask(&question).await,
                        None => None,
                    };
                    match answer {
                        Some(answer) => {
                            // An answered question costs no step.
                            debug!("question answered by the user");
                            transcript.push(Message::user(answer));
                        }
                        None => {
                            steps_taken += 1;
                            transcript.push(Message::user(
                                "No user is available to answer. Decide the best course \
                                 yourself and continue, or finish with STUCK: naming the \
                                 open question.",
                            ));
                        }
                    }
                }
                Directive::Action { name, params } => {
                    steps_taken += 1;
                    let step = self.dispatch(steps.len(), &name, &params).await;
                    info!(
                        action = %name,
                        success = step.success,
                        duration_ms = step.duration_ms,
                        "step completed"
                    );
                    transcript.push(Message::user(self.observation(&step)));
                    steps.push(step);
                }
                Directive::Continue => {
                    steps_taken += 1;
                    transcript.push(Message::user(
                        "Continue. End your reply with ACTION:, ASK:, DONE:, or STUCK:.",
                    ));
                }
                Directive::Untagged => {
                    steps_taken += 1;
                    transcript.push(Message::user(
                        "Your reply had no recognized tag. Use THOUGHT: for reasoning, \
                         then exactly one of ACTION: name(key=value, ...), ASK:, DONE:, \
                         or STUCK:.",
                    ));
                }
                Directive::Malformed(reason) => {
                    steps_taken += 1;
                    transcript.push(Message::user(format!(
                        "Could not parse the ACTION line: {reason}. Use \
                         ACTION: name(key=value, ...) and quote values that contain \
                         commas."
                    )));
                }
            }
        }
    }

    /// Run one tool or action. Tools run directly; anything else goes
    /// through the execution gateway and its safety checks.
    async fn dispatch(&self, index: usize, name: &str, params: &Params) -> AgentStep {
        if self.tools.contains(name) {
            let started = std::time::Instant::now();
            let (success, output) = match self.tools.invoke(name, params).await {
                Ok(output) => (true, output),
                Err(e) => (false, e.to_string()),
            };
            return AgentStep {
                index,
                kind: StepKind::Tool,
                name: name.to_string(),
                params: serde_json::Value::Object(params.clone()),
                success,
                output,
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }

        let outcome = self.gateway.execute(name, params, ActorSource::Agent).await;
        let output = if outcome.success {
            outcome.output
        } else {
            outcome.error.unwrap_or(outcome.output)
        };
        AgentStep {
            index,
            kind: StepKind::Action,
            name: name.to_string(),
            params: serde_json::Value::Object(params.clone()),
            success: outcome.success,
            output,
            duration_ms: outcome.duration_ms,
        }
    }

    /// The user-visible record of a step, quoted back into the transcript.
    fn observation(&self, step: &AgentStep) -> String {
        let status = if step.success { "ok" } else { "failed" };
        let body = truncate_chars(&step.output, self.max_observation_chars);
        let keys = self.memory.lock().unwrap().keys().join(", ");
        format!(
            "Observation: {status} ({} ms)\n{body}\nWorking memory keys: [{keys}]",
            step.duration_ms
        )
    }

    /// Rebuilt every iteration so the capability list and the memory
    /// snapshot stay current.
    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are an autonomous task agent. Work toward the user's goal in small, \
             verifiable steps.\n\n\
             Reply format, one tag per line:\n\
             PLAN: <short plan, in your first reply>\n\
             THOUGHT: <your reasoning>\n\
             ACTION: <name>(<key>=<value>, ...)\n\
             ASK: <a question for the user>\n\
             DONE: <summary of what was accomplished>\n\
             STUCK: <why no further progress is possible>\n\n\
             At most one ACTION per reply. Quote values that contain commas: \
             key=\"a, b\". Every reply must end with exactly one of ACTION, ASK, \
             DONE, or STUCK.\n",
        );

        let tools = self.tools.prompt_lines();
        if !tools.is_empty() {
            prompt.push_str("\nTools (run immediately):\n");
            for line in tools {
                prompt.push_str("  ");
                prompt.push_str(&line);
                prompt.push('\n');
            }
        }

        let actions = self.gateway.prompt_lines();
        if !actions.is_empty() {
            prompt.push_str("\nActions (safety-checked, may need confirmation):\n");
            for line in actions {
                prompt.push_str("  ");
                prompt.push_str(&line);
                prompt.push('\n');
            }
        }

        prompt.push_str("\nWorking memory:\n");
        let memory = self.memory.lock().unwrap();
        if memory.is_empty() {
            prompt.push_str("  (empty)\n");
        } else {
            for (key, value) in memory.entries() {
                prompt.push_str(&format!(
                    "  {key}: {}\n",
                    truncate_chars(&value, MEMORY_VALUE_CHARS)
                ));
            }
        }
        prompt
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FlagAfterCalls, SequentialMockProvider};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use wardclaw_core::action::require_str;
    use wardclaw_core::{ParamSpec, Tool, ToolError};
    use wardclaw_safety::{ApproveAll, builtin_actions};

    fn make_loop(
        provider: Arc<SequentialMockProvider>,
        memory: SharedMemory,
        trash: &Path,
    ) -> AgentLoop {
        let actions = builtin_actions(trash.to_path_buf(), Arc::clone(&memory));
        let gateway = Arc::new(ExecutionGateway::new(actions, Box::new(ApproveAll)));
        AgentLoop::new(
            provider,
            "mock-model",
            Arc::new(ToolRegistry::new()),
            gateway,
        )
        .with_memory(memory)
    }

    #[tokio::test]
    async fn done_terminates_after_one_step() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::single_text(
            "PLAN: just finish\nDONE: all set",
        ));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path());

        let result = agent.run("say done").await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_taken, 1);
        assert_eq!(result.summary, "all set");
        assert!(result.abort_reason.is_none());
        assert!(result.steps.is_empty());
        assert_eq!(provider.call_count(), 1);
        // Transcript comes back for session persistence: goal + reply
        assert_eq!(result.transcript.len(), 2);
        assert_eq!(result.transcript[0].content, "say done");
    }

    #[tokio::test]
    async fn never_tagged_run_stops_at_max_steps() {
        let trash = tempdir().unwrap();
        let scripts = ["Happy to help with that!"; 4];
        let provider = Arc::new(SequentialMockProvider::from_scripts(&scripts));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path())
            .with_max_steps(4);

        let result = agent.run("do something").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.abort_reason, Some(AbortReason::MaxSteps));
        assert_eq!(result.abort_reason.unwrap().as_str(), "MaxSteps");
        assert_eq!(result.steps_taken, 4);
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn action_step_runs_through_the_gateway() {
        let trash = tempdir().unwrap();
        let memory = WorkingMemory::shared();
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[
            "THOUGHT: remember the color\nACTION: memory_store(key=color, value=blue)",
            "DONE: remembered",
        ]));
        let agent = make_loop(Arc::clone(&provider), Arc::clone(&memory), trash.path());

        let result = agent.run("remember that the color is blue").await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_taken, 2);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].kind, StepKind::Action);
        assert_eq!(result.steps[0].name, "memory_store");
        assert!(result.steps[0].success);
        assert_eq!(memory.lock().unwrap().recall("color"), Some("blue"));
        // The gateway audited the invocation
        assert_eq!(agent.gateway().audit().count(), 1);
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text back"
        }
        fn params(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("text", "Text to echo")]
        }
        async fn invoke(&self, params: &Params) -> Result<String, ToolError> {
            Ok(require_str(params, "text")?.to_string())
        }
    }

    #[tokio::test]
    async fn tool_invocations_bypass_the_gateway() {
        let trash = tempdir().unwrap();
        let memory = WorkingMemory::shared();
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoTool));

        let actions = builtin_actions(trash.path().to_path_buf(), Arc::clone(&memory));
        let gateway = Arc::new(ExecutionGateway::new(actions, Box::new(ApproveAll)));
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[
            "ACTION: echo(text=hello)",
            "DONE: echoed",
        ]));
        let agent = AgentLoop::new(
            Arc::clone(&provider) as Arc<dyn Provider>,
            "mock-model",
            Arc::new(tools),
            Arc::clone(&gateway),
        )
        .with_memory(memory);

        let result = agent.run("echo hello").await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps[0].kind, StepKind::Tool);
        assert_eq!(result.steps[0].output, "hello");
        // Direct tools never touch the audit log
        assert_eq!(gateway.audit().count(), 0);
    }

    struct ScriptedAsk {
        answers: Mutex<Vec<String>>,
    }

    impl ScriptedAsk {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl AskHandler for ScriptedAsk {
        async fn ask(&self, _question: &str) -> Option<String> {
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                None
            } else {
                Some(answers.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn answered_ask_consumes_no_step() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[
            "ASK: which directory should I use?",
            "DONE: done in /tmp",
        ]));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path())
            .with_max_steps(1)
            .with_ask_handler(Arc::new(ScriptedAsk::new(&["use /tmp"])));

        // max_steps is 1, yet the run completes: the answered question
        // cost nothing.
        let result = agent.run("put a file somewhere").await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_taken, 1);
        assert_eq!(provider.call_count(), 2);

        let requests = provider.requests();
        assert!(
            requests[1].messages.iter().any(|m| m.content == "use /tmp"),
            "the answer should have been injected into the transcript"
        );
    }

    #[tokio::test]
    async fn unanswered_ask_consumes_a_step() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[
            "ASK: which directory should I use?",
            "STUCK: no way to pick a directory",
        ]));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path());

        let result = agent.run("put a file somewhere").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.steps_taken, 2);

        let requests = provider.requests();
        assert!(
            requests[1]
                .messages
                .iter()
                .any(|m| m.content.contains("No user is available")),
        );
    }

    #[tokio::test]
    async fn stuck_reports_failure_without_abort_reason() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::single_text(
            "STUCK: missing credentials for the API",
        ));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path());

        let result = agent.run("call the API").await.unwrap();
        assert!(!result.success);
        assert!(result.abort_reason.is_none());
        assert_eq!(result.summary, "missing credentials for the API");
        assert_eq!(result.steps_taken, 1);
    }

    #[tokio::test]
    async fn abort_flag_stops_at_the_next_boundary() {
        let trash = tempdir().unwrap();
        let memory = WorkingMemory::shared();
        let flag = Arc::new(AtomicBool::new(false));
        // One scripted reply; the wrapper raises the flag after it. If the
        // loop kept going the exhausted mock would panic.
        let provider = Arc::new(FlagAfterCalls::new(
            SequentialMockProvider::from_scripts(&["THOUGHT: getting started"]),
            Arc::clone(&flag),
            1,
        ));

        let actions = builtin_actions(trash.path().to_path_buf(), Arc::clone(&memory));
        let gateway = Arc::new(ExecutionGateway::new(actions, Box::new(ApproveAll)));
        let agent = AgentLoop::new(provider, "mock-model", Arc::new(ToolRegistry::new()), gateway)
            .with_memory(memory)
            .with_abort_handle(flag);

        let result = agent.run("long task").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.abort_reason, Some(AbortReason::Aborted));
        assert_eq!(result.steps_taken, 1);
    }

    #[tokio::test]
    async fn preraised_abort_flag_makes_no_provider_calls() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[]));
        let flag = Arc::new(AtomicBool::new(true));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path())
            .with_abort_handle(flag);

        let result = agent.run("anything").await.unwrap();
        assert_eq!(result.abort_reason, Some(AbortReason::Aborted));
        assert_eq!(result.steps_taken, 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn oversized_goal_ends_with_token_budget() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[]));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path())
            .with_budget(ContextBudget {
                context_limit: 50,
                reserved_response_tokens: 0,
                pin_first_n: 2,
                summarize: true,
            });

        let goal = "x".repeat(1000);
        let result = agent.run(&goal).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.abort_reason, Some(AbortReason::TokenBudget));
        assert_eq!(result.abort_reason.unwrap().as_str(), "TokenBudget");
        assert_eq!(result.steps_taken, 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_action_gets_a_corrective_nudge() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[
            "ACTION: create_file(no closing paren",
            "DONE: recovered",
        ]));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path());

        let result = agent.run("make a file").await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_taken, 2);
        // Nothing was dispatched for the malformed line
        assert!(result.steps.is_empty());

        let requests = provider.requests();
        assert!(
            requests[1]
                .messages
                .iter()
                .any(|m| m.content.contains("Could not parse the ACTION line")),
        );
    }

    #[tokio::test]
    async fn continuation_carries_summary_and_memory() {
        let trash = tempdir().unwrap();
        let memory = WorkingMemory::shared();

        let first = Arc::new(SequentialMockProvider::from_scripts(&[
            "ACTION: memory_store(key=color, value=blue)",
            "DONE: stored the color",
        ]));
        let agent = make_loop(Arc::clone(&first), Arc::clone(&memory), trash.path());
        let prior = agent.run("remember the color blue").await.unwrap();
        assert!(prior.success);

        // A fresh loop (new provider), same working memory
        let second = Arc::new(SequentialMockProvider::from_scripts(&[
            "DONE: second finished",
        ]));
        let agent = make_loop(Arc::clone(&second), Arc::clone(&memory), trash.path());
        let result = agent
            .continue_with(&prior, "what color was it?")
            .await
            .unwrap();
        assert!(result.success);

        let opening = &second.requests()[0].messages[0].content;
        assert!(opening.contains("stored the color"));
        assert!(opening.contains("color"));
        assert!(opening.contains("what color was it?"));
        assert_eq!(memory.lock().unwrap().recall("color"), Some("blue"));
    }

    #[tokio::test]
    async fn system_prompt_lists_capabilities_and_memory() {
        let trash = tempdir().unwrap();
        let memory = WorkingMemory::shared();
        memory
            .lock()
            .unwrap()
            .store("project", "wardclaw rework notes");

        let provider = Arc::new(SequentialMockProvider::single_text("DONE: ok"));
        let agent = make_loop(Arc::clone(&provider), Arc::clone(&memory), trash.path());
        agent.run("check the prompt").await.unwrap();

        let request = &provider.requests()[0];
        let prompt = request.system_prompt.as_deref().unwrap();
        assert!(prompt.contains("create_file"));
        assert!(prompt.contains("memory_store"));
        assert!(prompt.contains("ACTION:"));
        assert!(prompt.contains("project: wardclaw rework notes"));
        // The goal is the transcript, not part of the system prompt
        assert_eq!(request.messages[0].content, "check the prompt");
    }

    #[tokio::test]
    async fn thought_only_reply_counts_a_step_and_continues() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[
            "THOUGHT: weighing the options",
            "DONE: decided",
        ]));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path());

        let result = agent.run("decide something").await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_taken, 2);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn failed_action_is_observed_not_fatal() {
        let trash = tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::from_scripts(&[
            "ACTION: memory_recall(key=never_stored)",
            "STUCK: nothing in memory",
        ]));
        let agent = make_loop(Arc::clone(&provider), WorkingMemory::shared(), trash.path());

        let result = agent.run("recall a missing key").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.steps.len(), 1);
        assert!(!result.steps[0].success);

        let requests = provider.requests();
        assert!(
            requests[1]
                .messages
                .iter()
                .any(|m| m.content.starts_with("Observation: failed")),
        );
    }
}
