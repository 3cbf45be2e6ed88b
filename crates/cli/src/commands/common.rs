//! Shared wiring used by every command: stdin prompts, the execution
//! gateway, the agent loop, and the session store.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use wardclaw_agent::{AgentLoop, AgentRunResult, AskHandler};
use wardclaw_config::AppConfig;
use wardclaw_core::{
    Message, ParamSpec, Params, Provider, SessionStore, SessionSummary, SharedMemory, Tool,
    ToolError, ToolRegistry,
};
use wardclaw_safety::{builtin_actions, AuditLog, Confirmer, ExecutionGateway, UndoHistory};
use wardclaw_sessions::{migrate_if_needed, SqliteSessionStore};

pub type CliError = Box<dyn std::error::Error>;

/// Prompt on stdout and read one line from stdin. `None` on EOF or a
/// read failure. Blocking reads run off the async runtime.
pub async fn read_line(prompt: &str) -> Option<String> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || {
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await
    .unwrap_or(None)
}

/// Puts gateway confirmation prompts to the terminal. The prompt text
/// arrives fully formed, e.g. `Allow delete_file(path=x)? [requires-confirmation]`.
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        match read_line(&format!("\n  {prompt} [y/N] ")).await {
            Some(line) => matches!(line.trim(), "y" | "Y" | "yes"),
            None => false,
        }
    }
}

/// Relays the agent's `ASK:` questions to the terminal. An empty answer
/// hands the decision back to the model.
pub struct StdinAsk;

#[async_trait]
impl AskHandler for StdinAsk {
    async fn ask(&self, question: &str) -> Option<String> {
        println!();
        println!("  Agent asks: {question}");
        let answer = read_line("  Answer (empty to let it decide) > ").await?;
        let answer = answer.trim();
        if answer.is_empty() {
            None
        } else {
            Some(answer.to_string())
        }
    }
}

/// Pure UTC clock lookup, invoked directly by the loop without touching
/// the gateway.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC"
    }

    fn params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    async fn invoke(&self, _params: &Params) -> Result<String, ToolError> {
        Ok(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string())
    }
}

pub fn build_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(CurrentTimeTool));
    tools
}

/// Wire the execution gateway the same way everywhere: builtin actions
/// over the configured trash directory, persistent audit and undo logs,
/// and the safety knobs from the config file.
pub fn build_gateway(
    config: &AppConfig,
    memory: SharedMemory,
    confirmer: Box<dyn Confirmer>,
    session: Option<&str>,
) -> ExecutionGateway {
    let actions = builtin_actions(AppConfig::trash_dir(), memory);
    let mut gateway = ExecutionGateway::new(actions, confirmer)
        .with_rate_limit(
            config.safety.rate_limit_max,
            Duration::from_secs(config.safety.rate_limit_window_secs),
        )
        .with_audit(AuditLog::new(AppConfig::audit_log_path()))
        .with_undo(UndoHistory::new(
            AppConfig::undo_log_path(),
            config.safety.undo_capacity,
        ))
        .with_auto_confirm(config.safety.auto_confirm)
        .with_dry_run(config.safety.dry_run);
    if let Some(name) = session {
        gateway = gateway.with_session(name);
    }
    gateway
}

/// Assemble an agent loop from the config plus the pieces the command
/// chose. The memory handle must be the same one the gateway's actions
/// were built over.
pub fn build_agent(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    model: &str,
    memory: SharedMemory,
    gateway: ExecutionGateway,
) -> AgentLoop {
    AgentLoop::new(provider, model, Arc::new(build_tools()), Arc::new(gateway))
        .with_config(&config.agent)
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_memory(memory)
}

/// Open the sessions database, folding in any legacy JSON sessions found
/// on first contact.
pub async fn open_session_store(config: &AppConfig) -> Result<SqliteSessionStore, CliError> {
    let db_path = config.sessions_db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteSessionStore::new(&db_path.to_string_lossy()).await?;
    if let Some(report) = migrate_if_needed(&store, &AppConfig::legacy_sessions_dir()).await? {
        if report.failed > 0 {
            println!(
                "  Migrated {} legacy session(s), {} failed.",
                report.imported, report.failed
            );
        } else {
            println!("  Migrated {} legacy session(s).", report.imported);
        }
    }
    Ok(store)
}

/// Persist a transcript under `name`, replacing any previous contents.
/// Storage trouble is logged and swallowed so a failed save never takes
/// down the run that produced the transcript.
pub async fn save_transcript(
    store: &SqliteSessionStore,
    name: &str,
    provider: &str,
    model: &str,
    messages: &[Message],
) {
    let summary = SessionSummary::new(name, provider, model);
    if let Err(e) = store.save(&summary, messages).await {
        tracing::warn!(session = name, error = %e, "Failed to save session");
        eprintln!("  [warn] could not save session '{name}': {e}");
    }
}

pub fn generated_session_name() -> String {
    format!("session-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Render a finished run: the closing summary, then the step tally.
pub fn print_run_result(result: &AgentRunResult) {
    println!();
    if result.success {
        println!("  ✅ {}", result.summary);
    } else if let Some(reason) = &result.abort_reason {
        println!("  ⚠️  Stopped ({reason}): {}", result.summary);
    } else {
        println!("  ❌ {}", result.summary);
    }
    println!(
        "     {} step(s), {} invocation(s)",
        result.steps_taken,
        result.steps.len()
    );
}

/// The standard missing-key message, shared by every command that talks
/// to a provider.
pub fn require_api_key(config: &AppConfig) -> Result<(), CliError> {
    if config.has_api_key() {
        return Ok(());
    }
    eprintln!();
    eprintln!("  No API key configured.");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    WARDCLAW_API_KEY    (generic)");
    eprintln!("    ANTHROPIC_API_KEY   (for Anthropic)");
    eprintln!("    OPENAI_API_KEY      (for OpenAI)");
    eprintln!();
    eprintln!("  Or add api_key to your config file:");
    eprintln!(
        "    {}",
        AppConfig::config_dir().join("config.toml").display()
    );
    eprintln!();
    Err("no API key found, see above for setup".into())
}
