//! `wardclaw chat` — Interactive conversation with session persistence.
//!
//! Each line the user types becomes one agent run; follow-up lines run as
//! continuations that carry the working memory and a one-line recap of how
//! the previous run ended. Transcripts accumulate across runs and are
//! saved after every turn when auto-save is on.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use wardclaw_agent::AgentRunResult;
use wardclaw_config::AppConfig;
use wardclaw_core::{Message, SessionStore, WorkingMemory};
use wardclaw_providers::build_from_config;

use super::common;

pub async fn run(
    resume: Option<Option<String>>,
    provider: Option<String>,
    model: Option<String>,
) -> Result<(), common::CliError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config
        .validate()
        .map_err(|e| format!("Invalid config: {e}"))?;
    common::require_api_key(&config)?;

    let router = build_from_config(&config)?;
    let provider_name = provider
        .clone()
        .unwrap_or_else(|| config.default_provider.clone());
    let llm = router.resolve(provider.as_deref())?;
    let model = model.unwrap_or_else(|| config.provider_model(&provider_name));

    let store = common::open_session_store(&config).await?;

    // Bare --resume picks the most recent session; a value picks by name.
    // Working memory is not persisted, so a resumed run starts from the
    // saved transcript plus a synthetic summary of where things stood.
    let mut transcript: Vec<Message> = Vec::new();
    let mut prior: Option<AgentRunResult> = None;
    let session_name = match resume {
        Some(target) => match store.resume(target.as_deref()).await? {
            Some(record) => {
                println!(
                    "  Resumed '{}' ({} message(s), last active {}).",
                    record.summary.name,
                    record.messages.len(),
                    record.summary.updated_at.format("%Y-%m-%d %H:%M"),
                );
                let name = record.summary.name.clone();
                prior = Some(AgentRunResult {
                    steps: Vec::new(),
                    steps_taken: 0,
                    success: true,
                    summary: format!(
                        "Resumed saved session '{}' with {} earlier messages.",
                        name,
                        record.messages.len()
                    ),
                    abort_reason: None,
                    transcript: Vec::new(),
                });
                transcript = record.messages;
                name
            }
            None => match target {
                Some(name) => return Err(format!("no session named '{name}'").into()),
                None => {
                    println!("  No saved sessions yet, starting fresh.");
                    common::generated_session_name()
                }
            },
        },
        None => common::generated_session_name(),
    };

    let memory = WorkingMemory::shared();
    let gateway = common::build_gateway(
        &config,
        Arc::clone(&memory),
        Box::new(common::StdinConfirmer),
        Some(&session_name),
    );
    let agent = common::build_agent(&config, llm, &model, memory, gateway)
        .with_ask_handler(Arc::new(common::StdinAsk));

    // Ctrl-C aborts the in-flight run at its next boundary; the prompt
    // comes back instead of the process dying.
    let abort = agent.abort_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Stopping after the current step...");
            abort.store(true, Ordering::SeqCst);
        }
    });

    println!();
    println!("  Wardclaw chat — session '{session_name}'");
    println!("  Provider: {provider_name} / {model}");
    println!("  Type a goal and press Enter. '/quit' to leave.");
    println!();

    loop {
        let Some(line) = common::read_line("  You > ").await else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" || input == "/exit" {
            break;
        }

        agent.abort_handle().store(false, Ordering::SeqCst);
        let outcome = match &prior {
            Some(p) => agent.continue_with(p, input).await,
            None => agent.run(input).await,
        };

        match outcome {
            Ok(result) => {
                common::print_run_result(&result);
                transcript.extend(result.transcript.iter().cloned());
                if config.sessions.auto_save {
                    common::save_transcript(
                        &store,
                        &session_name,
                        &provider_name,
                        &model,
                        &transcript,
                    )
                    .await;
                }
                prior = Some(result);
            }
            Err(e) => eprintln!("  [error] {e}"),
        }
        println!();
    }

    if !transcript.is_empty() {
        common::save_transcript(&store, &session_name, &provider_name, &model, &transcript).await;
        println!("  Session saved as '{session_name}'.");
    }
    println!("  Bye.");

    Ok(())
}
