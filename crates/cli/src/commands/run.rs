//! `wardclaw run` — Drive one goal to completion and exit.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use wardclaw_config::AppConfig;
use wardclaw_core::WorkingMemory;
use wardclaw_providers::build_from_config;

use super::common;

pub async fn run(
    goal: String,
    provider: Option<String>,
    model: Option<String>,
    yes: bool,
    dry_run: bool,
    session: Option<String>,
) -> Result<(), common::CliError> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config
        .validate()
        .map_err(|e| format!("Invalid config: {e}"))?;
    common::require_api_key(&config)?;

    // Flags override the file for this invocation only.
    if yes {
        config.safety.auto_confirm = true;
    }
    if dry_run {
        config.safety.dry_run = true;
    }

    let router = build_from_config(&config)?;
    let provider_name = provider
        .clone()
        .unwrap_or_else(|| config.default_provider.clone());
    let llm = router.resolve(provider.as_deref())?;
    let model = model.unwrap_or_else(|| config.provider_model(&provider_name));

    let explicit_session = session.is_some();
    let session_name = session.unwrap_or_else(common::generated_session_name);

    let memory = WorkingMemory::shared();
    let gateway = common::build_gateway(
        &config,
        Arc::clone(&memory),
        Box::new(common::StdinConfirmer),
        Some(&session_name),
    );
    let agent = common::build_agent(&config, llm, &model, memory, gateway);

    // First Ctrl-C raises the abort flag; the loop winds down at its next
    // iteration boundary instead of dying mid-action.
    let abort = agent.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Stopping after the current step...");
            abort.store(true, Ordering::SeqCst);
        }
    });

    println!("  Goal:     {goal}");
    println!("  Provider: {provider_name} / {model}");
    if config.safety.dry_run {
        println!("  Mode:     dry run (actions are previewed, not performed)");
    }

    let result = agent.run(&goal).await?;
    common::print_run_result(&result);

    if config.sessions.auto_save || explicit_session {
        let store = common::open_session_store(&config).await?;
        common::save_transcript(
            &store,
            &session_name,
            &provider_name,
            &model,
            &result.transcript,
        )
        .await;
        println!("  Saved as '{session_name}'.");
    }

    Ok(())
}
