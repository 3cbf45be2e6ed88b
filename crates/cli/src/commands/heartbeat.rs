//! `wardclaw heartbeat` — Run any scheduled tasks that are due, then exit.
//!
//! Meant to be driven by cron or a systemd timer. Runs are unattended:
//! confirmation prompts are denied rather than hung on, and each task is
//! capped at the heartbeat step budget.

use std::sync::Arc;

use chrono::Utc;

use wardclaw_config::AppConfig;
use wardclaw_core::WorkingMemory;
use wardclaw_providers::build_from_config;
use wardclaw_safety::DenyAll;

use super::common;

pub async fn run() -> Result<(), common::CliError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.heartbeat.enabled {
        println!("  Heartbeat is disabled. Set heartbeat.enabled = true in");
        println!(
            "  {} to turn it on.",
            AppConfig::config_dir().join("config.toml").display()
        );
        return Ok(());
    }
    config
        .validate()
        .map_err(|e| format!("Invalid config: {e}"))?;
    common::require_api_key(&config)?;

    let tasks_path = AppConfig::heartbeat_tasks_path();
    let tasks = wardclaw_agent::load_tasks(&tasks_path);
    if tasks.is_empty() {
        println!("  No heartbeat tasks defined. Add some to:");
        println!("  {}", tasks_path.display());
        return Ok(());
    }

    let router = build_from_config(&config)?;
    let provider = router.resolve(None)?;
    let model = config.default_model.clone();

    let outcome = wardclaw_agent::run_due_tasks(&tasks_path, Utc::now(), |task| {
        let memory = WorkingMemory::shared();
        let gateway = common::build_gateway(
            &config,
            Arc::clone(&memory),
            Box::new(DenyAll),
            Some(&task.label),
        );
        common::build_agent(&config, Arc::clone(&provider), &model, memory, gateway)
            .with_max_steps(config.heartbeat.max_steps as usize)
    })
    .await;

    if outcome.ran == 0 {
        println!("  Nothing due ({} task(s) checked).", tasks.len());
    } else {
        println!(
            "  Ran {} task(s), skipped {}, {} failed.",
            outcome.ran, outcome.skipped, outcome.failures
        );
        println!("  Results are recorded in {}", tasks_path.display());
    }
    Ok(())
}
