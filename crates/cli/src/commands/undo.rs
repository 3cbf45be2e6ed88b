//! `wardclaw undo` — Revert the most recent reversible actions.

use wardclaw_config::AppConfig;
use wardclaw_safety::UndoHistory;

use super::common;

pub async fn run(count: usize) -> Result<(), common::CliError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let history = UndoHistory::new(AppConfig::undo_log_path(), config.safety.undo_capacity);

    if history.pending_count() == 0 {
        println!("  Nothing to undo.");
        return Ok(());
    }

    let outcomes = history.undo(count)?;
    for outcome in &outcomes {
        let mark = if outcome.undone { "✅" } else { "⚠️ " };
        println!("  {mark} {}", outcome.action);
        println!("      {}", outcome.detail);
    }

    let reverted = outcomes.iter().filter(|o| o.undone).count();
    println!();
    println!("  Reverted {reverted} of {} operation(s).", outcomes.len());
    Ok(())
}
