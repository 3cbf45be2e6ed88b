//! `wardclaw audit` — Inspect the action audit trail.

use wardclaw_config::AppConfig;
use wardclaw_safety::{ActorSource, AuditLog};

use super::common;

pub async fn run(limit: usize) -> Result<(), common::CliError> {
    let log = AuditLog::new(AppConfig::audit_log_path());
    if log.count() == 0 {
        println!("  Audit log is empty.");
        return Ok(());
    }

    let records = log.recent(limit);
    println!("  Showing {} of {} record(s):", records.len(), log.count());
    println!();
    for record in &records {
        let source = match record.source {
            ActorSource::Human => "human",
            ActorSource::Agent => "agent",
        };
        let session = record
            .session
            .as_deref()
            .map(|s| format!(" [{s}]"))
            .unwrap_or_default();
        println!(
            "  {}  {:<15} {:<5} {}{}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.status.as_str(),
            source,
            record.action,
            session,
        );
        if let Some(error) = &record.error {
            println!("      ! {error}");
        }
    }
    Ok(())
}
