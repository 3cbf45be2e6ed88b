//! `wardclaw sessions` — List, inspect, search, rename, and delete saved
//! sessions.

use wardclaw_config::AppConfig;
use wardclaw_core::SessionStore;
use wardclaw_sessions::SqliteSessionStore;

use super::common;

async fn open() -> Result<SqliteSessionStore, common::CliError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    common::open_session_store(&config).await
}

pub async fn list(limit: usize) -> Result<(), common::CliError> {
    let store = open().await?;
    let sessions = store.list(limit).await?;
    if sessions.is_empty() {
        println!("  No saved sessions.");
        return Ok(());
    }

    println!("  {} session(s), most recent first:", sessions.len());
    println!();
    for (i, s) in sessions.iter().enumerate() {
        println!(
            "  {:>2}. {}  {} message(s), {}/{}, updated {}",
            i + 1,
            s.name,
            s.message_count,
            s.provider,
            s.model,
            s.updated_at.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

pub async fn show(name: Option<String>) -> Result<(), common::CliError> {
    let store = open().await?;
    let record = match store.resume(name.as_deref()).await? {
        Some(record) => record,
        None => match name {
            Some(n) => return Err(format!("no session named '{n}'").into()),
            None => {
                println!("  No saved sessions.");
                return Ok(());
            }
        },
    };

    let s = &record.summary;
    println!("  {}  ({}/{})", s.name, s.provider, s.model);
    println!(
        "  Created {}, updated {}, {} message(s)",
        s.created_at.format("%Y-%m-%d %H:%M"),
        s.updated_at.format("%Y-%m-%d %H:%M"),
        record.messages.len(),
    );
    println!();
    for msg in &record.messages {
        let mut lines = msg.content.lines();
        println!("  {:>9} | {}", msg.role.as_str(), lines.next().unwrap_or(""));
        for rest in lines {
            println!("  {:>9} | {rest}", "");
        }
    }
    Ok(())
}

pub async fn search(keyword: String, limit: usize) -> Result<(), common::CliError> {
    let store = open().await?;
    let hits = store.search(&keyword, limit).await?;
    if hits.is_empty() {
        println!("  No matches for \"{keyword}\".");
        return Ok(());
    }

    println!("  {} match(es) for \"{keyword}\":", hits.len());
    println!();
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {:>2}. [{}] {}: {}",
            i + 1,
            hit.session_name,
            hit.role,
            hit.snippet,
        );
    }
    Ok(())
}

pub async fn rename(old: String, new: String) -> Result<(), common::CliError> {
    let store = open().await?;
    if store.rename(&old, &new).await? {
        println!("  Renamed '{old}' to '{new}'.");
        Ok(())
    } else {
        Err(format!("could not rename: '{old}' does not exist or '{new}' is already taken").into())
    }
}

pub async fn delete(name: String, yes: bool) -> Result<(), common::CliError> {
    if !yes {
        let answer = common::read_line(&format!(
            "  Delete session '{name}' and all its messages? [y/N] "
        ))
        .await;
        let confirmed = matches!(answer.as_deref().map(str::trim), Some("y" | "Y" | "yes"));
        if !confirmed {
            println!("  Kept '{name}'.");
            return Ok(());
        }
    }

    let store = open().await?;
    if store.delete(&name).await? {
        println!("  Deleted '{name}'.");
        Ok(())
    } else {
        Err(format!("no session named '{name}'").into())
    }
}
