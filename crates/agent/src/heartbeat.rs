//! Heartbeat: persisted tasks run on a schedule, without a user present.
//!
//! Tasks live in a JSON file under the config directory. The `heartbeat`
//! entry point loads them, runs whichever are due, and writes back
//! `last_run` and `last_result`. Runs are non-interactive, so callers
//! wire the agent with a deny-by-default confirmer and a small step cap;
//! one failing task never blocks the tasks after it.

use std::path::Path;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::loop_runner::AgentLoop;

const RESULT_CHARS: usize = 200;

/// When a task should run. Weekdays count from Monday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Every `minutes` minutes, measured from the last run.
    Interval { minutes: u64 },
    /// Once per day at the given UTC time.
    Daily { hour: u32, minute: u32 },
    /// Once per week at the given UTC weekday and time.
    Weekly { weekday: u32, hour: u32, minute: u32 },
}

impl Schedule {
    /// Whether the task should run now. Daily and weekly schedules are
    /// due when the most recent scheduled instant at or before `now` has
    /// not been run yet; a missed slot is made up on the next heartbeat
    /// rather than skipped.
    pub fn due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self {
            Schedule::Interval { minutes } => match last_run {
                None => true,
                Some(last) => now.signed_duration_since(last) >= Duration::minutes(*minutes as i64),
            },
            Schedule::Daily { hour, minute } => {
                let Some(slot) = most_recent_daily(now, *hour, *minute) else {
                    return false;
                };
                last_run.is_none_or(|last| last < slot)
            }
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let Some(slot) = most_recent_weekly(now, *weekday, *hour, *minute) else {
                    return false;
                };
                last_run.is_none_or(|last| last < slot)
            }
        }
    }

    /// Check the fields against their calendar ranges. An out-of-range
    /// schedule is never `due`, so callers surface this error instead of
    /// waiting on a slot that cannot exist.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Schedule::Interval { .. } => Ok(()),
            Schedule::Daily { hour, minute } => check_time(*hour, *minute),
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => {
                if *weekday > 6 {
                    return Err(format!(
                        "weekday {weekday} is out of range (0 = Monday .. 6 = Sunday)"
                    ));
                }
                check_time(*hour, *minute)
            }
        }
    }
}

fn check_time(hour: u32, minute: u32) -> Result<(), String> {
    if hour > 23 || minute > 59 {
        Err(format!("time {hour:02}:{minute:02} is out of range"))
    } else {
        Ok(())
    }
}

/// The most recent daily slot at or before `now`. `None` only for an
/// invalid hour/minute.
fn most_recent_daily(now: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let today = now.date_naive().and_hms_opt(hour, minute, 0)?.and_utc();
    if today <= now {
        Some(today)
    } else {
        Some(today - Duration::days(1))
    }
}

/// The most recent weekly slot at or before `now`. `None` for an
/// out-of-range weekday or time.
fn most_recent_weekly(
    now: DateTime<Utc>,
    weekday: u32,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Utc>> {
    if weekday > 6 {
        return None;
    }
    let today_slot = now.date_naive().and_hms_opt(hour, minute, 0)?.and_utc();
    let days_back = (now.date_naive().weekday().num_days_from_monday() + 7 - weekday) % 7;
    let slot = today_slot - Duration::days(i64::from(days_back));
    if slot <= now {
        Some(slot)
    } else {
        Some(slot - Duration::days(7))
    }
}

/// One persisted background task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatTask {
    pub id: String,
    /// Short human label, shown in logs.
    pub label: String,
    /// The goal handed to the agent loop verbatim.
    pub goal: String,
    pub schedule: Schedule,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl HeartbeatTask {
    pub fn new(label: impl Into<String>, goal: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            goal: goal.into(),
            schedule,
            enabled: true,
            last_run: None,
            last_result: None,
        }
    }
}

/// Tally of one heartbeat pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HeartbeatOutcome {
    /// Tasks that were due and attempted.
    pub ran: usize,
    /// Tasks disabled or not yet due.
    pub skipped: usize,
    /// Attempted tasks that did not end in DONE.
    pub failures: usize,
}

/// Load the task file. Missing means no tasks; a corrupt file is logged
/// and treated as empty rather than failing the heartbeat.
pub fn load_tasks(path: &Path) -> Vec<HeartbeatTask> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "heartbeat task file is corrupt, starting empty");
                Vec::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read heartbeat task file");
            Vec::new()
        }
    }
}

/// Write the task file back. Best effort: a write failure is logged and
/// the in-memory results stand.
pub fn save_tasks(path: &Path, tasks: &[HeartbeatTask]) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %path.display(), error = %e, "could not create heartbeat task directory");
                return;
            }
        }
    }
    match serde_json::to_string_pretty(tasks) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!(path = %path.display(), error = %e, "could not persist heartbeat tasks");
            }
        }
        Err(e) => warn!(error = %e, "could not serialize heartbeat tasks"),
    }
}

/// Run every enabled task whose schedule is due at `now`.
///
/// `make_agent` builds a fresh loop per task; the caller decides the
/// provider, confirmer, and step cap. Task failures are recorded in
/// `last_result` and counted, never propagated, so one bad task cannot
/// starve the rest.
pub async fn run_due_tasks<F>(
    tasks_path: &Path,
    now: DateTime<Utc>,
    make_agent: F,
) -> HeartbeatOutcome
where
    F: Fn(&HeartbeatTask) -> AgentLoop,
{
    let mut tasks = load_tasks(tasks_path);
    let mut outcome = HeartbeatOutcome::default();

    for task in tasks.iter_mut() {
        if !task.enabled {
            outcome.skipped += 1;
            continue;
        }
        if let Err(reason) = task.schedule.validate() {
            warn!(task = %task.label, %reason, "schedule is invalid, task can never run");
            outcome.skipped += 1;
            continue;
        }
        if !task.schedule.due(task.last_run, now) {
            outcome.skipped += 1;
            continue;
        }

        info!(task = %task.label, "heartbeat task due");
        let agent = make_agent(task);
        let result = agent.run(&task.goal).await;
        outcome.ran += 1;
        task.last_run = Some(now);
        task.last_result = Some(match result {
            Ok(run) if run.success => format!("ok: {}", clip(&run.summary)),
            Ok(run) => {
                outcome.failures += 1;
                format!("failed: {}", clip(&run.summary))
            }
            Err(e) => {
                outcome.failures += 1;
                warn!(task = %task.label, error = %e, "heartbeat task errored");
                format!("error: {e}")
            }
        });
    }

    if outcome.ran > 0 {
        save_tasks(tasks_path, &tasks);
    }
    info!(
        ran = outcome.ran,
        skipped = outcome.skipped,
        failures = outcome.failures,
        "heartbeat pass finished"
    );
    outcome
}

fn clip(text: &str) -> String {
    if text.chars().count() <= RESULT_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(RESULT_CHARS).collect();
        format!("{head}…")
    }
}
