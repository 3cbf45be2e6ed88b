//! Wardclaw CLI — the main entry point.
//!
//! Commands:
//! - `run`       — Drive one goal to completion and exit
//! - `chat`      — Interactive conversation with session persistence
//! - `sessions`  — List, inspect, search, rename, delete saved sessions
//! - `undo`      — Revert the most recent reversible actions
//! - `audit`     — Inspect the action audit trail
//! - `heartbeat` — Run any scheduled tasks that are due
//! - `config`    — Manage the config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "wardclaw",
    about = "Wardclaw — an autonomous task agent for your terminal",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Turn on debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one goal to completion and exit
    Run {
        /// What the agent should accomplish
        goal: String,

        /// Provider to use instead of the configured default
        #[arg(short, long)]
        provider: Option<String>,

        /// Model to use instead of the provider's default
        #[arg(short, long)]
        model: Option<String>,

        /// Approve all confirmation prompts without asking
        #[arg(short = 'y', long)]
        yes: bool,

        /// Walk the safety gates but log actions instead of performing them
        #[arg(long)]
        dry_run: bool,

        /// Save the transcript under this session name
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Chat interactively, one agent run per message
    Chat {
        /// Resume a saved session: bare flag picks the most recent,
        /// a value picks one by name
        #[arg(short, long)]
        resume: Option<Option<String>>,

        /// Provider to use instead of the configured default
        #[arg(short, long)]
        provider: Option<String>,

        /// Model to use instead of the provider's default
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Inspect and manage saved sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// Revert the most recent reversible actions
    Undo {
        /// How many operations to revert
        #[arg(default_value_t = 1)]
        count: usize,
    },

    /// Show recent entries from the action audit trail
    Audit {
        /// Maximum number of records to show
        #[arg(default_value_t = 20)]
        limit: usize,
    },

    /// Run any scheduled heartbeat tasks that are due, then exit
    Heartbeat,

    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// List saved sessions, most recent first
    List {
        /// Maximum number to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Print a session transcript
    Show {
        /// Session name; defaults to the most recent
        name: Option<String>,
    },

    /// Full-text search across all session transcripts
    Search {
        /// What to look for
        keyword: String,

        /// Maximum number of matches to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Rename a session
    Rename {
        /// Current name
        old: String,

        /// New name
        new: String,
    },

    /// Delete a session and all its messages
    Delete {
        /// Session name
        name: String,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a starter config file
    Init,

    /// Print the effective configuration, keys redacted
    Show,

    /// Print the config file path
    Path,
}

/// `RUST_LOG` wins when set; otherwise `--verbose` decides the level.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            goal,
            provider,
            model,
            yes,
            dry_run,
            session,
        } => commands::run::run(goal, provider, model, yes, dry_run, session).await?,
        Commands::Chat {
            resume,
            provider,
            model,
        } => commands::chat::run(resume, provider, model).await?,
        Commands::Sessions { command } => match command {
            SessionsCommand::List { limit } => commands::sessions::list(limit).await?,
            SessionsCommand::Show { name } => commands::sessions::show(name).await?,
            SessionsCommand::Search { keyword, limit } => {
                commands::sessions::search(keyword, limit).await?
            }
            SessionsCommand::Rename { old, new } => commands::sessions::rename(old, new).await?,
            SessionsCommand::Delete { name, yes } => commands::sessions::delete(name, yes).await?,
        },
        Commands::Undo { count } => commands::undo::run(count).await?,
        Commands::Audit { limit } => commands::audit::run(limit).await?,
        Commands::Heartbeat => commands::heartbeat::run().await?,
        Commands::Config { command } => match command {
            ConfigCommand::Init => commands::config_cmd::init().await?,
            ConfigCommand::Show => commands::config_cmd::show().await?,
            ConfigCommand::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
