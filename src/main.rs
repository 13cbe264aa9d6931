use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};

use autoquit::config::AutoQuitConfig;
use autoquit::process::{ProcessControl, ProcessTerminator};
use autoquit::schedule::{self, matcher, Schedule, ScheduleId};
use autoquit::storage::Store;

#[derive(Parser)]
#[command(
    name = "autoquit",
    about = "Quit applications on a schedule, then optionally lock or shut down",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $AUTOQUIT_CONFIG, then /etc/autoquit/autoquit.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(long, global = true, env = "AUTOQUIT_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler + change feed)
    Run,

    /// Manage quit schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Manage apps that are never quit
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },

    /// Suspend all schedules
    Pause,

    /// Resume schedules after a pause
    Resume,

    /// Turn quit and warning notifications on or off
    Notifications {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Show the quit log
    Logs {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Delete every entry instead of listing
        #[arg(long)]
        clear: bool,
    },

    /// Quit an application now
    Quit {
        /// Process name, executable path or executable file name
        app_id: String,

        /// Ask the app to exit before forcing it
        #[arg(long)]
        graceful: bool,

        /// Grace period before forcing (defaults to the config value)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Delete one-time schedules whose date has passed
    PurgeExpired,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List all schedules
    List {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Add a new schedule
    Add {
        /// Process name, executable path or executable file name
        #[arg(long)]
        app: String,

        /// Display name (defaults to the app id)
        #[arg(long)]
        name: Option<String>,

        /// Trigger time, HH:MM (local)
        #[arg(long)]
        at: String,

        /// Anchor date for one-time schedules, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Weekdays to run on, comma separated, 0 = Sunday (empty = every day)
        #[arg(long)]
        days: Option<String>,

        /// Minutes of warning before the quit (0 = none)
        #[arg(long, default_value = "5")]
        warning: u32,

        /// Delete the schedule after it fires (ignored with --days)
        #[arg(long)]
        once: bool,

        /// Lock the screen after quitting
        #[arg(long)]
        lock: bool,

        /// Shut the computer down after quitting
        #[arg(long)]
        shutdown: bool,

        /// Add the schedule disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Change fields of a schedule in place, keeping its id
    Edit {
        #[arg(long)]
        id: ScheduleId,

        /// Process name, executable path or executable file name
        #[arg(long)]
        app: Option<String>,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Trigger time, HH:MM (local)
        #[arg(long)]
        at: Option<String>,

        /// Anchor date, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,

        /// Weekdays, comma separated, 0 = Sunday ("" = every day)
        #[arg(long)]
        days: Option<String>,

        /// Minutes of warning before the quit (0 = none)
        #[arg(long)]
        warning: Option<u32>,

        /// Delete the schedule after it fires
        #[arg(long)]
        once: Option<bool>,

        /// Lock the screen after quitting
        #[arg(long)]
        lock: Option<bool>,

        /// Shut the computer down after quitting
        #[arg(long)]
        shutdown: Option<bool>,
    },

    /// Remove a schedule
    Remove {
        #[arg(long)]
        id: ScheduleId,
    },

    /// Enable a schedule
    Enable {
        #[arg(long)]
        id: ScheduleId,
    },

    /// Disable a schedule
    Disable {
        #[arg(long)]
        id: ScheduleId,
    },

    /// Show what would fire at a given local time
    DryRun {
        /// Local date-time, "YYYY-MM-DD HH:MM"
        #[arg(long)]
        at: String,
    },
}

#[derive(Subcommand)]
enum WhitelistAction {
    /// List whitelisted apps
    List,

    /// Never quit this app
    Add { app: String },

    /// Allow this app to be quit again
    Remove { app: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn init_tracing(config: &AutoQuitConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AutoQuitConfig::load(path)?,
        None => AutoQuitConfig::load_or_default(),
    };
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    init_tracing(&config);

    match cli.command {
        Commands::Run => {
            tracing::info!(db = %config.storage.db_path.display(), "Starting AutoQuit daemon");
            autoquit::run_daemon(config).await?;
        }
        Commands::Schedule { action } => {
            let store = open_store(&config)?;
            run_schedule_action(&store, action)?;
        }
        Commands::Whitelist { action } => {
            let store = open_store(&config)?;
            match action {
                WhitelistAction::List => {
                    let apps = store.whitelist()?;
                    if apps.is_empty() {
                        println!("Whitelist is empty.");
                    }
                    for app in apps {
                        println!("{}", app);
                    }
                }
                WhitelistAction::Add { app } => {
                    if store.add_to_whitelist(&app)? {
                        println!("'{}' whitelisted.", app);
                    } else {
                        println!("'{}' is already whitelisted.", app);
                    }
                }
                WhitelistAction::Remove { app } => {
                    if store.remove_from_whitelist(&app)? {
                        println!("'{}' removed from whitelist.", app);
                    } else {
                        println!("'{}' was not whitelisted.", app);
                    }
                }
            }
        }
        Commands::Pause => {
            open_store(&config)?.set_paused(true)?;
            println!("AutoQuit paused.");
        }
        Commands::Resume => {
            open_store(&config)?.set_paused(false)?;
            println!("AutoQuit resumed.");
        }
        Commands::Notifications { state } => {
            let enabled = matches!(state, Toggle::On);
            open_store(&config)?.set_notifications(enabled)?;
            println!("Notifications {}.", if enabled { "on" } else { "off" });
        }
        Commands::Logs { limit, json, clear } => {
            let store = open_store(&config)?;
            if clear {
                let removed = store.clear_logs()?;
                println!("Cleared {} log entries.", removed);
            } else {
                let logs = store.logs(limit)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&logs)?);
                } else if logs.is_empty() {
                    println!("No quit attempts logged.");
                } else {
                    println!("{:<19} | {:<7} | {:<20} | App", "Time", "Result", "Name");
                    println!("{:-<19}-|-{:-<7}-|-{:-<20}-|-{:-<20}", "", "", "", "");
                    for entry in logs {
                        println!(
                            "{:<19} | {:<7} | {:<20} | {}",
                            entry.attempted_at.format("%Y-%m-%d %H:%M:%S"),
                            if entry.success { "quit" } else { "FAILED" },
                            entry.app_name,
                            entry.app_id
                        );
                    }
                }
            }
        }
        Commands::Quit {
            app_id,
            graceful,
            timeout_ms,
        } => {
            let terminator = ProcessTerminator::new(&config.termination);
            let result = if graceful {
                let timeout = Duration::from_millis(
                    timeout_ms.unwrap_or(config.termination.graceful_timeout_ms),
                );
                terminator.terminate(&app_id, timeout).await
            } else {
                terminator.force_terminate(&app_id).await
            };
            result.with_context(|| format!("quitting '{}'", app_id))?;
            println!("'{}' quit.", app_id);
        }
        Commands::PurgeExpired => {
            let removed = open_store(&config)?.purge_expired(&Local::now().naive_local())?;
            println!("Removed {} expired one-time schedule(s).", removed);
        }
    }

    Ok(())
}

fn open_store(config: &AutoQuitConfig) -> Result<Store> {
    Store::open(&config.storage.db_path, config.history.retention)
}

fn run_schedule_action(store: &Store, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::List { json } => {
            let list = store.list_schedules()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("No schedules found.");
            } else {
                println!(
                    "{:<36} | {:<16} | {:<5} | {:<15} | {:<4} | {:<15} | Enabled",
                    "ID", "Name", "Time", "Days", "Warn", "Then"
                );
                println!(
                    "{:-<36}-|-{:-<16}-|-{:-<5}-|-{:-<15}-|-{:-<4}-|-{:-<15}-|-{:-<7}",
                    "", "", "", "", "", "", ""
                );
                for s in list {
                    println!(
                        "{:<36} | {:<16} | {:<5} | {:<15} | {:<4} | {:<15} | {}",
                        s.id,
                        s.display_name,
                        s.trigger_time.format("%H:%M"),
                        format_days(&s),
                        s.warning_minutes,
                        format_followups(&s),
                        s.enabled
                    );
                }
            }
        }
        ScheduleAction::Add {
            app,
            name,
            at,
            date,
            days,
            warning,
            once,
            lock,
            shutdown,
            disabled,
        } => {
            let today = Local::now().date_naive();
            let trigger = schedule::parse_trigger(&at, date.as_deref(), today)?;
            let display = name.unwrap_or_else(|| app.clone());

            let mut s = Schedule::new(&app, &display, trigger);
            if let Some(days) = days {
                s.repeat_days = schedule::parse_weekdays(&days)?;
            }
            s.warning_minutes = warning;
            s.is_one_time = once;
            s.lock_screen = lock;
            s.shutdown_computer = shutdown;
            s.enabled = !disabled;

            store.add_schedule(&s)?;
            println!("Schedule {} added ({} at {}).", s.id, display, at);
        }
        ScheduleAction::Edit {
            id,
            app,
            name,
            at,
            date,
            days,
            warning,
            once,
            lock,
            shutdown,
        } => {
            let mut s = store
                .get_schedule(id)?
                .with_context(|| format!("no schedule with id {}", id))?;

            if at.is_some() || date.is_some() {
                let time = at.unwrap_or_else(|| s.trigger_time.format("%H:%M").to_string());
                let date = date.unwrap_or_else(|| s.trigger_time.format("%Y-%m-%d").to_string());
                s.trigger_time =
                    schedule::parse_trigger(&time, Some(&date), Local::now().date_naive())?;
            }
            if let Some(app) = app {
                s.target_app_id = app;
            }
            if let Some(name) = name {
                s.display_name = name;
            }
            if let Some(days) = days {
                s.repeat_days = schedule::parse_weekdays(&days)?;
            }
            if let Some(warning) = warning {
                s.warning_minutes = warning;
            }
            if let Some(once) = once {
                s.is_one_time = once;
            }
            if let Some(lock) = lock {
                s.lock_screen = lock;
            }
            if let Some(shutdown) = shutdown {
                s.shutdown_computer = shutdown;
            }

            if !store.update_schedule(&s)? {
                bail!("no schedule with id {}", id);
            }
            println!("Schedule {} updated.", id);
        }
        ScheduleAction::Remove { id } => {
            if !store.remove_schedule(id)? {
                bail!("no schedule with id {}", id);
            }
            println!("Schedule {} removed.", id);
        }
        ScheduleAction::Enable { id } => {
            if !store.set_enabled(id, true)? {
                bail!("no schedule with id {}", id);
            }
            println!("Schedule {} enabled.", id);
        }
        ScheduleAction::Disable { id } => {
            if !store.set_enabled(id, false)? {
                bail!("no schedule with id {}", id);
            }
            println!("Schedule {} disabled.", id);
        }
        ScheduleAction::DryRun { at } => {
            let now = parse_local_datetime(&at)?;
            if store.is_paused()? {
                println!("AutoQuit is paused; nothing would fire.");
                return Ok(());
            }

            let mut any = false;
            for s in store.list_schedules()?.into_iter().filter(|s| s.enabled) {
                if store.is_whitelisted(&s.target_app_id)? {
                    continue;
                }
                if matcher::is_trigger_due(&s, &now) {
                    any = true;
                    println!("{} : quit {} ({})", now.format("%H:%M"), s.display_name, s.id);
                }
                if matcher::is_warning_due(&s, &now) {
                    any = true;
                    println!(
                        "{} : warn {} minute(s) before quitting {} ({})",
                        now.format("%H:%M"),
                        s.warning_minutes,
                        s.display_name,
                        s.id
                    );
                }
            }
            if !any {
                println!("Nothing would fire at {}.", now.format("%Y-%m-%d %H:%M"));
            }
        }
    }
    Ok(())
}

fn parse_local_datetime(input: &str) -> Result<NaiveDateTime> {
    ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input.trim(), fmt).ok())
        .with_context(|| format!("invalid date-time '{}': expected YYYY-MM-DD HH:MM", input))
}

fn format_days(s: &Schedule) -> String {
    const NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    if s.repeat_days.is_empty() {
        return if s.is_one_time {
            format!("once {}", s.trigger_time.format("%m-%d"))
        } else {
            "daily".to_string()
        };
    }
    s.repeat_days
        .iter()
        .filter_map(|d| NAMES.get(usize::from(*d)).copied())
        .collect::<Vec<_>>()
        .join(",")
}

fn format_followups(s: &Schedule) -> String {
    match (s.lock_screen, s.shutdown_computer) {
        (true, true) => "lock, shutdown".to_string(),
        (true, false) => "lock".to_string(),
        (false, true) => "shutdown".to_string(),
        (false, false) => "-".to_string(),
    }
}
