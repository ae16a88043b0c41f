use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use daybook_core::clock::SystemClock;
use daybook_core::config::{
    load_config, local_dir, resolve_daybook_home, update_config, ConfigError, DaybookConfig,
};
use daybook_core::dates::{parse_month_key, MONTH_KEY_PREFIX};
use daybook_core::events::{drain, EventBus, PlannerEvent};
use daybook_core::local_store::FileLocalStore;
use daybook_core::notify::{LogSink, NotificationSink};
use daybook_core::planner::{Planner, PlannerDeps};
use daybook_core::remote_store::DirRemoteStore;
use daybook_core::transfer::{read_import, write_export};

mod output;
mod version;

use output::{ok_json, print_json, StdoutSink};

#[derive(Parser)]
#[command(name = "daybook", version, about = "Offline-first daily planner")]
struct Cli {
    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,
    /// Data directory (defaults to $DAYBOOK_HOME, then ~/.daybook).
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a task to a day (today by default)
    Add {
        text: String,
        #[arg(long)]
        date: Option<String>,
        /// Display time, e.g. "09:30 AM" or "21:30"
        #[arg(long)]
        time: Option<String>,
        /// Reminder time, HH:MM
        #[arg(long)]
        remind: Option<String>,
    },
    /// Toggle a task's completion
    Done {
        task_id: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Delete a task
    Rm {
        task_id: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Change a task's text or times
    Edit {
        task_id: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long, conflicts_with = "clear_time")]
        time: Option<String>,
        #[arg(long, conflicts_with = "clear_remind")]
        remind: Option<String>,
        #[arg(long)]
        clear_time: bool,
        #[arg(long)]
        clear_remind: bool,
    },
    /// Subtask operations
    Sub {
        #[command(subcommand)]
        command: SubCommand,
    },
    /// Set the note for a day (empty text clears it)
    Note {
        text: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Show a month (the current one by default)
    Show {
        /// Month as YYYY-MM
        #[arg(long)]
        month: Option<String>,
    },
    /// Show the completion streak
    Streak,
    /// Reconcile local data with the remote store
    Sync,
    /// Reload the current month from the remote store
    Refresh,
    /// Export all months and moments as JSON
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import an export file, imported days winning
    Import { path: PathBuf },
    /// Journal moments
    Moment {
        #[command(subcommand)]
        command: MomentCommand,
    },
    /// Arm today's reminders and wait for them
    Remind {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        for_secs: Option<u64>,
    },
    /// Inspect or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum SubCommand {
    Add {
        task_id: String,
        text: String,
        #[arg(long)]
        date: Option<String>,
    },
    Done {
        task_id: String,
        subtask_id: String,
        #[arg(long)]
        date: Option<String>,
    },
    Rm {
        task_id: String,
        subtask_id: String,
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand)]
enum MomentCommand {
    Add {
        text: String,
        #[arg(long, default_value = "")]
        mood: String,
    },
    Edit { moment_id: String, text: String },
    Rm { moment_id: String },
    List,
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    SetUser { user_id: String },
    SetRemote { dir: PathBuf },
}

struct Session {
    planner: Planner,
    events: UnboundedReceiver<PlannerEvent>,
    config: DaybookConfig,
}

impl Session {
    fn open(home: &Path, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        let config = load_config(home);
        debug!(home = %home.display(), user = ?config.user_id(), "opening planner");
        let (bus, events) = EventBus::channel();
        let deps = PlannerDeps::offline(
            Arc::new(FileLocalStore::new(local_dir(home))),
            Arc::new(SystemClock),
        )
        .with_remote(Arc::new(DirRemoteStore::new(config.remote_dir(home))))
        .with_sink(sink)
        .with_settings(config.reminder_settings())
        .with_events(bus);
        let mut planner = Planner::new(deps);
        if let Some(user_id) = config.user_id() {
            planner.resume_session(user_id)?;
        }
        Ok(Self {
            planner,
            events,
            config,
        })
    }

    /// Wait for background writes, then surface whatever the planner
    /// reported along the way.
    async fn finish(mut self) {
        self.planner.settle().await;
        output::report_notices(&drain(&mut self.events));
    }

    /// The day a task lives on: `--date` when given, else the day in the
    /// month on screen that holds it, else today.
    fn task_date(&self, date: Option<String>, task_id: &str) -> String {
        if let Some(date) = date {
            return date;
        }
        self.planner
            .month()
            .iter()
            .find(|(_, day)| day.task(task_id).is_some())
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| self.planner.today_key())
    }

    fn day_or_today(&self, date: Option<String>) -> String {
        date.unwrap_or_else(|| self.planner.today_key())
    }
}

fn parse_month_arg(raw: &str) -> Result<(i32, u32)> {
    parse_month_key(&format!("{MONTH_KEY_PREFIX}{}", raw.trim()))
        .ok_or_else(|| anyhow!("Invalid month {raw:?}; expected YYYY-MM"))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("daybook=warn,daybook_core=warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let home = match cli.home.clone() {
        Some(home) => home,
        None => resolve_daybook_home().ok_or(ConfigError::NoHome)?,
    };
    run(cli.command, &home, cli.json).await
}

async fn run(command: Command, home: &Path, json: bool) -> Result<()> {
    match command {
        Command::Version => {
            let full = version::full();
            if json {
                ok_json("version", &full)?;
            } else {
                println!("daybook {full}");
            }
            Ok(())
        }
        Command::Config { command } => run_config(command, home, json),
        Command::Remind { for_secs } => run_remind(home, for_secs, json).await,
        command => {
            let mut session = Session::open(home, Arc::new(LogSink))?;
            let result = run_planner(command, &mut session, json).await;
            session.finish().await;
            result
        }
    }
}

async fn run_planner(command: Command, session: &mut Session, json: bool) -> Result<()> {
    match command {
        Command::Add {
            text,
            date,
            time,
            remind,
        } => {
            let date = session.day_or_today(date);
            let task = session.planner.add_task(
                &date,
                &text,
                time.as_deref(),
                remind.as_deref(),
            )?;
            if json {
                print_json(&json!({"ok": true, "date": date, "task": task}))?;
            } else {
                println!("added {} on {date}", task.id);
            }
        }
        Command::Done { task_id, date } => {
            let date = session.task_date(date, &task_id);
            let completed = session.planner.toggle_task(&date, &task_id)?;
            if json {
                print_json(&json!({
                    "ok": true,
                    "task_id": task_id,
                    "completed": completed,
                    "streak": session.planner.streak(),
                }))?;
            } else {
                let state = if completed { "done" } else { "open" };
                println!("{task_id} is {state}; {}", output::streak_line(session.planner.streak()));
            }
        }
        Command::Rm { task_id, date } => {
            let date = session.task_date(date, &task_id);
            let removed = session.planner.delete_task(&date, &task_id)?;
            if json {
                ok_json("removed", &removed)?;
            } else {
                println!("removed {}", removed.id);
            }
        }
        Command::Edit {
            task_id,
            date,
            text,
            time,
            remind,
            clear_time,
            clear_remind,
        } => {
            if text.is_none() && time.is_none() && remind.is_none() && !clear_time && !clear_remind
            {
                bail!("Nothing to change; pass --text, --time, --remind or a --clear flag");
            }
            let date = session.task_date(date, &task_id);
            let planner = &mut session.planner;
            if let Some(text) = text.as_deref() {
                planner.edit_task_text(&date, &task_id, text)?;
            }
            if time.is_some() || clear_time {
                planner.set_task_time(&date, &task_id, time.as_deref())?;
            }
            if remind.is_some() || clear_remind {
                planner.set_reminder_time(&date, &task_id, remind.as_deref())?;
            }
            let task = planner
                .day(&date)
                .and_then(|day| day.task(&task_id).cloned())
                .with_context(|| format!("task {task_id} vanished after edit"))?;
            if json {
                ok_json("task", &task)?;
            } else {
                println!("updated {task_id}");
            }
        }
        Command::Sub { command } => run_subtask(command, session, json)?,
        Command::Note { text, date } => {
            let date = session.day_or_today(date);
            session.planner.set_note(&date, &text)?;
            if json {
                print_json(&json!({"ok": true, "date": date, "note": text.trim_end()}))?;
            } else {
                println!("note saved for {date}");
            }
        }
        Command::Show { month } => {
            if let Some(raw) = month.as_deref() {
                let (year, month) = parse_month_arg(raw)?;
                session.planner.go_to_month(year, month).await?;
            }
            let planner = &session.planner;
            if json {
                print_json(&json!({
                    "ok": true,
                    "month_key": planner.month_key(),
                    "days": planner.month().as_ref(),
                    "streak": planner.streak(),
                }))?;
            } else {
                output::print_month(planner.month_key(), planner.month());
            }
        }
        Command::Streak => {
            if json {
                ok_json("streak", session.planner.streak())?;
            } else {
                println!("{}", output::streak_line(session.planner.streak()));
            }
        }
        Command::Sync => {
            let user_id = session
                .config
                .user_id()
                .map(str::to_string)
                .context("No user configured; run `daybook config set-user <id>` first")?;
            let report = session.planner.sign_in(&user_id).await?;
            if json {
                ok_json("sync", &report)?;
            } else if report.remote_ok {
                println!(
                    "synced {}: {} merged, {} pulled, {} pushed, {} moments",
                    report.user_id,
                    report.summary.merged,
                    report.summary.remote_only,
                    report.pushed.len(),
                    report.moments
                );
            } else {
                println!("remote unreachable; working from local data");
            }
        }
        Command::Refresh => {
            let source = session.planner.refresh().await;
            if json {
                print_json(&json!({
                    "ok": true,
                    "source": source,
                    "month_key": session.planner.month_key(),
                }))?;
            } else {
                output::print_month(session.planner.month_key(), session.planner.month());
            }
        }
        Command::Export { out } => {
            let body = session.planner.export()?;
            match out {
                Some(path) => {
                    write_export(&path, &body)?;
                    if json {
                        print_json(&json!({"ok": true, "path": path.display().to_string()}))?;
                    } else {
                        println!("exported to {}", path.display());
                    }
                }
                None if json => {
                    let envelope: serde_json::Value = serde_json::from_str(&body)?;
                    ok_json("export", &envelope)?;
                }
                None => println!("{body}"),
            }
        }
        Command::Import { path } => {
            let data = read_import(&path)
                .with_context(|| format!("failed to import {}", path.display()))?;
            let report = session.planner.import(data);
            if json {
                ok_json("import", &report)?;
            } else {
                println!(
                    "imported {} months, {} days, {} moments",
                    report.months, report.days, report.moments
                );
                let dropped = report.dropped_months.len() + report.dropped_days;
                if dropped > 0 || report.dropped_moments > 0 {
                    println!(
                        "skipped {dropped} malformed entries and {} moments",
                        report.dropped_moments
                    );
                }
            }
        }
        Command::Moment { command } => run_moment(command, session, json).await?,
        Command::Version | Command::Config { .. } | Command::Remind { .. } => {
            bail!("command does not run against the planner")
        }
    }
    Ok(())
}

fn run_subtask(command: SubCommand, session: &mut Session, json: bool) -> Result<()> {
    match command {
        SubCommand::Add {
            task_id,
            text,
            date,
        } => {
            let date = session.task_date(date, &task_id);
            let subtask = session.planner.add_subtask(&date, &task_id, &text)?;
            if json {
                ok_json("subtask", &subtask)?;
            } else {
                println!("added {} to {task_id}", subtask.id);
            }
        }
        SubCommand::Done {
            task_id,
            subtask_id,
            date,
        } => {
            let date = session.task_date(date, &task_id);
            let completed = session
                .planner
                .toggle_subtask(&date, &task_id, &subtask_id)?;
            if json {
                print_json(&json!({"ok": true, "subtask_id": subtask_id, "completed": completed}))?;
            } else {
                let state = if completed { "done" } else { "open" };
                println!("{subtask_id} is {state}");
            }
        }
        SubCommand::Rm {
            task_id,
            subtask_id,
            date,
        } => {
            let date = session.task_date(date, &task_id);
            let removed = session
                .planner
                .delete_subtask(&date, &task_id, &subtask_id)?;
            if json {
                ok_json("removed", &removed)?;
            } else {
                println!("removed {}", removed.id);
            }
        }
    }
    Ok(())
}

async fn run_moment(command: MomentCommand, session: &mut Session, json: bool) -> Result<()> {
    let planner = &mut session.planner;
    match command {
        MomentCommand::Add { text, mood } => {
            let moment = planner.add_moment(&text, &mood).await?;
            if json {
                ok_json("moment", &moment)?;
            } else {
                println!("saved moment {}", moment.id);
            }
        }
        MomentCommand::Edit { moment_id, text } => {
            let moment = planner.edit_moment(&moment_id, &text).await?;
            if json {
                ok_json("moment", &moment)?;
            } else {
                println!("edited moment {}", moment.id);
            }
        }
        MomentCommand::Rm { moment_id } => {
            planner.delete_moment(&moment_id).await?;
            if json {
                print_json(&json!({"ok": true, "removed": moment_id}))?;
            } else {
                println!("removed moment {moment_id}");
            }
        }
        MomentCommand::List => {
            if json {
                ok_json("moments", &planner.moments())?;
            } else {
                output::print_moments(planner.moments());
            }
        }
    }
    Ok(())
}

async fn run_remind(home: &Path, for_secs: Option<u64>, json: bool) -> Result<()> {
    let mut session = Session::open(home, Arc::new(StdoutSink))?;
    let planner = &session.planner;
    planner.reminders().recompute_now(Arc::clone(planner.month()));
    let pending = planner.reminders().pending();
    if json {
        print_json(&json!({"ok": true, "armed": output::pending_json(&pending)}))?;
    } else {
        output::print_pending(&pending);
    }

    let deadline = async {
        match for_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = deadline => {}
        signal = tokio::signal::ctrl_c() => signal.context("failed to listen for Ctrl-C")?,
    }
    session.planner.reminders().cancel_all_reminders();
    output::report_notices(&drain(&mut session.events));
    Ok(())
}

fn run_config(command: ConfigCommand, home: &Path, json: bool) -> Result<()> {
    let config = match command {
        ConfigCommand::Show => load_config(home),
        ConfigCommand::SetUser { user_id } => {
            let user_id = user_id.trim().to_string();
            if user_id.is_empty() {
                bail!("User id must not be empty");
            }
            update_config(home, |config| config.user_id = Some(user_id))?
        }
        ConfigCommand::SetRemote { dir } => update_config(home, |config| {
            config.remote_dir = Some(dir.display().to_string())
        })?,
    };
    if json {
        print_json(&json!({
            "ok": true,
            "home": home.display().to_string(),
            "config": config,
            "remote_dir": config.remote_dir(home).display().to_string(),
        }))?;
    } else {
        println!("home: {}", home.display());
        println!("user: {}", config.user_id().unwrap_or("(signed out)"));
        println!("remote: {}", config.remote_dir(home).display());
        let settings = config.reminder_settings();
        println!(
            "reminders: {} min early, {} h horizon",
            settings.lead.as_secs() / 60,
            settings.horizon.as_secs() / 3600
        );
    }
    Ok(())
}
