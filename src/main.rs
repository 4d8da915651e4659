use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reportkeeper::artifacts::FsArtifactStore;
use reportkeeper::config::ReportKeeperConfig;
use reportkeeper::history::{HistoryEngine, SqliteLogStore};
use reportkeeper::schedules::{NewSchedule, Recipient, ScheduleStore, ScheduleType};
use reportkeeper::storage::{self, Pool};

#[derive(Parser)]
#[command(
    name = "reportkeeper",
    about = "Execution history and artifact retrieval for scheduled reports",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "REPORTKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the configuration
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (periodic log retention)
    Serve,

    /// Apply log retention to every schedule once
    Prune,

    /// Show last success, last in-flight run and notification suppression
    Status {
        /// Schedule id
        schedule: i64,
    },

    /// Inspect execution logs
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },

    /// Manage report schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum LogsAction {
    /// List a schedule's execution logs, most recent first
    List {
        /// Schedule id
        schedule: i64,

        /// Zero-based page
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        page: i64,

        /// Entries per page (defaults to the configured page size)
        #[arg(long, allow_negative_numbers = true)]
        page_size: Option<i64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show the decoded content of one execution log
    Show {
        /// Execution log id
        log_id: i64,
    },

    /// Write one artifact of an execution log to disk
    File {
        /// Execution log id
        log_id: i64,

        /// Artifact type: screenshot, csv or pdf
        #[arg(long = "type")]
        file_type: Option<String>,

        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Delete a schedule's logs that ended before a timestamp
    Purge {
        /// Schedule id
        schedule: i64,

        /// RFC3339 cutoff, e.g. 2024-01-01T00:00:00Z
        #[arg(long)]
        before: String,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List all schedules
    List,

    /// Add a new schedule
    Add {
        /// Schedule name
        #[arg(long)]
        name: String,

        /// report or alert
        #[arg(long = "type", default_value = "report")]
        kind: String,

        /// Cron expression
        #[arg(long)]
        cron: String,

        #[arg(long)]
        chart: Option<i64>,

        #[arg(long)]
        dashboard: Option<i64>,

        #[arg(long)]
        database: Option<i64>,

        /// Days of execution history to keep (0 keeps everything)
        #[arg(long, default_value = "90")]
        retention_days: i64,

        /// Email recipient, repeatable
        #[arg(long)]
        email: Vec<String>,
    },

    /// Remove a schedule and its history
    Remove {
        /// Schedule id
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ReportKeeperConfig::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    reportkeeper::init_logging(&config.logging);

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting reportkeeper daemon");
            reportkeeper::serve(&config).await?;
        }
        Commands::Prune => {
            let pool = open(&config)?;
            let deleted = reportkeeper::history::retention::prune_all(&pool, chrono::Utc::now())?;
            println!("Deleted {} execution log(s).", deleted);
        }
        Commands::Status { schedule } => {
            let engine = engine(&config)?;
            let describe = |entry: Option<reportkeeper::history::ExecutionLogEntry>| match entry {
                Some(e) => format!(
                    "#{} ended {}",
                    e.id,
                    e.ended_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string())
                ),
                None => "none".to_string(),
            };

            println!("Schedule {}", schedule);
            println!("  last success : {}", describe(engine.find_last_success(schedule)?));
            println!("  last working : {}", describe(engine.find_last_active_working(schedule)?));
            let suppress = engine.should_suppress_error_notification(schedule)?;
            println!(
                "  suppress error notification : {}",
                if suppress { "yes" } else { "no" }
            );
        }
        Commands::Logs { action } => run_logs(&config, action)?,
        Commands::Schedule { action } => run_schedule(&config, action)?,
    }

    Ok(())
}

fn open(config: &ReportKeeperConfig) -> Result<Pool> {
    storage::open_pool(&config.storage.db_path)
        .with_context(|| format!("failed to open database {}", config.storage.db_path))
}

fn engine(config: &ReportKeeperConfig) -> Result<HistoryEngine<SqliteLogStore>> {
    let pool = open(config)?;
    Ok(HistoryEngine::new(SqliteLogStore::new(pool)).with_max_page_size(config.history.max_page_size))
}

fn run_logs(config: &ReportKeeperConfig, action: LogsAction) -> Result<()> {
    let engine = engine(config)?;

    match action {
        LogsAction::List {
            schedule,
            page,
            page_size,
            json,
        } => {
            let page_size = page_size.unwrap_or(config.history.default_page_size);
            let listing = engine.list_log_summaries(schedule, page, page_size)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else if listing.logs.is_empty() {
                println!("No execution logs on this page ({} total).", listing.count);
            } else {
                println!(
                    "{:<8} | {:<14} | {:<32} | {:<7} | Error",
                    "Id", "State", "Ended", "Content"
                );
                println!("{:-<8}-|-{:-<14}-|-{:-<32}-|-{:-<7}-|-{:-<20}", "", "", "", "", "");
                for log in &listing.logs {
                    println!(
                        "{:<8} | {:<14} | {:<32} | {:<7} | {}",
                        log.id,
                        log.state.as_str(),
                        log.end_dttm.as_deref().unwrap_or("-"),
                        if log.has_content { "yes" } else { "no" },
                        log.error_message.as_deref().unwrap_or("")
                    );
                }
                println!("({} total)", listing.count);
            }
        }
        LogsAction::Show { log_id } => match engine.get_content(log_id)? {
            Some(content) => println!("{}", serde_json::to_string_pretty(&content)?),
            None => anyhow::bail!("execution log {} not found", log_id),
        },
        LogsAction::File {
            log_id,
            file_type,
            out,
        } => {
            let artifacts = FsArtifactStore::new(config.artifacts.root.clone());
            let file = engine.fetch_artifact(&artifacts, log_id, file_type.as_deref())?;
            let dest = out.join(&file.filename);
            std::fs::write(&dest, &file.bytes)
                .with_context(|| format!("failed to write {}", dest.display()))?;
            println!(
                "Wrote {} ({}, {} bytes)",
                dest.display(),
                file.content_type,
                file.bytes.len()
            );
        }
        LogsAction::Purge { schedule, before } => {
            let cutoff = storage::decode_ts(&before)
                .with_context(|| format!("invalid --before timestamp '{}'", before))?;
            let deleted = engine.purge_logs_older_than(schedule, cutoff)?;
            println!("Deleted {} execution log(s).", deleted);
        }
    }

    Ok(())
}

fn run_schedule(config: &ReportKeeperConfig, action: ScheduleAction) -> Result<()> {
    let schedules = ScheduleStore::new(open(config)?);

    match action {
        ScheduleAction::List => {
            let list = schedules.list_all()?;
            if list.is_empty() {
                println!("No schedules found.");
            } else {
                println!(
                    "{:<6} | {:<20} | {:<6} | {:<15} | {:<9} | Active",
                    "Id", "Name", "Type", "Cron", "Retention"
                );
                println!("{:-<6}-|-{:-<20}-|-{:-<6}-|-{:-<15}-|-{:-<9}-|-{:-<6}", "", "", "", "", "", "");
                for s in list {
                    println!(
                        "{:<6} | {:<20} | {:<6} | {:<15} | {:<9} | {}",
                        s.id,
                        s.name,
                        s.kind.as_str(),
                        s.crontab,
                        format!("{}d", s.log_retention_days),
                        s.active
                    );
                }
            }
        }
        ScheduleAction::Add {
            name,
            kind,
            cron,
            chart,
            dashboard,
            database,
            retention_days,
            email,
        } => {
            let kind: ScheduleType = kind.parse()?;
            let mut new = NewSchedule::new(&name, kind, cron).log_retention_days(retention_days);
            if let Some(id) = chart {
                new = new.for_chart(id);
            }
            if let Some(id) = dashboard {
                new = new.for_dashboard(id);
            }
            if let Some(id) = database {
                new = new.for_database(id);
            }
            for target in &email {
                new = new.recipient(Recipient::email(target));
            }

            let created = schedules.create(&new)?;
            println!("Schedule '{}' added with id {}.", created.name, created.id);
        }
        ScheduleAction::Remove { id } => {
            schedules.delete(id)?;
            println!("Schedule {} removed.", id);
        }
    }

    Ok(())
}
