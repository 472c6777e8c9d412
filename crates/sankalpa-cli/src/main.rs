// ============================================================================
// sankalpa - voice habit log from the terminal
// ============================================================================
// Usage:
//   sankalpa stats                         Show database statistics
//   sankalpa logs [--incomplete]           List your habit logs
//   sankalpa summary                       Weekly summary, streaks and nudges
//   sankalpa log [TEXT]                    Log habits from a sentence
//   sankalpa delete ID                     Soft-delete one of your logs
//
// The principal comes from --user or SANKALPA_USER.
// ============================================================================

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use sankalpa_core::{
    format_quantity, AppConfig, ClaudeExtractor, HabitClient, HabitDb, HabitService, HabitSummary,
    LoggingSession, Phase, Principal,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::info;

/// Voice habit log
#[derive(Parser)]
#[command(name = "sankalpa", version, about = "Log habits from a sentence and track streaks")]
struct Cli {
    /// Path to the database file (default: ~/.sankalpa/habits.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Who is logging (default: SANKALPA_USER)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show database statistics (rows, incomplete rows, users, habits)
    Stats,

    /// List your logs, newest first
    Logs {
        /// Only entries still waiting for a quantity
        #[arg(long)]
        incomplete: bool,
    },

    /// Show the last 7 days with streaks and nudges
    Summary {
        /// Print the raw summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Log habits from a sentence (prompts for one if TEXT is omitted)
    Log {
        text: Option<String>,
    },

    /// Soft-delete one of your logs
    Delete {
        id: String,
    },
}

type Input = Lines<BufReader<Stdin>>;

fn format_timestamp(micros: i64) -> String {
    Utc.timestamp_micros(micros)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", micros))
}

fn format_amount(quantity: Option<f64>, unit: Option<&str>) -> String {
    match (quantity, unit) {
        (Some(q), Some(u)) => format!("{} {}", format_quantity(q), u),
        (Some(q), None) => format_quantity(q),
        (None, _) => "-".into(),
    }
}

fn require_user(cli_user: Option<String>, config: &AppConfig) -> Result<Principal> {
    match cli_user.or_else(|| config.default_user.clone()) {
        Some(user) => Ok(Principal::new(user)),
        None => bail!("No user given. Pass --user or set SANKALPA_USER."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sankalpa_core=warn".parse()?)
                .add_directive("sankalpa_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let db_path = cli.db_path.or_else(|| config.db_path.clone());
    let db = Arc::new(HabitDb::open(db_path.as_deref())?);

    match cli.command {
        Commands::Stats => cmd_stats(&db),
        Commands::Logs { incomplete } => {
            let principal = require_user(cli.user, &config)?;
            cmd_logs(&db, &principal, incomplete)
        }
        Commands::Summary { json } => {
            let principal = require_user(cli.user, &config)?;
            let service = build_service(db, &config)?;
            cmd_summary(&HabitClient::new(service, Some(principal)), json)
        }
        Commands::Log { text } => {
            let principal = require_user(cli.user, &config)?;
            let service = build_service(db, &config)?;
            cmd_log(HabitClient::new(service, Some(principal)), text).await
        }
        Commands::Delete { id } => {
            let principal = require_user(cli.user, &config)?;
            cmd_delete(&db, &principal, &id)
        }
    }
}

fn build_service(db: Arc<HabitDb>, config: &AppConfig) -> Result<Arc<HabitService>> {
    let extractor = ClaudeExtractor::from_config(config)?;
    info!("Using model {}", extractor.model());
    Ok(Arc::new(HabitService::new(db, Arc::new(extractor))))
}

fn cmd_stats(db: &HabitDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Sankalpa Database Stats ===");
    println!("Database: {}", db.path().display());
    println!();
    println!("Logs:       {} total", stats.total_logs);
    println!("  {:12} {}", "incomplete", stats.incomplete_logs);
    println!("  {:12} {}", "deleted", stats.deleted_logs);
    println!("Users:      {}", stats.distinct_users);
    println!("Habits:     {}", stats.distinct_habits);

    Ok(())
}

fn cmd_logs(db: &HabitDb, principal: &Principal, incomplete_only: bool) -> Result<()> {
    let logs = db.list_logs(&principal.user_key(), incomplete_only)?;

    if logs.is_empty() {
        println!("No logs found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<20}  {:<14}  {}",
        "LOG ID", "DATE", "HABIT", "AMOUNT", "LOGGED AT"
    );
    println!("{}", "-".repeat(110));

    for log in &logs {
        let habit = log.habit_name.chars().take(20).collect::<String>();
        let amount = if log.is_complete {
            format_amount(log.quantity, log.unit.as_deref())
        } else {
            "(incomplete)".into()
        };
        println!(
            "{:<36}  {:<10}  {:<20}  {:<14}  {}",
            log.id,
            log.date.format("%Y-%m-%d"),
            habit,
            amount,
            format_timestamp(log.created_at)
        );
    }

    println!("\nTotal: {} logs", logs.len());
    Ok(())
}

fn cmd_summary(client: &HabitClient, json: bool) -> Result<()> {
    let summary = client.habit_summary()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &HabitSummary) {
    if summary.summary.is_empty() {
        println!("Nothing logged in the last 7 days.");
    } else {
        println!("=== Last 7 days ===");
        for row in &summary.summary {
            let average = match (row.avg_quantity, row.unit_display.as_deref()) {
                (Some(avg), Some(unit)) => format!("avg {} {}", avg, unit),
                (Some(avg), None) => format!("avg {}", avg),
                (None, _) => String::new(),
            };
            let today = if row.logged_today { " (today)" } else { "" };
            println!(
                "  {:<20} {:>2}x  {:<16} streak {}{}",
                row.habit_name_display, row.count, average, row.current_streak, today
            );
        }
    }

    for nudge in &summary.nudges {
        println!(
            "Keep it going: {} is on a {}-day streak, log it today.",
            nudge.habit_name_display, nudge.streak
        );
    }
}

fn cmd_delete(db: &HabitDb, principal: &Principal, id: &str) -> Result<()> {
    if db.soft_delete(id, &principal.user_key())? {
        println!("Deleted {}", id);
        Ok(())
    } else {
        bail!("Log {} not found", id)
    }
}

async fn prompt(input: &mut Input, label: &str) -> Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    Ok(input.next_line().await?.map(|line| line.trim().to_string()))
}

/// Drive one logging cycle over stdin: typed sentence, optional confirmation,
/// then a follow-up prompt for every entry saved without a quantity.
async fn cmd_log(client: HabitClient, text: Option<String>) -> Result<()> {
    let mut input: Input = BufReader::new(tokio::io::stdin()).lines();
    let mut session = LoggingSession::new(client).on_success(|| info!("Habit logs saved"));

    let text = match text {
        Some(text) => text,
        None => prompt(&mut input, "What did you do? ").await?.unwrap_or_default(),
    };
    session.submit_text(&text).await?;

    loop {
        match session.phase() {
            Phase::Confirming => {
                println!("Did you mean:");
                for candidate in session.pending_candidates().unwrap_or_default() {
                    println!("  - {}", candidate.display_label());
                }
                let answer = prompt(&mut input, "Save these? [y/N] ").await?.unwrap_or_default();
                if answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes") {
                    session.confirm().await?;
                } else {
                    session.discard()?;
                    println!("Discarded.");
                    return Ok(());
                }
            }
            Phase::Completing => {
                let Some(entry) = session.current_prompt().cloned() else {
                    break;
                };
                let unit_hint = entry
                    .unit
                    .as_deref()
                    .map(|u| format!(" ({})", u))
                    .unwrap_or_default();
                let label = format!("How much {}{}? [enter to skip] ", entry.habit_name, unit_hint);
                match prompt(&mut input, &label).await? {
                    Some(value) if !value.is_empty() => {
                        let (amount, unit) = split_value(&value);
                        session.submit_value(amount, unit).await?;
                    }
                    _ => session.skip()?,
                }
            }
            _ => break,
        }
    }

    match session.phase() {
        Phase::Success => {
            println!("{}", session.message().unwrap_or("logged"));
            print_summary(&session.api().habit_summary()?);
            Ok(())
        }
        Phase::Failed => bail!("{}", session.message().unwrap_or("logging failed")),
        other => bail!("Logging stopped while {}", other),
    }
}

/// "20 minutes" -> ("20", Some("minutes"))
fn split_value(value: &str) -> (&str, Option<&str>) {
    match value.split_once(char::is_whitespace) {
        Some((amount, unit)) if !unit.trim().is_empty() => (amount, Some(unit.trim())),
        _ => (value, None),
    }
}
