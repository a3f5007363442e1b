//! Operator CLI for the Instantly lead drain.
//!
//! Configuration via .env file or environment variables:
//!   INSTANTLY_API_KEY  - Vendor API key (or INSTANTLY_API_KEY_<ENV>)
//!   DATABASE_URL       - State store (default: sqlite:data/lead-drain.db?mode=rwc)
//!   DRY_RUN            - Set to "false" to apply drain decisions
//!   RUST_LOG           - Log filter

use std::path::Path;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use drain::{
    find_orphans, inspect, inventory, missing_campaigns, DrainConfig, DrainRunner, LeadAction,
};
use instantly_client::{ClientConfig, CursorPaginator, InstantlyClient};
use lead_store::{
    dead_letter, do_not_contact, lead_history, lead_state, Database, DatabaseError,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "lead-drain")]
#[command(about = "Drain finished leads out of Instantly campaigns")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one drain batch (dry run unless --live)
    Drain {
        /// Delete drained leads and record their state
        #[arg(long)]
        live: bool,

        /// Ignore the recheck window
        #[arg(long)]
        force: bool,

        /// Candidates to select
        #[arg(long)]
        batch_size: Option<u32>,

        /// Stop after evaluating this many leads (0 = no limit)
        #[arg(long)]
        max_leads: Option<u32>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Look up leads by email and show how they would be classified
    Inspect {
        #[arg(required = true)]
        emails: Vec<String>,
    },

    /// List the current candidate batch
    Candidates {
        /// Ignore the recheck window
        #[arg(long)]
        force: bool,
    },

    /// Compare vendor lead counts with the state store per campaign
    Inventory,

    /// Find vendor leads outside the tracked campaigns
    Orphans,

    /// Show everything known locally about one email
    Status { email: String },

    /// Show recent dead letters
    DeadLetters {
        #[arg(long, default_value_t = 20)]
        limit: u32,

        /// Only letters from this UTC day (YYYY-MM-DD)
        #[arg(long)]
        day: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lead_drain=info".parse()?)
                .add_directive("drain=info".parse()?)
                .add_directive("instantly_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = DrainConfig::from_env()?;

    match cli.command {
        Command::Drain {
            live,
            force,
            batch_size,
            max_leads,
            json,
        } => {
            if live {
                config.dry_run = false;
            }
            if force {
                config.flags.force_drain_check = true;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(max_leads) = max_leads {
                config.max_leads_to_evaluate = max_leads;
            }
            config.validate()?;

            let db = open_database(&config).await?;
            let runner = DrainRunner::new(client(&config)?, db, config);
            let report = runner.run().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.log_summary();
                for outcome in report
                    .outcomes
                    .iter()
                    .filter(|o| o.action != LeadAction::Kept)
                {
                    let decision = outcome
                        .decision
                        .as_ref()
                        .map(|d| d.to_string())
                        .unwrap_or_default();
                    println!("{:?}\t{}\t{}", outcome.action, outcome.email, decision);
                }
            }
            runner.database().close().await;
        }

        Command::Inspect { emails } => {
            let client = client(&config)?;

            for email in &emails {
                let leads = inspect(&client, &config, email, Utc::now()).await?;
                if leads.is_empty() {
                    println!("{}: not found at the vendor", email);
                    continue;
                }
                for found in leads {
                    println!(
                        "{} [{}] campaign={} status={} esp={} replies={} -> {}",
                        found.lead.email,
                        found.lead.id,
                        found
                            .tracked_campaign
                            .or(found.lead.campaign.clone())
                            .unwrap_or_else(|| "(none)".to_string()),
                        found.lead.status,
                        found.lead.esp_code,
                        found.lead.email_reply_count,
                        found.decision
                    );
                }
            }
        }

        Command::Candidates { force } => {
            if force {
                config.flags.force_drain_check = true;
            }
            let db = open_database(&config).await?;
            let query = lead_store::CandidateQuery {
                campaign_ids: config.campaign_ids(),
                recheck_after: config.recheck_after,
                batch_size: config.batch_size,
                now: Utc::now(),
                force: config.force_drain_check(),
            };

            let candidates = lead_state::select_drain_candidates(db.pool(), &query).await?;
            for candidate in &candidates {
                println!(
                    "{}\t{}\t{}\t{}",
                    candidate.email,
                    config.sequence_name(&candidate.campaign_id),
                    candidate.status,
                    candidate.last_drain_check.as_deref().unwrap_or("never")
                );
            }
            info!("{} candidates", candidates.len());

            let tracked = lead_state::count_tracked(db.pool()).await?;
            for (status, count) in lead_state::count_by_status(db.pool()).await? {
                println!("# {}: {} of {}", status, count, tracked);
            }
        }

        Command::Inventory => {
            let db = open_database(&config).await?;
            let client = client(&config)?;

            for tracked in missing_campaigns(&client, &config).await? {
                println!("{}\tnot visible at the vendor ({})", tracked.name, tracked.id);
            }

            let paginator = CursorPaginator::new(client);
            let report = inventory(&paginator, &db, &config).await?;

            for entry in &report {
                println!(
                    "{}\tvendor={} (active {})\ttracked={}\tdifference={}{}",
                    entry.name,
                    entry.vendor_leads,
                    entry.vendor_active,
                    entry.tracked_drainable,
                    entry.difference(),
                    if entry.truncated { " (truncated)" } else { "" }
                );
            }
        }

        Command::Orphans => {
            let paginator = CursorPaginator::new(client(&config)?);
            let report = find_orphans(&paginator, &config).await;

            for (campaign, count) in &report.by_campaign {
                println!("{}\t{}", campaign, count);
            }
            println!(
                "{} orphaned of {} vendor leads{}",
                report.orphans.len(),
                report.total_leads,
                if report.truncated { " (truncated)" } else { "" }
            );
        }

        Command::Status { email } => {
            let db = open_database(&config).await?;
            let pool = db.pool();

            match lead_state::get_lead(pool, &email).await {
                Ok(state) => println!(
                    "state: {} in {} (vendor id {}), last check {}, deletion {} after {} attempts",
                    state.status,
                    config.sequence_name(&state.campaign_id),
                    state.instantly_lead_id.as_deref().unwrap_or("-"),
                    state.last_drain_check.as_deref().unwrap_or("never"),
                    state.deletion_status.as_deref().unwrap_or("-"),
                    state.deletion_attempts
                ),
                Err(DatabaseError::NotFound { .. }) => println!("state: not tracked"),
                Err(e) => return Err(e.into()),
            }

            for entry in lead_history::history_for(pool, &email).await? {
                println!(
                    "history: #{} {} in {} at {}",
                    entry.attempt_num, entry.status_final, entry.sequence_name, entry.completed_at
                );
            }

            let cooling = lead_history::is_in_cooldown(pool, &email, Utc::now(), config.cooldown).await?;
            println!("cooldown: {}", if cooling { "active" } else { "clear" });

            match do_not_contact::get_entry(pool, &email).await? {
                Some(entry) => println!(
                    "dnc: {} ({}, {}) since {}",
                    if entry.is_active { "suppressed" } else { "inactive" },
                    entry.source,
                    entry.reason,
                    entry.added_at
                ),
                None => println!("dnc: none"),
            }
        }

        Command::DeadLetters { limit, day } => {
            let db = open_database(&config).await?;
            let letters = match day {
                Some(day) => dead_letter::dead_letters_for_day(db.pool(), day).await?,
                None => dead_letter::recent_dead_letters(db.pool(), limit).await?,
            };
            for letter in letters {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    letter.occurred_at,
                    letter.phase,
                    letter.email.as_deref().unwrap_or("-"),
                    letter
                        .http_status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    letter.error_text
                );
            }
        }
    }

    Ok(())
}

fn client(config: &DrainConfig) -> Result<InstantlyClient, Box<dyn std::error::Error>> {
    let client_config = ClientConfig::from_env_for(Some(config.flags.api_env.as_str()))?;
    Ok(InstantlyClient::new(client_config)?)
}

async fn open_database(config: &DrainConfig) -> Result<Database, Box<dyn std::error::Error>> {
    if let Some(parent) = sqlite_file(&config.database_url).and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    info!("State store ready: {}", config.database_url);
    Ok(db)
}

/// File path of a `sqlite:` URL, if it names a file.
fn sqlite_file(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(Path::new(path))
}
