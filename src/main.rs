use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod affinity;
mod allocation;
mod db;
mod error;
mod grouping;
mod models;
mod reassign;
mod report;

use error::EngineError;
use models::SubmissionStatus;

#[derive(Parser)]
#[command(name = "readingclub-matching")]
#[command(about = "Daily profile-book matching and closing-party grouping", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import participants from a CSV file
    ImportParticipants {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import reading submissions from a CSV file
    ImportSubmissions {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute and commit one day's profile-book allocation
    Allocate {
        #[arg(long)]
        cohort: String,
        /// Provider day; defaults to yesterday
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 3)]
        lookback_days: i64,
        /// RNG seed for reproducible allocation
        #[arg(long)]
        seed: Option<u64>,
        /// Back up and overwrite an existing allocation for the day
        #[arg(long)]
        force: bool,
    },
    /// Partition the cohort into closing-party groups
    FormGroups {
        #[arg(long)]
        cohort: String,
        #[arg(long, default_value_t = 6)]
        group_size: usize,
        #[arg(long, default_value_t = 2.0)]
        tier_high: f64,
        #[arg(long, default_value_t = 0.5)]
        tier_low: f64,
    },
    /// Move one participant between closing-party groups
    MoveMember {
        #[arg(long)]
        cohort: String,
        #[arg(long)]
        participant: Uuid,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Generate a markdown closing-party report
    Report {
        #[arg(long)]
        cohort: String,
        #[arg(long, default_value = "closing-party.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportParticipants { csv } => {
            let imported = db::import_participants(&pool, &csv).await?;
            println!("Imported {imported} participants from {}.", csv.display());
        }
        Commands::ImportSubmissions { csv } => {
            let inserted = db::import_submissions(&pool, &csv).await?;
            println!("Inserted {inserted} submissions from {}.", csv.display());
        }
        Commands::Allocate {
            cohort,
            date,
            lookback_days,
            seed,
            force,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive() - Duration::days(1));
            run_allocation(&pool, &cohort, date, lookback_days, seed, force).await?;
        }
        Commands::FormGroups {
            cohort,
            group_size,
            tier_high,
            tier_low,
        } => {
            run_group_formation(&pool, &cohort, group_size, tier_high, tier_low).await?;
        }
        Commands::MoveMember {
            cohort,
            participant,
            from,
            to,
        } => {
            run_move(&pool, &cohort, participant, &from, &to).await?;
        }
        Commands::Report { cohort, out } => {
            let participants = db::fetch_participants(&pool, &cohort).await?;
            let (result, _) = db::fetch_closing_party(&pool, &cohort)
                .await?
                .with_context(|| format!("no closing party result for cohort {cohort}"))?;
            let report = report::build_report(&result, &participants);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn run_allocation(
    pool: &PgPool,
    cohort: &str,
    date: NaiveDate,
    lookback_days: i64,
    seed: Option<u64>,
    force: bool,
) -> anyhow::Result<()> {
    let participants = db::fetch_participants(pool, cohort).await?;
    if participants.is_empty() {
        anyhow::bail!("no participants found for cohort {cohort}");
    }

    let submissions = db::fetch_submissions(pool, cohort).await?;
    let counts = models::submission_counts(&submissions);

    let provider_ids: HashSet<Uuid> = submissions
        .iter()
        .filter(|s| s.status == SubmissionStatus::Approved && s.submitted_on == date)
        .map(|s| s.participant_id)
        .collect();

    let window = db::fetch_history_window(pool, cohort, date, lookback_days).await?;
    let recent = affinity::recent_exclusions(&window)?;

    tracing::info!(
        cohort,
        %date,
        viewers = participants.len(),
        providers = provider_ids.len(),
        "computing daily allocation"
    );

    let input = allocation::AllocationInput {
        cohort,
        date,
        viewers: &participants,
        provider_ids: &provider_ids,
        submission_counts: &counts,
        recent: &recent,
    };

    let batch = match seed {
        Some(value) => allocation::allocate(&input, &mut StdRng::seed_from_u64(value))?,
        None => allocation::allocate(&input, &mut StdRng::from_entropy())?,
    };

    for warning in &batch.warnings {
        tracing::warn!("{warning}");
    }

    db::store_daily_assignment(pool, &batch, force).await?;

    let shortfalls = batch.assignments.values().filter(|a| a.shortfall).count();
    println!(
        "Allocated profile books for {} viewers on {} ({} with shortfall).",
        batch.assignments.len(),
        date,
        shortfalls
    );

    Ok(())
}

async fn run_group_formation(
    pool: &PgPool,
    cohort: &str,
    group_size: usize,
    tier_high: f64,
    tier_low: f64,
) -> anyhow::Result<()> {
    let participants = db::fetch_participants(pool, cohort).await?;
    if participants.is_empty() {
        anyhow::bail!("no participants found for cohort {cohort}");
    }

    let history = db::fetch_history(pool, cohort).await?;
    let matrix = affinity::build(&history)?;

    // The absent group survives regeneration: carry its members forward.
    let carried = db::fetch_closing_party(pool, cohort)
        .await?
        .map(|(result, _)| result.absent_members())
        .unwrap_or_default();

    let config = grouping::GroupFormationConfig {
        target_group_size: group_size,
        tier_high,
        tier_low,
    };

    tracing::info!(
        cohort,
        participants = participants.len(),
        history_days = history.len(),
        "forming closing party groups"
    );

    let result = grouping::form_groups(&participants, &matrix, &config, &carried, Utc::now());
    db::store_closing_party(pool, &result).await?;

    println!("Formed {} groups for cohort {}:", result.groups.len(), cohort);
    for group in &result.groups {
        match group {
            models::Group::Partitioned {
                number,
                members,
                tier,
                average_affinity,
            } => println!(
                "- group-{number}: {} members, {:?} (avg affinity {average_affinity:.2})",
                members.len(),
                tier
            ),
            models::Group::Absent { members } => {
                println!("- absent: {} members", members.len())
            }
        }
    }

    Ok(())
}

async fn run_move(
    pool: &PgPool,
    cohort: &str,
    participant: Uuid,
    from: &str,
    to: &str,
) -> anyhow::Result<()> {
    // Optimistic concurrency: one retry on a version conflict, then give up.
    for attempt in 0..2 {
        let (mut result, version) = db::fetch_closing_party(pool, cohort)
            .await?
            .with_context(|| format!("no closing party result for cohort {cohort}"))?;

        reassign::move_member(&mut result, participant, from, to)?;

        if db::update_closing_party_versioned(pool, &result, version).await? {
            println!("Moved {participant} from {from} to {to}.");
            return Ok(());
        }

        if attempt == 0 {
            tracing::warn!(cohort, "closing party changed underneath the move, retrying once");
        }
    }

    Err(EngineError::ConcurrentModification(cohort.to_string()).into())
}
