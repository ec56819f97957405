mod ai;
mod classifier;
mod config;
mod db;
mod digest;
mod filter;
mod identity;
mod lifecycle;
mod models;
mod pipeline;
mod reconcile;
mod source;
mod tracker;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use classifier::{truncate_chars, BatchClassifier};
use config::Config;
use db::{Database, SchemaSetup};
use filter::RuleFilter;
use models::{PostingId, Status};
use pipeline::{Pacing, Pipeline};
use reconcile::Reconciler;
use source::FinnSource;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobscout")]
#[command(about = "Scrape finn.no job ads, filter them, and keep an application tracker")]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, filter, store, then refresh the tracker and digest
    Run {
        /// Run only this search query
        #[arg(short, long)]
        query: Option<String>,

        /// Import tracker edits before scraping
        #[arg(long)]
        sync: bool,

        /// Skip the AI classifier and approve everything the keyword filter passes
        #[arg(long)]
        no_ai: bool,
    },

    /// Import tracker edits into the store, then re-export
    Sync,

    /// Delete untouched postings whose deadline has passed, then re-export
    Cleanup {
        /// Show what would be removed without removing
        #[arg(long)]
        dry_run: bool,
    },

    /// Regenerate the tracker from the store
    Export,

    /// List stored postings
    List {
        /// Filter by status label (e.g. "Not searched", "Sent Application")
        #[arg(short, long)]
        status: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one posting
    Show {
        /// Posting ID
        id: i64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let db = open_store(&config)?;
    let today = Local::now().date_naive();
    let tracker_path = config.tracker_path();

    match cli.command {
        Commands::Run { query, sync, no_ai } => {
            let reconciler = Reconciler::new(&db, today);
            if sync {
                let report = reconciler.sync(&tracker_path)?;
                if report.read {
                    println!(
                        "Tracker synced: {} new rows, {} status changes.",
                        report.inserted, report.status_updates
                    );
                }
            }

            let queries = match query {
                Some(q) => vec![q],
                None => config.search_queries.clone(),
            };
            let classifier = if no_ai { None } else { build_classifier(&config) };
            let source = FinnSource::new(&config.user_agent, config.http_timeout())?;
            let pipeline = Pipeline::new(
                &db,
                &source,
                RuleFilter::new(&config.reject_title_terms, &config.require_description_terms),
                classifier,
                config.classifier.batch_size,
                Pacing::from_config(&config),
                today,
            );

            let outcome = pipeline.run(&queries)?;
            let expired = lifecycle::cleanup_expired(&db, today, false).unwrap_or_else(|e| {
                error!(error = %format!("{e:#}"), "cleanup failed");
                0
            });
            export(&reconciler, &tracker_path);

            let digest_path = config.digest_path();
            match digest::write_digest(&digest_path, &outcome.approved) {
                Ok(0) => {}
                Ok(n) => println!("Digest written to {} ({} postings).", digest_path.display(), n),
                Err(e) => error!(error = %format!("{e:#}"), "writing digest failed"),
            }

            let stats = &outcome.stats;
            println!("\nResults:");
            println!("  Queries:           {}", stats.queries);
            println!("  Listed:            {}", stats.listed);
            println!("  Already known:     {}", stats.already_known);
            println!("  Fetched:           {}", stats.fetched);
            println!("  Discarded (basic): {}", stats.discarded_basic);
            println!("  Discarded (AI):    {}", stats.discarded_ai);
            println!("  Approved:          {}", stats.approved);
            if stats.failed > 0 {
                println!("  Failed:            {}", stats.failed);
            }
            if expired > 0 {
                println!("  Expired removed:   {}", expired);
            }
            println!("  Stored in total:   {}", db.count()?);
        }

        Commands::Sync => {
            let reconciler = Reconciler::new(&db, today);
            let report = reconciler.sync(&tracker_path)?;
            if report.read {
                println!(
                    "Read {} tracker rows: {} new, {} status changes.",
                    report.rows, report.inserted, report.status_updates
                );
            } else {
                println!("Tracker not read; store left unchanged.");
            }
            export(&reconciler, &tracker_path);
        }

        Commands::Cleanup { dry_run } => {
            let removed = lifecycle::cleanup_expired(&db, today, dry_run)?;
            if dry_run {
                println!("Would remove {} expired postings.", removed);
            } else {
                println!("Removed {} expired postings.", removed);
                export(&Reconciler::new(&db, today), &tracker_path);
            }
        }

        Commands::Export => {
            let written = Reconciler::new(&db, today).export(&tracker_path)?;
            println!("Wrote {} postings to {}", written, tracker_path.display());
        }

        Commands::List { status, json } => {
            let status = status
                .map(|s| s.parse::<Status>())
                .transpose()?;
            let postings = db.list(status)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&postings)?);
            } else if postings.is_empty() {
                println!("No postings found.");
            } else {
                println!(
                    "{:<10} {:<18} {:<12} {:<34} {:<20}",
                    "ID", "STATUS", "DEADLINE", "TITLE", "EMPLOYER"
                );
                println!("{}", "-".repeat(98));
                for posting in postings {
                    println!(
                        "{:<10} {:<18} {:<12} {:<34} {:<20}",
                        posting.id,
                        posting.status,
                        truncate(&posting.deadline, 12),
                        truncate(&posting.title, 32),
                        truncate(&posting.employer, 20)
                    );
                }
            }
        }

        Commands::Show { id } => match db.get(PostingId::new(id))? {
            Some(posting) => {
                println!("Posting #{}", posting.id);
                println!("Title:    {}", posting.title);
                println!("Employer: {}", posting.employer);
                println!("Location: {}", posting.location);
                println!("Deadline: {}", posting.deadline);
                println!("Status:   {}", posting.status);
                println!("Added:    {}", posting.date_added);
                if !posting.contact.is_empty() {
                    println!("Contact:  {}", posting.contact);
                }
                if !posting.phone.is_empty() {
                    println!("Phone:    {}", posting.phone);
                }
                println!("Link:     {}", posting.link);
                if let Some(days) = days_left(&posting.deadline, today) {
                    println!("Days left: {}", days);
                }
                if !posting.description.is_empty() {
                    println!("\n--- Description ---\n{}", textwrap::fill(&posting.description, 80));
                }
            }
            None => {
                println!("Posting #{} not found.", id);
            }
        },
    }

    Ok(())
}

/// Opens the store and brings its schema up to date. Any failure here is
/// fatal for every command.
fn open_store(config: &Config) -> Result<Database> {
    let path = config.database_path();
    let db = Database::open(&path)?;
    match db
        .setup()
        .with_context(|| format!("preparing store at {}", path.display()))?
    {
        SchemaSetup::Created => println!("Store created at {}", db.path().display()),
        SchemaSetup::Migrated { copied, dropped } => {
            println!("Store upgraded: {} rows kept, {} dropped.", copied, dropped)
        }
        SchemaSetup::UpToDate => {}
    }
    Ok(db)
}

fn build_classifier(config: &Config) -> Option<BatchClassifier> {
    let provider = ai::resolve_model(&config.classifier.model).and_then(|spec| {
        let provider = ai::create_provider(&spec, config.http_timeout())?;
        info!(model = %spec.short_name, "classifier ready");
        Ok(provider)
    });
    match provider {
        Ok(provider) => Some(BatchClassifier::new(
            provider,
            &config.classifier.profile,
            config.classifier.max_description_chars,
        )),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "classifier unavailable, approving everything the keyword filter passes");
            None
        }
    }
}

fn export(reconciler: &Reconciler, path: &std::path::Path) {
    match reconciler.export(path) {
        Ok(n) => println!("Tracker updated: {} ({} postings).", path.display(), n),
        Err(e) => error!(path = %path.display(), error = %format!("{e:#}"), "tracker export failed"),
    }
}

fn days_left(deadline: &str, today: NaiveDate) -> Option<i64> {
    lifecycle::parse_deadline(deadline).map(|date| (date - today).num_days())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", truncate_chars(s, max.saturating_sub(3)))
    }
}
