use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod db;
mod error;
mod factorize;
mod ledger;
mod matrix;
mod models;
mod oracle;
mod pipeline;
mod ranker;
mod report;
mod scheduler;
mod store;

use crate::config::PipelineArgs;
use crate::models::{InteractionFilter, InteractionKind, ItemClass, ItemRef, RecordOutcome};
use crate::pipeline::RefreshPipeline;
use crate::scheduler::{Scheduler, TriggerOutcome};
use crate::store::RecommendationStore;

#[derive(Parser)]
#[command(name = "recommendation-refresh")]
#[command(about = "Interaction-driven article and job recommendation refresh", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo users, items and interactions
    Seed,
    /// Import interaction events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record one interaction event
    #[command(group(
        ArgGroup::new("target")
            .args(["article", "job"])
            .required(true)
            .multiple(false)
    ))]
    Record {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        article: Option<Uuid>,
        #[arg(long)]
        job: Option<Uuid>,
        #[arg(long, value_enum)]
        kind: InteractionKind,
    },
    /// List a user's recorded interactions
    Interactions {
        #[arg(long)]
        user: Uuid,
        #[arg(long, value_enum)]
        class: Option<ItemClass>,
        #[arg(long, value_enum)]
        kind: Option<InteractionKind>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Check whether a kind is already recorded for a user and item
    #[command(group(
        ArgGroup::new("target")
            .args(["article", "job"])
            .required(true)
            .multiple(false)
    ))]
    Check {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        article: Option<Uuid>,
        #[arg(long)]
        job: Option<Uuid>,
        #[arg(long, value_enum)]
        kind: InteractionKind,
    },
    /// Run one refresh cycle now
    Refresh {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Run refresh cycles on a fixed interval until interrupted
    Schedule {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Show a user's last published recommendations
    Show {
        #[arg(long)]
        user: Uuid,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_scheduler(
    store: Arc<dyn RecommendationStore>,
    args: PipelineArgs,
) -> anyhow::Result<Scheduler> {
    let config = args.into_config().context("invalid pipeline configuration")?;
    tracing::info!(
        oracle = ?config.oracle,
        timeout_secs = config.oracle_timeout.as_secs(),
        "oracle configured"
    );

    let pipeline = RefreshPipeline::new(
        store,
        config.oracle.build(),
        config.oracle_timeout,
        config.publish_concurrency,
    );
    Ok(Scheduler::new(pipeline, config.refresh_interval))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store: Arc<dyn RecommendationStore> = Arc::new(db::PgStore::new(pool.clone()));

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(store.as_ref(), &csv).await?;
            println!(
                "Recorded {} interactions from {} ({} already recorded, {} rejected).",
                summary.recorded,
                csv.display(),
                summary.already_recorded,
                summary.rejected
            );
        }
        Commands::Record {
            user,
            article,
            job,
            kind,
        } => {
            let outcome = ledger::record_interaction(store.as_ref(), user, article, job, kind).await?;
            let interaction = outcome.interaction();
            match &outcome {
                RecordOutcome::Created(_) => println!(
                    "Recorded {kind} on {} (score {}).",
                    interaction.target, interaction.score
                ),
                RecordOutcome::KindAdded(_) => println!(
                    "Added {kind} on {} (score {}).",
                    interaction.target, interaction.score
                ),
                RecordOutcome::AlreadyRecorded(_) => println!(
                    "{kind} already recorded on {} (score {}).",
                    interaction.target, interaction.score
                ),
            }
        }
        Commands::Interactions {
            user,
            class,
            kind,
            json,
        } => {
            let filter = InteractionFilter {
                class,
                kind,
                ..Default::default()
            };
            let interactions = ledger::find_interactions(store.as_ref(), user, filter).await?;
            if json {
                print!("{}", report::render_json(&interactions)?);
            } else {
                print!("{}", report::render_interactions(&interactions));
            }
        }
        Commands::Check {
            user,
            article,
            job,
            kind,
        } => {
            let target = ItemRef::from_parts(article, job)?;
            if ledger::has_interaction(store.as_ref(), user, target, kind).await? {
                println!("{kind} is recorded on {target}.");
            } else {
                println!("{kind} is not recorded on {target}.");
            }
        }
        Commands::Refresh { pipeline } => {
            let scheduler = build_scheduler(Arc::clone(&store), pipeline)?;
            match scheduler.force_refresh_cycle().await {
                TriggerOutcome::Completed(cycle) => print!("{}", report::render_cycle_report(&cycle)),
                TriggerOutcome::Failed(err) => return Err(err).context("refresh cycle failed"),
                TriggerOutcome::AlreadyRunning => println!("A refresh cycle is already running."),
            }
        }
        Commands::Schedule { pipeline } => {
            let scheduler = Arc::new(build_scheduler(Arc::clone(&store), pipeline)?);
            scheduler
                .run_until(async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %err, "failed to listen for ctrl-c");
                    }
                })
                .await;
            println!("Scheduler stopped.");
        }
        Commands::Show { user, limit, json } => {
            let recommendation = store
                .get_recommendations(user)
                .await
                .context("failed to load recommendations")?;
            if json {
                print!("{}", report::render_json(&recommendation)?);
            } else {
                print!(
                    "{}",
                    report::render_recommendations(user, recommendation.as_ref(), limit)
                );
            }
        }
    }

    Ok(())
}
