use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use fleetmedic::config::FleetmedicConfig;
use fleetmedic::model::{FleetSummary, RunStatus};
use fleetmedic::run::{pin_run, pointer, retention};
use fleetmedic::store::read_json;

#[derive(Parser)]
#[command(
    name = "fleetmedic",
    about = "Incident detection and fleet health scoring for endpoint telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Config file path (overrides FLEETMEDIC_CONFIG and system locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Artifact store root (overrides the configured location)
    #[arg(long, global = true)]
    artifacts_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one full run: ingest, detect, cluster, score, publish
    Run {
        /// Run id to use instead of deriving one from the clock
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Print the id of the latest successful run
    Latest,

    /// Print the fleet report for a run (defaults to the latest)
    Report {
        /// Run id, e.g. run-20260310-120000Z
        run_id: Option<String>,
    },

    /// Print the run status document for a run (defaults to the latest)
    Status {
        /// Run id
        run_id: Option<String>,
    },

    /// Exempt a run from retention
    Pin {
        /// Run id
        run_id: String,
    },

    /// Delete runs older than the retention window
    Purge {
        /// Override the configured retention window
        #[arg(long)]
        retention_hours: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FleetmedicConfig::load(path)?,
        None => FleetmedicConfig::load_or_default(),
    };
    if let Some(root) = &cli.artifacts_root {
        config.store.artifacts_root = root.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .init();

    match cli.command {
        Commands::Run { run_id } => {
            let outcome = match run_id {
                Some(run_id) => {
                    let coordinator = fleetmedic::coordinator(&config);
                    coordinator.run_with_id(&run_id, chrono::Utc::now()).await?
                }
                None => fleetmedic::run_once(&config).await?,
            };
            println!(
                "{} hosts={} incidents={} clusters={} overall_risk={}",
                outcome.run_id,
                outcome.summary.host_count,
                outcome.summary.incident_count,
                outcome.summary.clusters.len(),
                outcome.summary.overall_risk_score,
            );
            for skipped in &outcome.skipped {
                println!("skipped {}: {}", skipped.key, skipped.reason);
            }
        }
        Commands::Latest => {
            let store = fleetmedic::open_store(&config);
            match pointer::read_latest(store.as_ref()).await? {
                Some(run_id) => println!("{run_id}"),
                None => bail!("no successful runs yet"),
            }
        }
        Commands::Report { run_id } => {
            let store = fleetmedic::open_store(&config);
            let run_id = resolve_run(store.as_ref(), run_id).await?;
            let summary: FleetSummary =
                read_json(store.as_ref(), &format!("{run_id}/fleet_summary.json")).await?;
            print!("{}", fleetmedic::report::render_fleet_report(&summary));
        }
        Commands::Status { run_id } => {
            let store = fleetmedic::open_store(&config);
            let run_id = resolve_run(store.as_ref(), run_id).await?;
            let status: RunStatus =
                read_json(store.as_ref(), &format!("{run_id}/run_status.json")).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Pin { run_id } => {
            let store = fleetmedic::open_store(&config);
            pin_run(store.as_ref(), &run_id).await?;
            println!("pinned {run_id}");
        }
        Commands::Purge { retention_hours } => {
            let store = fleetmedic::open_store(&config);
            let hours = retention_hours.unwrap_or(config.run.retention_hours);
            let report =
                retention::purge_old_runs(store.as_ref(), hours, None, chrono::Utc::now()).await?;
            println!("purged {} runs, kept {}", report.purged.len(), report.kept);
            for run_id in &report.purged {
                println!("purged {run_id}");
            }
        }
    }

    Ok(())
}

async fn resolve_run(
    store: &dyn fleetmedic::store::ArtifactStore,
    run_id: Option<String>,
) -> Result<String> {
    if let Some(run_id) = run_id {
        return Ok(run_id);
    }
    match pointer::read_latest(store).await? {
        Some(run_id) => Ok(run_id),
        None => bail!("no successful runs yet; pass a run id"),
    }
}
