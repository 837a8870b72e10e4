//! Fleetmedic -- incident detection and fleet health scoring for endpoint
//! telemetry snapshots.
//!
//! This crate provides the core library for snapshot ingestion, rule-based
//! incident detection, cross-host clustering, risk scoring, and run
//! lifecycle management over a filesystem artifact store.

pub mod catalog;
pub mod classify;
pub mod cluster;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod model;
pub mod report;
pub mod run;
pub mod sanitize;
pub mod score;
pub mod store;

use std::sync::Arc;

use anyhow::Result;

use config::FleetmedicConfig;
use run::{Coordinator, RunOutcome};
use store::{ArtifactStore, LocalStore};

/// Execute one full run against the configured stores.
pub async fn run_once(config: &FleetmedicConfig) -> Result<RunOutcome> {
    let coordinator = coordinator(config);
    let outcome = coordinator.run_once(chrono::Utc::now()).await?;
    Ok(outcome)
}

/// Build a coordinator from configuration, splitting the snapshot store off
/// when one is configured.
pub fn coordinator(config: &FleetmedicConfig) -> Coordinator {
    let store: Arc<dyn ArtifactStore> = Arc::new(LocalStore::new(&config.store.artifacts_root));
    match &config.store.snapshot_root {
        Some(root) => {
            let snapshots: Arc<dyn ArtifactStore> = Arc::new(LocalStore::new(root));
            Coordinator::with_snapshot_store(store, snapshots, config)
        }
        None => Coordinator::new(store, config),
    }
}

/// Open the configured artifact store directly, for read-side commands.
pub fn open_store(config: &FleetmedicConfig) -> Arc<dyn ArtifactStore> {
    Arc::new(LocalStore::new(&config.store.artifacts_root))
}
