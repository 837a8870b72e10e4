//! Run lifecycle: lock, pipeline, artifacts, pointer, retention.
//!
//! A run either completes fully and advances the latest-run pointer, or it
//! fails and leaves the pointer untouched. Consumers that follow the pointer
//! therefore always see a complete, self-consistent set of artifacts.

pub mod pointer;
pub mod retention;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::cluster::{self, ClusterError, ClusterOptions};
use crate::config::FleetmedicConfig;
use crate::detect;
use crate::ingest::{self, IngestOptions, SkippedHost};
use crate::model::{
    FleetSummary, HostTimeline, Incident, RunState, RunStatus, Snapshot, Window, SCHEMA_VERSION,
};
use crate::report;
use crate::sanitize::Sanitizer;
use crate::score::{self, HostIncidents, ScoreOptions};
use crate::store::lock::{LockError, RunLock};
use crate::store::{read_json, write_json, ArtifactStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("artifact write failed: {0}")]
    Artifact(#[from] anyhow::Error),
    #[error("detection task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a completed run produced, for callers and the CLI.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub summary: FleetSummary,
    pub skipped: Vec<SkippedHost>,
}

/// Owns the stores and settings for executing runs.
pub struct Coordinator {
    store: Arc<dyn ArtifactStore>,
    snapshot_store: Arc<dyn ArtifactStore>,
    catalog: Arc<Catalog>,
    sanitizer: Sanitizer,
    ingest_options: IngestOptions,
    cluster_options: ClusterOptions,
    score_options: ScoreOptions,
    retention_hours: i64,
    lock_ttl_minutes: i64,
    concurrency: usize,
}

impl Coordinator {
    /// Build a coordinator over a single store holding both snapshots and
    /// artifacts.
    pub fn new(store: Arc<dyn ArtifactStore>, config: &FleetmedicConfig) -> Self {
        Self::with_snapshot_store(store.clone(), store, config)
    }

    /// Build a coordinator with snapshot intake split from the artifact
    /// store.
    pub fn with_snapshot_store(
        store: Arc<dyn ArtifactStore>,
        snapshot_store: Arc<dyn ArtifactStore>,
        config: &FleetmedicConfig,
    ) -> Self {
        let catalog = Catalog::load_or_builtin(config.catalog.path.as_deref());
        Self {
            store,
            snapshot_store,
            catalog: Arc::new(catalog),
            sanitizer: Sanitizer::new(config.redaction.mode, config.redaction.salt.clone()),
            ingest_options: config.ingest.options(),
            cluster_options: config.cluster.options(),
            score_options: config.score.options(),
            retention_hours: config.run.retention_hours,
            lock_ttl_minutes: config.run.lock_ttl_minutes,
            concurrency: config.run.concurrency.max(1),
        }
    }

    /// Execute one complete run at the given instant.
    ///
    /// Acquires the run lock, ingests snapshots, detects and clusters
    /// incidents, scores hosts, writes artifacts, advances the pointer, and
    /// purges expired runs. On failure the run is marked failed, the lock is
    /// released, and the pointer stays where it was.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunOutcome, RunError> {
        let run_id = now.format("run-%Y%m%d-%H%M%SZ").to_string();
        self.run_with_id(&run_id, now).await
    }

    /// Execute one complete run under a caller-chosen run id. Used by
    /// schedulers that assign their own run identifiers; `run_once` derives
    /// the id from the clock.
    pub async fn run_with_id(
        &self,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, RunError> {
        let lock =
            match RunLock::acquire(self.store.as_ref(), run_id, self.lock_ttl_minutes, now).await {
                Ok(lock) => lock,
                Err(e) => {
                    // Leave a terminal status so consumers polling this run id
                    // see why nothing was produced.
                    if let Err(status_err) = self
                        .finish(run_id, now, RunState::Failed, format!("{e}"))
                        .await
                    {
                        warn!(run_id, error = %status_err, "could not record failed run status");
                    }
                    return Err(e.into());
                }
            };
        info!(run_id, reclaimed_stale = lock.reclaimed_stale, "run started");

        let mut result = self.execute(run_id, now).await;
        match &result {
            Ok(outcome) => {
                let published = self
                    .publish(run_id, now, status_message(&outcome.skipped))
                    .await;
                if let Err(e) = published {
                    result = Err(e);
                }
            }
            Err(e) => {
                error!(run_id, error = %e, "run failed");
                // Terminal status for consumers; the pointer is not moved.
                if let Err(status_err) = self
                    .finish(run_id, now, RunState::Failed, format!("{e}"))
                    .await
                {
                    warn!(run_id, error = %status_err, "could not record failed run status");
                }
            }
        }
        lock.release(self.store.as_ref()).await?;

        let outcome = result?;
        let purged = retention::purge_old_runs(
            self.store.as_ref(),
            self.retention_hours,
            Some(run_id),
            now,
        )
        .await?;
        if !purged.purged.is_empty() {
            info!(run_id, purged = purged.purged.len(), "retention pass complete");
        }
        Ok(outcome)
    }

    async fn execute(&self, run_id: &str, now: DateTime<Utc>) -> Result<RunOutcome, RunError> {
        self.write_status(run_id, RunState::Running, "run in progress".to_string(), now, None)
            .await?;

        let prior = self.load_prior().await?;
        let ingested = ingest::load_snapshots(
            self.snapshot_store.as_ref(),
            &self.sanitizer,
            &self.ingest_options,
            now,
        )
        .await?;
        info!(
            run_id,
            hosts = ingested.snapshots.len(),
            skipped = ingested.skipped.len(),
            "snapshots ingested"
        );

        let host_incidents = self.detect_all(ingested.snapshots, now).await?;
        let incidents: Vec<Incident> = host_incidents
            .iter()
            .flat_map(|h| h.host.incidents.iter().cloned())
            .collect();

        let clusters = cluster::cluster(&incidents, prior.as_ref(), &self.cluster_options)?;
        let hosts: Vec<HostIncidents> =
            host_incidents.iter().map(|h| h.host.clone()).collect();
        let (top_hosts, overall) =
            score::score_fleet(&hosts, &clusters, prior.as_ref(), &self.score_options);

        let window = fleet_window(host_incidents.iter().map(|h| h.window), now);
        let summary = FleetSummary {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: run_id.to_string(),
            generated_at: now,
            window,
            host_count: host_incidents.len() as u32,
            incident_count: incidents.len() as u32,
            overall_risk_score: overall,
            top_hosts,
            clusters,
        };

        for host in &host_incidents {
            self.write_host_artifacts(run_id, host).await?;
        }
        write_json(
            self.store.as_ref(),
            &format!("{run_id}/fleet_summary.json"),
            &summary,
        )
        .await?;
        info!(
            run_id,
            incidents = summary.incident_count,
            clusters = summary.clusters.len(),
            overall = summary.overall_risk_score,
            "fleet summary written"
        );

        Ok(RunOutcome {
            run_id: run_id.to_string(),
            summary,
            skipped: ingested.skipped,
        })
    }

    /// Run detection per host on a bounded worker pool. All hosts are joined
    /// before clustering so cross-host state never sees partial results.
    async fn detect_all(
        &self,
        snapshots: Vec<Snapshot>,
        now: DateTime<Utc>,
    ) -> Result<Vec<HostDetection>, RunError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, snapshot) in snapshots.into_iter().enumerate() {
            let catalog = Arc::clone(&self.catalog);
            let permit_source = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Semaphore is never closed while tasks run.
                let _permit = permit_source.acquire_owned().await;
                let incidents = detect::detect(&catalog, &snapshot, now);
                (index, snapshot, incidents)
            });
        }

        let mut detections = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, snapshot, incidents) = joined?;
            let last_event_ts = snapshot.events.iter().map(|e| e.ts).max();
            detections.push((
                index,
                HostDetection {
                    host: HostIncidents {
                        host_id: snapshot.host_id,
                        user_id: snapshot.user_id,
                        incidents,
                    },
                    window: snapshot.window,
                    last_event_ts,
                },
            ));
        }
        // Restore ingest order regardless of completion order.
        detections.sort_by_key(|(index, _)| *index);
        Ok(detections.into_iter().map(|(_, d)| d).collect())
    }

    async fn write_host_artifacts(
        &self,
        run_id: &str,
        host: &HostDetection,
    ) -> Result<(), RunError> {
        let severity = host
            .host
            .incidents
            .iter()
            .map(|i| i.severity)
            .max()
            .unwrap_or(0);
        let timeline = HostTimeline {
            schema_version: SCHEMA_VERSION.to_string(),
            host_id: host.host.host_id.clone(),
            user_id: host.host.user_id.clone(),
            window: host.window,
            incidents: host.host.incidents.clone(),
            severity,
            last_event_ts: host.last_event_ts,
        };
        let base = format!("{run_id}/hosts/{}", timeline.host_id);
        write_json(self.store.as_ref(), &format!("{base}/timeline.json"), &timeline).await?;
        self.store
            .put(
                &format!("{base}/report.md"),
                report::render_host_report(&timeline).as_bytes(),
            )
            .await?;
        Ok(())
    }

    async fn load_prior(&self) -> Result<Option<FleetSummary>, RunError> {
        let Some(latest) = pointer::read_latest(self.store.as_ref()).await? else {
            return Ok(None);
        };
        match read_json::<FleetSummary>(self.store.as_ref(), &format!("{latest}/fleet_summary.json"))
            .await
        {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                // A dangling pointer degrades to a first run.
                warn!(run_id = latest, error = %e, "prior run unreadable, treating as first run");
                Ok(None)
            }
        }
    }

    /// Record success and advance the pointer, in that order. A run whose
    /// pointer update fails is rewritten as failed so no consumer ever sees
    /// a succeeded status that the pointer will never reference.
    async fn publish(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        message: String,
    ) -> Result<(), RunError> {
        self.finish(run_id, started_at, RunState::Succeeded, message)
            .await?;
        if let Err(e) = pointer::write_latest(self.store.as_ref(), run_id).await {
            if let Err(status_err) = self
                .finish(
                    run_id,
                    started_at,
                    RunState::Failed,
                    format!("pointer update failed: {e}"),
                )
                .await
            {
                warn!(run_id, error = %status_err, "could not record failed run status");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn finish(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        state: RunState,
        message: String,
    ) -> Result<(), RunError> {
        self.write_status(run_id, state, message, started_at, Some(Utc::now()))
            .await
    }

    async fn write_status(
        &self,
        run_id: &str,
        state: RunState,
        message: String,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), RunError> {
        let status = RunStatus {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: run_id.to_string(),
            status: state,
            message,
            started_at,
            finished_at,
        };
        write_json(self.store.as_ref(), &format!("{run_id}/run_status.json"), &status).await?;
        Ok(())
    }
}

struct HostDetection {
    host: HostIncidents,
    window: Window,
    last_event_ts: Option<DateTime<Utc>>,
}

fn status_message(skipped: &[SkippedHost]) -> String {
    if skipped.is_empty() {
        return "completed".to_string();
    }
    let keys: Vec<&str> = skipped.iter().map(|s| s.key.as_str()).collect();
    format!("completed; skipped {}: {}", skipped.len(), keys.join(", "))
}

fn fleet_window(windows: impl Iterator<Item = Window>, now: DateTime<Utc>) -> Window {
    let mut start: Option<DateTime<Utc>> = None;
    let mut end: Option<DateTime<Utc>> = None;
    for window in windows {
        start = Some(start.map_or(window.start, |s| s.min(window.start)));
        end = Some(end.map_or(window.end, |e| e.max(window.end)));
    }
    Window {
        start: start.unwrap_or(now),
        end: end.unwrap_or(now),
    }
}

/// Mark a run as exempt from retention.
pub async fn pin_run(store: &dyn ArtifactStore, run_id: &str) -> Result<(), StoreError> {
    if !store.exists(&format!("{run_id}/run_status.json")).await? {
        return Err(StoreError::NotFound(run_id.to_string()));
    }
    store.put(&format!("{run_id}/pinned"), b"pinned\n").await?;
    info!(run_id, "run pinned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_id_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 30, 45).unwrap();
        assert_eq!(
            now.format("run-%Y%m%d-%H%M%SZ").to_string(),
            "run-20260310-123045Z"
        );
    }

    #[test]
    fn test_fleet_window_spans_hosts() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let windows = vec![
            Window {
                start: Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
            },
            Window {
                start: Utc.with_ymd_and_hms(2026, 3, 10, 7, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap(),
            },
        ];
        let window = fleet_window(windows.into_iter(), now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 3, 10, 7, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_fleet_window_empty_fleet_collapses_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let window = fleet_window(std::iter::empty(), now);
        assert_eq!(window.start, now);
        assert_eq!(window.end, now);
    }

    #[test]
    fn test_status_message_lists_skipped() {
        let skipped = vec![SkippedHost {
            key: "snapshots/HOST-B/snapshot-20260310T090000Z.json".to_string(),
            reason: "unsupported schema_version \"9.0\"".to_string(),
        }];
        let message = status_message(&skipped);
        assert!(message.starts_with("completed; skipped 1:"));
        assert!(message.contains("HOST-B"));
    }
}
