//! Age-based cleanup of run artifacts.
//!
//! Runs older than the retention window are deleted wholesale. A run is
//! never purged while it is the current run, the pointer target, or pinned
//! with a `<run_id>/pinned` marker. Run age comes from the fleet summary's
//! `generated_at`; failed runs have no summary, so their run_status
//! timestamps are used instead. Runs whose age cannot be established are
//! left alone.

use crate::model::{FleetSummary, RunStatus};
use crate::run::pointer;
use crate::store::{read_json, ArtifactStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{info, warn};

pub const DEFAULT_RETENTION_HOURS: i64 = 48;

static RUN_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^run-\d{8}-\d{6}Z$").unwrap());

#[derive(Debug, Default)]
pub struct PurgeReport {
    pub purged: Vec<String>,
    pub kept: usize,
}

/// Delete runs older than `retention_hours`, sparing `keep_run`, the
/// pointer target, and pinned runs.
pub async fn purge_old_runs(
    store: &dyn ArtifactStore,
    retention_hours: i64,
    keep_run: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PurgeReport, StoreError> {
    let cutoff = now - Duration::hours(retention_hours);
    let latest = pointer::read_latest(store).await?;

    let mut run_ids = BTreeSet::new();
    for key in store.list("").await? {
        if let Some(first) = key.split('/').next() {
            if RUN_ID_PATTERN.is_match(first) {
                run_ids.insert(first.to_string());
            }
        }
    }

    let mut report = PurgeReport::default();
    for run_id in run_ids {
        if Some(run_id.as_str()) == keep_run || Some(run_id.as_str()) == latest.as_deref() {
            report.kept += 1;
            continue;
        }
        if store.exists(&format!("{run_id}/pinned")).await? {
            report.kept += 1;
            continue;
        }
        let Some(age_ref) = run_timestamp(store, &run_id).await else {
            warn!(run_id, "run age unknown, leaving in place");
            report.kept += 1;
            continue;
        };
        if age_ref >= cutoff {
            report.kept += 1;
            continue;
        }
        info!(run_id, %age_ref, "purging expired run");
        store.delete_prefix(&run_id).await?;
        report.purged.push(run_id);
    }
    Ok(report)
}

async fn run_timestamp(store: &dyn ArtifactStore, run_id: &str) -> Option<DateTime<Utc>> {
    if let Ok(summary) = read_json::<FleetSummary>(store, &format!("{run_id}/fleet_summary.json")).await
    {
        return Some(summary.generated_at);
    }
    let status = read_json::<RunStatus>(store, &format!("{run_id}/run_status.json"))
        .await
        .ok()?;
    Some(status.finished_at.unwrap_or(status.started_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunState, SCHEMA_VERSION};
    use crate::store::{write_json, LocalStore};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    async fn seed_failed_run(store: &LocalStore, run_id: &str, finished_at: DateTime<Utc>) {
        let status = RunStatus {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: run_id.to_string(),
            status: RunState::Failed,
            message: "boom".to_string(),
            started_at: finished_at - Duration::minutes(5),
            finished_at: Some(finished_at),
        };
        write_json(store, &format!("{run_id}/run_status.json"), &status)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_failed_run_purged() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        seed_failed_run(&store, "run-20260301-120000Z", now() - Duration::hours(72)).await;

        let report = purge_old_runs(&store, DEFAULT_RETENTION_HOURS, None, now())
            .await
            .unwrap();
        assert_eq!(report.purged, vec!["run-20260301-120000Z"]);
        assert!(!store.exists("run-20260301-120000Z/run_status.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_run_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        seed_failed_run(&store, "run-20260310-100000Z", now() - Duration::hours(2)).await;

        let report = purge_old_runs(&store, DEFAULT_RETENTION_HOURS, None, now())
            .await
            .unwrap();
        assert!(report.purged.is_empty());
        assert_eq!(report.kept, 1);
    }

    #[tokio::test]
    async fn test_pinned_run_survives() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        seed_failed_run(&store, "run-20260301-120000Z", now() - Duration::hours(72)).await;
        store.put("run-20260301-120000Z/pinned", b"keep").await.unwrap();

        let report = purge_old_runs(&store, DEFAULT_RETENTION_HOURS, None, now())
            .await
            .unwrap();
        assert!(report.purged.is_empty());
    }

    #[tokio::test]
    async fn test_pointer_target_survives() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        seed_failed_run(&store, "run-20260301-120000Z", now() - Duration::hours(72)).await;
        pointer::write_latest(&store, "run-20260301-120000Z").await.unwrap();

        let report = purge_old_runs(&store, DEFAULT_RETENTION_HOURS, None, now())
            .await
            .unwrap();
        assert!(report.purged.is_empty());
    }

    #[tokio::test]
    async fn test_non_run_prefixes_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        store
            .put("snapshots/HOST-A/snapshot-20260101T000000Z.json", b"{}")
            .await
            .unwrap();
        store.put("locks/run.lock", b"{}").await.unwrap();

        let report = purge_old_runs(&store, DEFAULT_RETENTION_HOURS, None, now())
            .await
            .unwrap();
        assert!(report.purged.is_empty());
        assert!(store.exists("locks/run.lock").await.unwrap());
        assert!(store
            .exists("snapshots/HOST-A/snapshot-20260101T000000Z.json")
            .await
            .unwrap());
    }
}
