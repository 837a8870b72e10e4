//! Snapshot discovery and parsing.
//!
//! Snapshots live under `snapshots/<host_id>/snapshot-YYYYMMDDTHHMMSSZ.json`
//! (or an operator-supplied prefix). Failures are scoped to the offending
//! host: an unreadable or unsupported snapshot skips that host and records
//! why, and a malformed event is dropped without corrupting the events
//! parsed before it. Messages are sanitized exactly once, here.

use crate::model::{CollectorMeta, DeviceMeta, Event, Snapshot, Window};
use crate::sanitize::Sanitizer;
use crate::store::ArtifactStore;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

static HOST_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:-]{3,64}$").unwrap());
static SNAPSHOT_FILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^snapshot-\d{8}T\d{6}Z\.json$").unwrap());

/// Which snapshots to keep when a host has several inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectMode {
    /// Only the snapshot with the latest window end per host.
    Latest,
    /// Every snapshot in the window, merged per host.
    All,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub snapshot_prefix: String,
    pub window_hours: i64,
    pub select_mode: SelectMode,
    /// Safety cap on hosts processed per run (staged rollout).
    pub max_hosts: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            snapshot_prefix: "snapshots".to_string(),
            window_hours: 24,
            select_mode: SelectMode::Latest,
            max_hosts: None,
        }
    }
}

/// A host skipped during ingest, surfaced through run_status.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SkippedHost {
    pub key: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct IngestOutcome {
    /// Selected snapshots in ascending host id order.
    pub snapshots: Vec<Snapshot>,
    pub skipped: Vec<SkippedHost>,
}

// Wire shape of a snapshot document. Events are held as raw JSON values so
// a single malformed event cannot sink the host.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    schema_version: String,
    #[serde(default)]
    snapshot_id: Option<String>,
    #[serde(default)]
    host_id: Option<String>,
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
    window: Window,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    device: Option<DeviceMeta>,
    #[serde(default)]
    collector: Option<CollectorMeta>,
    #[serde(default)]
    events: Vec<serde_json::Value>,
    #[serde(default)]
    counts_by_level: BTreeMap<String, u64>,
}

/// Discover, parse, sanitize, and select snapshots for a run.
pub async fn load_snapshots(
    store: &dyn ArtifactStore,
    sanitizer: &Sanitizer,
    options: &IngestOptions,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, crate::store::StoreError> {
    let cutoff = now - Duration::hours(options.window_hours);
    let keys = store.list(&options.snapshot_prefix).await?;

    let mut skipped = Vec::new();
    let mut per_host: BTreeMap<String, Vec<Snapshot>> = BTreeMap::new();

    for key in keys {
        if !key.ends_with(".json") {
            continue;
        }
        let mut parts = key.rsplit('/');
        let filename = parts.next().unwrap_or_default();
        let dir_host = parts.next().unwrap_or_default();
        if !HOST_ID_PATTERN.is_match(dir_host) || !SNAPSHOT_FILE_PATTERN.is_match(filename) {
            debug!(key, "ignoring non-snapshot key");
            continue;
        }

        let snapshot = match read_snapshot(store, &key, sanitizer).await {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                warn!(key, %reason, "skipping snapshot");
                skipped.push(SkippedHost { key, reason });
                continue;
            }
        };
        if snapshot.window.end < cutoff {
            debug!(key, "snapshot outside ingest window");
            continue;
        }
        per_host
            .entry(snapshot.host_id.clone())
            .or_default()
            .push(snapshot);
    }

    let mut snapshots = Vec::with_capacity(per_host.len());
    for (_, mut host_snaps) in per_host {
        host_snaps.sort_by_key(|s| s.window.end);
        let selected = match options.select_mode {
            SelectMode::Latest => host_snaps.pop(),
            SelectMode::All => merge_host_snapshots(host_snaps),
        };
        if let Some(snapshot) = selected {
            snapshots.push(snapshot);
        }
    }
    if let Some(cap) = options.max_hosts {
        snapshots.truncate(cap);
    }
    Ok(IngestOutcome { snapshots, skipped })
}

async fn read_snapshot(
    store: &dyn ArtifactStore,
    key: &str,
    sanitizer: &Sanitizer,
) -> Result<Snapshot, String> {
    let bytes = store
        .get(key)
        .await
        .map_err(|e| format!("unreadable snapshot: {e}"))?;
    let raw: RawSnapshot =
        serde_json::from_slice(&bytes).map_err(|e| format!("malformed snapshot: {e}"))?;

    if !is_supported_schema(&raw.schema_version) {
        return Err(format!(
            "unsupported schema_version {:?}",
            raw.schema_version
        ));
    }

    let host_id = raw
        .host_id
        .or_else(|| {
            // Fall back to the directory component of the key.
            key.rsplit('/').nth(1).map(str::to_string)
        })
        .ok_or_else(|| "snapshot missing host_id".to_string())?;

    let mut events = Vec::with_capacity(raw.events.len());
    let mut dropped = 0usize;
    for value in raw.events {
        match serde_json::from_value::<Event>(value) {
            Ok(mut event) => {
                event.message = sanitizer.sanitize(&event.message);
                events.push(event);
            }
            Err(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(key, dropped, "dropped malformed events");
    }
    // Window order; events slightly outside the window are tolerated.
    events.sort_by_key(|e| e.ts);

    Ok(Snapshot {
        schema_version: raw.schema_version,
        snapshot_id: raw.snapshot_id,
        host_id,
        generated_at: raw.generated_at,
        window: raw.window,
        user_id: sanitizer.user_id(raw.user_id),
        device: raw.device.unwrap_or_default(),
        collector: raw.collector.unwrap_or_default(),
        events,
        counts_by_level: raw.counts_by_level,
    })
}

fn is_supported_schema(version: &str) -> bool {
    version == "1.0" || version.starts_with("1.")
}

fn merge_host_snapshots(mut snapshots: Vec<Snapshot>) -> Option<Snapshot> {
    let mut merged = snapshots.pop()?;
    for older in snapshots {
        merged.window.start = merged.window.start.min(older.window.start);
        merged.events.extend(older.events);
    }
    merged.events.sort_by_key(|e| e.ts);
    Some(merged)
}
