//! Core data model: events, snapshots, incidents, clusters, scores, runs.
//!
//! Everything here is plain serde data. All timestamps are UTC and serialize
//! as RFC 3339. Artifacts built from these types are write-once; nothing in
//! this module mutates after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source log level of an event. Ordered so that `Ord` means "more severe".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "String", into = "String")]
pub enum Level {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

impl From<String> for Level {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Level::Critical,
            "error" => Level::Error,
            "warning" | "warn" => Level::Warning,
            "verbose" | "debug" | "trace" => Level::Verbose,
            // Collectors emit free-text levels; unknown strings degrade to
            // Information rather than failing the event.
            _ => Level::Information,
        }
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        match level {
            Level::Critical => "critical",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Information => "information",
            Level::Verbose => "verbose",
        }
        .to_string()
    }
}

/// One observed log line, as exported by a collector. Immutable input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub level: Level,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Closed time window covered by a snapshot or incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Device metadata attached to a snapshot by the collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Collector metadata attached to a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// One host's event export for one time window. Read-only input to the
/// detector; events may fall slightly outside the window (collector clock
/// skew) and are never rejected for it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub schema_version: String,
    pub snapshot_id: Option<String>,
    pub host_id: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub window: Window,
    pub user_id: Option<String>,
    pub device: DeviceMeta,
    pub collector: CollectorMeta,
    /// Events in ascending timestamp order.
    pub events: Vec<Event>,
    /// Counts by level as reported by the collector, if present.
    pub counts_by_level: BTreeMap<String, u64>,
}

/// Normalized dedup key identifying "the same underlying condition" across
/// hosts and runs, plus its stable hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub signature_key: String,
    pub signature_hash: String,
}

/// One evidence line attached to an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub ts: DateTime<Utc>,
    pub provider: String,
    pub level: Level,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
}

/// A detected condition on one host within one run. At most one per
/// (host, type) per run; immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub schema_version: String,
    pub incident_id: String,
    pub host_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub window: Window,
    pub detected_at: DateTime<Utc>,
    pub severity: u8,
    pub confidence: f64,
    pub summary: String,
    pub signature: Signature,
    pub recommended_actions: Vec<String>,
    pub evidence: Vec<EvidenceRecord>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Lifecycle status of a cluster relative to the prior run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    New,
    Ongoing,
    Resolved,
}

/// Cross-host grouping of incidents sharing a signature hash, tracked across
/// runs for lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub signature_hash: String,
    pub signature_key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub affected_hosts: u32,
    pub example_hosts: Vec<String>,
    pub severity: u8,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: ClusterStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_affected_hosts: Option<i64>,
}

/// Recommended operator action for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostAction {
    None,
    Monitor,
    Contact,
}

/// Per-host risk rollup, embedded in the fleet summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostScore {
    pub host_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub score: u8,
    /// One `"{type} (sev {n})"` entry per incident, highest severity first.
    pub reasons: Vec<String>,
    pub incident_refs: Vec<String>,
    pub action: HostAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_score: Option<i32>,
    pub action_reason: String,
}

/// Run-level output consumed by dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSummary {
    pub schema_version: String,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub window: Window,
    pub host_count: u32,
    pub incident_count: u32,
    pub overall_risk_score: u8,
    pub top_hosts: Vec<HostScore>,
    pub clusters: Vec<Cluster>,
}

/// Per-host artifact: the host's incidents for one run plus a severity rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTimeline {
    pub schema_version: String,
    pub host_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub window: Window,
    pub incidents: Vec<Incident>,
    pub severity: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_ts: Option<DateTime<Utc>>,
}

/// Run lifecycle states. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
}

/// Persisted run status, written at every state transition so consumers can
/// distinguish "no runs yet" from "last run failed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub schema_version: String,
    pub run_id: String,
    pub status: RunState,
    /// Human-readable outcome, including any skipped hosts or the failure.
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Current artifact schema version.
pub const SCHEMA_VERSION: &str = "1.0";
