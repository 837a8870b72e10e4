//! Cross-host clustering of incidents with run-to-run lifecycle tracking.
//!
//! Incidents sharing a signature hash merge into one cluster per run. The
//! prior run's cluster set is passed in explicitly, never read from global
//! state, so lifecycle reconciliation is unit-testable with synthetic priors.
//! Output ordering is fully determined (severity descending, then signature
//! hash), making a run's cluster set byte-reproducible.

use crate::model::{Cluster, ClusterStatus, FleetSummary, Incident};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Duplicate hashes in the output would mask a detection bug; fail
    /// closed instead of silently deduplicating.
    #[error("internal invariant violated: duplicate cluster signature_hash {hash}")]
    DuplicateSignature { hash: String },
}

/// Tuning knobs for cluster assembly.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Cap on `example_hosts` per cluster.
    pub example_hosts_cap: usize,
    /// Emit clusters present in the prior run but absent now, with
    /// `affected_hosts = 0` and status `resolved`.
    pub include_resolved: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            example_hosts_cap: 20,
            include_resolved: false,
        }
    }
}

struct ClusterAccum {
    signature_key: String,
    kind: String,
    hosts: BTreeSet<String>,
    example_hosts: Vec<String>,
    severity: u8,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Group the run's incidents by signature hash and reconcile against the
/// prior run's cluster set.
pub fn cluster(
    incidents: &[Incident],
    prior: Option<&FleetSummary>,
    options: &ClusterOptions,
) -> Result<Vec<Cluster>, ClusterError> {
    let mut groups: BTreeMap<String, ClusterAccum> = BTreeMap::new();

    for incident in incidents {
        let hash = incident.signature.signature_hash.clone();
        let accum = groups.entry(hash).or_insert_with(|| ClusterAccum {
            signature_key: incident.signature.signature_key.clone(),
            kind: incident.kind.clone(),
            hosts: BTreeSet::new(),
            example_hosts: Vec::new(),
            severity: 0,
            first_seen: incident.window.start,
            last_seen: incident.window.end,
        });
        if accum.hosts.insert(incident.host_id.clone()) {
            // Example hosts in first-seen order, capped.
            if accum.example_hosts.len() < options.example_hosts_cap {
                accum.example_hosts.push(incident.host_id.clone());
            }
        }
        accum.severity = accum.severity.max(incident.severity);
        accum.first_seen = accum.first_seen.min(incident.window.start);
        accum.last_seen = accum.last_seen.max(incident.window.end);
    }

    let prior_clusters: BTreeMap<&str, &Cluster> = prior
        .map(|summary| {
            summary
                .clusters
                .iter()
                .map(|c| (c.signature_hash.as_str(), c))
                .collect()
        })
        .unwrap_or_default();

    let mut clusters: Vec<Cluster> = Vec::with_capacity(groups.len());
    for (hash, accum) in groups {
        let (status, delta, first_seen) = match prior_clusters.get(hash.as_str()) {
            // Clusters keep their original first-seen date across runs.
            Some(prev) if prev.affected_hosts > 0 => (
                ClusterStatus::Ongoing,
                Some(accum.hosts.len() as i64 - i64::from(prev.affected_hosts)),
                accum.first_seen.min(prev.first_seen),
            ),
            _ => (ClusterStatus::New, None, accum.first_seen),
        };
        clusters.push(Cluster {
            signature_hash: hash,
            signature_key: accum.signature_key,
            kind: accum.kind,
            affected_hosts: accum.hosts.len() as u32,
            example_hosts: accum.example_hosts,
            severity: accum.severity,
            first_seen,
            last_seen: accum.last_seen,
            status,
            delta_affected_hosts: delta,
        });
    }

    if options.include_resolved {
        for (hash, prev) in &prior_clusters {
            if prev.affected_hosts == 0 || clusters.iter().any(|c| c.signature_hash == **hash) {
                continue;
            }
            clusters.push(Cluster {
                signature_hash: prev.signature_hash.clone(),
                signature_key: prev.signature_key.clone(),
                kind: prev.kind.clone(),
                affected_hosts: 0,
                example_hosts: Vec::new(),
                severity: prev.severity,
                first_seen: prev.first_seen,
                last_seen: prev.last_seen,
                status: ClusterStatus::Resolved,
                delta_affected_hosts: Some(-i64::from(prev.affected_hosts)),
            });
        }
    }

    clusters.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.signature_hash.cmp(&b.signature_hash))
    });

    let mut seen = BTreeSet::new();
    for c in &clusters {
        if !seen.insert(c.signature_hash.as_str()) {
            return Err(ClusterError::DuplicateSignature {
                hash: c.signature_hash.clone(),
            });
        }
    }

    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Signature, Window, SCHEMA_VERSION};
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn incident(host: &str, kind: &str, hash: &str, severity: u8, day: u32) -> Incident {
        Incident {
            schema_version: SCHEMA_VERSION.to_string(),
            incident_id: format!("{host}-incident-1"),
            host_id: host.to_string(),
            kind: kind.to_string(),
            window: Window {
                start: ts(day, 8),
                end: ts(day, 9),
            },
            detected_at: ts(day, 10),
            severity,
            confidence: 0.7,
            summary: "test".to_string(),
            signature: Signature {
                signature_key: format!("key-{hash}"),
                signature_hash: hash.to_string(),
            },
            recommended_actions: Vec::new(),
            evidence: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn summary_with(clusters: Vec<Cluster>) -> FleetSummary {
        FleetSummary {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: "run-prev".to_string(),
            generated_at: ts(1, 12),
            window: Window {
                start: ts(1, 0),
                end: ts(1, 23),
            },
            host_count: 0,
            incident_count: 0,
            overall_risk_score: 0,
            top_hosts: Vec::new(),
            clusters,
        }
    }

    #[test]
    fn test_first_run_clusters_are_new() {
        let incidents = vec![
            incident("HOST-A", "disk_full", "aaa", 70, 2),
            incident("HOST-B", "disk_full", "aaa", 75, 2),
            incident("HOST-A", "network_instability", "bbb", 65, 2),
        ];
        let clusters = cluster(&incidents, None, &ClusterOptions::default()).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].signature_hash, "aaa");
        assert_eq!(clusters[0].affected_hosts, 2);
        assert_eq!(clusters[0].severity, 75);
        assert_eq!(clusters[0].status, ClusterStatus::New);
        assert_eq!(clusters[0].delta_affected_hosts, None);
        assert_eq!(clusters[0].example_hosts, vec!["HOST-A", "HOST-B"]);
    }

    #[test]
    fn test_ongoing_cluster_keeps_first_seen_and_computes_delta() {
        let prior_run = {
            let incidents = vec![incident("HOST-A", "disk_full", "aaa", 70, 1)];
            summary_with(cluster(&incidents, None, &ClusterOptions::default()).unwrap())
        };
        let incidents = vec![
            incident("HOST-A", "disk_full", "aaa", 70, 2),
            incident("HOST-B", "disk_full", "aaa", 70, 2),
            incident("HOST-C", "disk_full", "aaa", 70, 2),
        ];
        let clusters =
            cluster(&incidents, Some(&prior_run), &ClusterOptions::default()).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].status, ClusterStatus::Ongoing);
        assert_eq!(clusters[0].delta_affected_hosts, Some(2));
        // first_seen carried over from the prior run, not reset.
        assert_eq!(clusters[0].first_seen, ts(1, 8));
        assert_eq!(clusters[0].last_seen, ts(2, 9));
    }

    #[test]
    fn test_unchanged_cluster_has_zero_delta() {
        let prior_run = {
            let incidents = vec![incident("HOST-A", "disk_full", "aaa", 70, 1)];
            summary_with(cluster(&incidents, None, &ClusterOptions::default()).unwrap())
        };
        let incidents = vec![incident("HOST-A", "disk_full", "aaa", 70, 2)];
        let clusters =
            cluster(&incidents, Some(&prior_run), &ClusterOptions::default()).unwrap();
        assert_eq!(clusters[0].delta_affected_hosts, Some(0));
        assert_eq!(clusters[0].status, ClusterStatus::Ongoing);
    }

    #[test]
    fn test_resolved_clusters_emitted_only_on_request() {
        let prior_run = {
            let incidents = vec![
                incident("HOST-A", "disk_full", "aaa", 70, 1),
                incident("HOST-B", "update_failure", "ccc", 65, 1),
            ];
            summary_with(cluster(&incidents, None, &ClusterOptions::default()).unwrap())
        };
        let incidents = vec![incident("HOST-A", "disk_full", "aaa", 70, 2)];

        let silent = cluster(&incidents, Some(&prior_run), &ClusterOptions::default()).unwrap();
        assert_eq!(silent.len(), 1);

        let verbose = cluster(
            &incidents,
            Some(&prior_run),
            &ClusterOptions {
                include_resolved: true,
                ..ClusterOptions::default()
            },
        )
        .unwrap();
        assert_eq!(verbose.len(), 2);
        let resolved = verbose
            .iter()
            .find(|c| c.status == ClusterStatus::Resolved)
            .unwrap();
        assert_eq!(resolved.signature_hash, "ccc");
        assert_eq!(resolved.affected_hosts, 0);
        assert_eq!(resolved.delta_affected_hosts, Some(-1));
    }

    #[test]
    fn test_example_hosts_capped() {
        let incidents: Vec<Incident> = (0..30)
            .map(|i| incident(&format!("HOST-{i:03}"), "disk_full", "aaa", 70, 2))
            .collect();
        let clusters = cluster(&incidents, None, &ClusterOptions::default()).unwrap();
        assert_eq!(clusters[0].affected_hosts, 30);
        assert_eq!(clusters[0].example_hosts.len(), 20);
    }

    #[test]
    fn test_deterministic_ordering() {
        let incidents = vec![
            incident("HOST-A", "update_failure", "zzz", 65, 2),
            incident("HOST-B", "network_instability", "mmm", 65, 2),
            incident("HOST-C", "disk_full", "aaa", 80, 2),
        ];
        let a = cluster(&incidents, None, &ClusterOptions::default()).unwrap();
        let b = cluster(&incidents, None, &ClusterOptions::default()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        // Severity descending, hash ascending on ties.
        assert_eq!(a[0].signature_hash, "aaa");
        assert_eq!(a[1].signature_hash, "mmm");
        assert_eq!(a[2].signature_hash, "zzz");
    }
}
