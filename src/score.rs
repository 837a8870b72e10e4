//! Host and fleet risk scoring.
//!
//! All scoring is a pure function of the current run's incidents, the
//! current cluster set, and the prior run's summary. Every formula is
//! monotone non-decreasing in its inputs: adding an incident or raising a
//! severity can only hold or raise the host and fleet scores.

use crate::model::{Cluster, FleetSummary, HostAction, HostScore, Incident};
use std::collections::{BTreeMap, HashSet};

/// Score thresholds and caps. Defaults reproduce the reference scenario
/// (disk_full 70 + network_instability 65 on one host, two clusters:
/// host score 72, overall risk 74, action "contact").
#[derive(Debug, Clone)]
pub struct ScoreOptions {
    /// Score at or above which a host is flagged for contact.
    pub contact_threshold: u8,
    /// Score at or above which a host is flagged for monitoring.
    pub monitor_threshold: u8,
    /// Score increase vs. the prior run that alone warrants monitoring.
    pub monitor_delta: i32,
    /// Additional score per co-occurring distinct incident type.
    pub co_occurrence_bump: u8,
    /// `delta_affected_hosts` at or above which a cluster is a fleet-wide
    /// spike, forcing contact for its member hosts.
    pub spike_delta: i64,
    /// Number of hosts retained in `top_hosts`.
    pub top_hosts_limit: usize,
    /// Number of leading host scores averaged into the overall risk score.
    pub overall_top_hosts: usize,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        Self {
            contact_threshold: 70,
            monitor_threshold: 50,
            monitor_delta: 10,
            co_occurrence_bump: 2,
            spike_delta: 2,
            top_hosts_limit: 10,
            overall_top_hosts: 5,
        }
    }
}

/// Per-host detection output fed into scoring.
#[derive(Debug, Clone)]
pub struct HostIncidents {
    pub host_id: String,
    pub user_id: Option<String>,
    pub incidents: Vec<Incident>,
}

/// Score one host. `in_spiking_cluster` is true when any of the host's
/// incidents belongs to a cluster whose affected-host delta crossed the
/// spike threshold.
pub fn score_host(
    host: &HostIncidents,
    prior_score: Option<u8>,
    in_spiking_cluster: bool,
    options: &ScoreOptions,
) -> HostScore {
    let mut ranked: Vec<&Incident> = host.incidents.iter().collect();
    ranked.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.incident_id.cmp(&b.incident_id))
    });

    let max_severity = ranked.first().map(|i| i.severity).unwrap_or(0);
    let extra_types = ranked.len().saturating_sub(1) as u32;
    let score = u32::from(max_severity)
        .saturating_add(extra_types * u32::from(options.co_occurrence_bump))
        .min(100) as u8;

    let delta_score = prior_score.map(|prev| i32::from(score) - i32::from(prev));
    let (action, action_reason) = decide_action(score, delta_score, in_spiking_cluster, options);

    HostScore {
        host_id: host.host_id.clone(),
        user_id: host.user_id.clone(),
        score,
        reasons: ranked
            .iter()
            .map(|i| format!("{} (sev {})", i.kind, i.severity))
            .collect(),
        incident_refs: ranked.iter().map(|i| i.incident_id.clone()).collect(),
        action,
        delta_score,
        action_reason,
    }
}

fn decide_action(
    score: u8,
    delta_score: Option<i32>,
    in_spiking_cluster: bool,
    options: &ScoreOptions,
) -> (HostAction, String) {
    if score >= options.contact_threshold || in_spiking_cluster {
        return (
            HostAction::Contact,
            "High severity or cluster spike".to_string(),
        );
    }
    if score >= options.monitor_threshold
        || delta_score.is_some_and(|d| d >= options.monitor_delta)
    {
        return (
            HostAction::Monitor,
            "Moderate severity or trending up".to_string(),
        );
    }
    (HostAction::None, "Low severity or stable".to_string())
}

/// Score the whole fleet: ordered top hosts plus the overall risk score.
///
/// Overall risk is the floor of the mean of the leading host scores plus the
/// count of active clusters, capped at 100.
pub fn score_fleet(
    hosts: &[HostIncidents],
    clusters: &[Cluster],
    prior: Option<&FleetSummary>,
    options: &ScoreOptions,
) -> (Vec<HostScore>, u8) {
    let spiking_hashes: HashSet<&str> = clusters
        .iter()
        .filter(|c| c.delta_affected_hosts.is_some_and(|d| d >= options.spike_delta))
        .map(|c| c.signature_hash.as_str())
        .collect();

    let prior_scores: BTreeMap<&str, u8> = prior
        .map(|summary| {
            summary
                .top_hosts
                .iter()
                .map(|h| (h.host_id.as_str(), h.score))
                .collect()
        })
        .unwrap_or_default();

    let mut scores: Vec<HostScore> = hosts
        .iter()
        .map(|host| {
            let in_spike = host.incidents.iter().any(|incident| {
                spiking_hashes.contains(incident.signature.signature_hash.as_str())
            });
            score_host(
                host,
                prior_scores.get(host.host_id.as_str()).copied(),
                in_spike,
                options,
            )
        })
        .collect();

    scores.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.host_id.cmp(&b.host_id))
    });
    scores.truncate(options.top_hosts_limit);

    let active_clusters = clusters.iter().filter(|c| c.affected_hosts > 0).count();
    let overall = overall_risk(&scores, active_clusters, options);
    (scores, overall)
}

fn overall_risk(top_hosts: &[HostScore], cluster_count: usize, options: &ScoreOptions) -> u8 {
    if top_hosts.is_empty() {
        return 0;
    }
    let take = top_hosts.len().min(options.overall_top_hosts);
    let sum: u32 = top_hosts[..take].iter().map(|h| u32::from(h.score)).sum();
    let mean = sum / take as u32;
    (mean + cluster_count as u32).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterStatus, Signature, Window, SCHEMA_VERSION};
    use chrono::{TimeZone, Utc};

    fn window() -> Window {
        Window {
            start: Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
        }
    }

    fn incident(host: &str, ordinal: usize, kind: &str, severity: u8) -> Incident {
        Incident {
            schema_version: SCHEMA_VERSION.to_string(),
            incident_id: format!("{host}-incident-{ordinal}"),
            host_id: host.to_string(),
            kind: kind.to_string(),
            window: window(),
            detected_at: window().end,
            severity,
            confidence: 0.7,
            summary: "test".to_string(),
            signature: Signature {
                signature_key: format!("key-{kind}"),
                signature_hash: format!("hash-{kind}"),
            },
            recommended_actions: Vec::new(),
            evidence: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn host(host_id: &str, incidents: Vec<Incident>) -> HostIncidents {
        HostIncidents {
            host_id: host_id.to_string(),
            user_id: None,
            incidents,
        }
    }

    fn active_cluster(kind: &str, severity: u8) -> Cluster {
        Cluster {
            signature_hash: format!("hash-{kind}"),
            signature_key: format!("key-{kind}"),
            kind: kind.to_string(),
            affected_hosts: 1,
            example_hosts: vec!["HOST-001".to_string()],
            severity,
            first_seen: window().start,
            last_seen: window().end,
            status: ClusterStatus::New,
            delta_affected_hosts: None,
        }
    }

    #[test]
    fn test_reference_scenario_scores() {
        let hosts = vec![host(
            "HOST-001",
            vec![
                incident("HOST-001", 1, "disk_full", 70),
                incident("HOST-001", 2, "network_instability", 65),
            ],
        )];
        let clusters = vec![
            active_cluster("disk_full", 70),
            active_cluster("network_instability", 65),
        ];
        let (scores, overall) = score_fleet(&hosts, &clusters, None, &ScoreOptions::default());

        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].score, 72);
        assert_eq!(overall, 74);
        assert_eq!(scores[0].action, HostAction::Contact);
        assert_eq!(scores[0].action_reason, "High severity or cluster spike");
        assert_eq!(
            scores[0].reasons,
            vec!["disk_full (sev 70)", "network_instability (sev 65)"]
        );
        assert_eq!(
            scores[0].incident_refs,
            vec!["HOST-001-incident-1", "HOST-001-incident-2"]
        );
        assert_eq!(scores[0].delta_score, None);
    }

    #[test]
    fn test_score_monotone_in_added_incident() {
        let base = host("HOST-001", vec![incident("HOST-001", 1, "disk_full", 70)]);
        let more = host(
            "HOST-001",
            vec![
                incident("HOST-001", 1, "disk_full", 70),
                incident("HOST-001", 2, "update_failure", 40),
            ],
        );
        let options = ScoreOptions::default();
        let a = score_host(&base, None, false, &options);
        let b = score_host(&more, None, false, &options);
        assert!(b.score >= a.score);
    }

    #[test]
    fn test_overall_monotone_in_host_score() {
        let options = ScoreOptions::default();
        let clusters = vec![active_cluster("disk_full", 70)];
        let low = vec![host("HOST-001", vec![incident("HOST-001", 1, "disk_full", 60)])];
        let high = vec![host("HOST-001", vec![incident("HOST-001", 1, "disk_full", 80)])];
        let (_, overall_low) = score_fleet(&low, &clusters, None, &options);
        let (_, overall_high) = score_fleet(&high, &clusters, None, &options);
        assert!(overall_high >= overall_low);
    }

    #[test]
    fn test_spiking_cluster_forces_contact() {
        let mut spike = active_cluster("disk_full", 55);
        spike.status = ClusterStatus::Ongoing;
        spike.delta_affected_hosts = Some(4);
        let hosts = vec![host("HOST-001", vec![incident("HOST-001", 1, "disk_full", 55)])];
        let (scores, _) = score_fleet(&hosts, &[spike], None, &ScoreOptions::default());
        assert_eq!(scores[0].action, HostAction::Contact);
        assert_eq!(scores[0].action_reason, "High severity or cluster spike");
    }

    #[test]
    fn test_monitor_band_and_none_band() {
        let options = ScoreOptions::default();
        let moderate = score_host(
            &host("HOST-001", vec![incident("HOST-001", 1, "update_failure", 55)]),
            None,
            false,
            &options,
        );
        assert_eq!(moderate.action, HostAction::Monitor);
        assert_eq!(moderate.action_reason, "Moderate severity or trending up");

        let quiet = score_host(
            &host("HOST-002", vec![incident("HOST-002", 1, "update_failure", 20)]),
            None,
            false,
            &options,
        );
        assert_eq!(quiet.action, HostAction::None);
        assert_eq!(quiet.action_reason, "Low severity or stable");
    }

    #[test]
    fn test_trending_up_triggers_monitor() {
        let options = ScoreOptions::default();
        let scored = score_host(
            &host("HOST-001", vec![incident("HOST-001", 1, "update_failure", 30)]),
            Some(15),
            false,
            &options,
        );
        assert_eq!(scored.delta_score, Some(15));
        assert_eq!(scored.action, HostAction::Monitor);
    }

    #[test]
    fn test_delta_score_against_prior_summary() {
        let hosts = vec![host("HOST-001", vec![incident("HOST-001", 1, "disk_full", 70)])];
        let clusters = vec![active_cluster("disk_full", 70)];
        let options = ScoreOptions::default();
        let (first, overall) = score_fleet(&hosts, &clusters, None, &options);
        let prior = FleetSummary {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: "run-1".to_string(),
            generated_at: window().end,
            window: window(),
            host_count: 1,
            incident_count: 1,
            overall_risk_score: overall,
            top_hosts: first,
            clusters: clusters.clone(),
        };
        let (second, _) = score_fleet(&hosts, &clusters, Some(&prior), &options);
        assert_eq!(second[0].delta_score, Some(0));
    }

    #[test]
    fn test_top_hosts_ordering_and_tie_break() {
        let hosts = vec![
            host("HOST-B", vec![incident("HOST-B", 1, "disk_full", 70)]),
            host("HOST-A", vec![incident("HOST-A", 1, "disk_full", 70)]),
            host("HOST-C", vec![incident("HOST-C", 1, "update_failure", 40)]),
        ];
        let (scores, _) = score_fleet(&hosts, &[], None, &ScoreOptions::default());
        let ids: Vec<&str> = scores.iter().map(|s| s.host_id.as_str()).collect();
        assert_eq!(ids, vec!["HOST-A", "HOST-B", "HOST-C"]);
    }

    #[test]
    fn test_empty_fleet_scores_zero() {
        let (scores, overall) = score_fleet(&[], &[], None, &ScoreOptions::default());
        assert!(scores.is_empty());
        assert_eq!(overall, 0);
    }
}
