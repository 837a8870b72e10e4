//! Markdown projections of run artifacts, for humans.

use crate::model::{FleetSummary, HostTimeline};
use std::fmt::Write;

/// Render a host timeline as a short Markdown report. Incidents are listed
/// most severe first.
pub fn render_host_report(timeline: &HostTimeline) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Host report: {}", timeline.host_id);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Window: {} -> {}",
        timeline.window.start.format("%Y-%m-%dT%H:%M:%SZ"),
        timeline.window.end.format("%Y-%m-%dT%H:%M:%SZ"),
    );
    let _ = writeln!(out);
    if timeline.incidents.is_empty() {
        out.push_str("No incidents detected.\n");
        return out;
    }
    let mut by_severity: Vec<_> = timeline.incidents.iter().collect();
    by_severity.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.kind.cmp(&b.kind)));

    out.push_str("Incidents:\n");
    for incident in by_severity {
        let _ = writeln!(
            out,
            "- [{}] {} (type={}, confidence={:.2})",
            incident.severity, incident.summary, incident.kind, incident.confidence,
        );
        for action in &incident.recommended_actions {
            let _ = writeln!(out, "  - Action: {action}");
        }
        if let Some(sample) = incident.evidence.first() {
            let _ = writeln!(
                out,
                "  - Evidence: {} {} {} {}",
                sample.ts.format("%Y-%m-%dT%H:%M:%SZ"),
                sample.provider,
                sample
                    .event_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                sample.message,
            );
        }
    }
    out
}

/// Render the fleet summary as Markdown, used by the `report` subcommand.
pub fn render_fleet_report(summary: &FleetSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Fleet report: {}", summary.run_id);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Generated: {}",
        summary.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
    );
    let _ = writeln!(
        out,
        "Hosts: {}  Incidents: {}  Overall risk: {}",
        summary.host_count, summary.incident_count, summary.overall_risk_score,
    );
    let _ = writeln!(out);
    out.push_str("Top hosts:\n");
    if summary.top_hosts.is_empty() {
        out.push_str("- none\n");
    }
    for host in &summary.top_hosts {
        let _ = writeln!(
            out,
            "- {} score={} action={} ({})",
            host.host_id,
            host.score,
            serde_json::to_value(host.action)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            host.action_reason,
        );
    }
    let _ = writeln!(out);
    out.push_str("Clusters:\n");
    if summary.clusters.is_empty() {
        out.push_str("- none\n");
    }
    for cluster in &summary.clusters {
        let _ = writeln!(
            out,
            "- {} type={} hosts={} severity={} status={}{}",
            cluster.signature_hash,
            cluster.kind,
            cluster.affected_hosts,
            cluster.severity,
            serde_json::to_value(cluster.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            cluster
                .delta_affected_hosts
                .map(|d| format!(" delta={d:+}"))
                .unwrap_or_default(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        EvidenceRecord, Incident, Level, Signature, Window, SCHEMA_VERSION,
    };
    use chrono::{TimeZone, Utc};

    fn window() -> Window {
        Window {
            start: Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
        }
    }

    fn incident(kind: &str, severity: u8) -> Incident {
        Incident {
            schema_version: SCHEMA_VERSION.to_string(),
            incident_id: "HOST-A-incident-1".to_string(),
            host_id: "HOST-A".to_string(),
            kind: kind.to_string(),
            window: window(),
            detected_at: Utc.with_ymd_and_hms(2026, 3, 10, 9, 5, 0).unwrap(),
            severity,
            confidence: 0.75,
            summary: "Disk usage approaching capacity".to_string(),
            signature: Signature {
                signature_key: "disk:2019|disk full".to_string(),
                signature_hash: "abc123def456".to_string(),
            },
            recommended_actions: vec!["Free disk space".to_string()],
            evidence: vec![EvidenceRecord {
                ts: Utc.with_ymd_and_hms(2026, 3, 10, 8, 5, 0).unwrap(),
                provider: "Disk".to_string(),
                level: Level::Error,
                message: "disk full: volume at <n>%".to_string(),
                event_id: Some(2019),
                record_id: None,
            }],
            tags: Vec::new(),
        }
    }

    fn timeline(incidents: Vec<Incident>) -> HostTimeline {
        HostTimeline {
            schema_version: SCHEMA_VERSION.to_string(),
            host_id: "HOST-A".to_string(),
            user_id: None,
            window: window(),
            incidents,
            severity: 70,
            last_event_ts: None,
        }
    }

    #[test]
    fn test_report_lists_incidents_most_severe_first() {
        let mut low = incident("network_instability", 60);
        low.summary = "Intermittent network connectivity".to_string();
        let report = render_host_report(&timeline(vec![low, incident("disk_full", 70)]));
        let disk = report.find("disk_full").unwrap();
        let net = report.find("network_instability").unwrap();
        assert!(disk < net);
        assert!(report.contains("# Host report: HOST-A"));
        assert!(report.contains("2026-03-10T08:00:00Z -> 2026-03-10T09:00:00Z"));
        assert!(report.contains("  - Action: Free disk space"));
        assert!(report.contains("  - Evidence: 2026-03-10T08:05:00Z Disk 2019"));
    }

    #[test]
    fn test_report_without_incidents() {
        let report = render_host_report(&timeline(Vec::new()));
        assert!(report.contains("No incidents detected."));
        assert!(!report.contains("Incidents:"));
    }
}
