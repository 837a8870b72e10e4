//! Per-host incident detection.
//!
//! Walks a snapshot's events in window order, classifies each against the
//! catalog, and folds findings of the same type into a single incident per
//! (host, type) for the run. Severity and confidence are the maxima observed;
//! evidence is the union capped at [`EVIDENCE_CAP`], most severe first.

use crate::catalog::Catalog;
use crate::classify::{classify, Finding};
use crate::model::{Event, EvidenceRecord, Incident, Snapshot, Window, SCHEMA_VERSION};
use crate::sanitize::truncate;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Maximum evidence events attached to one incident.
pub const EVIDENCE_CAP: usize = 5;

/// Maximum evidence message length.
pub const EVIDENCE_MESSAGE_LEN: usize = 512;

/// Detect incidents for one host's snapshot. Returns an empty list when no
/// event matches; a malformed event never reaches this function (ingest
/// drops it), so detection itself is total.
pub fn detect(catalog: &Catalog, snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<Incident> {
    // Findings grouped by incident type, preserving first-seen type order so
    // incident ordinals are deterministic.
    let mut order: Vec<String> = Vec::new();
    let mut by_kind: HashMap<String, Vec<Finding<'_>>> = HashMap::new();

    for event in &snapshot.events {
        if let Some(finding) = classify(catalog, event) {
            let kind = finding.rule.kind.clone();
            if !by_kind.contains_key(&kind) {
                order.push(kind.clone());
            }
            by_kind.entry(kind).or_default().push(finding);
        }
    }

    let mut incidents = Vec::with_capacity(order.len());
    for kind in order {
        let findings = &by_kind[&kind];
        let incident = build_incident(
            &snapshot.host_id,
            incidents.len() + 1,
            &kind,
            findings,
            snapshot.window,
            now,
        );
        debug!(
            host_id = %snapshot.host_id,
            kind = %incident.kind,
            severity = incident.severity,
            events = findings.len(),
            "incident detected"
        );
        incidents.push(incident);
    }
    incidents
}

fn build_incident(
    host_id: &str,
    ordinal: usize,
    kind: &str,
    findings: &[Finding<'_>],
    snapshot_window: Window,
    now: DateTime<Utc>,
) -> Incident {
    // Representative finding: highest baseline severity, earliest on ties.
    // Its rule supplies the summary, actions, and signature for the incident.
    let lead = findings
        .iter()
        .max_by(|a, b| {
            a.rule
                .severity
                .cmp(&b.rule.severity)
                .then_with(|| b.event.ts.cmp(&a.event.ts))
        })
        .expect("incident built from at least one finding");

    let severity = findings.iter().map(|f| f.rule.severity).max().unwrap_or(0);
    let confidence = findings
        .iter()
        .map(|f| f.rule.confidence)
        .fold(0.0_f64, f64::max);

    let window = findings
        .iter()
        .map(|f| f.event.ts)
        .fold(None::<Window>, |acc, ts| {
            Some(match acc {
                None => Window { start: ts, end: ts },
                Some(w) => Window {
                    start: w.start.min(ts),
                    end: w.end.max(ts),
                },
            })
        })
        .unwrap_or(snapshot_window);

    // Evidence: most severe level first, then most recent, capped.
    let mut evidence_events: Vec<&Event> = findings.iter().map(|f| f.event).collect();
    evidence_events.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| b.ts.cmp(&a.ts)));
    evidence_events.truncate(EVIDENCE_CAP);
    let evidence = evidence_events
        .into_iter()
        .map(|e| EvidenceRecord {
            ts: e.ts,
            provider: e.provider.clone(),
            level: e.level,
            message: truncate(&e.message, EVIDENCE_MESSAGE_LEN),
            event_id: e.event_id,
            record_id: e.record_id,
        })
        .collect();

    Incident {
        schema_version: SCHEMA_VERSION.to_string(),
        incident_id: format!("{host_id}-incident-{ordinal}"),
        host_id: host_id.to_string(),
        kind: kind.to_string(),
        window,
        detected_at: now,
        severity,
        confidence,
        summary: lead.rule.summary.clone(),
        signature: lead.signature.clone(),
        recommended_actions: lead.rule.recommended_actions.clone(),
        evidence,
        tags: Vec::new(),
    }
}
