//! Event classification and signature derivation.
//!
//! A signature identifies "the same underlying condition" across hosts and
//! runs. Messages are normalized to templates before hashing so that events
//! differing only in numbers or volume letters ("C: volume at 97%" vs.
//! "D: volume at 99%") collapse to one signature. That collapse is the
//! correctness property clustering depends on.

use crate::catalog::{Catalog, Rule};
use crate::model::{Event, Signature};
use crate::sanitize::hex_prefix;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Maximum template length kept inside a signature key.
const TEMPLATE_KEY_LEN: usize = 200;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static VOLUME_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[a-z]:").unwrap());
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// One classified event: the first catalog rule it matched plus its derived
/// signature.
#[derive(Debug, Clone)]
pub struct Finding<'a> {
    pub rule: &'a Rule,
    pub event: &'a Event,
    pub signature: Signature,
}

/// Match an event against the catalog. Rules are tried in declaration order
/// and the first match wins, so an event maps to at most one candidate type.
pub fn classify<'a>(catalog: &'a Catalog, event: &'a Event) -> Option<Finding<'a>> {
    let rule = catalog.rules.iter().find(|rule| rule.matches(event))?;
    Some(Finding {
        rule,
        event,
        signature: signature_for(&event.provider, event.event_id, &event.message),
    })
}

/// Normalize a message to its template: lowercase, collapsed whitespace,
/// volume letters mapped to `<vol>:`, digit runs mapped to `<n>`.
pub fn normalize_template(message: &str) -> String {
    let lowered = message.to_lowercase();
    let collapsed = WHITESPACE.replace_all(lowered.trim(), " ");
    let devolumed = VOLUME_LETTER.replace_all(&collapsed, "<vol>:");
    DIGITS.replace_all(&devolumed, "<n>").into_owned()
}

/// Derive the signature key and stable hash for an event.
pub fn signature_for(provider: &str, event_id: Option<i64>, message: &str) -> Signature {
    let provider = provider.to_lowercase();
    let event_id = event_id.map(|id| id.to_string()).unwrap_or_default();
    let template = normalize_template(message);

    let mut hasher = Sha256::new();
    hasher.update(format!("{provider}|{event_id}|{template}").as_bytes());
    let signature_hash = hex_prefix(&hasher.finalize(), 12);

    let key_template: String = template.chars().take(TEMPLATE_KEY_LEN).collect();
    Signature {
        signature_key: format!("{provider}:{event_id}|{key_template}"),
        signature_hash,
    }
}
