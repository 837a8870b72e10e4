//! Static catalog of detection rules.
//!
//! Rules are pure data: a match predicate over (provider, event_id, message,
//! tags, level), the incident type the match maps to, baseline severity and
//! confidence, and recommended actions. The catalog is ordered and evaluated
//! first-match-wins, so new condition families ship as catalog entries, not
//! code changes.

use crate::model::{Event, Level};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

// Compiled-in default rule set, used when no catalog file is configured.
const DEFAULT_CATALOG_TOML: &str = include_str!("catalog.toml");

/// One detection rule. Every present condition must hold for a match;
/// list-valued conditions match any element.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    /// Incident type this rule maps to (open string enum, e.g. "disk_full").
    #[serde(rename = "type")]
    pub kind: String,
    /// Human summary carried onto incidents of this type.
    pub summary: String,
    /// Baseline severity (0-100) for a single matching event.
    pub severity: u8,
    /// Baseline confidence (0-1) for a single matching event.
    pub confidence: f64,
    /// Case-insensitive substring of the provider name.
    #[serde(default)]
    pub provider_contains: Option<String>,
    /// Acceptable event ids; empty means unconstrained.
    #[serde(default)]
    pub event_ids: Vec<i64>,
    /// Lowercase substrings; at least one must appear in the message.
    #[serde(default)]
    pub message_contains: Vec<String>,
    /// Collector tags; at least one must be present on the event.
    #[serde(default)]
    pub tags_any: Vec<String>,
    /// Minimum source level.
    #[serde(default)]
    pub min_level: Option<Level>,
    pub recommended_actions: Vec<String>,
}

impl Rule {
    /// Predicate over a single event. Provider and message comparisons are
    /// case-normalized.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(min) = self.min_level {
            if event.level < min {
                return false;
            }
        }
        if let Some(fragment) = &self.provider_contains {
            if !event
                .provider
                .to_lowercase()
                .contains(&fragment.to_lowercase())
            {
                return false;
            }
        }
        if !self.event_ids.is_empty() {
            match event.event_id {
                Some(id) if self.event_ids.contains(&id) => {}
                _ => return false,
            }
        }
        if !self.message_contains.is_empty() {
            let message = event.message.to_lowercase();
            if !self
                .message_contains
                .iter()
                .any(|needle| message.contains(needle))
            {
                return false;
            }
        }
        if !self.tags_any.is_empty()
            && !self.tags_any.iter().any(|tag| event.tags.contains(tag))
        {
            return false;
        }
        true
    }
}

/// Ordered rule table loaded at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    pub rules: Vec<Rule>,
}

impl Catalog {
    /// The compiled-in default rule set.
    pub fn builtin() -> Self {
        toml::from_str(DEFAULT_CATALOG_TOML).expect("embedded default catalog is invalid TOML")
    }

    /// Load a catalog from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog file: {}", path.display()))?;
        let catalog: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse catalog file: {}", path.display()))?;
        info!(path = %path.display(), rules = catalog.rules.len(), "loaded detection catalog");
        Ok(catalog)
    }

    /// Load from an operator-supplied file, falling back to the builtin
    /// catalog on absence or parse failure.
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        if let Some(path) = path {
            match Self::load(path) {
                Ok(catalog) => return catalog,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "catalog file unusable, using builtin rules");
                }
            }
        }
        Self::builtin()
    }
}
