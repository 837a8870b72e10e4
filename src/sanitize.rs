//! Message redaction applied once at the ingestion boundary.
//!
//! Collectors are expected to sanitize upstream; this transform makes the
//! engine safe to run self-contained. It is a pure text projection with no
//! state, so it never needs to be re-applied downstream.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Hard cap on a sanitized message, applied after masking.
pub const MAX_MESSAGE_LEN: usize = 2048;

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)password=\S+").unwrap(),
        Regex::new(r"(?i)secret\s*[:=]\s*\S+").unwrap(),
        Regex::new(r"(?i)token=\S+").unwrap(),
    ]
});
static BASE64_BLOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/=]{24,}").unwrap());
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
});
static DRIVE_PATH_BACKSLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]:\\\S+").unwrap());
static DRIVE_PATH_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]:/\S+").unwrap());
static UNC_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\\\[A-Za-z0-9_.-]+\\\S+").unwrap());
static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3})\.\d{1,3}\b").unwrap());
static CLOCK_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2}:\d{2}:\d{2}").unwrap());

/// How aggressively messages are masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMode {
    /// Pass messages through untouched.
    Off,
    /// Mask secrets, credentials, emails, paths, and IPs. Default.
    Balanced,
    /// Balanced plus clock-time masking and salted user-id hashing.
    Strict,
}

impl Default for RedactionMode {
    fn default() -> Self {
        RedactionMode::Balanced
    }
}

/// Stateless sanitizer configured with a mode and a user-hash salt.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    mode: RedactionMode,
    salt: String,
}

impl Sanitizer {
    pub fn new(mode: RedactionMode, salt: impl Into<String>) -> Self {
        Self {
            mode,
            salt: salt.into(),
        }
    }

    /// Mask sensitive substrings and bound the message length.
    pub fn sanitize(&self, message: &str) -> String {
        if message.is_empty() || self.mode == RedactionMode::Off {
            return truncate(message, MAX_MESSAGE_LEN);
        }
        let mut out = message.to_string();
        for pattern in SECRET_PATTERNS.iter() {
            out = pattern.replace_all(&out, "[REDACTED]").into_owned();
        }
        out = BASE64_BLOB.replace_all(&out, "[REDACTED]").into_owned();
        out = EMAIL.replace_all(&out, "[REDACTED_EMAIL]").into_owned();
        out = DRIVE_PATH_BACKSLASH
            .replace_all(&out, "[REDACTED_PATH]")
            .into_owned();
        out = DRIVE_PATH_SLASH
            .replace_all(&out, "[REDACTED_PATH]")
            .into_owned();
        out = UNC_PATH.replace_all(&out, "[REDACTED_PATH]").into_owned();
        // Keep the /24 so cross-host clustering on subnets still works.
        out = IPV4.replace_all(&out, "$1.0/24").into_owned();
        if self.mode == RedactionMode::Strict {
            out = CLOCK_TIME.replace_all(&out, "HH:MM:SS").into_owned();
        }
        truncate(&out, MAX_MESSAGE_LEN)
    }

    /// In strict mode, replace a user id with a salted hash; otherwise pass
    /// it through.
    pub fn user_id(&self, user: Option<String>) -> Option<String> {
        let user = user?;
        if user.is_empty() || self.mode != RedactionMode::Strict {
            return Some(user);
        }
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(user.as_bytes());
        let digest = hex_prefix(&hasher.finalize(), 12);
        Some(format!("user-{digest}"))
    }
}

/// Truncate to `max` characters, marking the cut with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

/// First `n` hex characters of a digest.
pub fn hex_prefix(digest: &[u8], n: usize) -> String {
    let mut out = String::with_capacity(n);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= n {
            break;
        }
    }
    out.truncate(n);
    out
}
