//! TOML configuration for the fleetmedic engine.
//!
//! A layered model with compiled-in defaults, environment variable override
//! for the config file path, and a standard filesystem location.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::ClusterOptions;
use crate::ingest::{IngestOptions, SelectMode};
use crate::sanitize::RedactionMode;
use crate::score::ScoreOptions;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a fleetmedic process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetmedicConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub score: ScoreConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FleetmedicConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded fleetmedic configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `FLEETMEDIC_CONFIG` environment variable.
    /// 2. `/etc/fleetmedic/fleetmedic.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("FLEETMEDIC_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "FLEETMEDIC_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/fleetmedic/fleetmedic.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Artifact store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the artifact store.
    pub artifacts_root: PathBuf,
    /// Separate root for snapshot intake. Defaults to the artifact root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_root: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            artifacts_root: PathBuf::from("/var/lib/fleetmedic/artifacts"),
            snapshot_root: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// How long finished runs are kept before purging.
    pub retention_hours: i64,
    /// Age at which an abandoned run lock may be reclaimed.
    pub lock_ttl_minutes: i64,
    /// Concurrent per-host detection tasks.
    pub concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            retention_hours: 48,
            lock_ttl_minutes: 30,
            concurrency: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub snapshot_prefix: String,
    pub window_hours: i64,
    pub select_mode: SelectMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hosts: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let defaults = IngestOptions::default();
        Self {
            snapshot_prefix: defaults.snapshot_prefix,
            window_hours: defaults.window_hours,
            select_mode: defaults.select_mode,
            max_hosts: defaults.max_hosts,
        }
    }
}

impl IngestConfig {
    pub fn options(&self) -> IngestOptions {
        IngestOptions {
            snapshot_prefix: self.snapshot_prefix.clone(),
            window_hours: self.window_hours,
            select_mode: self.select_mode,
            max_hosts: self.max_hosts,
        }
    }
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub example_hosts_cap: usize,
    pub include_resolved: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let defaults = ClusterOptions::default();
        Self {
            example_hosts_cap: defaults.example_hosts_cap,
            include_resolved: defaults.include_resolved,
        }
    }
}

impl ClusterConfig {
    pub fn options(&self) -> ClusterOptions {
        ClusterOptions {
            example_hosts_cap: self.example_hosts_cap,
            include_resolved: self.include_resolved,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub contact_threshold: u8,
    pub monitor_threshold: u8,
    pub monitor_delta: i32,
    pub co_occurrence_bump: u8,
    pub spike_delta: i64,
    pub top_hosts_limit: usize,
    pub overall_top_hosts: usize,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        let defaults = ScoreOptions::default();
        Self {
            contact_threshold: defaults.contact_threshold,
            monitor_threshold: defaults.monitor_threshold,
            monitor_delta: defaults.monitor_delta,
            co_occurrence_bump: defaults.co_occurrence_bump,
            spike_delta: defaults.spike_delta,
            top_hosts_limit: defaults.top_hosts_limit,
            overall_top_hosts: defaults.overall_top_hosts,
        }
    }
}

impl ScoreConfig {
    pub fn options(&self) -> ScoreOptions {
        ScoreOptions {
            contact_threshold: self.contact_threshold,
            monitor_threshold: self.monitor_threshold,
            monitor_delta: self.monitor_delta,
            co_occurrence_bump: self.co_occurrence_bump,
            spike_delta: self.spike_delta,
            top_hosts_limit: self.top_hosts_limit,
            overall_top_hosts: self.overall_top_hosts,
        }
    }
}

// ---------------------------------------------------------------------------
// Redaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    pub mode: RedactionMode,
    /// Salt for strict-mode user-id hashing.
    pub salt: String,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Operator rule file. Absent means the compiled-in catalog.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter directive, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
