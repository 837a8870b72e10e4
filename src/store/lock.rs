//! Exclusive run lock over the artifact store.
//!
//! The lock is a marker object written with the store's conditional-create
//! primitive. Acquisition fails fast on live contention (the scheduler
//! retries later; the engine never queues). A crashed holder is reclaimed by
//! TTL expiry only, never by inspecting the dead process.

use crate::store::{ArtifactStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Store key of the lock marker.
pub const LOCK_KEY: &str = "locks/run.lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("run lock held by run {holder}; try again later")]
    Held { holder: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode lock payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persisted lock contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockPayload {
    /// Random token distinguishing this holder.
    pub owner: Uuid,
    /// Run that acquired the lock, for operator diagnostics.
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub ttl_minutes: i64,
}

impl LockPayload {
    /// A lock is stale once its TTL has elapsed.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.created_at < now - Duration::minutes(self.ttl_minutes)
    }
}

/// Guard for a held lock. Carries whether a stale marker was reclaimed.
#[derive(Debug)]
pub struct RunLock {
    pub payload: LockPayload,
    pub reclaimed_stale: bool,
}

impl RunLock {
    /// Try to take the lock. Returns immediately with [`LockError::Held`]
    /// when a live lock from another owner exists.
    pub async fn acquire(
        store: &dyn ArtifactStore,
        run_id: &str,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, LockError> {
        let payload = LockPayload {
            owner: Uuid::new_v4(),
            run_id: run_id.to_string(),
            created_at: now,
            ttl_minutes,
        };
        let encoded = serde_json::to_vec_pretty(&payload)?;

        if store.create_if_absent(LOCK_KEY, &encoded).await? {
            info!(run_id, "acquired run lock");
            return Ok(Self {
                payload,
                reclaimed_stale: false,
            });
        }

        let existing = read_existing(store).await;
        // An unreadable payload still counts as held; the marker's file
        // mtime serves as its creation time, so a corrupt marker ages out
        // on the same TTL instead of being reclaimed on sight.
        let stale = match &existing {
            Some(lock) => lock.is_stale(now),
            None => match store.modified(LOCK_KEY).await {
                Ok(mtime) => mtime <= now - Duration::minutes(ttl_minutes),
                Err(StoreError::NotFound(_)) => true,
                Err(e) => return Err(e.into()),
            },
        };
        if !stale {
            let holder = existing
                .map(|l| l.run_id)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(LockError::Held { holder });
        }

        warn!(run_id, "reclaiming stale run lock");
        store.delete_prefix(LOCK_KEY).await?;
        if store.create_if_absent(LOCK_KEY, &encoded).await? {
            Ok(Self {
                payload,
                reclaimed_stale: true,
            })
        } else {
            // Another process won the re-create race.
            let holder = read_existing(store)
                .await
                .map(|l| l.run_id)
                .unwrap_or_else(|| "unknown".to_string());
            Err(LockError::Held { holder })
        }
    }

    /// Release by deleting the marker.
    pub async fn release(self, store: &dyn ArtifactStore) -> Result<(), LockError> {
        store.delete_prefix(LOCK_KEY).await?;
        info!(run_id = %self.payload.run_id, "released run lock");
        Ok(())
    }
}

async fn read_existing(store: &dyn ArtifactStore) -> Option<LockPayload> {
    let bytes = store.get(LOCK_KEY).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}
