//! The latest-run pointer.
//!
//! A single key holding the id of the most recent successful run. It is
//! written last, after every artifact of a run has landed, so readers that
//! follow the pointer always see a complete run. A failed run never moves
//! it.

use crate::store::{ArtifactStore, StoreError};
use tracing::debug;

pub const LATEST_KEY: &str = "latest_run.txt";

/// Run id of the most recent successful run, or `None` before the first
/// success.
pub async fn read_latest(store: &dyn ArtifactStore) -> Result<Option<String>, StoreError> {
    match store.get(LATEST_KEY).await {
        Ok(bytes) => {
            let run_id = String::from_utf8_lossy(&bytes).trim().to_string();
            Ok((!run_id.is_empty()).then_some(run_id))
        }
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Advance the pointer. Only call once the run's artifacts are durable.
pub async fn write_latest(store: &dyn ArtifactStore, run_id: &str) -> Result<(), StoreError> {
    debug!(run_id, "advancing latest-run pointer");
    store.put(LATEST_KEY, run_id.as_bytes()).await
}
