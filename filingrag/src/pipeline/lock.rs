//! Per-conversation single-instance lock for the persist stage.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::PipelineError;

/// Registry of per-conversation locks. Stage 4 acquires one before touching
/// the vector store so two workers never upsert the same conversation
/// concurrently.
#[derive(Debug, Default)]
pub struct StageLocks {
    entries: Mutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the conversation's lock, waiting at most `timeout`.
    pub async fn acquire(
        &self,
        conversation_id: &str,
        timeout: Duration,
    ) -> Result<StageLockGuard, PipelineError> {
        let entry = {
            let mut entries = self.entries.lock();
            entries
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        match tokio::time::timeout(timeout, entry.lock_owned()).await {
            Ok(guard) => Ok(StageLockGuard { _guard: guard }),
            Err(_) => Err(PipelineError::LockTimeout {
                conversation_id: conversation_id.to_string(),
            }),
        }
    }
}

/// Held for the duration of one persist-stage execution.
#[derive(Debug)]
pub struct StageLockGuard {
    _guard: OwnedMutexGuard<()>,
}
