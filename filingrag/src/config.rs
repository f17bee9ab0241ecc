//! Settings for the staging area, chunker, pipeline, and retrieval strategy.
//!
//! Defaults mirror production: retrieval parameters come from deployment
//! configuration, and the per-stage retry schedules are injectable so tests
//! can run them without wall-clock backoff.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::QueryIntent;

/// Where the per-conversation staging directories live.
#[derive(Clone, Debug)]
pub struct StagingSettings {
    pub base_dir: PathBuf,
}

impl StagingSettings {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

/// Chunker sizing. Chunks are overlapping character windows snapped to word
/// boundaries.
#[derive(Clone, Copy, Debug)]
pub struct ChunkerSettings {
    /// Upper bound on chunk length in bytes of UTF-8 text.
    pub max_chars: usize,
    /// How much of the previous chunk's tail is repeated at the start of the
    /// next one.
    pub overlap_chars: usize,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 200,
        }
    }
}

/// Retry schedule for one pipeline stage.
///
/// `delays[n]` is slept before attempt `n + 2`; schedules shorter than the
/// attempt count repeat their last entry.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: impl Into<Vec<Duration>>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays: delays.into(),
        }
    }

    /// A schedule with no sleeps, for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Vec::new())
    }

    /// Delay to apply before the given 1-based attempt number.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.delays.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt as usize - 2).min(self.delays.len() - 1);
        self.delays[idx]
    }
}

/// Per-stage retry schedules plus the persist-stage lock timeout.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub download: RetryPolicy,
    pub extract: RetryPolicy,
    pub chunk: RetryPolicy,
    pub embed: RetryPolicy,
    pub persist: RetryPolicy,
    /// Single-instance lock timeout for the persist stage, keyed by
    /// conversation.
    pub persist_lock_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let standard = vec![
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(120),
        ];
        Self {
            download: RetryPolicy::new(3, standard.clone()),
            extract: RetryPolicy::new(3, standard.clone()),
            chunk: RetryPolicy::new(3, standard.clone()),
            embed: RetryPolicy::new(
                5,
                vec![
                    Duration::from_secs(10),
                    Duration::from_secs(30),
                    Duration::from_secs(60),
                    Duration::from_secs(120),
                ],
            ),
            persist: RetryPolicy::new(3, standard),
            persist_lock_timeout: Duration::from_secs(300),
        }
    }
}

impl PipelineSettings {
    /// All stages retry without sleeping — test configuration.
    #[must_use]
    pub fn without_backoff() -> Self {
        Self {
            download: RetryPolicy::immediate(3),
            extract: RetryPolicy::immediate(3),
            chunk: RetryPolicy::immediate(3),
            embed: RetryPolicy::immediate(5),
            persist: RetryPolicy::immediate(3),
            persist_lock_timeout: Duration::from_secs(300),
        }
    }
}

/// Parameters selected for one retrieval pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetrievalParams {
    /// Result cap; `None` means unlimited.
    pub max_k: Option<usize>,
    /// Minimum cosine similarity for a chunk to qualify.
    pub min_similarity: f32,
}

/// Per-intent retrieval parameters, overridable per deployment.
#[derive(Clone, Copy, Debug)]
pub struct RetrievalSettings {
    pub regular: RetrievalParams,
    pub exhaustive: RetrievalParams,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            regular: RetrievalParams {
                max_k: Some(15),
                min_similarity: 0.70,
            },
            exhaustive: RetrievalParams {
                max_k: None,
                min_similarity: 0.0,
            },
        }
    }
}

impl RetrievalSettings {
    #[must_use]
    pub fn params_for(&self, intent: QueryIntent) -> RetrievalParams {
        match intent {
            QueryIntent::Regular => self.regular,
            QueryIntent::Exhaustive => self.exhaustive,
        }
    }
}
