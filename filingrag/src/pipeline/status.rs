//! Pipeline state machine.
//!
//! States advance monotonically within one pipeline instance:
//! `Pending → Downloading → Extracting → Chunking → GeneratingEmbeddings →
//! PersistingEmbeddings → Completed`, with `Failed` reachable from any
//! non-terminal state. Terminal states are frozen; a fresh enqueue resets the
//! durable record to `Pending` before running again.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Durable status of one ingestion batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Downloading,
    Extracting,
    Chunking,
    GeneratingEmbeddings,
    PersistingEmbeddings,
    Completed,
    Failed,
}

impl IngestionStatus {
    /// Position in the forward chain; `Failed` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            IngestionStatus::Pending => Some(0),
            IngestionStatus::Downloading => Some(1),
            IngestionStatus::Extracting => Some(2),
            IngestionStatus::Chunking => Some(3),
            IngestionStatus::GeneratingEmbeddings => Some(4),
            IngestionStatus::PersistingEmbeddings => Some(5),
            IngestionStatus::Completed => Some(6),
            IngestionStatus::Failed => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestionStatus::Completed | IngestionStatus::Failed)
    }

    /// Persisted string form, identical to the serde representation.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::Downloading => "downloading",
            IngestionStatus::Extracting => "extracting",
            IngestionStatus::Chunking => "chunking",
            IngestionStatus::GeneratingEmbeddings => "generating_embeddings",
            IngestionStatus::PersistingEmbeddings => "persisting_embeddings",
            IngestionStatus::Completed => "completed",
            IngestionStatus::Failed => "failed",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IngestionStatus::Pending),
            "downloading" => Some(IngestionStatus::Downloading),
            "extracting" => Some(IngestionStatus::Extracting),
            "chunking" => Some(IngestionStatus::Chunking),
            "generating_embeddings" => Some(IngestionStatus::GeneratingEmbeddings),
            "persisting_embeddings" => Some(IngestionStatus::PersistingEmbeddings),
            "completed" => Some(IngestionStatus::Completed),
            "failed" => Some(IngestionStatus::Failed),
            _ => None,
        }
    }

    /// Whether a transition to `next` is legal within one pipeline instance.
    ///
    /// Re-entering the current in-progress state is allowed — that is what a
    /// stage retry does.
    #[must_use]
    pub fn can_advance_to(&self, next: IngestionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == IngestionStatus::Failed {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to >= from,
            _ => false,
        }
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: [IngestionStatus; 7] = [
        IngestionStatus::Pending,
        IngestionStatus::Downloading,
        IngestionStatus::Extracting,
        IngestionStatus::Chunking,
        IngestionStatus::GeneratingEmbeddings,
        IngestionStatus::PersistingEmbeddings,
        IngestionStatus::Completed,
    ];

    #[test]
    fn forward_chain_is_legal() {
        for pair in CHAIN.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn backwards_transitions_are_rejected() {
        assert!(!IngestionStatus::Chunking.can_advance_to(IngestionStatus::Downloading));
        assert!(!IngestionStatus::PersistingEmbeddings.can_advance_to(IngestionStatus::Pending));
    }

    #[test]
    fn retry_reenters_current_state() {
        assert!(IngestionStatus::Extracting.can_advance_to(IngestionStatus::Extracting));
    }

    #[test]
    fn any_live_state_may_fail() {
        for state in CHAIN.iter().take(6) {
            assert!(state.can_advance_to(IngestionStatus::Failed), "{state}");
        }
    }

    #[test]
    fn terminal_states_are_frozen() {
        for terminal in [IngestionStatus::Completed, IngestionStatus::Failed] {
            for next in CHAIN {
                assert!(!terminal.can_advance_to(next));
            }
            assert!(!terminal.can_advance_to(IngestionStatus::Failed));
        }
    }

    #[test]
    fn serde_form_is_snake_case() {
        let json = serde_json::to_string(&IngestionStatus::GeneratingEmbeddings).unwrap();
        assert_eq!(json, "\"generating_embeddings\"");
    }
}
