//! Merging adaptive KNN results with explicitly referenced chunks.

use std::collections::BTreeMap;

use crate::store::ScoredChunk;

/// A chunk that survived the merge, tagged with whether it came from an
/// explicit document reference.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub document_id: String,
    pub document_title: String,
    pub similarity: f32,
    pub referenced: bool,
}

/// Merge adaptive and referenced chunks keyed by `(document_id, text)`.
///
/// Adaptive collisions keep the maximum similarity; referenced entries always
/// win over adaptive ones, whatever their similarity. The result is sorted by
/// similarity descending with the lexicographically smaller
/// `(document_id, text)` first among ties.
pub fn merge_chunks(
    adaptive: Vec<ScoredChunk>,
    referenced: Vec<ScoredChunk>,
) -> Vec<RetrievedChunk> {
    let mut merged: BTreeMap<(String, String), RetrievedChunk> = BTreeMap::new();

    for chunk in adaptive {
        let key = (chunk.document_id.clone(), chunk.text.clone());
        match merged.get_mut(&key) {
            Some(existing) => {
                if chunk.similarity > existing.similarity {
                    existing.similarity = chunk.similarity;
                }
            }
            None => {
                merged.insert(
                    key,
                    RetrievedChunk {
                        text: chunk.text,
                        document_id: chunk.document_id,
                        document_title: chunk.document_title,
                        similarity: chunk.similarity,
                        referenced: false,
                    },
                );
            }
        }
    }

    for chunk in referenced {
        let key = (chunk.document_id.clone(), chunk.text.clone());
        merged.insert(
            key,
            RetrievedChunk {
                text: chunk.text,
                document_id: chunk.document_id,
                document_title: chunk.document_title,
                similarity: chunk.similarity,
                referenced: true,
            },
        );
    }

    let mut chunks: Vec<RetrievedChunk> = merged.into_values().collect();
    chunks.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.text.cmp(&b.text))
    });
    chunks
}
