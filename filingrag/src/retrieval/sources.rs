//! Per-document source aggregation for assistant-message citations.

use rustc_hash::FxHashMap;

use super::merge::RetrievedChunk;
use crate::domain::Source;

/// Aggregate of all merged chunks contributed by one document.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceAggregate {
    pub document_id: String,
    pub document_title: String,
    pub chunks_used: usize,
    pub max_similarity: f32,
    pub avg_similarity: f32,
    pub order: usize,
}

impl From<&SourceAggregate> for Source {
    fn from(aggregate: &SourceAggregate) -> Self {
        Source {
            document_id: aggregate.document_id.clone(),
            document_title: aggregate.document_title.clone(),
            relevance_score: aggregate.max_similarity,
            chunks_used: aggregate.chunks_used,
            order: aggregate.order,
        }
    }
}

/// Group merged chunks by document and rank the groups.
///
/// Every explicitly referenced document that contributed no chunk still
/// appears, with `chunks_used = 0` and zero similarity. Groups are ordered by
/// `max_similarity` descending, document id ascending among ties, and `order`
/// is assigned `0..n`.
pub fn aggregate_sources(
    merged: &[RetrievedChunk],
    referenced_ids: &[String],
    title_for_missing: impl Fn(&str) -> String,
) -> Vec<SourceAggregate> {
    let mut by_document: FxHashMap<&str, (String, usize, f32, f32)> = FxHashMap::default();
    let mut first_seen: Vec<&str> = Vec::new();

    for chunk in merged {
        let entry = by_document
            .entry(chunk.document_id.as_str())
            .or_insert_with(|| {
                first_seen.push(chunk.document_id.as_str());
                (chunk.document_title.clone(), 0, f32::MIN, 0.0)
            });
        entry.1 += 1;
        entry.2 = entry.2.max(chunk.similarity);
        entry.3 += chunk.similarity;
    }

    let mut aggregates: Vec<SourceAggregate> = first_seen
        .into_iter()
        .map(|document_id| {
            let (title, count, max, sum) = &by_document[document_id];
            SourceAggregate {
                document_id: document_id.to_string(),
                document_title: title.clone(),
                chunks_used: *count,
                max_similarity: *max,
                avg_similarity: sum / *count as f32,
                order: 0,
            }
        })
        .collect();

    for document_id in referenced_ids {
        if !by_document.contains_key(document_id.as_str()) {
            aggregates.push(SourceAggregate {
                document_id: document_id.clone(),
                document_title: title_for_missing(document_id),
                chunks_used: 0,
                max_similarity: 0.0,
                avg_similarity: 0.0,
                order: 0,
            });
        }
    }

    aggregates.sort_by(|a, b| {
        b.max_similarity
            .total_cmp(&a.max_similarity)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    for (order, aggregate) in aggregates.iter_mut().enumerate() {
        aggregate.order = order;
    }
    aggregates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrieved(doc: &str, text: &str, similarity: f32) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            document_id: doc.to_string(),
            document_title: format!("{doc} title"),
            similarity,
            referenced: false,
        }
    }

    #[test]
    fn groups_count_max_and_mean() {
        let merged = vec![
            retrieved("D1", "a", 0.9),
            retrieved("D1", "b", 0.5),
            retrieved("D2", "c", 0.7),
        ];
        let aggregates = aggregate_sources(&merged, &[], |id| id.to_string());
        assert_eq!(aggregates.len(), 2);

        let d1 = &aggregates[0];
        assert_eq!(d1.document_id, "D1");
        assert_eq!(d1.chunks_used, 2);
        assert!((d1.max_similarity - 0.9).abs() < f32::EPSILON);
        assert!((d1.avg_similarity - 0.7).abs() < 1e-6);
        assert_eq!(d1.order, 0);
        assert_eq!(aggregates[1].order, 1);
    }

    #[test]
    fn referenced_without_chunks_appears_last_with_zeros() {
        let merged = vec![retrieved("D1", "a", 0.8)];
        let referenced = vec!["D9".to_string()];
        let aggregates = aggregate_sources(&merged, &referenced, |_| "filing D9".to_string());
        assert_eq!(aggregates.len(), 2);
        let tail = &aggregates[1];
        assert_eq!(tail.document_id, "D9");
        assert_eq!(tail.chunks_used, 0);
        assert_eq!(tail.max_similarity, 0.0);
        assert_eq!(tail.document_title, "filing D9");
        assert_eq!(tail.order, 1);
    }

    #[test]
    fn lone_referenced_document_gets_order_zero() {
        let aggregates = aggregate_sources(&[], &["D9".to_string()], |id| id.to_string());
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].order, 0);
    }

    #[test]
    fn referenced_with_chunks_is_not_duplicated() {
        let merged = vec![RetrievedChunk {
            referenced: true,
            ..retrieved("D1", "a", 0.6)
        }];
        let aggregates = aggregate_sources(&merged, &["D1".to_string()], |id| id.to_string());
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].chunks_used, 1);
    }

    #[test]
    fn equal_scores_order_by_document_id() {
        let merged = vec![retrieved("D2", "a", 0.5), retrieved("D1", "b", 0.5)];
        let aggregates = aggregate_sources(&merged, &[], |id| id.to_string());
        assert_eq!(aggregates[0].document_id, "D1");
        assert_eq!(aggregates[1].document_id, "D2");
    }
}
