//! Query intent classification.
//!
//! Primary path asks the chat provider for a JSON verdict; anything that goes
//! wrong — provider failure, empty reply, malformed JSON, unknown intent —
//! falls back to a deterministic keyword rule, so classification itself can
//! never fail a query.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::providers::ChatProvider;
use crate::types::QueryIntent;

const CLASSIFIER_PROMPT: &str = "\
You classify retrieval queries against a corpus of company filings.\n\
Reply with JSON only, no prose: {\"intent\": \"REGULAR\" | \"EXHAUSTIVE\", \"reasoning\": \"...\"}.\n\
EXHAUSTIVE means the user wants every matching occurrence across all documents\n\
(\"list all\", \"every instance\", complete enumerations). REGULAR is everything else.";

/// Lowercased markers that force `Exhaustive` in the fallback rule.
const EXHAUSTIVE_MARKERS: [&str; 15] = [
    "list all",
    "find all",
    "show all",
    "every",
    "all cases",
    "all instances",
    "all documents",
    "all mentions",
    "complete list",
    "exhaustive",
    "entire",
    "give me every",
    "what are all",
    "all of",
    "each",
];

/// Classification result with the model's (or fallback's) reasoning.
#[derive(Clone, Debug, PartialEq)]
pub struct IntentDecision {
    pub intent: QueryIntent,
    pub reasoning: String,
    pub confidence: Option<f32>,
}

#[derive(Deserialize)]
struct ClassifierReply {
    intent: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: Option<f32>,
}

pub struct IntentClassifier {
    chat: Arc<dyn ChatProvider>,
}

impl IntentClassifier {
    pub fn new(chat: Arc<dyn ChatProvider>) -> Self {
        Self { chat }
    }

    /// Classify a query. Infallible by construction: every failure mode
    /// degrades to the keyword rule.
    pub async fn classify(&self, query: &str) -> IntentDecision {
        if query.trim().is_empty() {
            return IntentDecision {
                intent: QueryIntent::Regular,
                reasoning: "empty query".into(),
                confidence: None,
            };
        }

        match self.chat.generate(query, Some(CLASSIFIER_PROMPT)).await {
            Ok(reply) => match parse_reply(&reply) {
                Some(decision) => decision,
                None => {
                    debug!(
                        target: "filingrag::retrieval",
                        "classifier reply unusable, using keyword fallback"
                    );
                    keyword_fallback(query)
                }
            },
            Err(err) => {
                debug!(
                    target: "filingrag::retrieval",
                    error = %err,
                    "classifier call failed, using keyword fallback"
                );
                keyword_fallback(query)
            }
        }
    }
}

fn parse_reply(reply: &str) -> Option<IntentDecision> {
    let trimmed = strip_code_fences(reply.trim());
    if trimmed.is_empty() {
        return None;
    }
    let parsed: ClassifierReply = serde_json::from_str(trimmed).ok()?;
    let intent = match parsed.intent.to_uppercase().as_str() {
        "REGULAR" => QueryIntent::Regular,
        "EXHAUSTIVE" => QueryIntent::Exhaustive,
        _ => return None,
    };
    Some(IntentDecision {
        intent,
        reasoning: parsed.reasoning,
        confidence: parsed.confidence,
    })
}

/// Models wrap JSON in markdown fences often enough that we tolerate it.
fn strip_code_fences(reply: &str) -> &str {
    let without_open = reply
        .strip_prefix("```json")
        .or_else(|| reply.strip_prefix("```"))
        .unwrap_or(reply);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn keyword_fallback(query: &str) -> IntentDecision {
    let lowered = query.to_lowercase();
    let matched = EXHAUSTIVE_MARKERS
        .iter()
        .find(|marker| lowered.contains(*marker));
    match matched {
        Some(marker) => IntentDecision {
            intent: QueryIntent::Exhaustive,
            reasoning: format!("keyword fallback: query contains {marker:?}"),
            confidence: None,
        },
        None => IntentDecision {
            intent: QueryIntent::Regular,
            reasoning: "keyword fallback: no exhaustive markers".into(),
            confidence: None,
        },
    }
}
