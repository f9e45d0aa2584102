//! Weighted score fusion.
//!
//! Each message's combined score is
//! `semantic * weights.semantic + lexical * weights.fts`; a message present
//! in only one branch contributes only that branch's weighted term. The
//! weights are independent multipliers - they are not required to sum to 1,
//! so combined scores are comparable within one result list, not across
//! configurations.

use crate::config::FusionWeights;
use crate::store::MessageId;
use std::collections::HashMap;

use super::lexical::LexicalHit;
use super::types::{HybridResult, MatchType, ScoreBreakdown, SimilarityResult};

/// Fuses the two branches into one ranked, deduplicated list.
///
/// Highlight fragments from both branches are unioned with duplicates
/// removed. The output is sorted by combined score descending with
/// recency/id tie-breaks and is NOT truncated; the caller applies
/// offset/limit.
pub fn fuse(
    semantic: &[SimilarityResult],
    lexical: &[LexicalHit],
    weights: &FusionWeights,
) -> Vec<HybridResult> {
    let mut merged: HashMap<MessageId, HybridResult> = HashMap::new();

    for hit in semantic {
        merged.insert(
            hit.message_id.clone(),
            HybridResult {
                message_id: hit.message_id.clone(),
                conversation_id: hit.conversation_id.clone(),
                content: hit.snippet.clone(),
                created_at: hit.created_at,
                scores: ScoreBreakdown {
                    semantic: Some(hit.score),
                    lexical: None,
                    combined: hit.score * weights.semantic,
                },
                match_type: MatchType::Semantic,
                highlights: vec![hit.snippet.clone()],
                explanation: None,
            },
        );
    }

    for hit in lexical {
        match merged.get_mut(&hit.id) {
            Some(result) => {
                result.scores.lexical = Some(hit.score);
                result.scores.combined += hit.score * weights.fts;
                result.match_type = MatchType::Hybrid;
                // The lexical branch carries full content; prefer it over
                // the semantic snippet.
                result.content = hit.content.clone();
                if !result.highlights.contains(&hit.snippet) {
                    result.highlights.push(hit.snippet.clone());
                }
            }
            None => {
                merged.insert(
                    hit.id.clone(),
                    HybridResult {
                        message_id: hit.id.clone(),
                        conversation_id: hit.conversation_id.clone(),
                        content: hit.content.clone(),
                        created_at: hit.created_at,
                        scores: ScoreBreakdown {
                            semantic: None,
                            lexical: Some(hit.score),
                            combined: hit.score * weights.fts,
                        },
                        match_type: MatchType::Lexical,
                        highlights: vec![hit.snippet.clone()],
                        explanation: None,
                    },
                );
            }
        }
    }

    let mut results: Vec<HybridResult> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.scores
            .combined
            .partial_cmp(&a.scores.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
    results
}
