//! Chunked streaming similarity search.
//!
//! Stored message vectors are scanned in fixed-size chunks ordered newest
//! first, so peak memory stays bounded regardless of store size. The scan
//! stops early once enough above-threshold candidates have been collected
//! (`limit * over_fetch`), and yields to the scheduler between chunks so a
//! large scan does not monopolize the worker.

use crate::error::SearchError;
use crate::store::{ConversationStore, MessageFilter};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::types::{SimilarityOptions, SimilarityResult};

/// Longest content fragment carried in a similarity result.
const SNIPPET_CHARS: usize = 200;

/// Cosine similarity of two pre-normalized vectors.
///
/// For unit vectors this is their dot product, clamped to `[0, 1]`.
/// Mismatched lengths are a programming error and fail loudly rather than
/// silently truncating.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SearchError> {
    if a.len() != b.len() {
        return Err(SearchError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    Ok(dot.clamp(0.0, 1.0))
}

fn snippet_of(content: &str) -> String {
    if content.chars().count() <= SNIPPET_CHARS {
        content.to_string()
    } else {
        let mut snippet: String = content.chars().take(SNIPPET_CHARS).collect();
        snippet.push('…');
        snippet
    }
}

/// Top-N cosine similarity over a conversation store.
pub struct SimilaritySearch {
    store: Arc<dyn ConversationStore>,
    chunk_size: usize,
    over_fetch: usize,
}

impl SimilaritySearch {
    /// Creates a scanner with the given chunking parameters.
    pub fn new(store: Arc<dyn ConversationStore>, chunk_size: usize, over_fetch: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            over_fetch: over_fetch.max(1),
        }
    }

    /// Returns the messages most similar to `query_vector`, above the
    /// threshold, sorted by descending similarity and truncated to
    /// `options.limit`.
    ///
    /// Ties break on recency then id, so rankings are reproducible for a
    /// fixed store state.
    #[instrument(skip_all, fields(limit = options.limit, threshold = options.threshold))]
    pub async fn find_similar(
        &self,
        query_vector: &[f32],
        options: &SimilarityOptions,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        if query_vector.is_empty() {
            return Err(SearchError::Validation("query vector is empty".into()));
        }
        if !(1..=1_000).contains(&options.limit) {
            return Err(SearchError::Validation(format!(
                "limit must be in [1, 1000], got {}",
                options.limit
            )));
        }
        if !options.threshold.is_finite() || !(0.0..=1.0).contains(&options.threshold) {
            return Err(SearchError::Validation(format!(
                "threshold must be in [0, 1], got {}",
                options.threshold
            )));
        }

        let filter = MessageFilter {
            conversation_id: options.conversation_id.clone(),
            exclude_ids: options.exclude_ids.clone(),
        };
        let target = options.limit.saturating_mul(self.over_fetch);

        let mut candidates: Vec<SimilarityResult> = Vec::new();
        let mut offset = 0usize;
        let mut chunks = 0usize;

        loop {
            let page = self
                .store
                .embedded_messages_page(&filter, offset, self.chunk_size)
                .await?;
            let page_len = page.len();
            chunks += 1;

            for message in page {
                let Some(embedding) = message.embedding.as_deref() else {
                    // The store promised embedded messages; skip a stray row
                    // instead of failing the whole scan.
                    debug!(id = %message.id, "embedded page returned message without vector");
                    continue;
                };
                let score = cosine_similarity(query_vector, embedding)?;
                if score >= options.threshold {
                    candidates.push(SimilarityResult {
                        message_id: message.id.clone(),
                        conversation_id: message.conversation_id.clone(),
                        snippet: snippet_of(&message.content),
                        score,
                        created_at: message.created_at,
                    });
                }
            }

            offset += page_len;
            if page_len < self.chunk_size || candidates.len() >= target {
                break;
            }
            // Yield between chunks so long scans stay cooperative.
            tokio::task::yield_now().await;
        }

        debug!(
            chunks,
            scanned = offset,
            collected = candidates.len(),
            "similarity scan complete"
        );

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        candidates.truncate(options.limit);
        Ok(candidates)
    }
}
