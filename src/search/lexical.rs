//! Lexical search front-end.
//!
//! Wraps the store's full-text index behind the sanitizer's output and a
//! short-TTL result cache keyed on the full option set, so repeated queries
//! skip the index. Raw relevance scores are normalized to `[0, 1]` against
//! the batch maximum before fusion.

use crate::error::SearchError;
use crate::query::ParsedQuery;
use crate::store::{ConversationStore, FtsRequest, MessageId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// One lexical match with its normalized score.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    /// Matched message
    pub id: MessageId,
    /// Conversation of the matched message
    pub conversation_id: String,
    /// Full message content
    pub content: String,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    /// Relevance normalized to `[0, 1]` within this result set
    pub score: f32,
    /// Content fragment around the first match
    pub snippet: String,
}

/// Options for one lexical query.
#[derive(Debug, Clone, Default)]
pub struct LexicalOptions {
    /// Restrict to one conversation
    pub conversation_id: Option<String>,
    /// Inclusive lower bound on message timestamps
    pub start_date: Option<u64>,
    /// Inclusive upper bound on message timestamps
    pub end_date: Option<u64>,
    /// Maximum hits
    pub limit: usize,
    /// Hits to skip
    pub offset: usize,
}

struct CachedHits {
    at: Instant,
    hits: Vec<LexicalHit>,
}

/// Full-text index front-end with a TTL result cache.
pub struct LexicalIndex {
    store: Arc<dyn ConversationStore>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedHits>>,
}

impl LexicalIndex {
    /// Creates a front-end over `store` with the given cache TTL.
    pub fn new(store: Arc<dyn ConversationStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a sanitized query against the index.
    ///
    /// An invalid [`ParsedQuery`] is rejected with the sanitizer's stated
    /// reason. Cache failures never block the search; at worst the index is
    /// queried again.
    #[instrument(skip_all, fields(mode = ?parsed.mode, limit = options.limit))]
    pub async fn search(
        &self,
        parsed: &ParsedQuery,
        options: &LexicalOptions,
    ) -> Result<Vec<LexicalHit>, SearchError> {
        if !parsed.valid {
            let reason = parsed
                .reason
                .clone()
                .unwrap_or_else(|| "invalid query".to_string());
            return Err(SearchError::IndexQuery(reason));
        }

        let key = cache_key(parsed, options);
        if let Ok(cache) = self.cache.lock() {
            if let Some(entry) = cache.get(&key) {
                if entry.at.elapsed() < self.ttl {
                    debug!("lexical result cache hit");
                    return Ok(entry.hits.clone());
                }
            }
        }

        let request = FtsRequest {
            match_query: parsed.sanitized.clone(),
            conversation_id: options.conversation_id.clone(),
            start_date: options.start_date,
            end_date: options.end_date,
            limit: options.limit,
            offset: options.offset,
        };
        let raw = self.store.full_text_search(&request).await?;

        let max_score = raw.iter().map(|hit| hit.score).fold(0.0f32, f32::max);
        let hits: Vec<LexicalHit> = raw
            .into_iter()
            .map(|hit| LexicalHit {
                id: hit.id,
                conversation_id: hit.conversation_id,
                content: hit.content,
                created_at: hit.created_at,
                score: if max_score > 0.0 {
                    hit.score / max_score
                } else {
                    0.0
                },
                snippet: hit.snippet,
            })
            .collect();

        match self.cache.lock() {
            Ok(mut cache) => {
                let ttl = self.ttl;
                cache.retain(|_, entry| entry.at.elapsed() < ttl);
                cache.insert(
                    key,
                    CachedHits {
                        at: Instant::now(),
                        hits: hits.clone(),
                    },
                );
            }
            Err(_) => warn!("lexical cache lock poisoned, skipping insert"),
        }

        Ok(hits)
    }

    /// Drops all cached results.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Cached result sets currently held.
    pub fn cached_queries(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }
}

/// Cache key over the full option set; two queries share results only when
/// every field agrees.
fn cache_key(parsed: &ParsedQuery, options: &LexicalOptions) -> String {
    format!(
        "{}|{:?}|{:?}|{:?}|{:?}|{}|{}",
        parsed.sanitized,
        parsed.mode,
        options.conversation_id,
        options.start_date,
        options.end_date,
        options.limit,
        options.offset,
    )
}
