//! Conversation store boundary.
//!
//! The persistence layer is an external collaborator. The engine needs three
//! things from it: embedding access by message id (addressed as opaque
//! JSON-encoded float arrays), recency-ordered chunked streaming of embedded
//! messages, and a full-text index over message content that understands the
//! sanitized expressions produced by [`crate::query`].
//!
//! [`InMemoryConversationStore`] is the reference implementation, used by
//! tests and small deployments. Its full-text index ranks with BM25 via the
//! [`bm25`](https://crates.io/crates/bm25) crate and enforces the
//! phrase/prefix/term-AND semantics of the sanitized query language.

use crate::error::StoreError;
use async_trait::async_trait;
use bm25::{Document, Language, SearchEngineBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::instrument;

/// Opaque message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as the store hands it to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique message identifier
    pub id: MessageId,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Message text
    pub content: String,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    /// Embedding vector, if one has been generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Filter for streaming embedded messages.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Restrict to one conversation
    pub conversation_id: Option<String>,
    /// Message ids to skip
    pub exclude_ids: Vec<MessageId>,
}

/// A full-text query against the store's index.
#[derive(Debug, Clone)]
pub struct FtsRequest {
    /// Sanitized match expression from [`crate::query::parse`]
    pub match_query: String,
    /// Restrict to one conversation
    pub conversation_id: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub start_date: Option<u64>,
    /// Inclusive upper bound on `created_at`
    pub end_date: Option<u64>,
    /// Maximum hits to return
    pub limit: usize,
    /// Hits to skip before collecting
    pub offset: usize,
}

/// One full-text match with relevance score and snippet.
#[derive(Debug, Clone)]
pub struct FtsHit {
    /// Matched message id
    pub id: MessageId,
    /// Conversation of the matched message
    pub conversation_id: String,
    /// Full message content
    pub content: String,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    /// Raw relevance score (BM25-scaled, unnormalized)
    pub score: f32,
    /// Content fragment around the first match
    pub snippet: String,
}

/// Narrow persistence interface the engine depends on.
///
/// The engine treats implementations as a black box beyond these operations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetches a message's stored embedding.
    async fn get_embedding(&self, id: &MessageId) -> Result<Option<Vec<f32>>, StoreError>;

    /// Replaces a message's stored embedding wholesale.
    async fn put_embedding(&self, id: &MessageId, embedding: &[f32]) -> Result<(), StoreError>;

    /// One chunk of embedded messages, newest first, after applying the
    /// filter. `offset`/`limit` address the filtered ordering.
    async fn embedded_messages_page(
        &self,
        filter: &MessageFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Ids of messages that do not yet have an embedding, newest first.
    async fn missing_embedding_ids(&self) -> Result<Vec<MessageId>, StoreError>;

    /// Fetches one message, embedding included.
    async fn get_message(&self, id: &MessageId) -> Result<Option<StoredMessage>, StoreError>;

    /// Runs a sanitized query against the full-text index.
    async fn full_text_search(&self, request: &FtsRequest) -> Result<Vec<FtsHit>, StoreError>;
}

// ============================================================================
// Sanitized query interpretation
// ============================================================================

/// Interpreted form of a sanitized match expression.
#[derive(Debug, Clone, PartialEq)]
enum FtsQuery {
    /// Literal phrase containment
    Phrase(String),
    /// Word-prefix match
    Prefix(String),
    /// Every term must appear as a word
    Terms(Vec<String>),
}

/// Reverses the sanitizer's backslash escaping.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn interpret_query(expression: &str) -> Result<FtsQuery, StoreError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidQuery("empty match expression".into()));
    }

    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let inner = &trimmed[1..trimmed.len() - 1];
        // Unescape first, then collapse the doubled quotes the sanitizer
        // produced for embedded quote characters.
        let phrase = unescape(inner).replace("\"\"", "\"");
        if phrase.trim().is_empty() {
            return Err(StoreError::InvalidQuery("empty phrase".into()));
        }
        return Ok(FtsQuery::Phrase(phrase));
    }

    if trimmed.ends_with('*') && !trimmed.ends_with("\\*") {
        let stem = unescape(&trimmed[..trimmed.len() - 1]);
        let stem = stem.trim();
        if stem.is_empty() {
            return Err(StoreError::InvalidQuery("empty prefix stem".into()));
        }
        return Ok(FtsQuery::Prefix(stem.to_lowercase()));
    }

    let terms: Vec<String> = trimmed
        .split_whitespace()
        .map(unescape)
        .filter(|term| !term.is_empty())
        .map(|term| term.to_lowercase())
        .collect();
    if terms.is_empty() {
        return Err(StoreError::InvalidQuery("no searchable terms".into()));
    }
    Ok(FtsQuery::Terms(terms))
}

fn content_tokens(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

impl FtsQuery {
    /// Plain text handed to the BM25 scorer.
    fn scoring_text(&self) -> String {
        match self {
            FtsQuery::Phrase(phrase) => phrase.clone(),
            FtsQuery::Prefix(stem) => stem.clone(),
            FtsQuery::Terms(terms) => terms.join(" "),
        }
    }

    /// Text used to locate the snippet window.
    fn needle(&self) -> &str {
        match self {
            FtsQuery::Phrase(phrase) => phrase,
            FtsQuery::Prefix(stem) => stem,
            FtsQuery::Terms(terms) => &terms[0],
        }
    }

    fn matches(&self, content: &str) -> bool {
        match self {
            FtsQuery::Phrase(phrase) => {
                content.to_lowercase().contains(&phrase.to_lowercase())
            }
            FtsQuery::Prefix(stem) => content_tokens(content)
                .iter()
                .any(|token| token.starts_with(stem)),
            FtsQuery::Terms(terms) => {
                let lower = content.to_lowercase();
                let tokens = content_tokens(content);
                terms.iter().all(|term| {
                    // Purely alphanumeric terms match whole words; terms
                    // carrying punctuation (escaped specials) match the
                    // literal text.
                    if term.chars().all(|c| c.is_alphanumeric()) {
                        tokens.iter().any(|t| t == term)
                    } else {
                        lower.contains(term)
                    }
                })
            }
        }
    }
}

/// Frequency-based score for matches the BM25 scorer missed (prefix stems,
/// stopword-only phrases).
fn fallback_score(content: &str, needle: &str) -> f32 {
    let lower = content.to_lowercase();
    let occurrences = lower.matches(&needle.to_lowercase()).count();
    let token_count = content_tokens(content).len();
    occurrences as f32 / (token_count as f32 + 1.0)
}

/// Window of content around the first match of `needle`.
fn extract_snippet(content: &str, needle: &str) -> String {
    const CONTEXT_BEFORE: usize = 40;
    const SNIPPET_LEN: usize = 160;

    if content.len() <= SNIPPET_LEN {
        return content.to_string();
    }

    let lower = content.to_lowercase();
    // Lowercasing can change byte offsets for some scripts; only trust the
    // position when lengths agree.
    let position = if lower.len() == content.len() {
        lower.find(&needle.to_lowercase()).unwrap_or(0)
    } else {
        0
    };

    let mut start = position.saturating_sub(CONTEXT_BEFORE);
    while start > 0 && !content.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start + SNIPPET_LEN).min(content.len());
    while end < content.len() && !content.is_char_boundary(end) {
        end += 1;
    }

    let mut snippet = String::new();
    if start > 0 {
        snippet.push('…');
    }
    snippet.push_str(&content[start..end]);
    if end < content.len() {
        snippet.push('…');
    }
    snippet
}

// ============================================================================
// In-memory reference store
// ============================================================================

struct MessageRow {
    conversation_id: String,
    content: String,
    created_at: u64,
    /// JSON-encoded float array, the store's opaque embedding representation
    embedding_json: Option<String>,
}

struct StoreInner {
    messages: HashMap<MessageId, MessageRow>,
    engine: bm25::SearchEngine<u64>,
    slots: HashMap<MessageId, u64>,
    next_slot: u64,
}

/// In-memory [`ConversationStore`] with a BM25-ranked full-text index.
pub struct InMemoryConversationStore {
    inner: RwLock<StoreInner>,
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let empty: Vec<Document<u64>> = Vec::new();
        let engine = SearchEngineBuilder::<u64>::with_documents(Language::English, empty).build();
        Self {
            inner: RwLock::new(StoreInner {
                messages: HashMap::new(),
                engine,
                slots: HashMap::new(),
                next_slot: 0,
            }),
        }
    }

    /// Inserts or replaces a message, indexing its content.
    #[instrument(skip_all, fields(id = %message.id))]
    pub fn insert_message(&self, message: StoredMessage) {
        let mut inner = self.write();
        let existing = inner.slots.get(&message.id).copied();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let slot = inner.next_slot;
                inner.next_slot += 1;
                inner.slots.insert(message.id.clone(), slot);
                slot
            }
        };
        inner.engine.upsert(Document {
            id: slot,
            contents: message.content.clone(),
        });
        let embedding_json = message
            .embedding
            .as_ref()
            .map(|vector| serde_json::to_string(vector).unwrap_or_default());
        inner.messages.insert(
            message.id,
            MessageRow {
                conversation_id: message.conversation_id,
                content: message.content,
                created_at: message.created_at,
                embedding_json,
            },
        );
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.read().messages.len()
    }

    /// Whether the store holds no messages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn decode_embedding(json: &str) -> Result<Vec<f32>, StoreError> {
    serde_json::from_str(json)
        .map_err(|e| StoreError::Serialization(format!("bad embedding payload: {}", e)))
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_embedding(&self, id: &MessageId) -> Result<Option<Vec<f32>>, StoreError> {
        let inner = self.read();
        match inner.messages.get(id) {
            Some(row) => row
                .embedding_json
                .as_deref()
                .map(decode_embedding)
                .transpose(),
            None => Ok(None),
        }
    }

    async fn put_embedding(&self, id: &MessageId, embedding: &[f32]) -> Result<(), StoreError> {
        let mut inner = self.write();
        let row = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let json = serde_json::to_string(embedding)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        row.embedding_json = Some(json);
        Ok(())
    }

    async fn embedded_messages_page(
        &self,
        filter: &MessageFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.read();
        let mut matching: Vec<(&MessageId, &MessageRow)> = inner
            .messages
            .iter()
            .filter(|(id, row)| {
                row.embedding_json.is_some()
                    && filter
                        .conversation_id
                        .as_ref()
                        .is_none_or(|c| c == &row.conversation_id)
                    && !filter.exclude_ids.contains(id)
            })
            .collect();
        matching.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| a.0.cmp(b.0))
        });

        matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(id, row)| {
                let embedding = row
                    .embedding_json
                    .as_deref()
                    .map(decode_embedding)
                    .transpose()?;
                Ok(StoredMessage {
                    id: id.clone(),
                    conversation_id: row.conversation_id.clone(),
                    content: row.content.clone(),
                    created_at: row.created_at,
                    embedding,
                })
            })
            .collect()
    }

    async fn missing_embedding_ids(&self) -> Result<Vec<MessageId>, StoreError> {
        let inner = self.read();
        let mut missing: Vec<(&MessageId, u64)> = inner
            .messages
            .iter()
            .filter(|(_, row)| row.embedding_json.is_none())
            .map(|(id, row)| (id, row.created_at))
            .collect();
        missing.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(missing.into_iter().map(|(id, _)| id.clone()).collect())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<StoredMessage>, StoreError> {
        let inner = self.read();
        let Some(row) = inner.messages.get(id) else {
            return Ok(None);
        };
        let embedding = row
            .embedding_json
            .as_deref()
            .map(decode_embedding)
            .transpose()?;
        Ok(Some(StoredMessage {
            id: id.clone(),
            conversation_id: row.conversation_id.clone(),
            content: row.content.clone(),
            created_at: row.created_at,
            embedding,
        }))
    }

    async fn full_text_search(&self, request: &FtsRequest) -> Result<Vec<FtsHit>, StoreError> {
        let query = interpret_query(&request.match_query)?;
        let inner = self.read();

        let scores: HashMap<u64, f32> = inner
            .engine
            .search(&query.scoring_text(), inner.messages.len().max(1))
            .into_iter()
            .map(|result| (result.document.id, result.score))
            .collect();

        let mut hits: Vec<FtsHit> = inner
            .messages
            .iter()
            .filter(|(_, row)| {
                request
                    .conversation_id
                    .as_ref()
                    .is_none_or(|c| c == &row.conversation_id)
                    && request.start_date.is_none_or(|s| row.created_at >= s)
                    && request.end_date.is_none_or(|e| row.created_at <= e)
            })
            .filter(|(_, row)| query.matches(&row.content))
            .map(|(id, row)| {
                let slot = inner.slots.get(id).copied();
                let score = slot
                    .and_then(|slot| scores.get(&slot).copied())
                    .filter(|score| *score > 0.0)
                    .unwrap_or_else(|| fallback_score(&row.content, query.needle()));
                FtsHit {
                    id: id.clone(),
                    conversation_id: row.conversation_id.clone(),
                    content: row.content.clone(),
                    created_at: row.created_at,
                    score,
                    snippet: extract_snippet(&row.content, query.needle()),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(hits
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect())
    }
}
