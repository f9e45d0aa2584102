//! Shared types for the search paths.

use crate::config::FusionWeights;
use crate::metrics::SearchTimings;
use crate::query::MatchMode;
use crate::store::MessageId;
use serde::{Deserialize, Serialize};

/// Caller-selectable retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// Vector similarity only
    Semantic,
    /// Full-text matching only
    Lexical,
    /// Both branches, scores fused
    Hybrid,
}

/// Strategy that actually executed, including the failure label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutedStrategy {
    /// Semantic branch served the results
    Semantic,
    /// Lexical branch served the results
    Lexical,
    /// Both branches contributed
    Hybrid,
    /// Every executed branch failed; results are empty
    Error,
}

impl ExecutedStrategy {
    /// Lowercase label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutedStrategy::Semantic => "semantic",
            ExecutedStrategy::Lexical => "lexical",
            ExecutedStrategy::Hybrid => "hybrid",
            ExecutedStrategy::Error => "error",
        }
    }
}

/// Query complexity tier from analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// At most two terms, no operators
    Simple,
    /// At most five terms
    Moderate,
    /// Everything else
    Complex,
}

/// Lightweight pre-search analysis of the raw query text.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    /// Whitespace-separated term count
    pub term_count: usize,
    /// Whether operator characters are present
    pub has_operators: bool,
    /// Complexity tier
    pub complexity: Complexity,
}

/// Which retrieval paths matched a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Found only by vector similarity
    Semantic,
    /// Found only by full-text matching
    Lexical,
    /// Found by both
    Hybrid,
}

/// Per-branch and combined scores for one result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    /// Cosine similarity, when the semantic branch matched
    pub semantic: Option<f32>,
    /// Normalized full-text relevance, when the lexical branch matched
    pub lexical: Option<f32>,
    /// Weighted combination used for ranking
    pub combined: f32,
}

/// A fused search result. Transient; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct HybridResult {
    /// Matched message
    pub message_id: MessageId,
    /// Conversation of the matched message
    pub conversation_id: String,
    /// Message content (full text when the lexical branch supplied it,
    /// a snippet otherwise)
    pub content: String,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    /// Score breakdown
    pub scores: ScoreBreakdown,
    /// Which branches matched
    pub match_type: MatchType,
    /// Deduplicated highlight fragments from both branches
    pub highlights: Vec<String>,
    /// Human-readable score explanation, present when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// One semantic similarity match.
#[derive(Debug, Clone)]
pub struct SimilarityResult {
    /// Matched message
    pub message_id: MessageId,
    /// Conversation of the matched message
    pub conversation_id: String,
    /// Content fragment
    pub snippet: String,
    /// Cosine similarity in [0, 1]
    pub score: f32,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

/// Options for [`SimilaritySearch::find_similar`](super::similarity::SimilaritySearch::find_similar).
#[derive(Debug, Clone)]
pub struct SimilarityOptions {
    /// Maximum results, in `[1, 1000]`
    pub limit: usize,
    /// Minimum similarity, in `[0, 1]`
    pub threshold: f32,
    /// Restrict to one conversation
    pub conversation_id: Option<String>,
    /// Message ids to skip
    pub exclude_ids: Vec<MessageId>,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: crate::config::DEFAULT_SEMANTIC_THRESHOLD,
            conversation_id: None,
            exclude_ids: Vec::new(),
        }
    }
}

/// Options for [`HybridSearchEngine::search`](super::engine::HybridSearchEngine::search).
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Explicit strategy; overrides analysis-based selection
    pub strategy: Option<SearchStrategy>,
    /// Result count; clamped to the configured maximum
    pub limit: Option<usize>,
    /// Results to skip in the final ranking
    pub offset: usize,
    /// Restrict to one conversation
    pub conversation_id: Option<String>,
    /// Inclusive lower bound on message timestamps (lexical branch)
    pub start_date: Option<u64>,
    /// Inclusive upper bound on message timestamps (lexical branch)
    pub end_date: Option<u64>,
    /// Match-mode hint forwarded to the sanitizer
    pub match_mode: Option<MatchMode>,
    /// Fusion weights; defaults to the engine configuration
    pub weights: Option<FusionWeights>,
    /// Minimum semantic similarity; defaults to the engine configuration
    pub semantic_threshold: Option<f32>,
    /// Attach per-result score explanations
    pub explain: bool,
    /// Attach the timing breakdown to the response
    pub include_metrics: bool,
}

/// Outcome of one search call.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Ranked, deduplicated results
    pub results: Vec<HybridResult>,
    /// Strategy that actually executed
    pub strategy: ExecutedStrategy,
    /// Whether results remain past the requested window
    pub has_more: bool,
    /// Identifier for retrieving this call's timings later
    pub query_id: u64,
    /// Timing breakdown, present when requested
    pub metrics: Option<SearchTimings>,
    /// Diagnostic when a branch failed or the query was rejected
    pub error: Option<String>,
}
