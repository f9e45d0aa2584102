//! Hybrid search combining semantic and lexical retrieval.
//!
//! - `types`: result/option types shared across the search paths
//! - `similarity`: chunked streaming cosine similarity over stored vectors
//! - `lexical`: sanitized full-text queries with a short-TTL result cache
//! - `fusion`: weighted score fusion and highlight union
//! - `engine`: [`HybridSearchEngine`] - query analysis, strategy routing,
//!   concurrent branch execution, per-phase timing
//!
//! # Strategy selection
//!
//! A single term with no operators routes to semantic search (lexical adds
//! nothing for one word); operators or more than five terms route to lexical
//! (the user is being precise); everything else runs both branches and fuses
//! the scores with configurable weights.

pub mod engine;
pub mod fusion;
pub mod lexical;
pub mod similarity;
pub mod types;

pub use engine::HybridSearchEngine;
pub use fusion::fuse;
pub use lexical::{LexicalHit, LexicalIndex, LexicalOptions};
pub use similarity::{cosine_similarity, SimilaritySearch};
pub use types::{
    Complexity, ExecutedStrategy, HybridResult, MatchType, QueryAnalysis, ScoreBreakdown,
    SearchOptions, SearchResponse, SearchStrategy, SimilarityOptions, SimilarityResult,
};
