//! # Reminisce
//!
//! Local-first hybrid retrieval engine for a personal conversation store.
//!
//! Given a natural-language query, the engine returns the most relevant past
//! messages using lexical (full-text) matching, semantic (vector-embedding)
//! similarity, or a weighted fusion of both. Embeddings are produced by a
//! locally-hosted model behind the [`embedding::ModelRuntime`] trait; nothing
//! leaves the process.
//!
//! ## Modules
//!
//! - [`search`] - Hybrid search (strategy routing, chunked cosine similarity,
//!   lexical front-end, weighted score fusion)
//! - [`embedding`] - Embedding generation with caching, batching, circuit
//!   breaking, and retry with backoff
//! - [`cache`] - Bounded LRU vector cache (entry-count and byte budgets)
//! - [`query`] - Lexical query sanitizer/parser
//! - [`store`] - Conversation store trait + in-memory reference store
//! - [`config`] - Engine configuration with fail-fast validation
//! - [`metrics`] - Performance metrics with rolling averages
//! - [`error`] - Error types for configuration, embedding, search, and storage
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use reminisce::{EngineConfig, HybridSearchEngine, SearchOptions};
//! use reminisce::store::InMemoryConversationStore;
//!
//! let store = Arc::new(InMemoryConversationStore::new());
//! let runtime = Arc::new(my_model_runtime()); // implements ModelRuntime
//! let engine = HybridSearchEngine::new(store, runtime, EngineConfig::default()).await?;
//!
//! let response = engine.search("what did we decide about caching", &SearchOptions::default()).await?;
//! for result in &response.results {
//!     println!("{:.3}  {}", result.scores.combined, result.content);
//! }
//! ```

pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod query;
pub mod search;
pub mod store;
pub mod test_utils;

pub use config::{EngineConfig, FusionWeights};
pub use embedding::{EmbeddingGenerator, InferenceOptions, ModelOutput, ModelRuntime};
pub use error::{ConfigError, EmbedError, SearchError, SetupError, StoreError};
pub use query::{parse, MatchMode, ParsedQuery};
pub use search::{
    HybridResult, HybridSearchEngine, MatchType, SearchOptions, SearchResponse, SearchStrategy,
};
pub use store::{ConversationStore, MessageId, StoredMessage};
