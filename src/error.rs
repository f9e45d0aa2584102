//! Error types for the retrieval engine.
//!
//! Each subsystem has its own error enum. Validation and not-initialized
//! conditions are the caller's fault and are never retried; model and store
//! failures may be transient and flow through the retry/circuit-breaker
//! machinery in [`crate::embedding`].

use thiserror::Error;

/// Errors raised while validating an [`EngineConfig`](crate::config::EngineConfig).
///
/// Configuration errors fail fast at construction time. They are never
/// surfaced from inside a search call.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Model identifier is not in the allow-list
    #[error("unknown model id '{0}' (not in the allow-list)")]
    UnknownModel(String),
    /// Fusion weights are negative or non-finite
    #[error("invalid fusion weights: {0}")]
    InvalidWeights(String),
    /// Any other out-of-range configuration value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur during embedding operations.
#[derive(Debug, Clone, Error)]
pub enum EmbedError {
    /// Called before `initialize()` completed
    #[error("embedding generator not initialized")]
    NotInitialized,
    /// Bad input shape or range (caller's fault, never retried)
    #[error("invalid input: {0}")]
    Validation(String),
    /// Circuit open or the model runtime failed (possibly transient)
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// Model output did not match the expected dimensions
    #[error("output shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected output shape (e.g. `[16, 384]`)
        expected: String,
        /// Observed output shape
        actual: String,
    },
}

/// Errors that can occur during search operations.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    /// Bad search request (limit/threshold/weights out of range)
    #[error("invalid search request: {0}")]
    Validation(String),
    /// Query and stored vector lengths differ (programming error, fails loudly)
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected vector length
        expected: usize,
        /// Actual vector length received
        actual: usize,
    },
    /// The lexical index rejected the sanitized query
    #[error("index query rejected: {0}")]
    IndexQuery(String),
    /// Conversation store failure
    #[error("store error: {0}")]
    Store(String),
    /// Embedding subsystem failure
    #[error(transparent)]
    Embedding(#[from] EmbedError),
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidQuery(msg) => SearchError::IndexQuery(msg),
            other => SearchError::Store(other.to_string()),
        }
    }
}

/// Errors that can occur inside a [`ConversationStore`](crate::store::ConversationStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Message not found
    #[error("not found: {0}")]
    NotFound(String),
    /// I/O error (filesystem, database)
    #[error("i/o error: {0}")]
    Io(String),
    /// Stored embedding could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The full-text index could not interpret the query expression
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Errors raised while constructing a
/// [`HybridSearchEngine`](crate::search::HybridSearchEngine).
#[derive(Debug, Error)]
pub enum SetupError {
    /// Configuration rejected before any model work started
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Model load or warm-up failed
    #[error(transparent)]
    Embedding(#[from] EmbedError),
}
