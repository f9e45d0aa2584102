//! Engine configuration with fail-fast validation.
//!
//! All knobs live in [`EngineConfig`]. Construction-time validation rejects
//! unknown model identifiers and out-of-range values so that configuration
//! mistakes surface immediately instead of inside a search call.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Model identifiers the embedding generator will agree to load.
///
/// All entries are small sentence-transformer encoders that run comfortably
/// on a laptop CPU and produce L2-normalized vectors.
pub const ALLOWED_MODELS: &[&str] = &[
    "all-MiniLM-L6-v2",
    "all-MiniLM-L12-v2",
    "multi-qa-MiniLM-L6-cos-v1",
    "paraphrase-MiniLM-L3-v2",
];

/// Embedding vector dimension for the default MiniLM models.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Maximum accepted input length for a single embed call, in characters.
pub const MAX_INPUT_CHARS: usize = 100_000;

/// Character budget after normalization, fed to the model.
///
/// Roughly 512 tokens at ~4 characters per token of English text. Longer
/// inputs are truncated at a word boundary before inference.
pub const MAX_EMBED_CHARS: usize = 2_048;

/// Number of texts per batched model call.
pub const EMBED_SUB_BATCH: usize = 16;

/// Messages fetched per chunk during streaming similarity search.
pub const SIMILARITY_CHUNK_SIZE: usize = 500;

/// Collect up to `limit * OVER_FETCH_MULTIPLIER` above-threshold candidates
/// before stopping the chunk scan early.
pub const OVER_FETCH_MULTIPLIER: usize = 2;

/// Hard cap on results returned from a single search call.
pub const MAX_RESULTS: usize = 100;

/// Internal per-branch limit used by the hybrid strategy to improve fusion
/// quality.
pub const HYBRID_BRANCH_LIMIT: usize = 50;

/// Default number of results when the caller does not specify a limit.
pub const DEFAULT_LIMIT: usize = 10;

/// Default TTL for the lexical result cache.
pub const LEXICAL_CACHE_TTL_MS: u64 = 30_000;

/// Consecutive model failures before the circuit trips open.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Cooldown while the circuit is open, before a half-open probe is allowed.
pub const CIRCUIT_COOLDOWN_MS: u64 = 30_000;

/// Target latency per embedding, in milliseconds. The health check flags the
/// generator once the rolling average exceeds a multiple of this.
pub const PERFORMANCE_TARGET_MS: f64 = 200.0;

/// Minimum cosine similarity for semantic results.
///
/// Vector search always has a nearest neighbor, even for nonsense queries.
/// 0.3 filters unrelated content (typically below 0.2) without losing
/// marginal but useful matches.
pub const DEFAULT_SEMANTIC_THRESHOLD: f32 = 0.3;

/// Relative weights applied when fusing semantic and lexical scores.
///
/// The weights are independent multipliers and are not required to sum to 1;
/// combined scores are only meaningful relative to each other within one
/// result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    /// Multiplier for the semantic (cosine similarity) score
    pub semantic: f32,
    /// Multiplier for the lexical (full-text relevance) score
    pub fts: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            fts: 0.4,
        }
    }
}

impl FusionWeights {
    /// Rejects negative or non-finite weights.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.semantic.is_finite() || !self.fts.is_finite() {
            return Err(ConfigError::InvalidWeights(format!(
                "weights must be finite, got semantic={} fts={}",
                self.semantic, self.fts
            )));
        }
        if self.semantic < 0.0 || self.fts < 0.0 {
            return Err(ConfigError::InvalidWeights(format!(
                "weights must be >= 0, got semantic={} fts={}",
                self.semantic, self.fts
            )));
        }
        Ok(())
    }
}

/// Configuration for a [`HybridSearchEngine`](crate::search::HybridSearchEngine).
///
/// `Default` produces a working local setup for the MiniLM family. Call
/// [`validate`](EngineConfig::validate) (the engine constructor does) before
/// use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Embedding model identifier; must appear in [`ALLOWED_MODELS`]
    pub model_id: String,
    /// Expected embedding dimension (adopted from the model if it disagrees)
    pub embedding_dim: usize,
    /// Maximum accepted input length per embed call, in characters
    pub max_input_chars: usize,
    /// Character budget after normalization, fed to the model
    pub max_embed_chars: usize,
    /// Whether the vector cache is consulted at all
    pub cache_enabled: bool,
    /// Maximum number of cached vectors
    pub cache_max_entries: usize,
    /// Maximum estimated cache memory, in megabytes
    pub cache_max_mb: usize,
    /// Target latency per embedding in milliseconds (health heuristic)
    pub performance_target_ms: f64,
    /// Default fusion weights, overridable per search call
    pub weights: FusionWeights,
    /// TTL for the lexical result cache, in milliseconds
    pub lexical_cache_ttl_ms: u64,
    /// Messages per chunk during streaming similarity search
    pub similarity_chunk_size: usize,
    /// Over-fetch multiplier for early termination of the chunk scan
    pub over_fetch_multiplier: usize,
    /// Hard cap on results per search call
    pub max_results: usize,
    /// Default minimum cosine similarity for semantic results
    pub semantic_threshold: f32,
    /// Consecutive failures before the circuit trips open
    pub circuit_failure_threshold: u32,
    /// Circuit cooldown in milliseconds
    pub circuit_cooldown_ms: u64,
    /// Retry attempts in `embed_with_fallback` beyond the first try
    pub max_retries: u32,
    /// Texts per batched model call
    pub batch_size: usize,
    /// Interval of the background health monitor in milliseconds (0 disables)
    pub monitor_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_id: "all-MiniLM-L6-v2".to_string(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            max_input_chars: MAX_INPUT_CHARS,
            max_embed_chars: MAX_EMBED_CHARS,
            cache_enabled: true,
            cache_max_entries: 1_000,
            cache_max_mb: 64,
            performance_target_ms: PERFORMANCE_TARGET_MS,
            weights: FusionWeights::default(),
            lexical_cache_ttl_ms: LEXICAL_CACHE_TTL_MS,
            similarity_chunk_size: SIMILARITY_CHUNK_SIZE,
            over_fetch_multiplier: OVER_FETCH_MULTIPLIER,
            max_results: MAX_RESULTS,
            semantic_threshold: DEFAULT_SEMANTIC_THRESHOLD,
            circuit_failure_threshold: CIRCUIT_FAILURE_THRESHOLD,
            circuit_cooldown_ms: CIRCUIT_COOLDOWN_MS,
            max_retries: 2,
            batch_size: EMBED_SUB_BATCH,
            monitor_interval_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Checks every field, returning the first violation.
    ///
    /// Unknown model identifiers and invalid weights fail here, loudly, at
    /// the point of configuration - never buried inside a search call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !ALLOWED_MODELS.contains(&self.model_id.as_str()) {
            return Err(ConfigError::UnknownModel(self.model_id.clone()));
        }
        self.weights.validate()?;
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be > 0".into()));
        }
        if self.max_input_chars == 0 || self.max_embed_chars == 0 {
            return Err(ConfigError::Invalid(
                "input length budgets must be > 0".into(),
            ));
        }
        if self.cache_enabled && (self.cache_max_entries == 0 || self.cache_max_mb == 0) {
            return Err(ConfigError::Invalid(
                "cache budgets must be > 0 when the cache is enabled".into(),
            ));
        }
        if self.similarity_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "similarity_chunk_size must be > 0".into(),
            ));
        }
        if self.over_fetch_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "over_fetch_multiplier must be >= 1".into(),
            ));
        }
        if self.max_results == 0 {
            return Err(ConfigError::Invalid("max_results must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.semantic_threshold) {
            return Err(ConfigError::Invalid(format!(
                "semantic_threshold must be in [0, 1], got {}",
                self.semantic_threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".into()));
        }
        if !self.performance_target_ms.is_finite() || self.performance_target_ms <= 0.0 {
            return Err(ConfigError::Invalid(
                "performance_target_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Cache memory budget in bytes.
    pub fn cache_max_bytes(&self) -> usize {
        self.cache_max_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_model_rejected() {
        let config = EngineConfig {
            model_id: "gpt-5-embeddings".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_negative_weights_rejected() {
        let config = EngineConfig {
            weights: FusionWeights {
                semantic: -0.1,
                fts: 0.4,
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_weights_need_not_sum_to_one() {
        let weights = FusionWeights {
            semantic: 0.9,
            fts: 0.9,
        };
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = EngineConfig {
            similarity_chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = EngineConfig {
            semantic_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_max_bytes() {
        let config = EngineConfig {
            cache_max_mb: 2,
            ..Default::default()
        };
        assert_eq!(config.cache_max_bytes(), 2 * 1024 * 1024);
    }
}
