//! Hybrid search engine: query analysis, strategy routing, concurrent
//! branch execution, and per-phase timing.
//!
//! One engine instance is constructed per process and passed by handle to
//! all callers; every piece of mutable state (vector cache, circuit state,
//! lexical cache, metrics) lives inside it rather than in module globals.
//!
//! A `search` call never fails for ordinary query variety. Branch failures
//! are logged and converted into a structurally valid response carrying a
//! diagnostic: in hybrid mode a single failed branch degrades to the
//! surviving branch's results, and only when every executed branch fails is
//! the response tagged with the `error` strategy. Caller configuration
//! mistakes (invalid weights or thresholds) are the one class that returns
//! `Err`, so they fail loudly instead of silently returning nothing.

use crate::config::{EngineConfig, FusionWeights, DEFAULT_LIMIT, HYBRID_BRANCH_LIMIT};
use crate::embedding::{EmbeddingGenerator, ModelRuntime};
use crate::error::{SearchError, SetupError};
use crate::metrics::{MetricsSnapshot, PerformanceMetrics, SearchTimings};
use crate::query;
use crate::store::ConversationStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::fusion::fuse;
use super::lexical::{LexicalHit, LexicalIndex, LexicalOptions};
use super::similarity::SimilaritySearch;
use super::types::{
    Complexity, ExecutedStrategy, HybridResult, MatchType, QueryAnalysis, SearchOptions,
    SearchResponse, SearchStrategy, SimilarityOptions, SimilarityResult,
};

/// Upper bound accepted by the similarity scanner.
const SIMILARITY_LIMIT_CAP: usize = 1_000;

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Weights used when only one branch executed, so combined scores equal the
/// branch scores.
fn single_branch_weights() -> FusionWeights {
    FusionWeights {
        semantic: 1.0,
        fts: 1.0,
    }
}

/// Long-lived retrieval engine over one conversation store and one local
/// embedding model.
pub struct HybridSearchEngine {
    store: Arc<dyn ConversationStore>,
    generator: Arc<EmbeddingGenerator>,
    lexical: LexicalIndex,
    similarity: SimilaritySearch,
    config: EngineConfig,
    metrics: PerformanceMetrics,
    query_counter: AtomicU64,
}

impl HybridSearchEngine {
    /// Builds the engine: validates configuration, loads and warms the
    /// model, and starts the background monitor.
    pub async fn new(
        store: Arc<dyn ConversationStore>,
        runtime: Arc<dyn ModelRuntime>,
        config: EngineConfig,
    ) -> Result<Self, SetupError> {
        config.validate()?;

        let generator = Arc::new(EmbeddingGenerator::new(runtime, config.clone())?);
        generator.initialize().await?;
        EmbeddingGenerator::spawn_monitor(&generator);

        let lexical = LexicalIndex::new(
            store.clone(),
            Duration::from_millis(config.lexical_cache_ttl_ms),
        );
        let similarity = SimilaritySearch::new(
            store.clone(),
            config.similarity_chunk_size,
            config.over_fetch_multiplier,
        );

        Ok(Self {
            store,
            generator,
            lexical,
            similarity,
            config,
            metrics: PerformanceMetrics::new(),
            query_counter: AtomicU64::new(0),
        })
    }

    /// Term count, operator presence, and complexity tier for a raw query.
    pub fn analyze(query: &str) -> QueryAnalysis {
        let term_count = query.split_whitespace().count();
        let has_operators = query
            .chars()
            .any(|c| matches!(c, '"' | '\'' | '(' | ')' | '+' | '-' | '*'));
        let complexity = if term_count <= 2 && !has_operators {
            Complexity::Simple
        } else if term_count <= 5 {
            Complexity::Moderate
        } else {
            Complexity::Complex
        };
        QueryAnalysis {
            term_count,
            has_operators,
            complexity,
        }
    }

    /// Strategy for an analyzed query when the caller did not pick one.
    pub fn select_strategy(analysis: &QueryAnalysis) -> SearchStrategy {
        if analysis.term_count == 1 && !analysis.has_operators {
            SearchStrategy::Semantic
        } else if analysis.has_operators || analysis.term_count > 5 {
            SearchStrategy::Lexical
        } else {
            SearchStrategy::Hybrid
        }
    }

    /// Runs a search.
    ///
    /// Returns `Err` only for invalid caller configuration (weights or
    /// threshold out of range). Empty, malformed, or pathological query text
    /// produces an `Ok` response with empty results and a diagnostic.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        let query_id = self.query_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        let limit = options
            .limit
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, self.config.max_results);
        let offset = options.offset;

        let weights = options
            .weights
            .clone()
            .unwrap_or_else(|| self.config.weights.clone());
        weights
            .validate()
            .map_err(|e| SearchError::Validation(e.to_string()))?;

        let threshold = options
            .semantic_threshold
            .unwrap_or(self.config.semantic_threshold);
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(SearchError::Validation(format!(
                "semantic_threshold must be in [0, 1], got {}",
                threshold
            )));
        }

        if query.trim().is_empty() {
            return Ok(self.failed_response(
                query_id,
                started,
                0.0,
                "query is empty".to_string(),
                options,
            ));
        }

        let analysis_started = Instant::now();
        let analysis = Self::analyze(query);
        let strategy = options
            .strategy
            .unwrap_or_else(|| Self::select_strategy(&analysis));
        let analysis_ms = elapsed_ms(analysis_started);
        debug!(
            ?strategy,
            terms = analysis.term_count,
            operators = analysis.has_operators,
            complexity = ?analysis.complexity,
            "query analyzed"
        );

        let base_limit = offset.saturating_add(limit).saturating_add(1);
        let mut semantic_ms = 0.0;
        let mut lexical_ms = 0.0;
        let mut error: Option<String> = None;

        let (semantic_hits, lexical_hits, fuse_weights, executed): (
            Vec<SimilarityResult>,
            Vec<LexicalHit>,
            FusionWeights,
            ExecutedStrategy,
        ) = match strategy {
            SearchStrategy::Semantic => {
                let branch_limit = base_limit.min(SIMILARITY_LIMIT_CAP);
                let branch_started = Instant::now();
                let outcome = self
                    .semantic_branch(query, threshold, branch_limit, options)
                    .await;
                semantic_ms = elapsed_ms(branch_started);
                match outcome {
                    Ok(hits) => (
                        hits,
                        Vec::new(),
                        single_branch_weights(),
                        ExecutedStrategy::Semantic,
                    ),
                    Err(err) => {
                        warn!(error = %err, "semantic branch failed");
                        error = Some(format!("semantic branch failed: {}", err));
                        (
                            Vec::new(),
                            Vec::new(),
                            single_branch_weights(),
                            ExecutedStrategy::Error,
                        )
                    }
                }
            }
            SearchStrategy::Lexical => {
                let branch_started = Instant::now();
                let outcome = self.lexical_branch(query, base_limit, options).await;
                lexical_ms = elapsed_ms(branch_started);
                match outcome {
                    Ok(hits) => (
                        Vec::new(),
                        hits,
                        single_branch_weights(),
                        ExecutedStrategy::Lexical,
                    ),
                    Err(err) => {
                        warn!(error = %err, "lexical branch failed");
                        error = Some(format!("lexical branch failed: {}", err));
                        (
                            Vec::new(),
                            Vec::new(),
                            single_branch_weights(),
                            ExecutedStrategy::Error,
                        )
                    }
                }
            }
            SearchStrategy::Hybrid => {
                let branch_limit = base_limit.max(HYBRID_BRANCH_LIMIT).min(SIMILARITY_LIMIT_CAP);
                let (semantic_timed, lexical_timed) = tokio::join!(
                    async {
                        let branch_started = Instant::now();
                        let outcome = self
                            .semantic_branch(query, threshold, branch_limit, options)
                            .await;
                        (outcome, elapsed_ms(branch_started))
                    },
                    async {
                        let branch_started = Instant::now();
                        let outcome = self.lexical_branch(query, branch_limit, options).await;
                        (outcome, elapsed_ms(branch_started))
                    },
                );
                let (semantic_outcome, sem_ms) = semantic_timed;
                let (lexical_outcome, lex_ms) = lexical_timed;
                semantic_ms = sem_ms;
                lexical_ms = lex_ms;

                match (semantic_outcome, lexical_outcome) {
                    (Ok(sem), Ok(lex)) => (sem, lex, weights.clone(), ExecutedStrategy::Hybrid),
                    (Ok(sem), Err(err)) => {
                        warn!(error = %err, "lexical branch failed, degrading to semantic");
                        error = Some(format!("lexical branch failed: {}", err));
                        (
                            sem,
                            Vec::new(),
                            single_branch_weights(),
                            ExecutedStrategy::Semantic,
                        )
                    }
                    (Err(err), Ok(lex)) => {
                        warn!(error = %err, "semantic branch failed, degrading to lexical");
                        error = Some(format!("semantic branch failed: {}", err));
                        (
                            Vec::new(),
                            lex,
                            single_branch_weights(),
                            ExecutedStrategy::Lexical,
                        )
                    }
                    (Err(sem_err), Err(lex_err)) => {
                        warn!(
                            semantic = %sem_err,
                            lexical = %lex_err,
                            "both branches failed"
                        );
                        error = Some(format!(
                            "semantic branch failed: {}; lexical branch failed: {}",
                            sem_err, lex_err
                        ));
                        (
                            Vec::new(),
                            Vec::new(),
                            single_branch_weights(),
                            ExecutedStrategy::Error,
                        )
                    }
                }
            }
        };

        let fusion_started = Instant::now();
        let fused = fuse(&semantic_hits, &lexical_hits, &fuse_weights);
        let fusion_ms = elapsed_ms(fusion_started);

        let formatting_started = Instant::now();
        let has_more = fused.len() > offset.saturating_add(limit);
        let mut results: Vec<HybridResult> =
            fused.into_iter().skip(offset).take(limit).collect();
        if options.explain {
            for result in &mut results {
                let explanation = explain_result(result);
                result.explanation = Some(explanation);
            }
        }
        let formatting_ms = elapsed_ms(formatting_started);

        let timings = SearchTimings {
            query_id,
            strategy: executed.label().to_string(),
            analysis_ms,
            semantic_ms,
            lexical_ms,
            fusion_ms,
            formatting_ms,
            total_ms: elapsed_ms(started),
            result_count: results.len(),
        };
        self.metrics.record_search(timings.clone());

        Ok(SearchResponse {
            results,
            strategy: executed,
            has_more,
            query_id,
            metrics: options.include_metrics.then_some(timings),
            error,
        })
    }

    /// Embeds every stored message that lacks a vector.
    ///
    /// Serialized through the generator's keyed lock so concurrent sweeps do
    /// not duplicate model work. Returns the number of messages updated.
    pub async fn reembed_missing(&self) -> Result<usize, SearchError> {
        let _guard = self.generator.bulk_guard("engine:reembed").await;

        let ids = self.store.missing_embedding_ids().await?;
        if ids.is_empty() {
            return Ok(0);
        }
        info!(pending = ids.len(), "re-embedding messages without vectors");

        let mut updated = 0usize;
        for chunk in ids.chunks(self.config.batch_size) {
            let mut batch_ids = Vec::new();
            let mut texts = Vec::new();
            for id in chunk {
                if let Some(message) = self.store.get_message(id).await? {
                    if message.content.trim().is_empty() {
                        continue;
                    }
                    batch_ids.push(id.clone());
                    texts.push(message.content);
                }
            }
            if texts.is_empty() {
                continue;
            }
            let vectors = self.generator.embed_batch(&texts).await.map_err(SearchError::Embedding)?;
            for (id, vector) in batch_ids.iter().zip(vectors) {
                self.store.put_embedding(id, &vector).await?;
                updated += 1;
            }
        }

        info!(updated, "re-embedding sweep complete");
        Ok(updated)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared embedding generator.
    pub fn generator(&self) -> &Arc<EmbeddingGenerator> {
        &self.generator
    }

    /// Rolling search metrics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Timing breakdown for an earlier search call, while it remains in the
    /// bounded history.
    pub fn search_timings(&self, query_id: u64) -> Option<SearchTimings> {
        self.metrics.search_timings(query_id)
    }

    async fn semantic_branch(
        &self,
        query: &str,
        threshold: f32,
        branch_limit: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        let vector = self
            .generator
            .embed_with_fallback(query, self.config.max_retries)
            .await?;
        self.similarity
            .find_similar(
                &vector,
                &SimilarityOptions {
                    limit: branch_limit,
                    threshold,
                    conversation_id: options.conversation_id.clone(),
                    exclude_ids: Vec::new(),
                },
            )
            .await
    }

    async fn lexical_branch(
        &self,
        query: &str,
        branch_limit: usize,
        options: &SearchOptions,
    ) -> Result<Vec<LexicalHit>, SearchError> {
        let parsed = query::parse(query, options.match_mode);
        self.lexical
            .search(
                &parsed,
                &LexicalOptions {
                    conversation_id: options.conversation_id.clone(),
                    start_date: options.start_date,
                    end_date: options.end_date,
                    limit: branch_limit,
                    offset: 0,
                },
            )
            .await
    }

    fn failed_response(
        &self,
        query_id: u64,
        started: Instant,
        analysis_ms: f64,
        message: String,
        options: &SearchOptions,
    ) -> SearchResponse {
        let timings = SearchTimings {
            query_id,
            strategy: ExecutedStrategy::Error.label().to_string(),
            analysis_ms,
            total_ms: elapsed_ms(started),
            ..Default::default()
        };
        self.metrics.record_search(timings.clone());
        SearchResponse {
            results: Vec::new(),
            strategy: ExecutedStrategy::Error,
            has_more: false,
            query_id,
            metrics: options.include_metrics.then_some(timings),
            error: Some(message),
        }
    }
}

fn explain_result(result: &HybridResult) -> String {
    match result.match_type {
        MatchType::Semantic => format!(
            "matched semantically ({:.3})",
            result.scores.semantic.unwrap_or(0.0)
        ),
        MatchType::Lexical => format!(
            "matched lexically ({:.3})",
            result.scores.lexical.unwrap_or(0.0)
        ),
        MatchType::Hybrid => format!(
            "matched semantically ({:.3}) and lexically ({:.3}), combined {:.3}",
            result.scores.semantic.unwrap_or(0.0),
            result.scores.lexical.unwrap_or(0.0),
            result.scores.combined
        ),
    }
}
