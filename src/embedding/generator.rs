//! Embedding generator wrapping the model runtime.
//!
//! Responsibilities: input validation, text normalization, cache lookups,
//! batch partitioning with per-item fallback, retry with backoff behind the
//! circuit breaker, and the latency-based health heuristic.

use crate::cache::VectorCache;
use crate::config::{EngineConfig, ALLOWED_MODELS};
use crate::error::{ConfigError, EmbedError};
use crate::metrics::LatencyWindow;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::circuit::{CircuitBreaker, CircuitState};
use super::locks::KeyedLocks;
use super::runtime::{InferenceOptions, ModelRuntime};

/// Rolling samples required before the latency heuristic can flag the model.
const MIN_HEALTH_SAMPLES: usize = 5;

/// Health trips once average latency exceeds this multiple of the target.
const HEALTH_LATENCY_MULTIPLIER: f64 = 3.0;

/// Hex characters kept from the content hash when forming cache keys.
const CACHE_KEY_HEX_LEN: usize = 16;

/// Turns text into fixed-length normalized vectors via a local model.
///
/// One generator is constructed per engine instance and shared by reference;
/// there is no ambient global state. All mutable state (cache, circuit,
/// latency window) is safe under concurrent `embed` calls.
pub struct EmbeddingGenerator {
    runtime: Arc<dyn ModelRuntime>,
    config: EngineConfig,
    cache: Mutex<VectorCache>,
    circuit: CircuitBreaker,
    latency: LatencyWindow,
    locks: KeyedLocks,
    initialized: AtomicBool,
    expected_dim: AtomicUsize,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddingGenerator {
    /// Creates a generator. The model is not loaded until
    /// [`initialize`](Self::initialize).
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = VectorCache::new(config.cache_max_entries, config.cache_max_bytes());
        let circuit = CircuitBreaker::new(
            config.circuit_failure_threshold,
            Duration::from_millis(config.circuit_cooldown_ms),
        );
        let expected_dim = AtomicUsize::new(config.embedding_dim);
        Ok(Self {
            runtime,
            config,
            cache: Mutex::new(cache),
            circuit,
            latency: LatencyWindow::new(),
            locks: KeyedLocks::new(),
            initialized: AtomicBool::new(false),
            expected_dim,
            monitor: Mutex::new(None),
        })
    }

    /// Loads the model and runs one warm-up inference. Idempotent: a second
    /// call returns immediately.
    pub async fn initialize(&self) -> Result<(), EmbedError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.locks.acquire("embedder:init").await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let model_id = self.runtime.model_id();
        if !ALLOWED_MODELS.contains(&model_id) {
            return Err(EmbedError::Validation(format!(
                "model '{}' is not in the allow-list",
                model_id
            )));
        }
        if model_id != self.config.model_id {
            warn!(
                configured = %self.config.model_id,
                loaded = %model_id,
                "runtime model differs from configured model"
            );
        }

        self.runtime.load().await?;

        let started = Instant::now();
        let output = self
            .runtime
            .infer("warm up", InferenceOptions::default())
            .await?;
        let vector = output.into_vector()?;
        self.adopt_dimension(vector.len());
        self.latency.record(started.elapsed().as_secs_f64() * 1000.0);

        self.initialized.store(true, Ordering::Release);
        info!(
            model = model_id,
            dim = vector.len(),
            "embedding generator initialized"
        );
        Ok(())
    }

    /// Starts the periodic health/memory monitor.
    ///
    /// The task prunes the latency window, logs cache gauges, and warns when
    /// the health heuristic trips. It holds only a weak reference, so it
    /// stops when the generator is dropped. A second call replaces the
    /// previous task.
    pub fn spawn_monitor(this: &Arc<Self>) {
        let interval_ms = this.config.monitor_interval_ms;
        if interval_ms == 0 {
            return;
        }
        let weak = Arc::downgrade(this);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(generator) = weak.upgrade() else {
                    break;
                };
                generator.latency.prune();
                let (entries, bytes) = generator.cache_stats();
                debug!(
                    cache_entries = entries,
                    cache_bytes = bytes,
                    circuit = ?generator.circuit.state(),
                    "embedding monitor tick"
                );
                if generator.initialized.load(Ordering::Acquire) && !generator.is_healthy() {
                    warn!(
                        avg_latency_ms = ?generator.latency.average(),
                        target_ms = generator.config.performance_target_ms,
                        "embedding latency above health target"
                    );
                }
            }
        });
        let mut slot = this.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Embeds one text, consulting the cache first.
    #[instrument(skip_all, fields(text_len = text.len()))]
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(EmbedError::NotInitialized);
        }
        self.validate_input(text)?;
        let normalized = self.normalize_text(text);
        if normalized.is_empty() {
            return Err(EmbedError::Validation(
                "text is empty after normalization".to_string(),
            ));
        }
        self.embed_normalized(&normalized).await
    }

    /// Embeds many texts, preserving input order.
    ///
    /// Cached texts are served from the cache; the rest are processed in
    /// fixed-size sub-batches with one batched model call each. A batched
    /// call whose output shape disagrees with `[len, dim]` degrades to
    /// per-item calls for that sub-batch.
    #[instrument(skip_all, fields(batch = texts.len()))]
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !self.initialized.load(Ordering::Acquire) {
            return Err(EmbedError::NotInitialized);
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<(usize, String)> = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            self.validate_input(text)
                .map_err(|err| EmbedError::Validation(format!("batch item {}: {}", index, err)))?;
            let normalized = self.normalize_text(text);
            if normalized.is_empty() {
                return Err(EmbedError::Validation(format!(
                    "batch item {} is empty after normalization",
                    index
                )));
            }
            let key = self.cache_key(&normalized);
            let cached = self.cache_get(&key);
            match cached {
                Some(vector) => results[index] = Some(vector),
                None => pending.push((index, normalized)),
            }
        }

        for sub in pending.chunks(self.config.batch_size) {
            let batch_texts: Vec<String> = sub.iter().map(|(_, text)| text.clone()).collect();
            let expected_dim = self.expected_dim.load(Ordering::Relaxed);

            let started = Instant::now();
            let attempt = match self
                .runtime
                .infer_batch(&batch_texts, InferenceOptions::default())
                .await
            {
                Ok(output) => output.into_batch(batch_texts.len(), expected_dim),
                Err(err) => Err(err),
            };

            match attempt {
                Ok(vectors) => {
                    self.latency
                        .record(started.elapsed().as_secs_f64() * 1000.0);
                    for ((index, normalized), mut vector) in sub.iter().zip(vectors) {
                        ensure_unit_norm(&mut vector);
                        self.cache_put(&self.cache_key(normalized), &vector);
                        results[*index] = Some(vector);
                    }
                }
                Err(EmbedError::ShapeMismatch { expected, actual }) => {
                    warn!(
                        %expected,
                        %actual,
                        "batched model output shape mismatch, embedding items individually"
                    );
                    for (index, normalized) in sub {
                        results[*index] = Some(self.embed_normalized(normalized).await?);
                    }
                }
                Err(other) => return Err(other),
            }
        }

        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                EmbedError::ModelUnavailable("batch produced no vector for an input".to_string())
            })
    }

    /// Embeds with retry, backoff, and the circuit-breaker gate.
    ///
    /// While the circuit is open this fails immediately without a model
    /// call. Validation errors are the caller's fault and are never retried.
    /// If the generator looks unhealthy mid-retry, one `reset` is attempted
    /// before the next try.
    pub async fn embed_with_fallback(
        &self,
        text: &str,
        max_retries: u32,
    ) -> Result<Vec<f32>, EmbedError> {
        let mut last_error: Option<EmbedError> = None;
        let mut reset_attempted = false;

        for attempt in 0..=max_retries {
            self.circuit.check()?;

            match self.embed(text).await {
                Ok(vector) => {
                    self.circuit.record_success();
                    return Ok(vector);
                }
                Err(err @ (EmbedError::Validation(_) | EmbedError::NotInitialized)) => {
                    return Err(err);
                }
                Err(err) => {
                    self.circuit.record_failure();
                    warn!(attempt, error = %err, "embedding attempt failed");
                    last_error = Some(err);

                    if attempt == max_retries {
                        break;
                    }
                    if !self.is_healthy() && !reset_attempted {
                        reset_attempted = true;
                        if let Err(reset_err) = self.reset().await {
                            warn!(error = %reset_err, "reset during retry failed");
                        }
                    }
                    let delay_ms = (1_000u64 * 2u64.saturating_pow(attempt)).min(10_000);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| EmbedError::ModelUnavailable("embedding failed".to_string())))
    }

    /// Tears down model state, clears latency metrics and circuit state,
    /// then re-runs initialization. Serialized: concurrent callers await the
    /// in-flight reset.
    pub async fn reset(&self) -> Result<(), EmbedError> {
        let _guard = self.locks.acquire("embedder:reset").await;
        info!("resetting embedding generator");
        self.initialized.store(false, Ordering::Release);
        self.runtime.unload().await?;
        self.latency.clear();
        self.circuit.reset();
        self.initialize().await
    }

    /// Heuristic liveness signal, not a correctness check.
    ///
    /// False when uninitialized, or when the rolling average latency exceeds
    /// a multiple of the performance target after enough samples.
    pub fn is_healthy(&self) -> bool {
        if !self.initialized.load(Ordering::Acquire) {
            return false;
        }
        match self.latency.average() {
            Some(avg) if self.latency.count() >= MIN_HEALTH_SAMPLES => {
                avg <= self.config.performance_target_ms * HEALTH_LATENCY_MULTIPLIER
            }
            _ => true,
        }
    }

    /// Current circuit state.
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }

    /// Rolling average embed latency in milliseconds.
    pub fn avg_latency_ms(&self) -> Option<f64> {
        self.latency.average()
    }

    /// Dimension the generator currently expects from the model.
    pub fn expected_dim(&self) -> usize {
        self.expected_dim.load(Ordering::Relaxed)
    }

    /// `(entries, estimated_bytes)` of the vector cache.
    pub fn cache_stats(&self) -> (usize, usize) {
        match self.cache.lock() {
            Ok(cache) => (cache.len(), cache.memory_bytes()),
            Err(_) => (0, 0),
        }
    }

    /// Serializes a named bulk operation (e.g. a re-embedding sweep) against
    /// other holders of the same key.
    pub async fn bulk_guard(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.locks.acquire(key).await
    }

    fn validate_input(&self, text: &str) -> Result<(), EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::Validation("text is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.config.max_input_chars {
            return Err(EmbedError::Validation(format!(
                "text is {} characters, maximum is {}",
                chars, self.config.max_input_chars
            )));
        }
        Ok(())
    }

    /// Strips control characters, collapses whitespace, and truncates to the
    /// embed budget preferring a word boundary.
    fn normalize_text(&self, text: &str) -> String {
        let cleaned: String = text
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        truncate_at_word_boundary(&collapsed, self.config.max_embed_chars)
    }

    fn cache_key(&self, normalized: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(self.runtime.model_id().as_bytes());
        let digest = hasher.finalize();
        digest
            .iter()
            .take(CACHE_KEY_HEX_LEN / 2)
            .map(|byte| format!("{:02x}", byte))
            .collect()
    }

    fn cache_get(&self, key: &str) -> Option<Vec<f32>> {
        if !self.config.cache_enabled {
            return None;
        }
        match self.cache.lock() {
            Ok(mut cache) => cache.get(key),
            Err(_) => None,
        }
    }

    fn cache_put(&self, key: &str, vector: &[f32]) {
        if !self.config.cache_enabled {
            return;
        }
        // A poisoned cache must never block a search from returning.
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, vector.to_vec());
        } else {
            warn!("vector cache lock poisoned, skipping insert");
        }
    }

    async fn embed_normalized(&self, normalized: &str) -> Result<Vec<f32>, EmbedError> {
        let key = self.cache_key(normalized);
        if let Some(vector) = self.cache_get(&key) {
            debug!(key = %key, "vector cache hit");
            return Ok(vector);
        }

        let started = Instant::now();
        let output = self
            .runtime
            .infer(normalized, InferenceOptions::default())
            .await?;
        let mut vector = output.into_vector()?;

        let expected = self.expected_dim.load(Ordering::Relaxed);
        if vector.len() != expected {
            warn!(
                expected,
                observed = vector.len(),
                "model returned unexpected dimension, adopting observed value"
            );
            self.adopt_dimension(vector.len());
        }
        ensure_unit_norm(&mut vector);

        self.latency
            .record(started.elapsed().as_secs_f64() * 1000.0);
        self.cache_put(&key, &vector);
        Ok(vector)
    }

    fn adopt_dimension(&self, dim: usize) {
        self.expected_dim.store(dim, Ordering::Relaxed);
    }
}

impl Drop for EmbeddingGenerator {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.monitor.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Renormalizes a vector whose magnitude drifted from 1.0.
///
/// Stored similarity math assumes unit vectors, so normalization is enforced
/// here at write time rather than trusted at read time. Zero vectors are
/// left alone.
fn ensure_unit_norm(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 && (magnitude - 1.0).abs() > 1e-3 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Truncates to at most `max_chars` characters, backing up to the last space
/// when one falls in the final quarter of the budget.
fn truncate_at_word_boundary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    if let Some(space_at) = cut.rfind(' ') {
        if space_at >= cut.len() * 3 / 4 {
            cut.truncate(space_at);
        }
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubModelRuntime;

    fn test_config() -> EngineConfig {
        EngineConfig {
            embedding_dim: 8,
            circuit_failure_threshold: 3,
            circuit_cooldown_ms: 50,
            monitor_interval_ms: 0,
            ..Default::default()
        }
    }

    async fn ready_generator(runtime: Arc<StubModelRuntime>) -> EmbeddingGenerator {
        let generator = EmbeddingGenerator::new(runtime, test_config()).unwrap();
        generator.initialize().await.unwrap();
        generator
    }

    #[tokio::test]
    async fn test_embed_before_initialize_fails() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = EmbeddingGenerator::new(runtime, test_config()).unwrap();
        assert!(matches!(
            generator.embed("hello").await,
            Err(EmbedError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_embed_returns_unit_vector() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime).await;

        let vector = generator.embed("hello world").await.unwrap();
        assert_eq!(vector.len(), 8);
        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;
        generator.initialize().await.unwrap();
        generator.initialize().await.unwrap();
        assert_eq!(runtime.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_model_rejected_at_initialize() {
        let runtime = Arc::new(StubModelRuntime::new(8).with_model_id("not-a-real-model"));
        let generator = EmbeddingGenerator::new(runtime, test_config()).unwrap();
        assert!(matches!(
            generator.initialize().await,
            Err(EmbedError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_avoids_second_inference() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;

        let calls_after_init = runtime.infer_calls();
        let first = generator.embed("cache me").await.unwrap();
        let second = generator.embed("cache me").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.infer_calls(), calls_after_init + 1);
    }

    #[tokio::test]
    async fn test_normalization_affects_cache_key() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;

        let calls_after_init = runtime.infer_calls();
        let a = generator.embed("hello   world").await.unwrap();
        let b = generator.embed("hello world").await.unwrap();
        // Whitespace collapses to the same normalized text, so one model call.
        assert_eq!(a, b);
        assert_eq!(runtime.infer_calls(), calls_after_init + 1);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime).await;
        assert!(matches!(
            generator.embed("   ").await,
            Err(EmbedError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_over_long_text_rejected() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime).await;
        let long = "a".repeat(100_001);
        assert!(matches!(
            generator.embed(&long).await,
            Err(EmbedError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_dimension_adoption() {
        // Config says 16, model produces 8: the observed value is adopted.
        let runtime = Arc::new(StubModelRuntime::new(8));
        let config = EngineConfig {
            embedding_dim: 16,
            monitor_interval_ms: 0,
            ..Default::default()
        };
        let generator = EmbeddingGenerator::new(runtime, config).unwrap();
        generator.initialize().await.unwrap();
        let vector = generator.embed("adopt me").await.unwrap();
        assert_eq!(vector.len(), 8);
        assert_eq!(generator.expected_dim(), 8);
    }

    #[tokio::test]
    async fn test_embed_batch_empty_skips_model() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;
        let result = generator.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(runtime.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;

        let texts: Vec<String> = (0..5).map(|i| format!("text number {}", i)).collect();
        // Warm one entry so the batch mixes cache hits and misses.
        let warmed = generator.embed(&texts[2]).await.unwrap();

        let vectors = generator.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[2], warmed);
        for (i, text) in texts.iter().enumerate() {
            let individual = generator.embed(text).await.unwrap();
            assert_eq!(vectors[i], individual, "order broken at index {}", i);
        }
    }

    #[tokio::test]
    async fn test_embed_batch_shape_mismatch_falls_back() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;

        runtime.set_batch_shape_broken(true);
        let texts: Vec<String> = (0..3).map(|i| format!("fallback {}", i)).collect();
        let vectors = generator.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        // Fallback produced the same vectors as individual embedding.
        for (i, text) in texts.iter().enumerate() {
            let individual = generator.embed(text).await.unwrap();
            assert_eq!(vectors[i], individual);
        }
        assert!(runtime.batch_calls() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_exhausts_retries() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;

        runtime.fail_next(10);
        let result = generator.embed_with_fallback("doomed", 2).await;
        assert!(matches!(result, Err(EmbedError::ModelUnavailable(_))));
        assert_eq!(generator.circuit_state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_without_model_call() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;

        runtime.fail_next(10);
        let _ = generator.embed_with_fallback("doomed", 2).await;
        assert_eq!(generator.circuit_state(), CircuitState::Open);

        let calls_before = runtime.infer_calls();
        let result = generator.embed_with_fallback("still doomed", 2).await;
        assert!(matches!(result, Err(EmbedError::ModelUnavailable(_))));
        assert_eq!(runtime.infer_calls(), calls_before);
    }

    #[tokio::test]
    async fn test_circuit_recovers_after_cooldown() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let config = EngineConfig {
            embedding_dim: 8,
            circuit_failure_threshold: 1,
            circuit_cooldown_ms: 20,
            max_retries: 0,
            monitor_interval_ms: 0,
            ..Default::default()
        };
        let generator = EmbeddingGenerator::new(runtime.clone(), config).unwrap();
        generator.initialize().await.unwrap();

        runtime.fail_next(1);
        assert!(generator.embed_with_fallback("x", 0).await.is_err());
        assert_eq!(generator.circuit_state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(generator.circuit_state(), CircuitState::HalfOpen);
        // Probe succeeds and the circuit closes.
        assert!(generator.embed_with_fallback("x", 0).await.is_ok());
        assert_eq!(generator.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_validation_error_not_retried() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;
        let calls_before = runtime.infer_calls();
        let result = generator.embed_with_fallback("", 5).await;
        assert!(matches!(result, Err(EmbedError::Validation(_))));
        assert_eq!(runtime.infer_calls(), calls_before);
    }

    #[tokio::test]
    async fn test_reset_reloads_model() {
        let runtime = Arc::new(StubModelRuntime::new(8));
        let generator = ready_generator(runtime.clone()).await;
        assert_eq!(runtime.load_calls(), 1);

        generator.reset().await.unwrap();
        assert_eq!(runtime.load_calls(), 2);
        assert_eq!(generator.circuit_state(), CircuitState::Closed);
        assert!(generator.embed("after reset").await.is_ok());
    }

    #[test]
    fn test_truncate_prefers_word_boundary() {
        let text = "alpha beta gamma delta";
        let cut = truncate_at_word_boundary(text, 18);
        assert_eq!(cut, "alpha beta gamma");
    }

    #[test]
    fn test_truncate_hard_cuts_unbroken_text() {
        let text = "a".repeat(100);
        let cut = truncate_at_word_boundary(&text, 10);
        assert_eq!(cut.len(), 10);
    }

    #[test]
    fn test_ensure_unit_norm() {
        let mut vector = vec![3.0, 4.0];
        ensure_unit_norm(&mut vector);
        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);

        let mut zero = vec![0.0, 0.0];
        ensure_unit_norm(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
