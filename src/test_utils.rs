//! Deterministic stubs for exercising the engine without a real model.
//!
//! [`StubModelRuntime`] produces bag-of-words pseudo-embeddings: each word
//! hashes to one dimension, so texts sharing words get similar vectors.
//! That is enough for ranking assertions while staying fully deterministic.
//! Failure injection switches cover the retry, circuit-breaker, and batch
//! fallback paths.

use crate::embedding::{InferenceOptions, ModelOutput, ModelRuntime};
use crate::error::EmbedError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// FNV-1a hash, enough to spread words across dimensions.
fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Deterministic unit-length pseudo-embedding of `text`.
///
/// Useful for seeding store fixtures with vectors that agree with what
/// [`StubModelRuntime`] would produce for the same text.
pub fn stub_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    for word in text.to_lowercase().split_whitespace() {
        let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if cleaned.is_empty() {
            continue;
        }
        let index = (fnv1a(&cleaned) % dim as u64) as usize;
        vector[index] += 1.0;
    }
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude == 0.0 {
        vector[0] = 1.0;
    } else {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
    vector
}

/// In-process [`ModelRuntime`] with failure injection.
pub struct StubModelRuntime {
    model_id: String,
    dim: usize,
    loaded: AtomicBool,
    fail_remaining: AtomicU32,
    batch_shape_broken: AtomicBool,
    infer_calls: AtomicU64,
    batch_calls: AtomicU64,
    load_calls: AtomicU64,
}

impl StubModelRuntime {
    /// Creates a runtime producing `dim`-length vectors under an allowed
    /// model id.
    pub fn new(dim: usize) -> Self {
        Self {
            model_id: "all-MiniLM-L6-v2".to_string(),
            dim,
            loaded: AtomicBool::new(false),
            fail_remaining: AtomicU32::new(0),
            batch_shape_broken: AtomicBool::new(false),
            infer_calls: AtomicU64::new(0),
            batch_calls: AtomicU64::new(0),
            load_calls: AtomicU64::new(0),
        }
    }

    /// Overrides the reported model id (e.g. to test the allow-list).
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Makes the next `n` inference calls fail with `ModelUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Makes batched calls return a tensor of the wrong shape.
    pub fn set_batch_shape_broken(&self, broken: bool) {
        self.batch_shape_broken.store(broken, Ordering::SeqCst);
    }

    /// Single-text inference calls so far.
    pub fn infer_calls(&self) -> u64 {
        self.infer_calls.load(Ordering::SeqCst)
    }

    /// Batched inference calls so far.
    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Load calls so far.
    pub fn load_calls(&self) -> u64 {
        self.load_calls.load(Ordering::SeqCst)
    }

    fn consume_failure(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_loaded(&self) -> Result<(), EmbedError> {
        if self.loaded.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EmbedError::ModelUnavailable("model not loaded".to_string()))
        }
    }
}

#[async_trait]
impl ModelRuntime for StubModelRuntime {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn load(&self) -> Result<(), EmbedError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) -> Result<(), EmbedError> {
        self.loaded.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn infer(
        &self,
        text: &str,
        _options: InferenceOptions,
    ) -> Result<ModelOutput, EmbedError> {
        self.infer_calls.fetch_add(1, Ordering::SeqCst);
        self.check_loaded()?;
        if self.consume_failure() {
            return Err(EmbedError::ModelUnavailable(
                "simulated model failure".to_string(),
            ));
        }
        Ok(ModelOutput::Flat(stub_embedding(text, self.dim)))
    }

    async fn infer_batch(
        &self,
        texts: &[String],
        _options: InferenceOptions,
    ) -> Result<ModelOutput, EmbedError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_loaded()?;
        if self.consume_failure() {
            return Err(EmbedError::ModelUnavailable(
                "simulated model failure".to_string(),
            ));
        }
        if self.batch_shape_broken.load(Ordering::SeqCst) {
            let wrong_dim = self.dim + 1;
            return Ok(ModelOutput::Batch {
                rows: texts.len(),
                dim: wrong_dim,
                data: vec![0.1; texts.len() * wrong_dim],
            });
        }
        let data: Vec<f32> = texts
            .iter()
            .flat_map(|text| stub_embedding(text, self.dim))
            .collect();
        Ok(ModelOutput::Batch {
            rows: texts.len(),
            dim: self.dim,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_embedding_is_deterministic_and_normalized() {
        let a = stub_embedding("quick brown fox", 16);
        let b = stub_embedding("quick brown fox", 16);
        assert_eq!(a, b);
        let magnitude: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_increase_similarity() {
        let dim = 32;
        let a = stub_embedding("the deployment failed today", dim);
        let similar = stub_embedding("deployment failed again", dim);
        let unrelated = stub_embedding("lunch plans friday", dim);

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&a, &similar) > dot(&a, &unrelated));
    }

    #[test]
    fn test_empty_text_still_produces_unit_vector() {
        let v = stub_embedding("???", 8);
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_fail_next_consumes_budget() {
        let runtime = StubModelRuntime::new(4);
        runtime.load().await.unwrap();
        runtime.fail_next(1);
        assert!(runtime.infer("x", InferenceOptions::default()).await.is_err());
        assert!(runtime.infer("x", InferenceOptions::default()).await.is_ok());
    }
}
