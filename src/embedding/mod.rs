//! Embedding generation with caching, batching, and failure isolation.
//!
//! The model itself lives behind the [`ModelRuntime`] trait - an external
//! collaborator that accepts normalized text and returns either a flat
//! vector or a batch tensor. Everything on this side of the boundary only
//! ever sees strongly-typed `Vec<f32>` vectors:
//!
//! - [`EmbeddingGenerator`] validates and normalizes input, consults the
//!   LRU [`VectorCache`](crate::cache::VectorCache), batches uncached texts,
//!   and degrades batch calls to per-item calls on shape mismatch.
//! - [`CircuitBreaker`] stops calling a failing model for a cooldown period;
//!   `embed_with_fallback` adds retry with exponential backoff on top.
//! - [`KeyedLocks`] serializes non-idempotent bulk operations (reset,
//!   re-embedding sweeps) per logical key; ordinary embed calls run
//!   concurrently and rely only on the cache's own consistency.

mod circuit;
mod generator;
mod locks;
mod runtime;

pub use circuit::{CircuitBreaker, CircuitState};
pub use generator::EmbeddingGenerator;
pub use locks::KeyedLocks;
pub use runtime::{InferenceOptions, ModelOutput, ModelRuntime};
