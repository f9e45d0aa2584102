//! Model runtime boundary.
//!
//! The embedding model is an external collaborator. Its output arrives as a
//! loosely-shaped tensor; [`ModelOutput`] represents that at the boundary as
//! a tagged union which is validated and converted immediately, so the rest
//! of the engine only handles plain vectors.

use crate::error::EmbedError;
use async_trait::async_trait;

/// Pooling and normalization flags passed through to the model runtime.
#[derive(Debug, Clone, Copy)]
pub struct InferenceOptions {
    /// Mean-pool token embeddings into one vector
    pub mean_pool: bool,
    /// L2-normalize the pooled vector
    pub normalize: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            mean_pool: true,
            normalize: true,
        }
    }
}

/// Raw model output: either one flat vector or a `[rows, dim]` batch.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// Single embedding vector
    Flat(Vec<f32>),
    /// Row-major batch tensor
    Batch {
        /// Number of rows (one per input text)
        rows: usize,
        /// Vector length per row
        dim: usize,
        /// Row-major data, `rows * dim` floats
        data: Vec<f32>,
    },
}

impl ModelOutput {
    /// Converts output from a single-text call into one vector.
    ///
    /// A `[1, dim]` batch is accepted and unwrapped. The vector length is
    /// not checked against the configured dimension here; the generator
    /// adopts the observed dimension with a warning instead of failing.
    pub fn into_vector(self) -> Result<Vec<f32>, EmbedError> {
        match self {
            ModelOutput::Flat(vector) if !vector.is_empty() => Ok(vector),
            ModelOutput::Batch { rows: 1, dim, data } if data.len() == dim && dim > 0 => Ok(data),
            other => Err(EmbedError::ShapeMismatch {
                expected: "a non-empty flat vector".to_string(),
                actual: other.describe(),
            }),
        }
    }

    /// Converts output from a batched call into `expected_rows` vectors of
    /// `expected_dim` floats each.
    ///
    /// Any disagreement is a [`EmbedError::ShapeMismatch`], which the
    /// generator pattern-matches to fall back to per-item calls.
    pub fn into_batch(
        self,
        expected_rows: usize,
        expected_dim: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let expected = format!("[{}, {}]", expected_rows, expected_dim);
        match self {
            ModelOutput::Batch { rows, dim, data }
                if rows == expected_rows
                    && dim == expected_dim
                    && data.len() == rows * dim =>
            {
                Ok(data.chunks(dim).map(|row| row.to_vec()).collect())
            }
            ModelOutput::Flat(vector) if expected_rows == 1 && vector.len() == expected_dim => {
                Ok(vec![vector])
            }
            other => Err(EmbedError::ShapeMismatch {
                expected,
                actual: other.describe(),
            }),
        }
    }

    fn describe(&self) -> String {
        match self {
            ModelOutput::Flat(vector) => format!("flat vector of length {}", vector.len()),
            ModelOutput::Batch { rows, dim, data } => {
                format!("[{}, {}] with {} floats", rows, dim, data.len())
            }
        }
    }
}

/// Locally-hosted embedding model runtime.
///
/// Implementations wrap whatever inference stack is available (ONNX, Candle,
/// a sidecar process). The engine treats this as a black box beyond these
/// operations and applies its own shape validation on every result.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Identifier of the loaded model (checked against the allow-list).
    fn model_id(&self) -> &str;

    /// Loads model weights. Must be idempotent.
    async fn load(&self) -> Result<(), EmbedError>;

    /// Releases model state. Called during generator reset.
    async fn unload(&self) -> Result<(), EmbedError>;

    /// Embeds one normalized text.
    async fn infer(&self, text: &str, options: InferenceOptions)
        -> Result<ModelOutput, EmbedError>;

    /// Embeds a batch of normalized texts in one call.
    async fn infer_batch(
        &self,
        texts: &[String],
        options: InferenceOptions,
    ) -> Result<ModelOutput, EmbedError>;
}
