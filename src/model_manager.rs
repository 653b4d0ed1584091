use candle_core::{Device, Tensor};
use parking_lot::Mutex;
use pylate_rs::ColBERT;

use crate::{
    embedding::{Embedder, Vector, l2_normalize},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "RAGNOVA_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
///
/// ColBERT produces one embedding per token. They are sum-pooled and
/// L2-normalized into a single vector per text, so the output dimension is
/// the model's token embedding dimension.
pub struct ModelManager {
    model: Mutex<Option<ColBERT>>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `RAGNOVA_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`lightonai/GTE-ModernColBERT-v1`)
    ///
    /// The model is not loaded until the first call to `embed_batch`.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self::with_model_id(model_id)
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: Mutex::new(None),
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().is_some()
    }

    fn load(&self) -> Result<ColBERT> {
        tracing::info!(model = %self.model_id, "loading embedding model");
        let loaded: std::result::Result<ColBERT, _> =
            ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into();
        loaded.map_err(|e| {
            Error::EmbeddingUnavailable(format!(
                "failed to load {}: {e}",
                self.model_id
            ))
        })
    }

    /// Encodes texts into token embeddings of shape `[batch, tokens, dim]`.
    fn encode(&self, texts: &[String]) -> Result<Tensor> {
        let mut guard = self.model.lock();
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let Some(model) = guard.as_mut() else {
            return Err(Error::EmbeddingUnavailable(
                "model not loaded".to_string(),
            ));
        };
        model
            .encode(texts, false)
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))
    }
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::EmbeddingUnavailable(format!("tensor operation failed: {e}"))
}

/// Pool `[batch, tokens, dim]` token embeddings into `batch` unit vectors.
fn pool_tokens(embeddings: &Tensor) -> Result<Vec<Vector>> {
    let mut pooled = embeddings
        .sum(1)
        .map_err(map_candle_err)?
        .to_vec2::<f32>()
        .map_err(map_candle_err)?;
    for vector in &mut pooled {
        l2_normalize(vector);
    }
    Ok(pooled)
}

impl Embedder for ModelManager {
    fn name(&self) -> &str {
        &self.model_id
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.encode(texts)?;
        let vectors = pool_tokens(&embeddings)?;
        if vectors.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "model returned {} embeddings for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}
