//! FastEmbed-based local embedding generator.
//!
//! Implements the `Embedder` trait from `mnemos-core` with ONNX runtime
//! inference. The model runs on the blocking thread pool; one call embeds
//! the whole batch.

use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use mnemos_core::memory::embedder::Embedder;
use mnemos_types::error::EmbedError;

/// Supported model names and their output widths.
const MODELS: &[(&str, EmbeddingModel, usize)] = &[
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768),
    ("all-minilm-l6-v2", EmbeddingModel::AllMiniLML6V2, 384),
];

/// Default model, matching the default `storage.embedding_dimension`.
pub const DEFAULT_MODEL: &str = "bge-small-en-v1.5";

/// Local embedder backed by a fastembed `TextEmbedding` model.
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Load `model_name`, downloading it into the fastembed cache on first use.
    pub fn new(model_name: &str) -> Result<Self, EmbedError> {
        let (name, model, dimension) = MODELS
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(model_name))
            .ok_or_else(|| {
                let supported: Vec<&str> = MODELS.iter().map(|(name, _, _)| *name).collect();
                EmbedError::Provider(format!(
                    "unsupported embedding model '{model_name}', supported: {}",
                    supported.join(", ")
                ))
            })?;

        let text_embedding = TextEmbedding::try_new(InitOptions::new(model.clone()))
            .map_err(|e| EmbedError::Provider(format!("failed to load {name}: {e}")))?;

        tracing::info!(model = %name, dimension = *dimension, "Initialized local embedder");

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name: (*name).to_string(),
            dimension: *dimension,
        })
    }
}

impl Embedder for FastEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let batch = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| EmbedError::Provider(format!("embedding model lock poisoned: {e}")))?;
            model
                .embed(batch, None)
                .map_err(|e| EmbedError::Provider(format!("embedding failed: {e}")))
        })
        .await
        .map_err(|e| EmbedError::Provider(format!("embedding task failed: {e}")))?
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
