#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Text-to-vector embeddings.
//!
//! [`Embedder`] owns the sentence-embedding model handle. Blank text never
//! reaches the model and always maps to the all-zero vector.

/// Candle implementation of all-MiniLM-L6-v2.
pub mod minilm;

use std::{sync::Arc, time::Duration};

pub use minilm::{MiniLmEncoder, MiniLmLoader};

use crate::{
    config::Config,
    error::EmbeddingError,
    models::{ModelLoader, ModelSlot, RetryPolicy},
};

/// Number of dimensions produced by the reference model.
pub const EMBEDDING_DIM: usize = 384;

/// A loaded sentence-embedding model.
///
/// Encoding is synchronous and CPU bound; [`Embedder`] runs it on the blocking
/// thread pool.
pub trait SentenceEncoder: Send + Sync {
    /// Encodes non-empty text into a dense vector.
    fn encode(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Length of the vectors returned by [`SentenceEncoder::encode`].
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Name of the underlying model.
    fn model_name(&self) -> &str;
}

/// Loader that hands back an encoder constructed elsewhere.
struct Preloaded(Arc<dyn SentenceEncoder>);

impl ModelLoader<dyn SentenceEncoder> for Preloaded {
    fn name(&self) -> &str {
        self.0.model_name()
    }

    fn load(&self) -> Result<Arc<dyn SentenceEncoder>, crate::error::LoadFailure> {
        Ok(Arc::clone(&self.0))
    }
}

/// Returns the all-zero embedding of `dimension` entries.
pub fn zero_embedding(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}

/// Embedding provider backed by a lazily loaded [`SentenceEncoder`].
pub struct Embedder {
    /// Shared model handle.
    slot:   ModelSlot<dyn SentenceEncoder>,
    /// Builds the encoder on first use.
    loader: Arc<dyn ModelLoader<dyn SentenceEncoder>>,
    /// Retry behaviour for the first load.
    retry:  RetryPolicy,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.loader.name())
            .field("slot", &self.slot)
            .finish()
    }
}

impl Embedder {
    /// Creates an embedder that loads its model with `loader` on first use.
    pub fn new(
        loader: Arc<dyn ModelLoader<dyn SentenceEncoder>>,
        retry: RetryPolicy,
        load_wait: Duration,
    ) -> Self {
        Self {
            slot: ModelSlot::new(load_wait),
            loader,
            retry,
        }
    }

    /// Creates an embedder for the configured all-MiniLM model.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(MiniLmLoader::new(config.embedding_model().clone())),
            config.retry(),
            config.load_wait(),
        )
    }

    /// Creates an embedder around an encoder that is already loaded.
    pub fn with_encoder(encoder: Arc<dyn SentenceEncoder>) -> Self {
        Self {
            slot:   ModelSlot::ready(Arc::clone(&encoder), Duration::ZERO),
            loader: Arc::new(Preloaded(encoder)),
            retry:  RetryPolicy::default(),
        }
    }

    /// Returns the encoder, loading it if necessary.
    pub async fn encoder(&self) -> Result<Arc<dyn SentenceEncoder>, EmbeddingError> {
        let model = self
            .slot
            .get_or_load(|| self.retry.load(Arc::clone(&self.loader)))
            .await?;
        Ok(model)
    }

    /// Embeds `text`.
    ///
    /// Blank text yields [`EMBEDDING_DIM`] zeros without touching the model.
    /// Fails only when the model cannot be loaded; a failure inside a single
    /// encode call is logged and degrades to the zero vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Ok(zero_embedding(EMBEDDING_DIM));
        }

        let encoder = self.encoder().await?;
        let dimension = encoder.dimension();
        let owned = text.to_owned();
        let outcome = tokio::task::spawn_blocking(move || encoder.encode(&owned)).await;

        match outcome {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(err)) => {
                tracing::warn!(
                    error = %err,
                    chars = text.len(),
                    "embedding failed, using zero vector"
                );
                Ok(zero_embedding(dimension))
            }
            Err(err) => {
                tracing::warn!(error = %err, "embedding task aborted, using zero vector");
                Ok(zero_embedding(dimension))
            }
        }
    }

    /// Embeds every text in order.
    pub async fn embed_many<I, S>(&self, texts: I) -> Result<Vec<Vec<f32>>, EmbeddingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vectors = Vec::new();
        for text in texts {
            vectors.push(self.embed(text.as_ref()).await?);
        }
        Ok(vectors)
    }
}
