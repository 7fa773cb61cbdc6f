#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::Path, sync::Arc};

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use tokenizers::{Tokenizer, TruncationParams};

use super::{EMBEDDING_DIM, SentenceEncoder};
use crate::{config::ModelSource, error::LoadFailure, models::ModelLoader, models::hub};

/// Longest input, in tokens, the encoder looks at.
const MAX_TOKENS: usize = 256;

/// BERT sentence encoder with attention-masked mean pooling and L2
/// normalization, as used by sentence-transformers' MiniLM models.
pub struct MiniLmEncoder {
    /// Model weights.
    model:     BertModel,
    /// Word-piece tokenizer.
    tokenizer: Tokenizer,
    /// Inference device.
    device:    Device,
    /// Hub id, for logs.
    name:      String,
    /// Hidden size of the model.
    dimension: usize,
}

impl MiniLmEncoder {
    /// Loads config, tokenizer and weights for `source`.
    pub fn load(source: &ModelSource) -> Result<Self, LoadFailure> {
        let config_path = hub::fetch(source, "config.json")?;
        let tokenizer_path = hub::fetch(source, "tokenizer.json")?;
        let weights_path = hub::fetch(source, "model.safetensors")?;

        Self::from_files(source.model_id(), &config_path, &tokenizer_path, &weights_path)
            .map_err(|err| LoadFailure::Other(format!("{err:#}")))
    }

    /// Builds the encoder from files already on disk.
    pub fn from_files(
        name: &str,
        config_path: &Path,
        tokenizer_path: &Path,
        weights_path: &Path,
    ) -> anyhow::Result<Self> {
        let raw_config = std::fs::read_to_string(config_path)
            .with_context(|| format!("Could not read {}", config_path.display()))?;
        let config: BertConfig =
            serde_json::from_str(&raw_config).context("Could not parse BERT config")?;
        let dimension = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .map(|size| size as usize)
            .unwrap_or(EMBEDDING_DIM);

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Could not load tokenizer {}", tokenizer_path.display()))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(anyhow::Error::msg)?;

        let device = Device::Cpu;
        // SAFETY: the weights file is not modified while it is mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device) }
            .with_context(|| format!("Could not map weights {}", weights_path.display()))?;
        let model = BertModel::load(vb, &config).context("Could not build BERT model")?;

        Ok(Self {
            model,
            tokenizer,
            device,
            name: name.to_string(),
            dimension,
        })
    }
}

impl SentenceEncoder for MiniLmEncoder {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(anyhow::Error::msg)?;

        let ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
        let type_ids = ids.zeros_like()?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;

        let mask = mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;
        let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = pooled.broadcast_div(&norm)?;

        Ok(normalized.squeeze(0)?.to_vec1::<f32>()?)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Loads [`MiniLmEncoder`] from a configured source.
#[derive(Debug, Clone)]
pub struct MiniLmLoader {
    /// Where the model lives.
    source: ModelSource,
}

impl MiniLmLoader {
    /// Creates a loader for `source`.
    pub fn new(source: ModelSource) -> Self {
        Self { source }
    }
}

impl ModelLoader<dyn SentenceEncoder> for MiniLmLoader {
    fn name(&self) -> &str {
        self.source.model_id()
    }

    fn load(&self) -> Result<Arc<dyn SentenceEncoder>, LoadFailure> {
        let encoder = MiniLmEncoder::load(&self.source)?;
        Ok(Arc::new(encoder))
    }
}
