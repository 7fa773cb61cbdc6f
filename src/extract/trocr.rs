#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{trocr, vit};
use image::{DynamicImage, imageops::FilterType};
use tokenizers::Tokenizer;

use super::HandwritingRecognizer;
use crate::{config::ModelSource, error::LoadFailure, models::ModelLoader, models::hub};

/// Side length of the square input expected by the ViT encoder.
const IMAGE_SIZE: u32 = 384;

/// Upper bound on generated tokens for one line of handwriting.
const MAX_NEW_TOKENS: usize = 256;

/// Layout of a TrOCR `config.json`.
#[derive(Debug, Clone, serde::Deserialize)]
struct TrOcrConfig {
    /// Vision encoder settings.
    encoder: vit::Config,
    /// Text decoder settings.
    decoder: trocr::TrOCRConfig,
}

/// Handwriting recognizer built on a TrOCR vision encoder-decoder model.
pub struct TrOcrRecognizer {
    /// Model weights; decoding mutates the KV cache.
    model:     Mutex<trocr::TrOCRModel>,
    /// Decoder vocabulary.
    tokenizer: Tokenizer,
    /// Token that starts decoding.
    start_id:  u32,
    /// Token that ends decoding.
    eos_id:    u32,
    /// Inference device.
    device:    Device,
    /// Hub id, for logs.
    name:      String,
}

impl TrOcrRecognizer {
    /// Loads weights from `model` and the decoder vocabulary from `tokenizer`.
    pub fn load(model: &ModelSource, tokenizer: &ModelSource) -> Result<Self, LoadFailure> {
        let config_path = hub::fetch(model, "config.json")?;
        let weights_path = hub::fetch(model, "model.safetensors")?;
        let tokenizer_path = hub::fetch(tokenizer, "tokenizer.json")?;

        Self::from_files(model.model_id(), &config_path, &weights_path, &tokenizer_path)
            .map_err(|err| LoadFailure::Other(format!("{err:#}")))
    }

    /// Builds the recognizer from files already on disk.
    pub fn from_files(
        name: &str,
        config_path: &std::path::Path,
        weights_path: &std::path::Path,
        tokenizer_path: &std::path::Path,
    ) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(config_path)
            .with_context(|| format!("Could not read {}", config_path.display()))?;
        let config: TrOcrConfig =
            serde_json::from_str(&raw).context("Could not parse TrOCR config")?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Could not load tokenizer {}", tokenizer_path.display()))?;

        let device = Device::Cpu;
        // SAFETY: the weights file is not modified while it is mapped.
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device) }
                .with_context(|| format!("Could not map weights {}", weights_path.display()))?;
        let model = trocr::TrOCRModel::new(&config.encoder, &config.decoder, vb)
            .context("Could not build TrOCR model")?;

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            start_id: config.decoder.decoder_start_token_id,
            eos_id: config.decoder.eos_token_id,
            device,
            name: name.to_string(),
        })
    }

    /// Resizes to the encoder resolution and normalizes pixels to `[-1, 1]`.
    fn pixel_values(&self, image: &DynamicImage) -> anyhow::Result<Tensor> {
        let rgb = image
            .resize_exact(IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle)
            .to_rgb8();
        let side = IMAGE_SIZE as usize;
        let pixels = Tensor::from_vec(rgb.into_raw(), (side, side, 3), &self.device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(1.0 / 127.5, -1.0)?;
        Ok(pixels.unsqueeze(0)?)
    }
}

impl HandwritingRecognizer for TrOcrRecognizer {
    fn recognize(&self, image: &DynamicImage) -> anyhow::Result<String> {
        let pixels = self.pixel_values(image)?;
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("OCR model lock poisoned"))?;
        model.reset_kv_cache();

        let encoded = model.encoder().forward(&pixels)?;

        let mut tokens = vec![self.start_id];
        for step in 0..MAX_NEW_TOKENS {
            let start = if step == 0 { 0 } else { tokens.len() - 1 };
            let input = Tensor::new(&tokens[start..], &self.device)?.unsqueeze(0)?;
            let logits = model.decode(&input, &encoded, start)?.squeeze(0)?;
            let last = logits.get(logits.dim(0)? - 1)?;
            let next = last.argmax(0)?.to_scalar::<u32>()?;
            if next == self.eos_id {
                break;
            }
            tokens.push(next);
        }

        let text = self
            .tokenizer
            .decode(&tokens, true)
            .map_err(anyhow::Error::msg)?;
        Ok(text.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Loads [`TrOcrRecognizer`] from configured sources.
#[derive(Debug, Clone)]
pub struct TrOcrLoader {
    /// Vision encoder-decoder weights.
    model:     ModelSource,
    /// Decoder tokenizer.
    tokenizer: ModelSource,
}

impl TrOcrLoader {
    /// Creates a loader for the given model and tokenizer sources.
    pub fn new(model: ModelSource, tokenizer: ModelSource) -> Self {
        Self { model, tokenizer }
    }
}

impl ModelLoader<dyn HandwritingRecognizer> for TrOcrLoader {
    fn name(&self) -> &str {
        self.model.model_id()
    }

    fn load(&self) -> Result<Arc<dyn HandwritingRecognizer>, LoadFailure> {
        let recognizer = TrOcrRecognizer::load(&self.model, &self.tokenizer)?;
        Ok(Arc::new(recognizer))
    }
}
