#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Text extraction from uploaded answer files.
//!
//! PDFs are read page by page with `lopdf`. Images go through a handwriting
//! recognizer that is loaded once, on first use, and then shared.

/// PDF text extraction.
pub mod pdf;
/// Candle TrOCR handwriting recognizer.
pub mod trocr;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use image::{DynamicImage, ImageReader};
pub use trocr::{TrOcrLoader, TrOcrRecognizer};

use crate::{
    config::Config,
    error::{ExtractionError, LoadFailure},
    models::{ModelLoader, ModelSlot, RetryPolicy},
};

/// File extensions routed to the OCR path.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tif", "tiff"];

/// Kind of an uploaded answer file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// A PDF document with a text layer.
    Pdf,
    /// A photo or scan of handwriting.
    Image,
}

impl FileKind {
    /// Infers the kind from the file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Result<Self, ExtractionError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            ext if IMAGE_EXTENSIONS.contains(&ext) => Ok(FileKind::Image),
            _ => Err(ExtractionError::UnsupportedKind {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Pdf => write!(f, "pdf"),
            FileKind::Image => write!(f, "image"),
        }
    }
}

/// A loaded handwriting OCR model.
pub trait HandwritingRecognizer: Send + Sync {
    /// Reads the handwriting in `image` as one line of text.
    fn recognize(&self, image: &DynamicImage) -> anyhow::Result<String>;

    /// Name of the underlying model.
    fn model_name(&self) -> &str;
}

/// Loader that hands back a recognizer constructed elsewhere.
struct Preloaded(Arc<dyn HandwritingRecognizer>);

impl ModelLoader<dyn HandwritingRecognizer> for Preloaded {
    fn name(&self) -> &str {
        self.0.model_name()
    }

    fn load(&self) -> Result<Arc<dyn HandwritingRecognizer>, LoadFailure> {
        Ok(Arc::clone(&self.0))
    }
}

/// Turns answer files into plain text.
pub struct TextExtractor {
    /// Shared OCR model handle.
    slot:   ModelSlot<dyn HandwritingRecognizer>,
    /// Builds the recognizer on first image.
    loader: Arc<dyn ModelLoader<dyn HandwritingRecognizer>>,
    /// Retry behaviour for the first load.
    retry:  RetryPolicy,
}

impl std::fmt::Debug for TextExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextExtractor")
            .field("ocr_model", &self.loader.name())
            .field("slot", &self.slot)
            .finish()
    }
}

impl TextExtractor {
    /// Creates an extractor that loads its OCR model with `loader` when the
    /// first image arrives.
    pub fn new(
        loader: Arc<dyn ModelLoader<dyn HandwritingRecognizer>>,
        retry: RetryPolicy,
        load_wait: Duration,
    ) -> Self {
        Self {
            slot: ModelSlot::new(load_wait),
            loader,
            retry,
        }
    }

    /// Creates an extractor for the configured TrOCR model.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(TrOcrLoader::new(
                config.ocr_model().clone(),
                config.ocr_tokenizer().clone(),
            )),
            config.retry(),
            config.load_wait(),
        )
    }

    /// Creates an extractor around a recognizer that is already loaded.
    pub fn with_recognizer(recognizer: Arc<dyn HandwritingRecognizer>) -> Self {
        Self {
            slot:   ModelSlot::ready(Arc::clone(&recognizer), Duration::ZERO),
            loader: Arc::new(Preloaded(recognizer)),
            retry:  RetryPolicy::default(),
        }
    }

    /// Extracts text from `path`, inferring its kind from the extension.
    pub async fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        if !path.is_file() {
            return Err(ExtractionError::MissingFile(path.to_path_buf()));
        }
        let kind = FileKind::from_path(path)?;
        self.extract(path, kind).await
    }

    /// Extracts text from `path`, treating it as `kind`.
    pub async fn extract(&self, path: &Path, kind: FileKind) -> Result<String, ExtractionError> {
        if !path.is_file() {
            return Err(ExtractionError::MissingFile(path.to_path_buf()));
        }

        let owned = path.to_path_buf();
        let text = match kind {
            FileKind::Pdf => {
                run_blocking(path, move || pdf::extract_pdf_text(&owned)).await??
            }
            FileKind::Image => {
                let recognizer = self
                    .slot
                    .get_or_load(|| self.retry.load(Arc::clone(&self.loader)))
                    .await?;
                run_blocking(path, move || recognize_file(recognizer.as_ref(), &owned)).await??
            }
        };

        tracing::debug!(path = %path.display(), %kind, chars = text.len(), "extracted text");
        Ok(text)
    }
}

/// Decodes the image at `path` and runs handwriting recognition on it.
fn recognize_file(
    recognizer: &dyn HandwritingRecognizer,
    path: &Path,
) -> Result<String, ExtractionError> {
    let decode_error = |message: String| ExtractionError::Decode {
        path: path.to_path_buf(),
        message,
    };
    let image = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| decode_error(err.to_string()))?
        .decode()
        .map_err(|err| decode_error(err.to_string()))?;

    recognizer
        .recognize(&image)
        .map(|line| line.trim().to_string())
        .map_err(|err| decode_error(format!("{err:#}")))
}

/// Runs `work` on the blocking pool, turning a lost task into a decode error.
async fn run_blocking<T, F>(path: &Path, work: F) -> Result<T, ExtractionError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ExtractionError::Decode {
            path:    PathBuf::from(path),
            message: format!("extraction task failed: {err}"),
        })
}
