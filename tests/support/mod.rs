//! Deterministic stand-ins for the real models, shared by the integration
//! tests. Nothing here downloads anything.

#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use grademate::{
    embedding::{EMBEDDING_DIM, Embedder, SentenceEncoder},
    error::LoadFailure,
    extract::{HandwritingRecognizer, TextExtractor},
    models::{ModelLoader, RetryPolicy},
};
use image::DynamicImage;
use lopdf::{Document, Object, Stream, content::Content, content::Operation, dictionary};

/// Bag-of-words encoder: each lowercase word bumps one hashed dimension.
#[derive(Debug, Default)]
pub struct HashEncoder {
    pub calls: AtomicUsize,
}

impl HashEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// FNV-1a, so the vectors are stable across runs and platforms.
fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl SentenceEncoder for HashEncoder {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let slot = (fnv1a(&word.to_lowercase()) % EMBEDDING_DIM as u64) as usize;
            vector[slot] += 1.0;
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "hash-bag-of-words"
    }
}

/// Encoder whose every call fails.
#[derive(Debug, Default)]
pub struct BrokenEncoder;

impl SentenceEncoder for BrokenEncoder {
    fn encode(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("tensor shape mismatch")
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

/// Loader that counts how often it runs, optionally sleeps, and can be told
/// to fail a number of times first.
pub struct CountingLoader {
    pub loads:    AtomicUsize,
    pub delay:    Duration,
    pub failures: usize,
    pub network:  bool,
}

impl CountingLoader {
    pub fn new(delay: Duration) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            delay,
            failures: 0,
            network: false,
        }
    }

    pub fn failing(failures: usize, network: bool) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failures,
            network,
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader<dyn SentenceEncoder> for CountingLoader {
    fn name(&self) -> &str {
        "counting"
    }

    fn load(&self) -> Result<Arc<dyn SentenceEncoder>, LoadFailure> {
        let attempt = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        std::thread::sleep(self.delay);
        if attempt <= self.failures {
            return Err(if self.network {
                LoadFailure::Connectivity("dns error: no route to host".into())
            } else {
                LoadFailure::Other("safetensors header is corrupt".into())
            });
        }
        Ok(Arc::new(HashEncoder::new()))
    }
}

/// Builds an embedder around `loader` with short retry pauses.
pub fn embedder_with_loader(
    loader: Arc<CountingLoader>,
    attempts: u32,
    load_wait: Duration,
) -> Embedder {
    let loader: Arc<dyn ModelLoader<dyn SentenceEncoder>> = loader;
    Embedder::new(
        loader,
        RetryPolicy::new(attempts, Duration::from_millis(10)),
        load_wait,
    )
}

/// Embedder backed by the hashing encoder.
pub fn hash_embedder() -> Arc<Embedder> {
    Arc::new(Embedder::with_encoder(Arc::new(HashEncoder::new())))
}

/// Recognizer that always reads the same line.
#[derive(Debug)]
pub struct FixedRecognizer {
    pub line:  String,
    pub calls: AtomicUsize,
}

impl FixedRecognizer {
    pub fn new(line: &str) -> Self {
        Self {
            line:  line.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl HandwritingRecognizer for FixedRecognizer {
    fn recognize(&self, _image: &DynamicImage) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("  {}\n", self.line))
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Extractor whose OCR path reads `line` from every image.
pub fn extractor_reading(line: &str) -> Arc<TextExtractor> {
    Arc::new(TextExtractor::with_recognizer(Arc::new(FixedRecognizer::new(line))))
}

/// Writes a small PNG to `path`.
pub fn write_png(path: &Path) {
    let image = image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]));
    image
        .save_with_format(path, image::ImageFormat::Png)
        .expect("write png");
}

/// Writes a PDF with one page per entry of `pages`, each showing its text.
pub fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 14.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id =
            doc.add_object(Stream::new(dictionary! {}, content.encode().expect("encode")));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save pdf");
}
