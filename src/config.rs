#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::PathBuf, time::Duration};

use bon::Builder;

use crate::{models::RetryPolicy, plagiarism::DEFAULT_PLAGIARISM_THRESHOLD};

/// Default hub id of the sentence-embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Default hub id of the handwriting OCR model.
pub const DEFAULT_OCR_MODEL: &str = "microsoft/trocr-base-handwritten";

/// Revision of the OCR model that carries safetensors weights.
pub const DEFAULT_OCR_REVISION: &str = "refs/pr/3";

/// Repository holding a `tokenizer.json` for the OCR decoder vocabulary.
pub const DEFAULT_OCR_TOKENIZER: &str = "ToluClassics/candle-trocr-tokenizer";

/// Supabase credentials loaded from the environment, if available.
#[derive(Clone, Debug)]
pub struct SupabaseEnv {
    /// Fully qualified PostgREST endpoint.
    rest_endpoint: String,
    /// API key used for PostgREST requests.
    api_key:       String,
}

impl SupabaseEnv {
    /// Builds a Supabase credential bundle from environment-provided values.
    pub fn new(url: String, key: String) -> Self {
        let rest_endpoint = format!("{}/rest/v1", url.trim_end_matches('/'));
        Self {
            rest_endpoint,
            api_key: key,
        }
    }

    /// Returns the PostgREST endpoint.
    pub fn rest_endpoint(&self) -> &str {
        &self.rest_endpoint
    }

    /// Returns the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// Where and how to fetch one model.
#[derive(Clone, Debug, Builder)]
#[builder(on(String, into))]
pub struct ModelSource {
    /// Hub repository id.
    model_id:  String,
    /// Hub revision (branch, tag or ref).
    #[builder(default = String::from("main"))]
    revision:  String,
    /// Offline root; files are read from `<local_dir>/<model_id>/` when set.
    local_dir: Option<PathBuf>,
    /// Hub token for gated or rate-limited downloads.
    token:     Option<String>,
}

/// Runtime configuration shared by the composition root.
#[derive(Clone, Debug, Builder)]
pub struct Config {
    /// Sentence-embedding model location.
    #[builder(default = ModelSource::builder().model_id(DEFAULT_EMBEDDING_MODEL).build())]
    embedding_model:      ModelSource,
    /// Handwriting OCR model location.
    #[builder(default = ModelSource::builder()
        .model_id(DEFAULT_OCR_MODEL)
        .revision(DEFAULT_OCR_REVISION)
        .build())]
    ocr_model:            ModelSource,
    /// Repository of the OCR decoder tokenizer.
    #[builder(default = ModelSource::builder().model_id(DEFAULT_OCR_TOKENIZER).build())]
    ocr_tokenizer:        ModelSource,
    /// How long a caller waits for someone else's model load.
    #[builder(default = Duration::from_secs(5))]
    load_wait:            Duration,
    /// Retry behaviour for model loads.
    #[builder(default)]
    retry:                RetryPolicy,
    /// Similarity above which two answers count as copies.
    #[builder(default = DEFAULT_PLAGIARISM_THRESHOLD)]
    plagiarism_threshold: f64,
    /// Number of submissions processed concurrently by the dispatcher.
    #[builder(default = 4)]
    workers:              usize,
    /// Supabase credentials, if configured.
    supabase:             Option<SupabaseEnv>,
}

impl ModelSource {
    /// Hub repository id.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Hub revision.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Offline model root, if configured.
    pub fn local_dir(&self) -> Option<&PathBuf> {
        self.local_dir.as_ref()
    }

    /// Hub token, if configured.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    /// Returns the sentence-embedding model location.
    pub fn embedding_model(&self) -> &ModelSource {
        &self.embedding_model
    }

    /// Returns the handwriting OCR model location.
    pub fn ocr_model(&self) -> &ModelSource {
        &self.ocr_model
    }

    /// Returns the OCR tokenizer location.
    pub fn ocr_tokenizer(&self) -> &ModelSource {
        &self.ocr_tokenizer
    }

    /// Returns the bounded wait for in-flight model loads.
    pub fn load_wait(&self) -> Duration {
        self.load_wait
    }

    /// Returns the model load retry policy.
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Returns the plagiarism threshold.
    pub fn plagiarism_threshold(&self) -> f64 {
        self.plagiarism_threshold
    }

    /// Returns the dispatcher concurrency.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the Supabase credentials, if configured.
    pub fn supabase(&self) -> Option<&SupabaseEnv> {
        self.supabase.as_ref()
    }

    /// Reads configuration from the process environment, falling back to the
    /// defaults for anything missing or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let local_dir = get("GRADEMATE_MODEL_DIR").map(PathBuf::from);
        let token = get("HF_TOKEN");
        let source = |id_key: &str, id: &str, rev_key: &str, rev: &str| {
            ModelSource::builder()
                .model_id(get(id_key).unwrap_or_else(|| id.to_string()))
                .revision(get(rev_key).unwrap_or_else(|| rev.to_string()))
                .maybe_local_dir(local_dir.clone())
                .maybe_token(token.clone())
                .build()
        };

        let embedding_model = source(
            "GRADEMATE_EMBEDDING_MODEL",
            DEFAULT_EMBEDDING_MODEL,
            "GRADEMATE_EMBEDDING_REVISION",
            "main",
        );
        let ocr_model = source(
            "GRADEMATE_OCR_MODEL",
            DEFAULT_OCR_MODEL,
            "GRADEMATE_OCR_REVISION",
            DEFAULT_OCR_REVISION,
        );
        let ocr_tokenizer = source(
            "GRADEMATE_OCR_TOKENIZER",
            DEFAULT_OCR_TOKENIZER,
            "GRADEMATE_OCR_TOKENIZER_REVISION",
            "main",
        );

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            parse_or(get("GRADEMATE_LOAD_ATTEMPTS"), defaults.attempts()).max(1),
            read_secs(get("GRADEMATE_LOAD_BACKOFF_SECS"), defaults.backoff()),
        );

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_ANON_KEY")) {
            (Some(url), Some(key)) => Some(SupabaseEnv::new(url, key)),
            _ => None,
        };

        let threshold =
            parse_or(get("GRADEMATE_PLAGIARISM_THRESHOLD"), DEFAULT_PLAGIARISM_THRESHOLD);

        Config::builder()
            .embedding_model(embedding_model)
            .ocr_model(ocr_model)
            .ocr_tokenizer(ocr_tokenizer)
            .load_wait(read_secs(get("GRADEMATE_LOAD_WAIT_SECS"), Duration::from_secs(5)))
            .retry(retry)
            .plagiarism_threshold(threshold)
            .workers(parse_or(get("GRADEMATE_WORKERS"), 4usize).max(1))
            .maybe_supabase(supabase)
            .build()
    }
}

/// Parses `value`, falling back to `default` when absent or malformed.
fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

/// Parses a whole number of seconds into a `Duration`, falling back to
/// `default` when parsing fails or the variable is missing.
fn read_secs(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
