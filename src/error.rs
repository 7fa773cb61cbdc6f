#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::PathBuf, time::Duration};

use uuid::Uuid;

/// Why a single model load attempt failed.
#[derive(thiserror::Error, Debug, Clone)]
pub enum LoadFailure {
    /// The model files could not be fetched (network or download problem).
    #[error("could not download model files: {0}")]
    Connectivity(String),
    /// Any other failure while reading or initializing the model.
    #[error("{0}")]
    Other(String),
}

impl LoadFailure {
    /// Returns true for network/download flavoured failures.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, LoadFailure::Connectivity(_))
    }
}

/// Errors surfaced while obtaining a shared model handle.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ModelLoadError {
    /// Every load attempt failed.
    #[error("{model} is unavailable after {attempts} attempt(s): {message}")]
    Unavailable {
        /// Name of the model that failed to load.
        model:    String,
        /// Number of attempts made.
        attempts: u32,
        /// Operator-facing description of the last failure.
        message:  String,
    },
    /// Another caller is loading the model and did not finish in time.
    #[error("timed out after {0:?} waiting for an in-flight model load")]
    Timeout(Duration),
}

/// Errors produced by the text extractor.
#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    /// The file does not exist.
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),
    /// The file extension maps to no known extraction path.
    #[error("unsupported file kind `{extension}` for {}", path.display())]
    UnsupportedKind {
        /// The offending file.
        path:      PathBuf,
        /// Extension as found on the path (may be empty).
        extension: String,
    },
    /// The OCR model could not be loaded.
    #[error("OCR model unavailable: {0}")]
    ModelUnavailable(String),
    /// Waiting on a concurrent OCR model load exceeded the bound.
    #[error("timed out after {0:?} waiting for the OCR model to load")]
    LoadTimeout(Duration),
    /// The file was found but could not be decoded into text.
    #[error("could not extract text from {}: {message}", path.display())]
    Decode {
        /// The file being decoded.
        path:    PathBuf,
        /// Underlying failure.
        message: String,
    },
}

impl From<ModelLoadError> for ExtractionError {
    fn from(err: ModelLoadError) -> Self {
        match err {
            ModelLoadError::Timeout(waited) => ExtractionError::LoadTimeout(waited),
            other @ ModelLoadError::Unavailable { .. } => {
                ExtractionError::ModelUnavailable(other.to_string())
            }
        }
    }
}

/// Errors produced by the embedding provider.
#[derive(thiserror::Error, Debug, Clone)]
pub enum EmbeddingError {
    /// The embedding model failed to load after retries.
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
    /// Waiting on a concurrent embedding model load exceeded the bound.
    #[error("timed out after {0:?} waiting for the embedding model to load")]
    LoadTimeout(Duration),
}

impl From<ModelLoadError> for EmbeddingError {
    fn from(err: ModelLoadError) -> Self {
        match err {
            ModelLoadError::Timeout(waited) => EmbeddingError::LoadTimeout(waited),
            other @ ModelLoadError::Unavailable { .. } => {
                EmbeddingError::Unavailable(other.to_string())
            }
        }
    }
}

/// Blank inputs rejected before any model call.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// The reference answer is empty or whitespace only.
    #[error("reference answer is empty")]
    EmptyReference,
    /// The candidate answer is empty or whitespace only.
    #[error("answer is empty")]
    EmptyAnswer,
}

/// Errors from a fallible evaluation.
#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    /// An input was blank.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Embeddings could not be computed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Errors raised by a submission store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// No submission with this id exists.
    #[error("submission {0} not found")]
    SubmissionNotFound(Uuid),
    /// No assignment with this id exists.
    #[error("assignment {0} not found")]
    AssignmentNotFound(Uuid),
    /// The backing storage failed.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Errors that abort a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The submission record could not be loaded.
    #[error("could not load submission {id}")]
    Load {
        /// Submission that was requested.
        id:     Uuid,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// The finished record could not be written back.
    #[error("could not persist submission {id}")]
    Persist {
        /// Submission being written.
        id:     Uuid,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
}
