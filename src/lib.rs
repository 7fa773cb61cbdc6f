//! # grademate
//!
//! Automated grading of free-text answers. Answers, typed or extracted from
//! uploaded PDFs and handwriting photos, are scored by semantic similarity to
//! a reference answer and screened for near-duplicates among their peers.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Runtime configuration read from the environment
pub mod config;
/// Sentence embeddings
pub mod embedding;
/// Error types shared across the crate
pub mod error;
/// Scores answers against a reference answer
pub mod evaluator;
/// Text extraction from PDFs and images
pub mod extract;
/// Lazily loaded, shared model handles
pub mod models;
/// Submission processing and concurrent dispatch
pub mod pipeline;
/// Near-duplicate detection among peer answers
pub mod plagiarism;
/// Cosine similarity
pub mod similarity;
/// Storage boundary and adapters
pub mod store;
/// Submission and assignment records
pub mod submission;

pub use config::Config;
pub use embedding::Embedder;
pub use evaluator::{Evaluation, Evaluator, FeedbackBand};
pub use extract::{FileKind, TextExtractor};
pub use pipeline::{Dispatcher, Pipeline, PipelineReport, PipelineState, SkipReason};
pub use plagiarism::PlagiarismChecker;
pub use similarity::cosine_similarity;
