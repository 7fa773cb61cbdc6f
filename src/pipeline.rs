#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Background processing of one submission.
//!
//! A run moves a submission through
//! `Uploaded -> TextReady -> Graded | GradingSkipped -> PlagiarismChecked ->
//! Persisted`, or ends in `RejectedAsPlagiarized` before it is persisted.
//! Every stage after loading degrades instead of failing: only a submission
//! that cannot be loaded, or cannot be written back, aborts the run.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
    config::Config,
    embedding::Embedder,
    error::{EvalError, PipelineError, ValidationError},
    evaluator::{Evaluator, scale_score},
    extract::TextExtractor,
    plagiarism::{PeerMatch, PlagiarismChecker},
    store::SubmissionStore,
    submission::{Assignment, Submission, SubmissionStatus},
};

/// Why a submission was left without a grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The assignment has neither a reference answer nor a key file.
    NoKey,
    /// The submission has no answer text, typed or extracted.
    NoAnswerText,
    /// The key file exists but yielded no text.
    KeyUnreadable,
    /// The embedding model could not be used.
    ModelUnavailable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SkipReason::NoKey => "no answer key provided",
            SkipReason::NoAnswerText => "no answer text to grade",
            SkipReason::KeyUnreadable => "answer key could not be read",
            SkipReason::ModelUnavailable => "grading model unavailable",
        };
        write!(f, "{text}")
    }
}

/// Stages a submission passes through during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Loaded from the store.
    Uploaded,
    /// Text is final for this run (possibly still blank).
    TextReady,
    /// Scored against the answer key.
    Graded,
    /// Not scored.
    GradingSkipped(SkipReason),
    /// Compared against peer submissions.
    PlagiarismChecked,
    /// Matched a peer submission; any grade was discarded.
    RejectedAsPlagiarized,
    /// Written back to the store.
    Persisted,
}

/// What one run did.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// States visited, in order.
    pub states:     Vec<PipelineState>,
    /// The record as persisted.
    pub submission: Submission,
    /// The matching peer, when the answer was rejected.
    pub peer_match: Option<PeerMatch>,
}

impl PipelineReport {
    /// Last state reached.
    pub fn final_state(&self) -> Option<PipelineState> {
        self.states.last().copied()
    }

    /// Reason grading was skipped, if it was.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        self.states.iter().find_map(|state| match state {
            PipelineState::GradingSkipped(reason) => Some(*reason),
            _ => None,
        })
    }

    /// True when the submission was rejected as plagiarized.
    pub fn rejected(&self) -> bool {
        self.states.contains(&PipelineState::RejectedAsPlagiarized)
    }
}

/// Sequences extraction, grading, plagiarism screening and persistence.
#[derive(Clone)]
pub struct Pipeline {
    /// Record-keeping boundary.
    store:      Arc<dyn SubmissionStore>,
    /// Shared text extractor.
    extractor:  Arc<TextExtractor>,
    /// Answer scoring.
    evaluator:  Evaluator,
    /// Peer comparison.
    plagiarism: PlagiarismChecker,
    /// Similarity above which answers count as copies.
    threshold:  f64,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("extractor", &self.extractor)
            .field("evaluator", &self.evaluator)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline over shared model handles.
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        extractor: Arc<TextExtractor>,
        embedder: Arc<Embedder>,
        threshold: f64,
    ) -> Self {
        Self {
            store,
            extractor,
            evaluator: Evaluator::new(Arc::clone(&embedder)),
            plagiarism: PlagiarismChecker::new(embedder),
            threshold,
        }
    }

    /// Creates a pipeline with models described by `config`. Nothing is loaded
    /// until the first submission needs it.
    pub fn from_config(store: Arc<dyn SubmissionStore>, config: &Config) -> Self {
        Self::new(
            store,
            Arc::new(TextExtractor::from_config(config)),
            Arc::new(Embedder::from_config(config)),
            config.plagiarism_threshold(),
        )
    }

    /// Processes one submission end to end and writes the result back once.
    #[tracing::instrument(skip_all, fields(submission_id = %id))]
    pub async fn run(&self, id: Uuid) -> Result<PipelineReport, PipelineError> {
        let mut submission = self
            .store
            .load_submission(id)
            .await
            .map_err(|source| PipelineError::Load { id, source })?;
        let mut states = vec![PipelineState::Uploaded];

        self.prepare_text(&mut submission).await;
        states.push(PipelineState::TextReady);

        let grading = self.grade(&mut submission).await;
        states.push(grading);

        let peer_match = self.screen(&mut submission).await;
        if peer_match.is_some() {
            states.push(PipelineState::RejectedAsPlagiarized);
        } else {
            states.push(PipelineState::PlagiarismChecked);
        }

        self.store
            .save_submission(&submission)
            .await
            .map_err(|source| PipelineError::Persist { id, source })?;
        states.push(PipelineState::Persisted);

        tracing::info!(
            status = %submission.status,
            score = submission.score,
            "submission processed"
        );
        Ok(PipelineReport {
            states,
            submission,
            peer_match,
        })
    }

    /// Fills in blank answer text from the uploaded file, if there is one.
    async fn prepare_text(&self, submission: &mut Submission) {
        let Some(file) = submission.file.clone() else {
            return;
        };
        if !submission.has_blank_answer() {
            return;
        }

        match self.extractor.extract_text(&file).await {
            Ok(text) if !text.trim().is_empty() => {
                tracing::info!(path = %file.display(), chars = text.len(), "extracted answer text");
                submission.answer_text = text;
            }
            Ok(_) => tracing::warn!(path = %file.display(), "no text extracted from answer file"),
            Err(err) => {
                tracing::warn!(path = %file.display(), error = %err, "answer extraction failed")
            }
        }
    }

    /// Scores the answer, or records why it could not be scored.
    async fn grade(&self, submission: &mut Submission) -> PipelineState {
        let outcome = self.try_grade(submission).await;
        match outcome {
            Ok(()) => PipelineState::Graded,
            Err(reason) => {
                tracing::warn!(%reason, "grading skipped");
                submission.clear_grade();
                submission.status = SubmissionStatus::NotGraded {
                    reason: reason.to_string(),
                };
                PipelineState::GradingSkipped(reason)
            }
        }
    }

    /// Grading proper; the error says why it was skipped.
    async fn try_grade(&self, submission: &mut Submission) -> Result<(), SkipReason> {
        if submission.has_blank_answer() {
            return Err(SkipReason::NoAnswerText);
        }

        let assignment = match self.store.load_assignment(submission.assignment_id).await {
            Ok(assignment) => assignment,
            Err(err) => {
                tracing::warn!(error = %err, "assignment unavailable");
                return Err(SkipReason::NoKey);
            }
        };
        let reference = self.reference_text(&assignment).await?;

        let evaluation = self
            .evaluator
            .try_evaluate(&reference, &submission.answer_text)
            .await
            .map_err(|err| match err {
                EvalError::Validation(ValidationError::EmptyReference) => SkipReason::KeyUnreadable,
                EvalError::Validation(ValidationError::EmptyAnswer) => SkipReason::NoAnswerText,
                EvalError::Embedding(err) => {
                    tracing::warn!(error = %err, "embedding model unavailable");
                    SkipReason::ModelUnavailable
                }
            })?;

        submission.score = scale_score(evaluation.score, assignment.max_score);
        submission.feedback = evaluation.feedback;
        submission.graded = true;
        submission.evaluated_at = Some(Utc::now());
        submission.status = SubmissionStatus::Graded;
        tracing::info!(
            score = submission.score,
            max_score = assignment.max_score,
            similarity = evaluation.similarity,
            "graded submission"
        );
        Ok(())
    }

    /// The assignment's reference answer, typed or read from its key file.
    async fn reference_text(&self, assignment: &Assignment) -> Result<String, SkipReason> {
        if let Some(text) = assignment.reference_text.as_deref() {
            if !text.trim().is_empty() {
                return Ok(text.to_string());
            }
        }

        let Some(key_file) = assignment.key_file.as_deref() else {
            return Err(SkipReason::NoKey);
        };

        match self.extractor.extract_text(key_file).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => {
                tracing::warn!(path = %key_file.display(), "no text extracted from answer key");
                Err(SkipReason::KeyUnreadable)
            }
            Err(err) => {
                tracing::warn!(
                    path = %key_file.display(),
                    error = %err,
                    "answer key extraction failed"
                );
                Err(SkipReason::KeyUnreadable)
            }
        }
    }

    /// Compares the answer with its peers and rejects it on a match.
    ///
    /// The flag from any earlier run is cleared first, so a failed query or
    /// check leaves the answer unflagged.
    async fn screen(&self, submission: &mut Submission) -> Option<PeerMatch> {
        submission.plagiarized = false;
        if submission.has_blank_answer() {
            return None;
        }

        let peers = match self
            .store
            .peer_answers(submission.assignment_id, submission.id)
            .await
        {
            Ok(peers) => peers,
            Err(err) => {
                tracing::warn!(error = %err, "could not load peer answers");
                return None;
            }
        };

        let found = match self
            .plagiarism
            .check(&submission.answer_text, &peers, self.threshold)
            .await
        {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(error = %err, "plagiarism check failed");
                return None;
            }
        };

        if let Some(peer) = found {
            submission.plagiarized = true;
            tracing::warn!(similarity = peer.similarity, "plagiarism detected");
            submission.clear_grade();
            submission.status = SubmissionStatus::RejectedAsPlagiarized;
        }
        found
    }
}

/// Runs many submissions concurrently with a fixed number of workers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Shared pipeline.
    pipeline: Arc<Pipeline>,
    /// Concurrent runs allowed.
    permits:  Arc<Semaphore>,
}

impl Dispatcher {
    /// Creates a dispatcher allowing `workers` concurrent runs (at least one).
    pub fn new(pipeline: Arc<Pipeline>, workers: usize) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Runs every submission in `ids`, returning outcomes in input order. One
    /// failed run never affects the others.
    pub async fn run_all<I>(&self, ids: I) -> Vec<(Uuid, Result<PipelineReport, PipelineError>)>
    where
        I: IntoIterator<Item = Uuid>,
    {
        let mut running = FuturesUnordered::new();
        for (index, id) in ids.into_iter().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            let permits = Arc::clone(&self.permits);
            running.push(async move {
                // the semaphore is never closed, so a permit is always granted
                let _permit = permits.acquire_owned().await.ok();
                (index, id, pipeline.run(id).await)
            });
        }

        let mut outcomes = Vec::new();
        while let Some((index, id, outcome)) = running.next().await {
            if let Err(err) = &outcome {
                tracing::error!(submission_id = %id, error = %err, "submission run failed");
            }
            outcomes.push((index, id, outcome));
        }

        outcomes
            .into_iter()
            .sorted_by_key(|(index, ..)| *index)
            .map(|(_, id, outcome)| (id, outcome))
            .collect()
    }
}
