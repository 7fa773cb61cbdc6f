#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::{
    embedding::Embedder,
    error::{EvalError, ValidationError},
    similarity::cosine_similarity,
};

/// Highest score the evaluator hands out.
pub const MAX_SCORE: f64 = 10.0;

/// Feedback returned when the reference answer is blank.
pub const EMPTY_REFERENCE_FEEDBACK: &str = "reference answer is empty";

/// Feedback returned when the candidate answer is blank.
pub const EMPTY_ANSWER_FEEDBACK: &str = "answer is empty — provide a complete answer";

/// Feedback returned when embeddings could not be computed.
pub const EVALUATION_ERROR_FEEDBACK: &str = "evaluation error";

#[derive(Tabled, Clone, Debug, PartialEq, Serialize, Deserialize)]
/// Outcome of comparing one answer with its reference.
pub struct Evaluation {
    #[tabled(rename = "Score")]
    /// Score in `[0, 10]`, one decimal.
    pub score:      f64,
    #[tabled(rename = "Similarity")]
    /// Raw cosine similarity in `[0, 1]`.
    pub similarity: f64,
    #[tabled(rename = "Feedback")]
    /// Human readable feedback.
    pub feedback:   String,
}

impl Evaluation {
    /// A zero-score result carrying `feedback`.
    pub fn zero(feedback: impl Into<String>) -> Self {
        Self {
            score:      0.0,
            similarity: 0.0,
            feedback:   feedback.into(),
        }
    }

    /// Feedback band of this result.
    pub fn band(&self) -> FeedbackBand {
        FeedbackBand::from_score(self.score)
    }
}

/// Score ranges, each with its own feedback message. Lower bounds are
/// inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackBand {
    /// `[9, 10]`
    Excellent,
    /// `[7, 9)`
    Good,
    /// `[5, 7)`
    Partial,
    /// `[3, 5)`
    NeedsImprovement,
    /// `[0, 3)`
    DoesNotAlign,
}

impl FeedbackBand {
    /// Picks the band for a score on the 0-10 scale.
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            FeedbackBand::Excellent
        } else if score >= 7.0 {
            FeedbackBand::Good
        } else if score >= 5.0 {
            FeedbackBand::Partial
        } else if score >= 3.0 {
            FeedbackBand::NeedsImprovement
        } else {
            FeedbackBand::DoesNotAlign
        }
    }

    /// Short name of the band.
    pub fn label(&self) -> &'static str {
        match self {
            FeedbackBand::Excellent => "excellent",
            FeedbackBand::Good => "good",
            FeedbackBand::Partial => "partial understanding",
            FeedbackBand::NeedsImprovement => "needs improvement",
            FeedbackBand::DoesNotAlign => "does not align",
        }
    }

    /// Feedback text for this band, quoting `similarity` as a percentage.
    pub fn message(&self, similarity: f64) -> String {
        let pct = format!("{:.1}%", similarity * 100.0);
        match self {
            FeedbackBand::Excellent => format!(
                "Excellent work! Your answer demonstrates a strong understanding of the topic \
                 (similarity: {pct}). You've covered the key points comprehensively and \
                 accurately."
            ),
            FeedbackBand::Good => format!(
                "Good answer! You've captured most of the important concepts (similarity: \
                 {pct}). Consider adding more detail or examples to strengthen your response."
            ),
            FeedbackBand::Partial => format!(
                "Your answer shows partial understanding (similarity: {pct}), but it's missing \
                 several key points. Review the topic and try to include more relevant \
                 information."
            ),
            FeedbackBand::NeedsImprovement => format!(
                "Your answer needs improvement (similarity: {pct}). It only partially addresses \
                 the question. Please review the material and provide a more complete response."
            ),
            FeedbackBand::DoesNotAlign => format!(
                "Your answer does not align well with the expected response (similarity: \
                 {pct}). Please review the topic thoroughly and provide a more accurate and \
                 complete answer."
            ),
        }
    }
}

impl std::fmt::Display for FeedbackBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Converts a similarity in `[0, 1]` into a score in `[0, 10]` with one
/// decimal.
pub fn score_from_similarity(similarity: f64) -> f64 {
    ((similarity * 100.0).round() / 10.0).clamp(0.0, MAX_SCORE)
}

/// Rescales a 0-10 score proportionally to `max_score`, rounded to two
/// decimals.
pub fn scale_score(score: f64, max_score: f64) -> f64 {
    let scaled = score.clamp(0.0, MAX_SCORE) * (max_score / MAX_SCORE);
    (scaled * 100.0).round() / 100.0
}

/// Scores free-text answers by semantic similarity to a reference.
#[derive(Debug, Clone)]
pub struct Evaluator {
    /// Shared embedding provider.
    embedder: Arc<Embedder>,
}

impl Evaluator {
    /// Creates an evaluator over `embedder`.
    pub fn new(embedder: Arc<Embedder>) -> Self {
        Self { embedder }
    }

    /// Returns the embedding provider.
    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    /// Evaluates `candidate` against `reference`, reporting blank input and
    /// model failures as errors.
    pub async fn try_evaluate(
        &self,
        reference: &str,
        candidate: &str,
    ) -> Result<Evaluation, EvalError> {
        if reference.trim().is_empty() {
            return Err(ValidationError::EmptyReference.into());
        }
        if candidate.trim().is_empty() {
            return Err(ValidationError::EmptyAnswer.into());
        }

        let candidate_vec = self.embedder.embed(candidate).await?;
        let reference_vec = self.embedder.embed(reference).await?;
        let similarity = cosine_similarity(&candidate_vec, &reference_vec);
        let score = score_from_similarity(similarity);

        Ok(Evaluation {
            score,
            similarity,
            feedback: FeedbackBand::from_score(score).message(similarity),
        })
    }

    /// Evaluates `candidate` against `reference`. Never fails: blank input and
    /// model failures become zero-score results.
    pub async fn evaluate(&self, reference: &str, candidate: &str) -> Evaluation {
        match self.try_evaluate(reference, candidate).await {
            Ok(evaluation) => evaluation,
            Err(EvalError::Validation(ValidationError::EmptyReference)) => {
                Evaluation::zero(EMPTY_REFERENCE_FEEDBACK)
            }
            Err(EvalError::Validation(ValidationError::EmptyAnswer)) => {
                Evaluation::zero(EMPTY_ANSWER_FEEDBACK)
            }
            Err(EvalError::Embedding(err)) => {
                tracing::warn!(error = %err, "evaluation failed");
                Evaluation::zero(EVALUATION_ERROR_FEEDBACK)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_have_inclusive_lower_bounds() {
        assert_eq!(FeedbackBand::from_score(10.0), FeedbackBand::Excellent);
        assert_eq!(FeedbackBand::from_score(9.0), FeedbackBand::Excellent);
        assert_eq!(FeedbackBand::from_score(8.999), FeedbackBand::Good);
        assert_eq!(FeedbackBand::from_score(7.0), FeedbackBand::Good);
        assert_eq!(FeedbackBand::from_score(6.9), FeedbackBand::Partial);
        assert_eq!(FeedbackBand::from_score(5.0), FeedbackBand::Partial);
        assert_eq!(FeedbackBand::from_score(4.99), FeedbackBand::NeedsImprovement);
        assert_eq!(FeedbackBand::from_score(3.0), FeedbackBand::NeedsImprovement);
        assert_eq!(FeedbackBand::from_score(2.9), FeedbackBand::DoesNotAlign);
        assert_eq!(FeedbackBand::from_score(0.0), FeedbackBand::DoesNotAlign);
    }

    #[test]
    fn messages_quote_similarity() {
        let message = FeedbackBand::Good.message(0.8734);
        assert!(message.contains("87.3%"), "{message}");
        assert!(FeedbackBand::Excellent.message(1.0).contains("100.0%"));
        assert!(FeedbackBand::DoesNotAlign.message(0.0).contains("0.0%"));
    }

    #[test]
    fn scores_are_rounded_and_clamped() {
        assert_eq!(score_from_similarity(1.0), 10.0);
        assert_eq!(score_from_similarity(0.0), 0.0);
        assert_eq!(score_from_similarity(0.874), 8.7);
        assert_eq!(score_from_similarity(0.876), 8.8);
        assert_eq!(score_from_similarity(1.5), 10.0);
        assert_eq!(score_from_similarity(-0.2), 0.0);
    }

    #[test]
    fn scaling_is_proportional_with_two_decimals() {
        assert_eq!(scale_score(8.7, 100.0), 87.0);
        assert_eq!(scale_score(10.0, 100.0), 100.0);
        assert_eq!(scale_score(7.3, 25.0), 18.25);
        assert_eq!(scale_score(3.3, 7.0), 2.31);
        assert_eq!(scale_score(0.0, 50.0), 0.0);
    }
}
