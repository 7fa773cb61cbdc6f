#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Records exchanged with the record-keeping system.

use std::path::PathBuf;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Where a submission stands after its last pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Not processed yet.
    #[default]
    Pending,
    /// Scored against the reference answer.
    Graded,
    /// Processed, but no score could be given.
    NotGraded {
        /// Explanation for the submitter and the instructor.
        reason: String,
    },
    /// Too similar to another submission; any grade was discarded.
    RejectedAsPlagiarized,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Pending => write!(f, "pending"),
            SubmissionStatus::Graded => write!(f, "graded"),
            SubmissionStatus::NotGraded { reason } => write!(f, "not graded: {reason}"),
            SubmissionStatus::RejectedAsPlagiarized => write!(f, "rejected as plagiarized"),
        }
    }
}

/// One student's answer to an assignment.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct Submission {
    /// Record id.
    #[builder(default = Uuid::new_v4())]
    pub id:            Uuid,
    /// Assignment this answers.
    pub assignment_id: Uuid,
    /// Who submitted it.
    pub submitter:     String,
    /// Answer text, typed or extracted from `file`.
    #[builder(default)]
    #[serde(default, deserialize_with = "null_as_default")]
    pub answer_text:   String,
    /// Uploaded answer file, if any.
    #[serde(default)]
    pub file:          Option<PathBuf>,
    /// Score on the assignment's scale.
    #[builder(default)]
    #[serde(default, deserialize_with = "null_as_default")]
    pub score:         f64,
    /// Feedback for the submitter.
    #[builder(default)]
    #[serde(default, deserialize_with = "null_as_default")]
    pub feedback:      String,
    /// Whether `score` holds an automatic grade.
    #[builder(default)]
    #[serde(default, deserialize_with = "null_as_default")]
    pub graded:        bool,
    /// Whether the answer was flagged as a copy.
    #[builder(default)]
    #[serde(default, deserialize_with = "null_as_default")]
    pub plagiarized:   bool,
    /// When the grade was computed.
    #[serde(default)]
    pub evaluated_at:  Option<DateTime<Utc>>,
    /// Outcome of the last pipeline run.
    #[builder(default)]
    #[serde(default, deserialize_with = "null_as_default")]
    pub status:        SubmissionStatus,
}

impl Submission {
    /// True when the answer text is blank.
    pub fn has_blank_answer(&self) -> bool {
        self.answer_text.trim().is_empty()
    }

    /// Drops any grade, as required when the answer is rejected.
    pub fn clear_grade(&mut self) {
        self.graded = false;
        self.score = 0.0;
        self.feedback.clear();
        self.evaluated_at = None;
    }
}

/// An assignment and its answer key.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct Assignment {
    /// Record id.
    #[builder(default = Uuid::new_v4())]
    pub id:             Uuid,
    /// Score a perfect answer receives.
    #[builder(default = 100.0)]
    #[serde(default = "default_max_score", deserialize_with = "max_score_or_default")]
    pub max_score:      f64,
    /// Reference answer typed by the instructor.
    #[serde(default)]
    pub reference_text: Option<String>,
    /// Uploaded answer key, read when `reference_text` is blank.
    #[serde(default)]
    pub key_file:       Option<PathBuf>,
}

/// Default maximum score for records that omit it.
fn default_max_score() -> f64 {
    100.0
}

/// Reads a nullable column, mapping `null` to the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads a nullable maximum score.
fn max_score_or_default<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_else(default_max_score))
}
