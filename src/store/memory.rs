#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::SubmissionStore;
use crate::{
    error::StoreError,
    submission::{Assignment, Submission},
};

/// Keeps every record in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Submissions by id.
    submissions: RwLock<HashMap<Uuid, Submission>>,
    /// Assignments by id.
    assignments: RwLock<HashMap<Uuid, Assignment>>,
    /// Number of completed `save_submission` calls.
    saves:       RwLock<usize>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an assignment.
    pub async fn insert_assignment(&self, assignment: Assignment) {
        self.assignments
            .write()
            .await
            .insert(assignment.id, assignment);
    }

    /// Adds or replaces a submission.
    pub async fn insert_submission(&self, submission: Submission) {
        self.submissions
            .write()
            .await
            .insert(submission.id, submission);
    }

    /// Returns a copy of the stored submission, if any.
    pub async fn submission(&self, id: Uuid) -> Option<Submission> {
        self.submissions.read().await.get(&id).cloned()
    }

    /// Number of times a submission has been saved.
    pub async fn save_count(&self) -> usize {
        *self.saves.read().await
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn load_submission(&self, id: Uuid) -> Result<Submission, StoreError> {
        self.submission(id)
            .await
            .ok_or(StoreError::SubmissionNotFound(id))
    }

    async fn load_assignment(&self, id: Uuid) -> Result<Assignment, StoreError> {
        self.assignments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::AssignmentNotFound(id))
    }

    async fn peer_answers(
        &self,
        assignment_id: Uuid,
        exclude: Uuid,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .submissions
            .read()
            .await
            .values()
            .filter(|s| s.assignment_id == assignment_id && s.id != exclude)
            .filter(|s| !s.has_blank_answer())
            .map(|s| s.answer_text.clone())
            .collect())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        self.submissions
            .write()
            .await
            .insert(submission.id, submission.clone());
        *self.saves.write().await += 1;
        Ok(())
    }
}
