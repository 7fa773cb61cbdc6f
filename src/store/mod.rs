#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Boundary to the record-keeping system that owns submissions.
//!
//! The pipeline only needs four operations, captured by [`SubmissionStore`].
//! Adapters exist for an in-process map, a JSON file, and a Supabase
//! PostgREST endpoint.

/// JSON file adapter.
pub mod json;
/// In-memory adapter.
pub mod memory;
/// Supabase PostgREST adapter.
pub mod rest;

use async_trait::async_trait;
pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use rest::PostgrestStore;
use uuid::Uuid;

use crate::{
    error::StoreError,
    submission::{Assignment, Submission},
};

/// Storage operations the submission pipeline relies on.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Fetches one submission.
    async fn load_submission(&self, id: Uuid) -> Result<Submission, StoreError>;

    /// Fetches one assignment.
    async fn load_assignment(&self, id: Uuid) -> Result<Assignment, StoreError>;

    /// Non-blank answers of every submission to `assignment_id` except
    /// `exclude`, as a snapshot taken now.
    async fn peer_answers(
        &self,
        assignment_id: Uuid,
        exclude: Uuid,
    ) -> Result<Vec<String>, StoreError>;

    /// Replaces the stored record with `submission` in a single write.
    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_store_is_object_safe() {
        fn _takes_boxed(_: Box<dyn SubmissionStore>) {}
    }
}
