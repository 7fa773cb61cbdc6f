#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::SubmissionStore;
use crate::{
    error::StoreError,
    submission::{Assignment, Submission},
};

/// On-disk layout of a [`JsonFileStore`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    /// Every assignment.
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    /// Every submission.
    #[serde(default)]
    pub submissions: Vec<Submission>,
}

/// Keeps records in a single JSON document.
///
/// The document is read once when the store is opened. Each save rewrites it
/// through a temporary file and a rename, so readers see either the old or the
/// new document.
#[derive(Debug)]
pub struct JsonFileStore {
    /// Location of the document.
    path:  PathBuf,
    /// Current contents.
    state: Mutex<StoreFile>,
}

impl JsonFileStore {
    /// Opens the document at `path`. A missing file starts out empty.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Could not parse store file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Could not read store file {}", path.display()));
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Location of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> StoreFile {
        self.state.lock().await.clone()
    }

    /// Writes `state` to disk through a temporary sibling file.
    async fn persist(&self, state: &StoreFile) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(state).context("Could not serialize store")?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("Could not write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Could not replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for JsonFileStore {
    async fn load_submission(&self, id: Uuid) -> Result<Submission, StoreError> {
        self.state
            .lock()
            .await
            .submissions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(StoreError::SubmissionNotFound(id))
    }

    async fn load_assignment(&self, id: Uuid) -> Result<Assignment, StoreError> {
        self.state
            .lock()
            .await
            .assignments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(StoreError::AssignmentNotFound(id))
    }

    async fn peer_answers(
        &self,
        assignment_id: Uuid,
        exclude: Uuid,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .submissions
            .iter()
            .filter(|s| s.assignment_id == assignment_id && s.id != exclude)
            .filter(|s| !s.has_blank_answer())
            .map(|s| s.answer_text.clone())
            .collect())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        match next.submissions.iter_mut().find(|s| s.id == submission.id) {
            Some(existing) => *existing = submission.clone(),
            None => next.submissions.push(submission.clone()),
        }

        self.persist(&next).await?;
        *state = next;
        Ok(())
    }
}
