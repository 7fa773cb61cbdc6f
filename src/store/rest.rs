#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use postgrest::Postgrest;
use serde::{Deserialize, de::DeserializeOwned};
use uuid::Uuid;

use super::SubmissionStore;
use crate::{
    config::SupabaseEnv,
    error::StoreError,
    submission::{Assignment, Submission},
};

/// Table holding submission rows.
const SUBMISSIONS_TABLE: &str = "submissions";

/// Table holding assignment rows.
const ASSIGNMENTS_TABLE: &str = "assignments";

/// Row shape returned by the peer answer query.
#[derive(Deserialize)]
struct AnswerRow {
    /// Answer text, possibly null.
    answer_text: Option<String>,
}

/// Reads and writes records through a Supabase PostgREST endpoint.
#[derive(Clone)]
pub struct PostgrestStore {
    /// PostgREST client with the API key attached.
    client: Postgrest,
}

impl std::fmt::Debug for PostgrestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestStore").finish_non_exhaustive()
    }
}

impl PostgrestStore {
    /// Creates a store for the given Supabase project.
    pub fn new(env: &SupabaseEnv) -> Self {
        let client = Postgrest::new(env.rest_endpoint())
            .insert_header("apiKey", env.api_key())
            .insert_header("Authorization", format!("Bearer {}", env.api_key()));
        Self { client }
    }

    /// Fetches the single row of `table` whose `id` matches, or `None` when
    /// the endpoint reports no such row.
    async fn fetch_one<T: DeserializeOwned>(
        &self,
        table: &str,
        id: Uuid,
    ) -> anyhow::Result<Option<T>> {
        let response = self
            .client
            .from(table)
            .eq("id", id.to_string())
            .select("*")
            .execute()
            .await
            .with_context(|| format!("Failed to query {table} for {id}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {table} response"))?;
        if !status.is_success() {
            return Err(anyhow!("{table} query failed with {status}: {body}"));
        }

        let mut rows: Vec<T> = serde_json::from_str(&body)
            .with_context(|| format!("Unexpected {table} payload for {id}"))?;
        Ok(rows.pop())
    }
}

#[async_trait]
impl SubmissionStore for PostgrestStore {
    async fn load_submission(&self, id: Uuid) -> Result<Submission, StoreError> {
        self.fetch_one(SUBMISSIONS_TABLE, id)
            .await?
            .ok_or(StoreError::SubmissionNotFound(id))
    }

    async fn load_assignment(&self, id: Uuid) -> Result<Assignment, StoreError> {
        self.fetch_one(ASSIGNMENTS_TABLE, id)
            .await?
            .ok_or(StoreError::AssignmentNotFound(id))
    }

    async fn peer_answers(
        &self,
        assignment_id: Uuid,
        exclude: Uuid,
    ) -> Result<Vec<String>, StoreError> {
        let response = self
            .client
            .from(SUBMISSIONS_TABLE)
            .eq("assignment_id", assignment_id.to_string())
            .neq("id", exclude.to_string())
            .select("answer_text")
            .execute()
            .await
            .context("Failed to query peer submissions")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read peer submissions")?;
        if !status.is_success() {
            return Err(anyhow!("peer query failed with {status}: {body}").into());
        }

        let rows: Vec<AnswerRow> =
            serde_json::from_str(&body).context("Unexpected peer submissions payload")?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.answer_text)
            .filter(|text| !text.trim().is_empty())
            .collect())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let body = serde_json::to_string(submission).context("Could not serialize submission")?;
        let response = self
            .client
            .from(SUBMISSIONS_TABLE)
            .upsert(body)
            .execute()
            .await
            .with_context(|| format!("Failed to write submission {}", submission.id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("saving {} failed with {status}: {body}", submission.id).into());
        }
        Ok(())
    }
}
