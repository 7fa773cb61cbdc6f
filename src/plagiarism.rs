#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{embedding::Embedder, error::EmbeddingError, similarity::cosine_similarity};

/// Similarity above which two answers are treated as copies.
pub const DEFAULT_PLAGIARISM_THRESHOLD: f64 = 0.9;

/// The first peer answer found to be too similar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerMatch {
    /// Position of the peer in the list that was checked.
    pub peer_index: usize,
    /// Similarity between the candidate and that peer.
    pub similarity: f64,
}

/// Compares an answer against the other answers to the same assignment.
#[derive(Debug, Clone)]
pub struct PlagiarismChecker {
    /// Shared embedding provider.
    embedder: Arc<Embedder>,
}

impl PlagiarismChecker {
    /// Creates a checker over `embedder`.
    pub fn new(embedder: Arc<Embedder>) -> Self {
        Self { embedder }
    }

    /// Returns the first peer whose similarity to `candidate` is strictly
    /// above `threshold`.
    ///
    /// The candidate is embedded once. Blank peers are skipped and the scan
    /// stops at the first match.
    pub async fn check<S: AsRef<str>>(
        &self,
        candidate: &str,
        peers: &[S],
        threshold: f64,
    ) -> Result<Option<PeerMatch>, EmbeddingError> {
        if peers.is_empty() {
            return Ok(None);
        }

        let candidate_vec = self.embedder.embed(candidate).await?;

        for (peer_index, peer) in peers.iter().enumerate() {
            let peer = peer.as_ref();
            if peer.trim().is_empty() {
                continue;
            }

            let peer_vec = self.embedder.embed(peer).await?;
            let similarity = cosine_similarity(&candidate_vec, &peer_vec);
            if similarity > threshold {
                tracing::debug!(peer_index, similarity, threshold, "peer answer matched");
                return Ok(Some(PeerMatch {
                    peer_index,
                    similarity,
                }));
            }
        }

        Ok(None)
    }

    /// True when any peer is more similar to `candidate` than `threshold`.
    pub async fn is_plagiarized<S: AsRef<str>>(
        &self,
        candidate: &str,
        peers: &[S],
        threshold: f64,
    ) -> Result<bool, EmbeddingError> {
        Ok(self.check(candidate, peers, threshold).await?.is_some())
    }
}
