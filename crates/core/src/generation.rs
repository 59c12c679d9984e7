//! Generation client trait — the abstraction over the hosted language model.
//!
//! The backend is stateless: every request carries the full prior history.
//! Keeping continuity is the session manager's job, not the client's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::GenerationError;
use crate::message::{Part, Turn};

/// One outbound generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Snapshot of the conversation so far, persona turn first.
    pub history: Vec<Arc<Turn>>,

    /// The new user turn.
    pub utterance: Turn,
}

/// A complete response from the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub candidates: Vec<Candidate>,
}

/// One candidate answer. `content` is absent when the backend blocked it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Vec<Part>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl Candidate {
    pub fn with_parts(parts: Vec<Part>) -> Self {
        Self {
            content: Some(parts),
            finish_reason: None,
        }
    }
}

impl GenerationResponse {
    /// The last non-empty part across all candidates, in iteration order.
    ///
    /// This is a last-wins rule, not a ranking: with two candidates the second
    /// candidate's final part is returned.
    pub fn last_part(&self) -> Option<&Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flatten()
            .filter(|p| !p.is_empty())
            .last()
    }
}

/// The core generation trait.
///
/// The production implementation talks to Gemini; tests plug in scripted fakes.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// A human-readable name for this backend (e.g., "gemini").
    fn name(&self) -> &str;

    /// Send the history plus one new utterance and get the raw candidates back.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_part_wins_across_candidates() {
        let resp = GenerationResponse {
            candidates: vec![
                Candidate::with_parts(vec![Part::text("A")]),
                Candidate::with_parts(vec![Part::text("x"), Part::text("B")]),
            ],
        };
        assert_eq!(resp.last_part(), Some(&Part::text("B")));
    }

    #[test]
    fn empty_trailing_parts_are_skipped() {
        let resp = GenerationResponse {
            candidates: vec![
                Candidate::with_parts(vec![Part::text("A")]),
                Candidate {
                    content: None,
                    finish_reason: Some("SAFETY".into()),
                },
                Candidate::with_parts(vec![Part::text("")]),
            ],
        };
        assert_eq!(resp.last_part(), Some(&Part::text("A")));
    }

    #[test]
    fn no_candidates_means_no_part() {
        assert!(GenerationResponse::default().last_part().is_none());
    }
}
