use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{common::Category, db::Candidate};
use crate::store::CandidateUpdate;

/// A candidate as submitted by an administrator, for creation or replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSpec {
    pub name: String,
    pub position: String,
    pub category: Category,
    pub image: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub manifesto: String,
}

impl From<CandidateSpec> for CandidateUpdate {
    fn from(spec: CandidateSpec) -> Self {
        Self {
            name: spec.name,
            position: spec.position,
            category: spec.category,
            image: spec.image,
            description: spec.description,
            manifesto: spec.manifesto,
        }
    }
}

/// An API-friendly candidate description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDescription {
    pub id: String,
    pub name: String,
    pub position: String,
    pub category: Category,
    pub image: String,
    pub description: String,
    pub manifesto: String,
    /// Cached count across all elections; results are authoritative.
    pub vote_count: u64,
    pub created_at: DateTime<Utc>,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.to_string(),
            name: candidate.candidate.name,
            position: candidate.candidate.position,
            category: candidate.candidate.category,
            image: candidate.candidate.image,
            description: candidate.candidate.description,
            manifesto: candidate.candidate.manifesto,
            vote_count: candidate.candidate.vote_count,
            created_at: candidate.candidate.created_at,
        }
    }
}

/// Confirmation of a created or updated candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSaved {
    pub message: String,
    pub candidate: CandidateDescription,
}
