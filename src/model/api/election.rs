use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Category, ElectionStatus},
    db::Election,
    mongodb::Id,
};
use crate::store::ElectionUpdate;
use crate::voting::ElectionDetails;

use super::candidate::CandidateDescription;

/// An election as submitted by an administrator, for creation or replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionSpec {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Candidate IDs in ballot order.
    #[serde(default)]
    pub candidates: Vec<String>,
}

impl TryFrom<ElectionSpec> for ElectionUpdate {
    type Error = mongodb::bson::oid::Error;

    fn try_from(spec: ElectionSpec) -> Result<Self, Self::Error> {
        let candidates = spec
            .candidates
            .iter()
            .map(|id| Id::from_str(id))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            title: spec.title,
            description: spec.description,
            category: spec.category,
            start_time: spec.start_date,
            end_time: spec.end_date,
            candidates,
        })
    }
}

/// An API-friendly election description, with its candidates attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionDescription {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ElectionStatus,
    pub candidates: Vec<CandidateDescription>,
    pub created_at: DateTime<Utc>,
}

impl From<ElectionDetails> for ElectionDescription {
    fn from(details: ElectionDetails) -> Self {
        let election = details.election.election;
        Self {
            id: details.election.id.to_string(),
            title: election.title,
            description: election.description,
            category: election.category,
            start_date: election.start_time,
            end_date: election.end_time,
            status: election.status,
            candidates: details.candidates.into_iter().map(Into::into).collect(),
            created_at: election.created_at,
        }
    }
}

/// A shorter election description, referring to candidates by ID only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionSummary {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ElectionStatus,
    pub candidates: Vec<String>,
}

impl From<Election> for ElectionSummary {
    fn from(election: Election) -> Self {
        Self {
            id: election.id.to_string(),
            candidates: election.candidates.iter().map(Id::to_string).collect(),
            title: election.election.title,
            category: election.election.category,
            start_date: election.election.start_time,
            end_date: election.election.end_time,
            status: election.election.status,
        }
    }
}

/// Confirmation of a created or updated election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSaved {
    pub message: String,
    pub election: ElectionDescription,
}

/// One cached vote count that was corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyCorrectionDescription {
    pub candidate_id: String,
    pub was: u64,
    pub now: u64,
}

impl From<crate::voting::TallyCorrection> for TallyCorrectionDescription {
    fn from(correction: crate::voting::TallyCorrection) -> Self {
        Self {
            candidate_id: correction.candidate_id.to_string(),
            was: correction.was,
            now: correction.now,
        }
    }
}
