use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::db::Vote;
use crate::voting::{ElectionResults, RankedCandidate, VoteStatus, VoteWithContext};

use super::{candidate::CandidateDescription, election::ElectionSummary};

/// A vote submission. The voter comes from the bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub election_id: String,
    pub candidate_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteDescription {
    pub id: String,
    pub voter_id: String,
    pub election_id: String,
    pub candidate_id: String,
    pub voted_at: DateTime<Utc>,
}

impl From<Vote> for VoteDescription {
    fn from(vote: Vote) -> Self {
        Self {
            id: vote.id.to_string(),
            voter_id: vote.vote.voter_id.to_string(),
            election_id: vote.vote.election_id.to_string(),
            candidate_id: vote.vote.candidate_id.to_string(),
            voted_at: vote.vote.voted_at,
        }
    }
}

/// Confirmation of a recorded vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub message: String,
    pub vote: VoteDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatusDescription {
    pub has_voted: bool,
    pub vote: Option<VoteDescription>,
}

impl From<VoteStatus> for VoteStatusDescription {
    fn from(status: VoteStatus) -> Self {
        Self {
            has_voted: status.has_voted,
            vote: status.vote.map(Into::into),
        }
    }
}

/// One of the caller's own votes, with the election and candidate attached
/// where they still exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVote {
    #[serde(flatten)]
    pub vote: VoteDescription,
    pub election: Option<ElectionSummary>,
    pub candidate: Option<CandidateDescription>,
}

impl From<VoteWithContext> for MyVote {
    fn from(vote: VoteWithContext) -> Self {
        Self {
            vote: vote.vote.into(),
            election: vote.election.map(Into::into),
            candidate: vote.candidate.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub candidate_id: String,
    pub candidate: Option<CandidateDescription>,
    pub vote_count: u64,
}

impl From<RankedCandidate> for ResultRow {
    fn from(row: RankedCandidate) -> Self {
        Self {
            candidate_id: row.candidate_id.to_string(),
            candidate: row.candidate.map(Into::into),
            vote_count: row.vote_count,
        }
    }
}

/// Results of one election, most votes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsDescription {
    pub election_id: String,
    pub total_votes: u64,
    pub results: Vec<ResultRow>,
}

impl From<ElectionResults> for ResultsDescription {
    fn from(results: ElectionResults) -> Self {
        Self {
            election_id: results.election_id.to_string(),
            total_votes: results.total_votes,
            results: results.results.into_iter().map(Into::into).collect(),
        }
    }
}
