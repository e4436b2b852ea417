use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::VoterId, mongodb::Id};

/// Core vote data, as stored in the database.
///
/// `(voter_id, election_id)` is unique across the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    pub voter_id: VoterId,
    /// Foreign Key election ID.
    pub election_id: Id,
    /// Foreign Key candidate ID.
    pub candidate_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voted_at: DateTime<Utc>,
}

/// A vote without an ID, ready for insertion.
pub type NewVote = VoteCore;

/// A vote from the database, with its unique ID.
///
/// Votes are immutable, so there is no `DerefMut`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}
