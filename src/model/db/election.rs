use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Category, ElectionStatus},
    mongodb::Id,
};
use crate::voting::clock;

/// Core election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub description: String,
    pub category: Category,
    /// Opening instant of the voting window (inclusive).
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// Closing instant of the voting window (inclusive).
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// Last status written back; the window is authoritative.
    pub status: ElectionStatus,
    /// Candidates standing in this election, in ballot order.
    pub candidates: Vec<Id>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl ElectionCore {
    /// Status of this election at the given instant.
    pub fn status_at(&self, now: DateTime<Utc>) -> ElectionStatus {
        clock::classify(now, self.start_time, self.end_time)
    }

    /// Is the given candidate standing in this election?
    pub fn has_candidate(&self, candidate_id: Id) -> bool {
        self.candidates.contains(&candidate_id)
    }
}

/// An election without an ID, ready for insertion.
pub type NewElection = ElectionCore;

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl ElectionCore {
        pub fn example(
            start_time: DateTime<Utc>,
            end_time: DateTime<Utc>,
            candidates: Vec<Id>,
        ) -> Self {
            Self {
                title: "GDG Lead 2026".to_string(),
                description: "Annual lead election.".to_string(),
                category: Category::Gdg,
                start_time,
                end_time,
                status: ElectionStatus::NotStarted,
                candidates,
                created_at: start_time,
            }
        }
    }
}
