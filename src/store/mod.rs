//! Durable storage for candidates, elections and votes.
//!
//! The voting core only talks to [`EntityStore`]. Two implementations exist:
//! [`MongoStore`] for deployments and [`MemoryStore`] for tests and
//! single-process use. Both guarantee that [`EntityStore::insert_vote`] is a
//! single atomic step: the `(voter, election)` uniqueness check, the insert,
//! and the candidate counter increment either all happen or none do.

use mongodb::error::Error as DbError;
use thiserror::Error;

use crate::model::{
    common::{Category, ElectionStatus, VoterId},
    db::{Candidate, Election, NewCandidate, NewElection, NewVote, Vote},
    mongodb::{is_transient_transaction_error, is_unknown_commit_result, Id},
};

mod memory;
mod mongo;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Voter '{voter}' has already voted in election {election}")]
    DuplicateVote { voter: VoterId, election: Id },
    #[error("Election {0} does not exist")]
    UnknownElection(Id),
    #[error("Candidate {0} does not exist")]
    UnknownCandidate(Id),
    /// A delete or edit would leave dangling references.
    #[error("{0}")]
    Referenced(String),
    /// The whole operation was rolled back and may be retried.
    #[error("Transient storage failure: {0}")]
    Transient(String),
    /// The commit may or may not have taken effect. Never retried blindly.
    #[error("Commit result unknown: {0}")]
    CommitUnknown(String),
    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if is_unknown_commit_result(&err) {
            Self::CommitUnknown(err.to_string())
        } else if is_transient_transaction_error(&err) {
            Self::Transient(err.to_string())
        } else {
            Self::Db(err)
        }
    }
}

/// Descriptive candidate fields an administrator may edit.
/// The cached vote count is not editable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUpdate {
    pub name: String,
    pub position: String,
    pub category: Category,
    pub image: String,
    pub description: String,
    pub manifesto: String,
}

/// Administrator-editable election fields.
/// The status cache and creation time are kept from the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionUpdate {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub candidates: Vec<Id>,
}

/// Result of resynchronising one candidate's cached vote count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyResync {
    pub candidate_id: Id,
    pub cached: u64,
    pub counted: u64,
}

impl TallyResync {
    pub fn drifted(&self) -> bool {
        self.cached != self.counted
    }
}

#[rocket::async_trait]
pub trait EntityStore: Send + Sync {
    // Candidates

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate>;

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>>;

    /// All candidates, newest first, optionally restricted to one category.
    async fn candidates(&self, category: Option<Category>) -> Result<Vec<Candidate>>;

    /// The candidates with the given IDs that exist, in no particular order.
    async fn candidates_by_ids(&self, ids: &[Id]) -> Result<Vec<Candidate>>;

    async fn update_candidate(&self, id: Id, update: CandidateUpdate) -> Result<Option<Candidate>>;

    /// Delete a candidate. Fails with [`StoreError::Referenced`] while any
    /// election lists it. Returns false if it didn't exist.
    async fn delete_candidate(&self, id: Id) -> Result<bool>;

    /// Atomically overwrite the cached vote count of a candidate with the
    /// number of vote records referencing it.
    async fn resync_vote_count(&self, id: Id) -> Result<TallyResync>;

    // Elections

    /// Insert an election. Fails with [`StoreError::UnknownCandidate`] if a
    /// listed candidate doesn't exist when the insert commits.
    async fn insert_election(&self, election: NewElection) -> Result<Election>;

    async fn election(&self, id: Id) -> Result<Option<Election>>;

    /// All elections, latest start first, optionally restricted to one category.
    async fn elections(&self, category: Option<Category>) -> Result<Vec<Election>>;

    /// Replace an election's editable fields, with the same candidate check
    /// as [`EntityStore::insert_election`]. Returns `None` if it didn't exist.
    async fn update_election(&self, id: Id, update: ElectionUpdate) -> Result<Option<Election>>;

    /// Overwrite the cached status of an election.
    async fn set_election_status(&self, id: Id, status: ElectionStatus) -> Result<()>;

    /// Delete an election. Fails with [`StoreError::Referenced`] while any
    /// vote references it. Returns false if it didn't exist.
    async fn delete_election(&self, id: Id) -> Result<bool>;

    // Votes

    /// Record a vote and increment its candidate's cached count, atomically.
    ///
    /// Fails with [`StoreError::DuplicateVote`] if the voter already voted in
    /// the election, and with [`StoreError::UnknownElection`] or
    /// [`StoreError::UnknownCandidate`] if either is missing at that instant.
    async fn insert_vote(&self, vote: NewVote) -> Result<Vote>;

    async fn vote_by(&self, voter: &VoterId, election: Id) -> Result<Option<Vote>>;

    /// Every vote cast by a voter, newest first.
    async fn votes_by(&self, voter: &VoterId) -> Result<Vec<Vote>>;

    /// Every vote cast in an election.
    async fn votes_in(&self, election: Id) -> Result<Vec<Vote>>;
}
