//! The vote submission and tallying core.
//!
//! [`ElectionService`] validates requests and is the only entry point the
//! HTTP layer uses. It hands the mutating step to [`VoteLedger`], and reads
//! results through [`ResultsAggregator`], which always counts vote records
//! rather than trusting cached counters.

use thiserror::Error as ThisError;

use crate::model::{common::VoterId, mongodb::Id};
use crate::store::StoreError;

pub mod clock;
mod finalizer;
mod ledger;
mod results;
mod service;

pub use clock::{Clock, FixedClock, SystemClock};
pub use finalizer::{ElectionFinalizers, FinalizerFairing};
pub use ledger::VoteLedger;
pub use results::{ElectionResults, RankedCandidate, ResultsAggregator};
pub use service::{
    ElectionDetails, ElectionService, TallyCorrection, VoteStatus, VoteWithContext,
};

pub type Result<T> = std::result::Result<T, Error>;

/// The observable outcome classes of a failed operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    /// The election is not accepting votes.
    InvalidState,
    Conflict,
    BadRequest,
    /// Infrastructure failure; the only class worth retrying.
    StorageUnavailable,
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Election {0} not found")]
    ElectionNotFound(Id),
    #[error("Candidate {0} not found")]
    CandidateNotFound(Id),
    #[error("Election {0} has not started yet")]
    ElectionNotYetOpen(Id),
    #[error("Election {0} has ended")]
    ElectionClosed(Id),
    #[error("Voter '{voter}' has already voted in election {election}")]
    DuplicateVote { voter: VoterId, election: Id },
    /// An edit or delete that would break references between records.
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    /// The store didn't answer in time; the vote may or may not exist.
    #[error("No answer from storage within {0:?}; the vote may have been recorded, check vote status before retrying")]
    Indeterminate(std::time::Duration),
    /// The store lost track of whether the commit landed, and no vote by this
    /// voter for this candidate could be found afterwards.
    #[error("Storage could not confirm the vote; check vote status before retrying")]
    CommitUnknown,
    #[error(transparent)]
    Storage(StoreError),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ElectionNotFound(_) | Self::CandidateNotFound(_) => ErrorClass::NotFound,
            Self::ElectionNotYetOpen(_) | Self::ElectionClosed(_) => ErrorClass::InvalidState,
            Self::DuplicateVote { .. } | Self::Conflict(_) => ErrorClass::Conflict,
            Self::Invalid(_) => ErrorClass::BadRequest,
            Self::Indeterminate(_) | Self::CommitUnknown | Self::Storage(_) => {
                ErrorClass::StorageUnavailable
            }
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateVote { voter, election } => Self::DuplicateVote { voter, election },
            StoreError::UnknownElection(id) => Self::ElectionNotFound(id),
            StoreError::UnknownCandidate(id) => Self::CandidateNotFound(id),
            StoreError::Referenced(msg) => Self::Conflict(msg),
            other => Self::Storage(other),
        }
    }
}
