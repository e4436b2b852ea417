pub mod candidate;
pub mod election;
pub mod vote;

pub use candidate::{Candidate, CandidateCore, NewCandidate};
pub use election::{Election, ElectionCore, NewElection};
pub use vote::{NewVote, Vote, VoteCore};
