use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::model::{db::Candidate, mongodb::Id};
use crate::store::EntityStore;

use super::Result;

/// One row of an election's results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCandidate {
    pub candidate_id: Id,
    /// `None` if the candidate record no longer exists.
    pub candidate: Option<Candidate>,
    pub vote_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionResults {
    pub election_id: Id,
    pub total_votes: u64,
    /// Most votes first; ties go to the lower candidate ID.
    pub results: Vec<RankedCandidate>,
}

/// Computes results from vote records, never from cached counters.
pub struct ResultsAggregator {
    store: Arc<dyn EntityStore>,
}

impl ResultsAggregator {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn compute_results(&self, election_id: Id) -> Result<ElectionResults> {
        let votes = self.store.votes_in(election_id).await?;

        let mut counts = BTreeMap::<Id, u64>::new();
        for vote in &votes {
            *counts.entry(vote.candidate_id).or_default() += 1;
        }

        let ids: Vec<_> = counts.keys().copied().collect();
        let mut candidates: HashMap<_, _> = self
            .store
            .candidates_by_ids(&ids)
            .await?
            .into_iter()
            .map(|candidate| (candidate.id, candidate))
            .collect();

        let mut results: Vec<_> = counts
            .into_iter()
            .map(|(candidate_id, vote_count)| RankedCandidate {
                candidate_id,
                candidate: candidates.remove(&candidate_id),
                vote_count,
            })
            .collect();
        // `counts` iterates in ID order and the sort is stable.
        results.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));

        Ok(ElectionResults {
            election_id,
            total_votes: votes.len() as u64,
            results,
        })
    }
}
