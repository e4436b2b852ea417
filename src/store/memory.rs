use std::collections::{hash_map::Entry, HashMap};

use rocket::tokio::sync::RwLock;

use crate::model::{
    common::{Category, ElectionStatus, VoterId},
    db::{
        Candidate, CandidateCore, Election, ElectionCore, NewCandidate, NewElection, NewVote,
        Vote, VoteCore,
    },
    mongodb::Id,
};

use super::{
    CandidateUpdate, ElectionUpdate, EntityStore, Result, StoreError, TallyResync,
};

#[derive(Default)]
struct Tables {
    candidates: HashMap<Id, CandidateCore>,
    elections: HashMap<Id, ElectionCore>,
    votes: HashMap<Id, VoteCore>,
    /// Unique index over `(voter, election)`, pointing at the vote.
    ballots: HashMap<(VoterId, Id), Id>,
}

impl Tables {
    fn ensure_candidates(&self, ids: &[Id]) -> Result<()> {
        match ids.iter().find(|id| !self.candidates.contains_key(id)) {
            Some(id) => Err(StoreError::UnknownCandidate(*id)),
            None => Ok(()),
        }
    }
}

/// An in-process store. Every mutation takes the single write lock, which
/// makes each [`EntityStore`] call atomic with respect to all others.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a cached vote count directly, simulating drift.
    #[cfg(test)]
    pub(crate) async fn set_vote_count(&self, id: Id, vote_count: u64) {
        if let Some(candidate) = self.tables.write().await.candidates.get_mut(&id) {
            candidate.vote_count = vote_count;
        }
    }
}

#[rocket::async_trait]
impl EntityStore for MemoryStore {
    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let id = Id::new();
        self.tables
            .write()
            .await
            .candidates
            .insert(id, candidate.clone());
        Ok(Candidate { id, candidate })
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        let tables = self.tables.read().await;
        Ok(tables.candidates.get(&id).map(|candidate| Candidate {
            id,
            candidate: candidate.clone(),
        }))
    }

    async fn candidates(&self, category: Option<Category>) -> Result<Vec<Candidate>> {
        let tables = self.tables.read().await;
        let mut candidates: Vec<_> = tables
            .candidates
            .iter()
            .filter(|(_, c)| category.map_or(true, |category| c.category == category))
            .map(|(id, c)| Candidate {
                id: *id,
                candidate: c.clone(),
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(candidates)
    }

    async fn candidates_by_ids(&self, ids: &[Id]) -> Result<Vec<Candidate>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                tables.candidates.get(id).map(|c| Candidate {
                    id: *id,
                    candidate: c.clone(),
                })
            })
            .collect())
    }

    async fn update_candidate(&self, id: Id, update: CandidateUpdate) -> Result<Option<Candidate>> {
        let mut tables = self.tables.write().await;
        Ok(tables.candidates.get_mut(&id).map(|c| {
            c.name = update.name;
            c.position = update.position;
            c.category = update.category;
            c.image = update.image;
            c.description = update.description;
            c.manifesto = update.manifesto;
            Candidate {
                id,
                candidate: c.clone(),
            }
        }))
    }

    async fn delete_candidate(&self, id: Id) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if let Some((election_id, _)) = tables
            .elections
            .iter()
            .find(|(_, election)| election.has_candidate(id))
        {
            return Err(StoreError::Referenced(format!(
                "Candidate {id} still stands in election {election_id}"
            )));
        }
        Ok(tables.candidates.remove(&id).is_some())
    }

    async fn resync_vote_count(&self, id: Id) -> Result<TallyResync> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let counted = tables
            .votes
            .values()
            .filter(|vote| vote.candidate_id == id)
            .count() as u64;
        let candidate = tables
            .candidates
            .get_mut(&id)
            .ok_or(StoreError::UnknownCandidate(id))?;
        let cached = std::mem::replace(&mut candidate.vote_count, counted);
        Ok(TallyResync {
            candidate_id: id,
            cached,
            counted,
        })
    }

    async fn insert_election(&self, election: NewElection) -> Result<Election> {
        let mut tables = self.tables.write().await;
        tables.ensure_candidates(&election.candidates)?;
        let id = Id::new();
        tables.elections.insert(id, election.clone());
        Ok(Election { id, election })
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        let tables = self.tables.read().await;
        Ok(tables.elections.get(&id).map(|election| Election {
            id,
            election: election.clone(),
        }))
    }

    async fn elections(&self, category: Option<Category>) -> Result<Vec<Election>> {
        let tables = self.tables.read().await;
        let mut elections: Vec<_> = tables
            .elections
            .iter()
            .filter(|(_, e)| category.map_or(true, |category| e.category == category))
            .map(|(id, e)| Election {
                id: *id,
                election: e.clone(),
            })
            .collect();
        elections.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(elections)
    }

    async fn update_election(&self, id: Id, update: ElectionUpdate) -> Result<Option<Election>> {
        let mut tables = self.tables.write().await;
        if !tables.elections.contains_key(&id) {
            return Ok(None);
        }
        tables.ensure_candidates(&update.candidates)?;
        Ok(tables.elections.get_mut(&id).map(|e| {
            e.title = update.title;
            e.description = update.description;
            e.category = update.category;
            e.start_time = update.start_time;
            e.end_time = update.end_time;
            e.candidates = update.candidates;
            Election {
                id,
                election: e.clone(),
            }
        }))
    }

    async fn set_election_status(&self, id: Id, status: ElectionStatus) -> Result<()> {
        if let Some(election) = self.tables.write().await.elections.get_mut(&id) {
            election.status = status;
        }
        Ok(())
    }

    async fn delete_election(&self, id: Id) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.votes.values().any(|vote| vote.election_id == id) {
            return Err(StoreError::Referenced(format!(
                "Election {id} has votes and cannot be deleted"
            )));
        }
        Ok(tables.elections.remove(&id).is_some())
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<Vote> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        if !tables.elections.contains_key(&vote.election_id) {
            return Err(StoreError::UnknownElection(vote.election_id));
        }
        let candidate = tables
            .candidates
            .get_mut(&vote.candidate_id)
            .ok_or(StoreError::UnknownCandidate(vote.candidate_id))?;

        let id = Id::new();
        match tables
            .ballots
            .entry((vote.voter_id.clone(), vote.election_id))
        {
            Entry::Occupied(_) => {
                return Err(StoreError::DuplicateVote {
                    voter: vote.voter_id,
                    election: vote.election_id,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        candidate.vote_count += 1;
        tables.votes.insert(id, vote.clone());

        Ok(Vote { id, vote })
    }

    async fn vote_by(&self, voter: &VoterId, election: Id) -> Result<Option<Vote>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ballots
            .get(&(voter.clone(), election))
            .and_then(|id| {
                tables.votes.get(id).map(|vote| Vote {
                    id: *id,
                    vote: vote.clone(),
                })
            }))
    }

    async fn votes_by(&self, voter: &VoterId) -> Result<Vec<Vote>> {
        let tables = self.tables.read().await;
        let mut votes: Vec<_> = tables
            .votes
            .iter()
            .filter(|(_, vote)| &vote.voter_id == voter)
            .map(|(id, vote)| Vote {
                id: *id,
                vote: vote.clone(),
            })
            .collect();
        votes.sort_by(|a, b| b.voted_at.cmp(&a.voted_at).then_with(|| b.id.cmp(&a.id)));
        Ok(votes)
    }

    async fn votes_in(&self, election: Id) -> Result<Vec<Vote>> {
        let tables = self.tables.read().await;
        Ok(tables
            .votes
            .iter()
            .filter(|(_, vote)| vote.election_id == election)
            .map(|(id, vote)| Vote {
                id: *id,
                vote: vote.clone(),
            })
            .collect())
    }
}
