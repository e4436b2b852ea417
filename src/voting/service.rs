use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::model::{
    common::{Category, ElectionStatus, VoterId},
    db::{Candidate, Election, NewCandidate, NewElection, Vote},
    mongodb::Id,
};
use crate::store::{CandidateUpdate, ElectionUpdate, EntityStore, StoreError};

use super::{clock, Clock, ElectionResults, Error, Result, ResultsAggregator, VoteLedger};

/// Whether a voter has voted in an election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteStatus {
    pub has_voted: bool,
    pub vote: Option<Vote>,
}

/// A vote together with the records it points at, where they still exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteWithContext {
    pub vote: Vote,
    pub election: Option<Election>,
    pub candidate: Option<Candidate>,
}

/// An election with its candidate records attached, in ballot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionDetails {
    pub election: Election,
    pub candidates: Vec<Candidate>,
}

/// A cached vote count that had drifted from the vote records and was fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyCorrection {
    pub candidate_id: Id,
    pub was: u64,
    pub now: u64,
}

/// Entry point for every election, candidate and vote operation.
pub struct ElectionService {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    ledger: VoteLedger,
    aggregator: ResultsAggregator,
}

impl ElectionService {
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>, vote_timeout: Duration) -> Self {
        Self {
            ledger: VoteLedger::new(store.clone(), clock.clone(), vote_timeout),
            aggregator: ResultsAggregator::new(store.clone()),
            store,
            clock,
        }
    }

    // Voting

    /// Cast a vote on behalf of an authenticated voter.
    pub async fn submit_vote(
        &self,
        voter: &VoterId,
        election_id: Id,
        candidate_id: Id,
    ) -> Result<Vote> {
        let election = self
            .store
            .election(election_id)
            .await?
            .ok_or(Error::ElectionNotFound(election_id))?;

        match election.status_at(self.clock.now()) {
            ElectionStatus::NotStarted => return Err(Error::ElectionNotYetOpen(election_id)),
            ElectionStatus::Closed => return Err(Error::ElectionClosed(election_id)),
            ElectionStatus::Open => {}
        }

        // Membership is checked before existence, so a candidate standing
        // elsewhere is reported exactly like an unknown one.
        if !election.has_candidate(candidate_id) {
            return Err(Error::CandidateNotFound(candidate_id));
        }
        if self.store.candidate(candidate_id).await?.is_none() {
            return Err(Error::CandidateNotFound(candidate_id));
        }

        self.ledger.cast_vote(voter, election_id, candidate_id).await
    }

    pub async fn check_vote_status(&self, voter: &VoterId, election_id: Id) -> Result<VoteStatus> {
        let vote = self.store.vote_by(voter, election_id).await?;
        Ok(VoteStatus {
            has_voted: vote.is_some(),
            vote,
        })
    }

    /// Every vote cast by a voter, newest first.
    pub async fn votes_of(&self, voter: &VoterId) -> Result<Vec<VoteWithContext>> {
        let votes = self.store.votes_by(voter).await?;
        let mut out = Vec::with_capacity(votes.len());
        for vote in votes {
            let election = self.store.election(vote.election_id).await?;
            let candidate = self.store.candidate(vote.candidate_id).await?;
            out.push(VoteWithContext {
                vote,
                election,
                candidate,
            });
        }
        Ok(out)
    }

    pub async fn results(&self, election_id: Id) -> Result<ElectionResults> {
        self.aggregator.compute_results(election_id).await
    }

    // Candidates

    pub async fn create_candidate(&self, spec: CandidateUpdate) -> Result<Candidate> {
        let spec = validate_candidate(spec)?;
        let candidate = NewCandidate {
            name: spec.name,
            position: spec.position,
            category: spec.category,
            image: spec.image,
            description: spec.description,
            manifesto: spec.manifesto,
            vote_count: 0,
            created_at: self.clock.now(),
        };
        let candidate = self.store.insert_candidate(candidate).await?;
        info!("Created candidate {} ({})", candidate.id, candidate.name);
        Ok(candidate)
    }

    pub async fn candidate(&self, id: Id) -> Result<Candidate> {
        self.store
            .candidate(id)
            .await?
            .ok_or(Error::CandidateNotFound(id))
    }

    pub async fn candidates(&self, category: Option<Category>) -> Result<Vec<Candidate>> {
        Ok(self.store.candidates(category).await?)
    }

    pub async fn update_candidate(&self, id: Id, update: CandidateUpdate) -> Result<Candidate> {
        let update = validate_candidate(update)?;
        self.store
            .update_candidate(id, update)
            .await?
            .ok_or(Error::CandidateNotFound(id))
    }

    /// Delete a candidate that no election lists.
    pub async fn delete_candidate(&self, id: Id) -> Result<()> {
        if self.store.delete_candidate(id).await? {
            info!("Deleted candidate {id}");
            Ok(())
        } else {
            Err(Error::CandidateNotFound(id))
        }
    }

    // Elections

    pub async fn create_election(&self, spec: ElectionUpdate) -> Result<Election> {
        let spec = validate_election(spec)?;
        self.ensure_candidates_exist(&spec.candidates).await?;

        let now = self.clock.now();
        let election = NewElection {
            status: clock::classify(now, spec.start_time, spec.end_time),
            title: spec.title,
            description: spec.description,
            category: spec.category,
            start_time: spec.start_time,
            end_time: spec.end_time,
            candidates: spec.candidates,
            created_at: now,
        };
        let election = self.store.insert_election(election).await?;
        info!(
            "Created election {} '{}' ({} to {})",
            election.id, election.title, election.start_time, election.end_time
        );
        Ok(election)
    }

    /// An election with its status brought up to date.
    pub async fn election(&self, id: Id) -> Result<Election> {
        let election = self
            .store
            .election(id)
            .await?
            .ok_or(Error::ElectionNotFound(id))?;
        Ok(self.refresh_status(election).await)
    }

    /// An election with its status brought up to date and its candidates
    /// attached. Candidates that no longer exist are skipped.
    pub async fn election_details(&self, id: Id) -> Result<ElectionDetails> {
        let election = self.election(id).await?;
        let candidates = self.ordered_candidates(&election.candidates).await?;
        Ok(ElectionDetails {
            election,
            candidates,
        })
    }

    /// Elections, latest start first. The status filter applies to the
    /// status at the current instant, not the stored one.
    pub async fn elections(
        &self,
        status: Option<ElectionStatus>,
        category: Option<Category>,
    ) -> Result<Vec<ElectionDetails>> {
        let mut out = Vec::new();
        for election in self.store.elections(category).await? {
            let election = self.refresh_status(election).await;
            if status.map_or(false, |status| status != election.status) {
                continue;
            }
            let candidates = self.ordered_candidates(&election.candidates).await?;
            out.push(ElectionDetails {
                election,
                candidates,
            });
        }
        Ok(out)
    }

    /// Replace an election's editable fields.
    ///
    /// Fails with [`Error::Conflict`] if the new candidate list drops a
    /// candidate who already received votes in this election.
    pub async fn update_election(&self, id: Id, update: ElectionUpdate) -> Result<Election> {
        let update = validate_election(update)?;
        let current = self
            .store
            .election(id)
            .await?
            .ok_or(Error::ElectionNotFound(id))?;
        self.ensure_candidates_exist(&update.candidates).await?;

        let kept: HashSet<_> = update.candidates.iter().copied().collect();
        let dropped: HashSet<_> = current
            .candidates
            .iter()
            .copied()
            .filter(|c| !kept.contains(c))
            .collect();
        if !dropped.is_empty() {
            let votes = self.store.votes_in(id).await?;
            if let Some(vote) = votes.iter().find(|v| dropped.contains(&v.candidate_id)) {
                return Err(Error::Conflict(format!(
                    "Candidate {} already has votes in election {id}",
                    vote.candidate_id
                )));
            }
        }

        let election = self
            .store
            .update_election(id, update)
            .await?
            .ok_or(Error::ElectionNotFound(id))?;
        info!("Updated election {id}");
        Ok(self.refresh_status(election).await)
    }

    /// Delete an election that has no votes.
    pub async fn delete_election(&self, id: Id) -> Result<()> {
        if self.store.delete_election(id).await? {
            info!("Deleted election {id}");
            Ok(())
        } else {
            Err(Error::ElectionNotFound(id))
        }
    }

    /// Recompute the cached vote count of every candidate in an election
    /// from vote records. Returns the counts that had to change.
    pub async fn reconcile_tallies(&self, election_id: Id) -> Result<Vec<TallyCorrection>> {
        let election = self
            .store
            .election(election_id)
            .await?
            .ok_or(Error::ElectionNotFound(election_id))?;

        let mut corrections = Vec::new();
        for &candidate_id in &election.candidates {
            let resync = match self.store.resync_vote_count(candidate_id).await {
                Ok(resync) => resync,
                Err(StoreError::UnknownCandidate(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            if resync.drifted() {
                warn!(
                    "Vote count of candidate {candidate_id} had drifted: cached {}, counted {}",
                    resync.cached, resync.counted
                );
                corrections.push(TallyCorrection {
                    candidate_id,
                    was: resync.cached,
                    now: resync.counted,
                });
            }
        }
        debug!(
            "Reconciled election {election_id}: {} correction(s)",
            corrections.len()
        );
        Ok(corrections)
    }

    /// Write the current status of an election back to the store.
    /// Returns `None` if the election doesn't exist.
    pub(super) async fn sync_status(&self, id: Id) -> Result<Option<ElectionStatus>> {
        let election = match self.store.election(id).await? {
            Some(election) => election,
            None => return Ok(None),
        };
        let status = election.status_at(self.clock.now());
        if status != election.status {
            self.store.set_election_status(id, status).await?;
            debug!("Election {id} is now '{status}'");
        }
        Ok(Some(status))
    }

    /// Bring the status of a loaded election up to date, writing it back if
    /// the stored one is stale. A failed write is only logged.
    async fn refresh_status(&self, mut election: Election) -> Election {
        let status = election.status_at(self.clock.now());
        if status != election.status {
            if let Err(err) = self.store.set_election_status(election.id, status).await {
                warn!(
                    "Failed to store status '{status}' for election {}: {err}",
                    election.id
                );
            }
            election.status = status;
        }
        election
    }

    async fn ordered_candidates(&self, ids: &[Id]) -> Result<Vec<Candidate>> {
        let mut found = self.store.candidates_by_ids(ids).await?;
        found.sort_by_key(|c| ids.iter().position(|id| *id == c.id));
        Ok(found)
    }

    async fn ensure_candidates_exist(&self, ids: &[Id]) -> Result<()> {
        let found: HashSet<_> = self
            .store
            .candidates_by_ids(ids)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        match ids.iter().find(|id| !found.contains(id)) {
            Some(missing) => Err(Error::CandidateNotFound(*missing)),
            None => Ok(()),
        }
    }
}

fn validate_candidate(mut spec: CandidateUpdate) -> Result<CandidateUpdate> {
    spec.name = spec.name.trim().to_string();
    spec.position = spec.position.trim().to_string();
    if spec.name.is_empty() {
        return Err(Error::Invalid("Candidate name must not be empty".to_string()));
    }
    if spec.position.is_empty() {
        return Err(Error::Invalid(
            "Candidate position must not be empty".to_string(),
        ));
    }
    if spec.image.trim().is_empty() {
        return Err(Error::Invalid("Candidate image must not be empty".to_string()));
    }
    Ok(spec)
}

fn validate_election(mut spec: ElectionUpdate) -> Result<ElectionUpdate> {
    spec.title = spec.title.trim().to_string();
    if spec.title.is_empty() {
        return Err(Error::Invalid("Election title must not be empty".to_string()));
    }
    if spec.description.trim().is_empty() {
        return Err(Error::Invalid(
            "Election description must not be empty".to_string(),
        ));
    }
    if spec.start_time >= spec.end_time {
        return Err(Error::Invalid(
            "Election must start before it ends".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    if let Some(repeated) = spec.candidates.iter().find(|id| !seen.insert(**id)) {
        return Err(Error::Invalid(format!(
            "Candidate {repeated} is listed more than once"
        )));
    }
    Ok(spec)
}
