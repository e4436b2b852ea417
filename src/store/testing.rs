use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crate::model::{
    common::{Category, ElectionStatus, VoterId},
    db::{Candidate, Election, NewCandidate, NewElection, NewVote, Vote},
    mongodb::Id,
};

use super::{
    CandidateUpdate, ElectionUpdate, EntityStore, MemoryStore, Result, StoreError, TallyResync,
};

/// A [`MemoryStore`] whose vote inserts can be made to roll back or stall.
#[derive(Default)]
pub struct ScriptedStore {
    inner: Arc<MemoryStore>,
    failures_left: AtomicUsize,
    unknown_after_commit: AtomicUsize,
    unknown_without_commit: AtomicUsize,
    delay_ms: AtomicU64,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` vote inserts fail with [`StoreError::Transient`] and
    /// leave no trace.
    pub fn fail_next_inserts(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// The next `n` vote inserts commit, then report
    /// [`StoreError::CommitUnknown`] as if the acknowledgement was lost.
    pub fn lose_next_commit_acks(&self, n: usize) {
        self.unknown_after_commit.store(n, Ordering::SeqCst);
    }

    /// The next `n` vote inserts report [`StoreError::CommitUnknown`] without
    /// having committed anything.
    pub fn fail_next_commits_unknown(&self, n: usize) {
        self.unknown_without_commit.store(n, Ordering::SeqCst);
    }

    /// Vote inserts commit only after `delay`, even if the caller stops
    /// waiting for them.
    pub fn delay_inserts(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Overwrite a cached vote count without touching vote records.
    pub async fn corrupt_vote_count(&self, id: Id, vote_count: u64) {
        self.inner.set_vote_count(id, vote_count).await;
    }
}

#[rocket::async_trait]
impl EntityStore for ScriptedStore {
    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        self.inner.insert_candidate(candidate).await
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        self.inner.candidate(id).await
    }

    async fn candidates(&self, category: Option<Category>) -> Result<Vec<Candidate>> {
        self.inner.candidates(category).await
    }

    async fn candidates_by_ids(&self, ids: &[Id]) -> Result<Vec<Candidate>> {
        self.inner.candidates_by_ids(ids).await
    }

    async fn update_candidate(&self, id: Id, update: CandidateUpdate) -> Result<Option<Candidate>> {
        self.inner.update_candidate(id, update).await
    }

    async fn delete_candidate(&self, id: Id) -> Result<bool> {
        self.inner.delete_candidate(id).await
    }

    async fn resync_vote_count(&self, id: Id) -> Result<TallyResync> {
        self.inner.resync_vote_count(id).await
    }

    async fn insert_election(&self, election: NewElection) -> Result<Election> {
        self.inner.insert_election(election).await
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        self.inner.election(id).await
    }

    async fn elections(&self, category: Option<Category>) -> Result<Vec<Election>> {
        self.inner.elections(category).await
    }

    async fn update_election(&self, id: Id, update: ElectionUpdate) -> Result<Option<Election>> {
        self.inner.update_election(id, update).await
    }

    async fn set_election_status(&self, id: Id, status: ElectionStatus) -> Result<()> {
        self.inner.set_election_status(id, status).await
    }

    async fn delete_election(&self, id: Id) -> Result<bool> {
        self.inner.delete_election(id).await
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<Vote> {
        if take_one(&self.failures_left) {
            return Err(StoreError::Transient("write conflict".to_string()));
        }
        if take_one(&self.unknown_without_commit) {
            return Err(StoreError::CommitUnknown("connection reset".to_string()));
        }
        if take_one(&self.unknown_after_commit) {
            self.inner.insert_vote(vote).await?;
            return Err(StoreError::CommitUnknown("connection reset".to_string()));
        }

        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        if delay.is_zero() {
            return self.inner.insert_vote(vote).await;
        }
        // Run detached so that dropping this future doesn't cancel the commit.
        let inner = self.inner.clone();
        rocket::tokio::spawn(async move {
            rocket::tokio::time::sleep(delay).await;
            inner.insert_vote(vote).await
        })
        .await
        .map_err(|err| StoreError::Transient(err.to_string()))?
    }

    async fn vote_by(&self, voter: &VoterId, election: Id) -> Result<Option<Vote>> {
        self.inner.vote_by(voter, election).await
    }

    async fn votes_by(&self, voter: &VoterId) -> Result<Vec<Vote>> {
        self.inner.votes_by(voter).await
    }

    async fn votes_in(&self, election: Id) -> Result<Vec<Vote>> {
        self.inner.votes_in(election).await
    }
}

/// Decrement `counter` unless it is already zero; true if it was decremented.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
