use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rocket::tokio::time::timeout;

use crate::model::{
    common::VoterId,
    db::{NewVote, Vote},
    mongodb::Id,
};
use crate::store::{EntityStore, StoreError};

use super::{Clock, Error, Result};

/// How many times a vote insert is tried when the store reports that the
/// transaction was rolled back and may be retried.
const MAX_ATTEMPTS: usize = 3;

/// The only writer of vote records and of candidate vote counts.
///
/// Callers must already have checked that the election is open and that the
/// candidate stands in it. The ledger itself only guarantees that a
/// `(voter, election)` pair is recorded at most once, by delegating to the
/// store's atomic conditional insert.
pub struct VoteLedger {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    /// Record one vote.
    ///
    /// A retry after [`Error::Indeterminate`] is always safe: if the first
    /// attempt committed, the retry fails with [`Error::DuplicateVote`].
    ///
    /// When the store cannot say whether a commit landed, the ballot is read
    /// back instead of retrying the insert: a matching vote means success.
    pub async fn cast_vote(
        &self,
        voter: &VoterId,
        election_id: Id,
        candidate_id: Id,
    ) -> Result<Vote> {
        let vote = NewVote {
            voter_id: voter.clone(),
            election_id,
            candidate_id,
            voted_at: self.clock.now(),
        };

        let mut attempt = 1;
        loop {
            let outcome = timeout(self.timeout, self.store.insert_vote(vote.clone())).await;
            match outcome {
                Ok(Ok(vote)) => {
                    info!(
                        "Recorded vote {} in election {election_id} for candidate {candidate_id}",
                        vote.id
                    );
                    return Ok(vote);
                }
                Ok(Err(StoreError::Transient(reason))) if attempt < MAX_ATTEMPTS => {
                    debug!("Vote insert attempt {attempt} rolled back ({reason}), retrying");
                    attempt += 1;
                }
                Ok(Err(StoreError::CommitUnknown(reason))) => {
                    warn!("Commit of vote by '{voter}' in election {election_id} unconfirmed ({reason})");
                    return self.confirm(voter, election_id, candidate_id).await;
                }
                Ok(Err(err)) => {
                    if let StoreError::DuplicateVote { .. } = err {
                        info!("Rejected second vote by '{voter}' in election {election_id}");
                    }
                    return Err(err.into());
                }
                Err(_) => {
                    warn!(
                        "Vote by '{voter}' in election {election_id} timed out after {:?}; outcome unknown",
                        self.timeout
                    );
                    return Err(Error::Indeterminate(self.timeout));
                }
            }
        }
    }

    /// Look for the vote an unconfirmed commit may have written.
    async fn confirm(&self, voter: &VoterId, election_id: Id, candidate_id: Id) -> Result<Vote> {
        match self.store.vote_by(voter, election_id).await {
            Ok(Some(vote)) if vote.candidate_id == candidate_id => {
                info!(
                    "Confirmed vote {} in election {election_id} for candidate {candidate_id}",
                    vote.id
                );
                Ok(vote)
            }
            Ok(Some(_)) => Err(Error::DuplicateVote {
                voter: voter.clone(),
                election: election_id,
            }),
            Ok(None) => Err(Error::CommitUnknown),
            Err(err) => {
                warn!("Could not read back vote by '{voter}' in election {election_id}: {err}");
                Err(Error::CommitUnknown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use rocket::futures::future::join_all;

    use super::*;
    use crate::model::db::{CandidateCore, ElectionCore};
    use crate::store::testing::ScriptedStore;
    use crate::voting::{ErrorClass, FixedClock};

    async fn setup(store: Arc<ScriptedStore>) -> (VoteLedger, Id, Id, Id) {
        let c1 = store
            .insert_candidate(CandidateCore::example1())
            .await
            .unwrap()
            .id;
        let c2 = store
            .insert_candidate(CandidateCore::example2())
            .await
            .unwrap()
            .id;
        let now = Utc::now();
        let election = store
            .insert_election(ElectionCore::example(
                now - ChronoDuration::hours(1),
                now + ChronoDuration::hours(1),
                vec![c1, c2],
            ))
            .await
            .unwrap()
            .id;
        let ledger = VoteLedger::new(
            store,
            Arc::new(FixedClock::new(now)),
            Duration::from_millis(200),
        );
        (ledger, election, c1, c2)
    }

    #[rocket::async_test]
    async fn records_vote_with_clock_time() {
        let store = Arc::new(ScriptedStore::new());
        let (ledger, election, c1, _) = setup(store.clone()).await;

        let vote = ledger.cast_vote(&"v1".into(), election, c1).await.unwrap();

        assert_eq!(vote.voter_id, "v1".into());
        assert_eq!(vote.candidate_id, c1);
        assert_eq!(store.candidate(c1).await.unwrap().unwrap().vote_count, 1);
    }

    #[rocket::async_test]
    async fn duplicate_is_a_conflict() {
        let store = Arc::new(ScriptedStore::new());
        let (ledger, election, c1, c2) = setup(store).await;
        ledger.cast_vote(&"v1".into(), election, c1).await.unwrap();

        let err = ledger.cast_vote(&"v1".into(), election, c2).await.unwrap_err();

        assert!(matches!(err, Error::DuplicateVote { .. }));
        assert_eq!(err.class(), ErrorClass::Conflict);
    }

    #[rocket::async_test]
    async fn transient_rollbacks_are_retried() {
        let store = Arc::new(ScriptedStore::new());
        store.fail_next_inserts(MAX_ATTEMPTS - 1);
        let (ledger, election, c1, _) = setup(store.clone()).await;

        ledger.cast_vote(&"v1".into(), election, c1).await.unwrap();

        assert_eq!(store.votes_in(election).await.unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn persistent_rollbacks_surface_as_storage_errors() {
        let store = Arc::new(ScriptedStore::new());
        store.fail_next_inserts(MAX_ATTEMPTS);
        let (ledger, election, c1, _) = setup(store.clone()).await;

        let err = ledger.cast_vote(&"v1".into(), election, c1).await.unwrap_err();

        assert_eq!(err.class(), ErrorClass::StorageUnavailable);
        assert!(store.votes_in(election).await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn timeout_is_indeterminate_and_retry_is_safe() {
        let store = Arc::new(ScriptedStore::new());
        let (ledger, election, c1, _) = setup(store.clone()).await;
        // The insert commits, but only after the ledger stopped waiting.
        store.delay_inserts(Duration::from_millis(400));

        let err = ledger.cast_vote(&"v1".into(), election, c1).await.unwrap_err();
        assert!(matches!(err, Error::Indeterminate(_)));
        assert_eq!(err.class(), ErrorClass::StorageUnavailable);

        store.delay_inserts(Duration::ZERO);
        rocket::tokio::time::sleep(Duration::from_millis(400)).await;
        let retry = ledger.cast_vote(&"v1".into(), election, c1).await;
        assert!(matches!(retry, Err(Error::DuplicateVote { .. })));
        assert_eq!(store.votes_in(election).await.unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn concurrent_casts_for_same_ballot_succeed_once() {
        let store = Arc::new(ScriptedStore::new());
        let (ledger, election, c1, _) = setup(store.clone()).await;
        let ledger = Arc::new(ledger);

        let casts = (0..16).map(|_| {
            let ledger = ledger.clone();
            rocket::tokio::spawn(async move { ledger.cast_vote(&"v1".into(), election, c1).await })
        });
        let results: Vec<_> = join_all(casts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(Error::DuplicateVote { .. })))
                .count(),
            15
        );
        assert_eq!(store.candidate(c1).await.unwrap().unwrap().vote_count, 1);
    }

    #[rocket::async_test]
    async fn lost_commit_ack_resolves_to_the_recorded_vote() {
        let store = Arc::new(ScriptedStore::new());
        store.lose_next_commit_acks(1);
        let (ledger, election, c1, _) = setup(store.clone()).await;

        let vote = ledger.cast_vote(&"v1".into(), election, c1).await.unwrap();

        assert_eq!(vote.candidate_id, c1);
        assert_eq!(store.votes_in(election).await.unwrap().len(), 1);
        assert_eq!(store.candidate(c1).await.unwrap().unwrap().vote_count, 1);
    }

    #[rocket::async_test]
    async fn lost_commit_ack_for_other_candidate_is_a_duplicate() {
        let store = Arc::new(ScriptedStore::new());
        let (ledger, election, c1, c2) = setup(store.clone()).await;
        ledger.cast_vote(&"v1".into(), election, c1).await.unwrap();
        store.fail_next_commits_unknown(1);

        let err = ledger.cast_vote(&"v1".into(), election, c2).await.unwrap_err();

        assert!(matches!(err, Error::DuplicateVote { .. }));
        assert_eq!(store.votes_in(election).await.unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn unconfirmed_commit_without_vote_is_unavailable_and_retry_succeeds() {
        let store = Arc::new(ScriptedStore::new());
        store.fail_next_commits_unknown(1);
        let (ledger, election, c1, _) = setup(store.clone()).await;

        let err = ledger.cast_vote(&"v1".into(), election, c1).await.unwrap_err();
        assert!(matches!(err, Error::CommitUnknown));
        assert_eq!(err.class(), ErrorClass::StorageUnavailable);
        assert!(store.votes_in(election).await.unwrap().is_empty());

        ledger.cast_vote(&"v1".into(), election, c1).await.unwrap();
        assert_eq!(store.votes_in(election).await.unwrap().len(), 1);
    }
}
