use log::{debug, warn};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use crate::model::{
    common::{Category, ElectionStatus, VoterId},
    db::{Candidate, Election, NewCandidate, NewElection, NewVote, Vote},
    mongodb::{ensure_indexes_exist, is_duplicate_key_error, Coll, Id},
};

use super::{
    CandidateUpdate, ElectionUpdate, EntityStore, Result, StoreError, TallyResync,
};

/// A store backed by MongoDB.
///
/// Vote insertion and tally resynchronisation run inside multi-document
/// transactions, so the server must be a replica set or sharded cluster.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect to the given database and make sure the indexes the store
    /// depends on exist.
    pub async fn connect(uri: &str, db_name: &str) -> std::result::Result<Self, DbError> {
        let client = Client::with_uri_str(uri).await?;
        Self::from_client(client, db_name).await
    }

    pub async fn from_client(client: Client, db_name: &str) -> std::result::Result<Self, DbError> {
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        Ok(Self { client, db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn candidate_coll(&self) -> Coll<Candidate> {
        Coll::from_db(&self.db)
    }

    fn election_coll(&self) -> Coll<Election> {
        Coll::from_db(&self.db)
    }

    fn vote_coll(&self) -> Coll<Vote> {
        Coll::from_db(&self.db)
    }

    /// Run `body` inside a transaction, committing on success and aborting on
    /// any error.
    async fn in_transaction<T>(
        &self,
        body: impl for<'s> FnOnce(
            &'s Self,
            &'s mut ClientSession,
        ) -> rocket::futures::future::BoxFuture<'s, Result<T>>,
    ) -> Result<T> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        match body(self, &mut session).await {
            Ok(value) => {
                session.commit_transaction().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    // The server may already have aborted on our behalf.
                    debug!("Abort after failed transaction also failed: {abort_err}");
                }
                Err(e)
            }
        }
    }

    async fn insert_vote_in(&self, vote: &NewVote, session: &mut ClientSession) -> Result<Id> {
        // Writing the election rather than reading it makes a concurrent
        // delete of the election conflict with this transaction.
        let touched = self
            .election_coll()
            .update_one_with_session(vote.election_id.as_doc(), touch(), None, session)
            .await?;
        if touched.matched_count == 0 {
            return Err(StoreError::UnknownElection(vote.election_id));
        }

        let new_votes = Coll::<NewVote>::from_db(&self.db);
        let inserted = match new_votes
            .insert_one_with_session(vote, None, session)
            .await
        {
            Ok(result) => result,
            Err(e) if is_duplicate_key_error(&e) => {
                return Err(StoreError::DuplicateVote {
                    voter: vote.voter_id.clone(),
                    election: vote.election_id,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let update = doc! { "$inc": { "vote_count": 1_i64 } };
        let result = self
            .candidate_coll()
            .update_one_with_session(vote.candidate_id.as_doc(), update, None, session)
            .await?;
        if result.matched_count != 1 {
            return Err(StoreError::UnknownCandidate(vote.candidate_id));
        }

        let id = inserted
            .inserted_id
            .as_object_id()
            .expect("votes use ObjectId primary keys")
            .into();
        Ok(id)
    }

    /// Write every listed candidate, failing if one is missing. A concurrent
    /// delete of any of them then conflicts with the calling transaction.
    async fn touch_candidates_in(&self, ids: &[Id], session: &mut ClientSession) -> Result<()> {
        for id in ids {
            let result = self
                .candidate_coll()
                .update_one_with_session(id.as_doc(), touch(), None, session)
                .await?;
            if result.matched_count != 1 {
                return Err(StoreError::UnknownCandidate(*id));
            }
        }
        Ok(())
    }

    async fn resync_in(&self, id: Id, session: &mut ClientSession) -> Result<TallyResync> {
        let counted = self
            .vote_coll()
            .count_documents_with_session(doc! { "candidate_id": *id }, None, session)
            .await?;
        // Writing the counter makes any concurrent increment conflict with us,
        // so one of the two transactions is retried.
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .build();
        let update = doc! { "$set": { "vote_count": counted as i64 } };
        let before = self
            .candidate_coll()
            .find_one_and_update_with_session(id.as_doc(), update, options, session)
            .await?
            .ok_or(StoreError::UnknownCandidate(id))?;
        Ok(TallyResync {
            candidate_id: id,
            cached: before.vote_count,
            counted,
        })
    }

    fn category_filter(category: Option<Category>) -> Document {
        match category {
            Some(category) => doc! { "category": category },
            None => doc! {},
        }
    }
}

/// An update that changes nothing readers care about, but still counts as a
/// write for transaction conflict detection.
fn touch() -> Document {
    doc! { "$inc": { "revision": 1_i64 } }
}

#[rocket::async_trait]
impl EntityStore for MongoStore {
    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let id = Coll::<NewCandidate>::from_db(&self.db)
            .insert_one(&candidate, None)
            .await?
            .inserted_id
            .as_object_id()
            .expect("candidates use ObjectId primary keys")
            .into();
        Ok(Candidate { id, candidate })
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.candidate_coll().find_one(id.as_doc(), None).await?)
    }

    async fn candidates(&self, category: Option<Category>) -> Result<Vec<Candidate>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "_id": -1 })
            .build();
        let candidates = self
            .candidate_coll()
            .find(Self::category_filter(category), options)
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn candidates_by_ids(&self, ids: &[Id]) -> Result<Vec<Candidate>> {
        let ids: Vec<_> = ids.iter().map(|id| **id).collect();
        let candidates = self
            .candidate_coll()
            .find(doc! { "_id": { "$in": ids } }, None)
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn update_candidate(&self, id: Id, update: CandidateUpdate) -> Result<Option<Candidate>> {
        let update = doc! {
            "$set": {
                "name": update.name,
                "position": update.position,
                "category": update.category,
                "image": update.image,
                "description": update.description,
                "manifesto": update.manifesto,
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .candidate_coll()
            .find_one_and_update(id.as_doc(), update, options)
            .await?)
    }

    async fn delete_candidate(&self, id: Id) -> Result<bool> {
        self.in_transaction(|store, session| {
            Box::pin(async move {
                let referencing = store
                    .election_coll()
                    .find_one_with_session(doc! { "candidates": *id }, None, session)
                    .await?;
                if let Some(election) = referencing {
                    return Err(StoreError::Referenced(format!(
                        "Candidate {id} still stands in election {}",
                        election.id
                    )));
                }
                let result = store
                    .candidate_coll()
                    .delete_one_with_session(id.as_doc(), None, session)
                    .await?;
                Ok(result.deleted_count == 1)
            })
        })
        .await
    }

    async fn resync_vote_count(&self, id: Id) -> Result<TallyResync> {
        self.in_transaction(|store, session| Box::pin(store.resync_in(id, session)))
            .await
    }

    async fn insert_election(&self, election: NewElection) -> Result<Election> {
        let pending = election.clone();
        let id = self
            .in_transaction(move |store, session| {
                Box::pin(async move {
                    store
                        .touch_candidates_in(&pending.candidates, session)
                        .await?;
                    let id = Coll::<NewElection>::from_db(&store.db)
                        .insert_one_with_session(&pending, None, session)
                        .await?
                        .inserted_id
                        .as_object_id()
                        .expect("elections use ObjectId primary keys")
                        .into();
                    Ok(id)
                })
            })
            .await?;
        Ok(Election { id, election })
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        Ok(self.election_coll().find_one(id.as_doc(), None).await?)
    }

    async fn elections(&self, category: Option<Category>) -> Result<Vec<Election>> {
        let options = FindOptions::builder()
            .sort(doc! { "start_time": -1, "_id": -1 })
            .build();
        let elections = self
            .election_coll()
            .find(Self::category_filter(category), options)
            .await?
            .try_collect()
            .await?;
        Ok(elections)
    }

    async fn update_election(&self, id: Id, update: ElectionUpdate) -> Result<Option<Election>> {
        let candidates: Vec<_> = update.candidates.iter().map(|id| **id).collect();
        let listed = update.candidates;
        let update = doc! {
            "$set": {
                "title": update.title,
                "description": update.description,
                "category": update.category,
                "start_time": BsonDateTime::from_chrono(update.start_time),
                "end_time": BsonDateTime::from_chrono(update.end_time),
                "candidates": candidates,
            }
        };
        self.in_transaction(move |store, session| {
            Box::pin(async move {
                let exists = store
                    .election_coll()
                    .find_one_with_session(id.as_doc(), None, session)
                    .await?
                    .is_some();
                if !exists {
                    return Ok(None);
                }
                store.touch_candidates_in(&listed, session).await?;
                let options = FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build();
                Ok(store
                    .election_coll()
                    .find_one_and_update_with_session(id.as_doc(), update, options, session)
                    .await?)
            })
        })
        .await
    }

    async fn set_election_status(&self, id: Id, status: ElectionStatus) -> Result<()> {
        let update = doc! { "$set": { "status": status } };
        self.election_coll()
            .update_one(id.as_doc(), update, None)
            .await?;
        Ok(())
    }

    async fn delete_election(&self, id: Id) -> Result<bool> {
        self.in_transaction(|store, session| {
            Box::pin(async move {
                let votes = store
                    .vote_coll()
                    .count_documents_with_session(doc! { "election_id": *id }, None, session)
                    .await?;
                if votes > 0 {
                    return Err(StoreError::Referenced(format!(
                        "Election {id} has {votes} votes and cannot be deleted"
                    )));
                }
                let result = store
                    .election_coll()
                    .delete_one_with_session(id.as_doc(), None, session)
                    .await?;
                Ok(result.deleted_count == 1)
            })
        })
        .await
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<Vote> {
        let pending = vote.clone();
        let id = self
            .in_transaction(move |store, session| {
                Box::pin(async move { store.insert_vote_in(&pending, session).await })
            })
            .await;
        match id {
            Ok(id) => Ok(Vote { id, vote }),
            Err(e) => {
                if let StoreError::Transient(ref err) = e {
                    warn!("Vote transaction for election {} aborted: {err}", vote.election_id);
                }
                Err(e)
            }
        }
    }

    async fn vote_by(&self, voter: &VoterId, election: Id) -> Result<Option<Vote>> {
        let filter = doc! {
            "voter_id": voter.as_str(),
            "election_id": *election,
        };
        Ok(self.vote_coll().find_one(filter, None).await?)
    }

    async fn votes_by(&self, voter: &VoterId) -> Result<Vec<Vote>> {
        let options = FindOptions::builder()
            .sort(doc! { "voted_at": -1, "_id": -1 })
            .build();
        let votes = self
            .vote_coll()
            .find(doc! { "voter_id": voter.as_str() }, options)
            .await?
            .try_collect()
            .await?;
        Ok(votes)
    }

    async fn votes_in(&self, election: Id) -> Result<Vec<Vote>> {
        let votes = self
            .vote_coll()
            .find(doc! { "election_id": *election }, None)
            .await?
            .try_collect()
            .await?;
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rocket::futures::future::join_all;

    use super::*;
    use crate::model::db::{CandidateCore, ElectionCore};

    async fn seed(store: &MongoStore) -> (Id, Id, Id) {
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
                now - Duration::hours(1),
                now + Duration::hours(1),
                vec![c1, c2],
            ))
            .await
            .unwrap()
            .id;
        (election, c1, c2)
    }

    fn vote(voter: &str, election: Id, candidate: Id) -> NewVote {
        NewVote {
            voter_id: voter.into(),
            election_id: election,
            candidate_id: candidate,
            voted_at: Utc::now(),
        }
    }

    #[backend_test]
    async fn unique_index_rejects_second_vote(store: MongoStore) {
        let (election, c1, c2) = seed(&store).await;

        store.insert_vote(vote("v1", election, c1)).await.unwrap();
        let err = store.insert_vote(vote("v1", election, c2)).await.unwrap_err();

        assert!(matches!(err, StoreError::DuplicateVote { .. }));
        assert_eq!(store.candidate(c1).await.unwrap().unwrap().vote_count, 1);
        assert_eq!(store.candidate(c2).await.unwrap().unwrap().vote_count, 0);
    }

    #[backend_test]
    async fn concurrent_duplicates_commit_once(store: MongoStore) {
        let (election, c1, _) = seed(&store).await;
        let store = Arc::new(store);

        let attempts = (0..8).map(|_| {
            let store = store.clone();
            rocket::tokio::spawn(async move { store.insert_vote(vote("v1", election, c1)).await })
        });
        let successes = join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(store.votes_in(election).await.unwrap().len(), 1);
    }

    #[backend_test]
    async fn round_trips_records(store: MongoStore) {
        let (election, c1, _) = seed(&store).await;
        let cast = store.insert_vote(vote("v1", election, c1)).await.unwrap();

        let fetched = store.election(election).await.unwrap().unwrap();
        assert_eq!(fetched.candidates.len(), 2);
        assert_eq!(
            store.vote_by(&"v1".into(), election).await.unwrap(),
            Some(cast)
        );
        assert_eq!(store.votes_by(&"v1".into()).await.unwrap().len(), 1);

        let err = store.delete_election(election).await.unwrap_err();
        assert!(matches!(err, StoreError::Referenced(_)));
        let err = store.delete_candidate(c1).await.unwrap_err();
        assert!(matches!(err, StoreError::Referenced(_)));
    }

    #[backend_test]
    async fn resync_overwrites_cached_count(store: MongoStore) {
        let (election, c1, _) = seed(&store).await;
        store.insert_vote(vote("v1", election, c1)).await.unwrap();
        store
            .candidate_coll()
            .update_one(c1.as_doc(), doc! { "$set": { "vote_count": 9_i64 } }, None)
            .await
            .unwrap();

        let resync = store.resync_vote_count(c1).await.unwrap();

        assert_eq!((resync.cached, resync.counted), (9, 1));
        assert_eq!(store.candidate(c1).await.unwrap().unwrap().vote_count, 1);
    }

    #[backend_test]
    async fn vote_racing_election_delete_leaves_no_orphans(store: MongoStore) {
        let store = Arc::new(store);
        for round in 0..20 {
            let (election, c1, _) = seed(&store).await;
            let voting = {
                let store = store.clone();
                let voter = format!("v{round}");
                rocket::tokio::spawn(async move {
                    store.insert_vote(vote(&voter, election, c1)).await
                })
            };
            let deleting = {
                let store = store.clone();
                rocket::tokio::spawn(async move { store.delete_election(election).await })
            };
            let _ = voting.await.unwrap();
            let _ = deleting.await.unwrap();

            let gone = store.election(election).await.unwrap().is_none();
            let votes = store.votes_in(election).await.unwrap();
            assert!(
                !(gone && !votes.is_empty()),
                "round {round}: {} votes left for a deleted election",
                votes.len()
            );
        }
    }

    #[backend_test]
    async fn election_edit_racing_candidate_delete_leaves_no_orphans(store: MongoStore) {
        let store = Arc::new(store);
        for round in 0..20 {
            let (election, c1, c2) = seed(&store).await;
            let loose = store
                .insert_candidate(CandidateCore::example3())
                .await
                .unwrap()
                .id;
            let current = store.election(election).await.unwrap().unwrap();
            let update = ElectionUpdate {
                title: current.title.clone(),
                description: current.description.clone(),
                category: current.category,
                start_time: current.start_time,
                end_time: current.end_time,
                candidates: vec![c1, c2, loose],
            };
            let editing = {
                let store = store.clone();
                rocket::tokio::spawn(async move { store.update_election(election, update).await })
            };
            let deleting = {
                let store = store.clone();
                rocket::tokio::spawn(async move { store.delete_candidate(loose).await })
            };
            let _ = editing.await.unwrap();
            let _ = deleting.await.unwrap();

            let gone = store.candidate(loose).await.unwrap().is_none();
            let listed = store
                .election(election)
                .await
                .unwrap()
                .unwrap()
                .has_candidate(loose);
            assert!(
                !(gone && listed),
                "round {round}: election lists deleted candidate {loose}"
            );
        }
    }

    #[backend_test]
    async fn elections_cannot_list_missing_candidates(store: MongoStore) {
        let (_, c1, _) = seed(&store).await;
        let now = Utc::now();

        let err = store
            .insert_election(ElectionCore::example(
                now,
                now + Duration::hours(1),
                vec![c1, Id::new()],
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::UnknownCandidate(_)));
        assert_eq!(store.elections(None).await.unwrap().len(), 1);
    }
}
