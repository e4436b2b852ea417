use std::sync::Arc;

use log::info;
use mongodb::bson::oid::Error as OidError;
use rocket::{response::status, serde::json::Json, Route, State};

use crate::error::Result;
use crate::logging::RequestId;
use crate::model::{
    api::{
        auth::{AuthToken, Voter},
        vote::{MyVote, ResultsDescription, VoteReceipt, VoteRequest, VoteStatusDescription},
    },
    mongodb::Id,
};
use crate::voting::ElectionService;

pub fn routes() -> Vec<Route> {
    routes![submit_vote, my_votes, check_vote, results]
}

#[post("/votes", data = "<request>", format = "json")]
async fn submit_vote(
    token: AuthToken<Voter>,
    request: Json<VoteRequest>,
    service: &State<Arc<ElectionService>>,
    request_id: &RequestId,
) -> Result<status::Created<Json<VoteReceipt>>> {
    let election_id: Id = request.election_id.parse()?;
    let candidate_id: Id = request.candidate_id.parse()?;
    let voter = token.voter_id();

    let vote = service
        .submit_vote(&voter, election_id, candidate_id)
        .await?;
    info!("req{request_id}: voter '{voter}' voted in election {election_id}");

    let location = format!("/api/votes/check/{election_id}");
    Ok(status::Created::new(location).body(Json(VoteReceipt {
        message: "Vote submitted successfully".to_string(),
        vote: vote.into(),
    })))
}

#[get("/votes/my-votes")]
async fn my_votes(
    token: AuthToken<Voter>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<Vec<MyVote>>> {
    let votes = service.votes_of(&token.voter_id()).await?;
    Ok(Json(votes.into_iter().map(Into::into).collect()))
}

#[get("/votes/check/<election_id>")]
async fn check_vote(
    token: AuthToken<Voter>,
    election_id: std::result::Result<Id, OidError>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<VoteStatusDescription>> {
    let status = service
        .check_vote_status(&token.voter_id(), election_id?)
        .await?;
    Ok(Json(status.into()))
}

/// Public: anyone may read the results, at any point in the election.
#[get("/votes/results/<election_id>")]
async fn results(
    election_id: std::result::Result<Id, OidError>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<ResultsDescription>> {
    let results = service.results(election_id?).await?;
    Ok(Json(results.into()))
}
