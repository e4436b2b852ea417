use std::sync::Arc;

use mongodb::bson::oid::Error as OidError;
use rocket::{response::status, serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{Admin, AuthToken},
        candidate::{CandidateDescription, CandidateSaved, CandidateSpec},
        message::Message,
    },
    common::Category,
    mongodb::Id,
};
use crate::voting::ElectionService;

pub fn routes() -> Vec<Route> {
    routes![
        candidates,
        candidate,
        create_candidate,
        update_candidate,
        delete_candidate,
    ]
}

#[get("/candidates?<category>")]
async fn candidates(
    category: Option<&str>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<Vec<CandidateDescription>>> {
    let category = Category::parse_filter(category).map_err(Error::bad_request)?;
    let candidates = service.candidates(category).await?;
    Ok(Json(candidates.into_iter().map(Into::into).collect()))
}

#[get("/candidates/<candidate_id>")]
async fn candidate(
    candidate_id: std::result::Result<Id, OidError>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<CandidateDescription>> {
    let candidate = service.candidate(candidate_id?).await?;
    Ok(Json(candidate.into()))
}

#[post("/candidates", data = "<spec>", format = "json")]
async fn create_candidate(
    _token: AuthToken<Admin>,
    spec: Json<CandidateSpec>,
    service: &State<Arc<ElectionService>>,
) -> Result<status::Created<Json<CandidateSaved>>> {
    let candidate = service.create_candidate(spec.into_inner().into()).await?;
    let location = format!("/api/candidates/{}", candidate.id);
    Ok(status::Created::new(location).body(Json(CandidateSaved {
        message: "Candidate created successfully".to_string(),
        candidate: candidate.into(),
    })))
}

#[put("/candidates/<candidate_id>", data = "<spec>", format = "json")]
async fn update_candidate(
    _token: AuthToken<Admin>,
    candidate_id: std::result::Result<Id, OidError>,
    spec: Json<CandidateSpec>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<CandidateSaved>> {
    let candidate = service
        .update_candidate(candidate_id?, spec.into_inner().into())
        .await?;
    Ok(Json(CandidateSaved {
        message: "Candidate updated successfully".to_string(),
        candidate: candidate.into(),
    }))
}

#[delete("/candidates/<candidate_id>")]
async fn delete_candidate(
    _token: AuthToken<Admin>,
    candidate_id: std::result::Result<Id, OidError>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<Message>> {
    service.delete_candidate(candidate_id?).await?;
    Ok(Json(Message::new("Candidate deleted successfully")))
}
