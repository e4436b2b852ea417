use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use mongodb::bson::oid::Error as OidError;
use rocket::{response::status, serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{Admin, AuthToken},
        election::{ElectionDescription, ElectionSaved, ElectionSpec, TallyCorrectionDescription},
        message::Message,
    },
    common::{Category, ElectionStatus},
    mongodb::Id,
};
use crate::store::ElectionUpdate;
use crate::voting::{ElectionFinalizers, ElectionService};

pub fn routes() -> Vec<Route> {
    routes![
        elections,
        election,
        create_election,
        update_election,
        delete_election,
        reconcile_election,
    ]
}

#[get("/elections?<status>&<category>")]
async fn elections(
    status: Option<&str>,
    category: Option<&str>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<Vec<ElectionDescription>>> {
    let status = match status {
        None | Some("all") => None,
        Some(status) => Some(ElectionStatus::from_str(status).map_err(Error::bad_request)?),
    };
    let category = Category::parse_filter(category).map_err(Error::bad_request)?;
    let elections = service.elections(status, category).await?;
    Ok(Json(elections.into_iter().map(Into::into).collect()))
}

#[get("/elections/<election_id>")]
async fn election(
    election_id: std::result::Result<Id, OidError>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<ElectionDescription>> {
    let details = service.election_details(election_id?).await?;
    Ok(Json(details.into()))
}

#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    _token: AuthToken<Admin>,
    spec: Json<ElectionSpec>,
    service: &State<Arc<ElectionService>>,
    finalizers: &State<ElectionFinalizers>,
) -> Result<status::Created<Json<ElectionSaved>>> {
    let update = ElectionUpdate::try_from(spec.into_inner())?;
    let election = service.create_election(update).await?;
    finalizers.schedule_election(&election).await;

    let details = service.election_details(election.id).await?;
    let location = format!("/api/elections/{}", election.id);
    Ok(status::Created::new(location).body(Json(ElectionSaved {
        message: "Election created successfully".to_string(),
        election: details.into(),
    })))
}

#[put("/elections/<election_id>", data = "<spec>", format = "json")]
async fn update_election(
    _token: AuthToken<Admin>,
    election_id: std::result::Result<Id, OidError>,
    spec: Json<ElectionSpec>,
    service: &State<Arc<ElectionService>>,
    finalizers: &State<ElectionFinalizers>,
) -> Result<Json<ElectionSaved>> {
    let election_id = election_id?;
    let update = ElectionUpdate::try_from(spec.into_inner())?;
    let election = service.update_election(election_id, update).await?;
    // The window may have moved.
    finalizers.schedule_election(&election).await;

    let details = service.election_details(election_id).await?;
    Ok(Json(ElectionSaved {
        message: "Election updated successfully".to_string(),
        election: details.into(),
    }))
}

#[delete("/elections/<election_id>")]
async fn delete_election(
    _token: AuthToken<Admin>,
    election_id: std::result::Result<Id, OidError>,
    service: &State<Arc<ElectionService>>,
    finalizers: &State<ElectionFinalizers>,
) -> Result<Json<Message>> {
    let election_id = election_id?;
    service.delete_election(election_id).await?;
    finalizers.cancel_election(election_id).await;
    Ok(Json(Message::new("Election deleted successfully")))
}

/// Recompute cached vote counts from the vote records.
#[post("/elections/<election_id>/reconcile")]
async fn reconcile_election(
    _token: AuthToken<Admin>,
    election_id: std::result::Result<Id, OidError>,
    service: &State<Arc<ElectionService>>,
) -> Result<Json<Vec<TallyCorrectionDescription>>> {
    let election_id = election_id?;
    let corrections = service.reconcile_tallies(election_id).await?;
    debug!(
        "Reconciled election {election_id}: {} correction(s)",
        corrections.len()
    );
    Ok(Json(corrections.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use rocket::serde::json::serde_json::{self, Value};

    use super::*;
    use crate::api::testing::{admin, client, create_candidate, create_election, json, voter};
    use crate::model::api::candidate::CandidateSpec;

    fn id_of(value: &Value) -> Id {
        value["id"].as_str().unwrap().parse().unwrap()
    }

    async fn post(client: &Client, spec: &ElectionSpec) -> Status {
        client
            .post("/api/elections")
            .header(ContentType::JSON)
            .header(admin())
            .body(serde_json::to_string(spec).unwrap())
            .dispatch()
            .await
            .status()
    }

    #[rocket::async_test]
    async fn create_and_fetch_with_candidates_in_order() {
        let (client, _) = client().await;
        let first = id_of(&create_candidate(&client, &CandidateSpec::example()).await);
        let second = id_of(&create_candidate(&client, &CandidateSpec::example()).await);

        let created = create_election(&client, &ElectionSpec::example(&[second, first])).await;
        assert_eq!(created["status"], "ongoing");
        let candidates = created["candidates"].as_array().unwrap();
        assert_eq!(id_of(&candidates[0]), second);
        assert_eq!(id_of(&candidates[1]), first);

        let election_id = id_of(&created);
        let finalizers = client.rocket().state::<ElectionFinalizers>().unwrap();
        assert!(finalizers.has_finalizer(election_id).await);

        let response = client
            .get(format!("/api/elections/{election_id}"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(json(response).await["title"], "Microsoft Club President");
    }

    #[rocket::async_test]
    async fn listing_filters_by_status_and_category() {
        let (client, clock) = client().await;
        let candidate = id_of(&create_candidate(&client, &CandidateSpec::example()).await);
        create_election(&client, &ElectionSpec::example(&[candidate])).await;
        let mut later = ElectionSpec::example(&[candidate]);
        later.category = Category::Gdg;
        later.start_date = Utc::now() + Duration::days(2);
        later.end_date = Utc::now() + Duration::days(3);
        create_election(&client, &later).await;

        let count = |body: Value| body.as_array().unwrap().len();
        let all = client.get("/api/elections").dispatch().await;
        assert_eq!(count(json(all).await), 2);
        let ongoing = client.get("/api/elections?status=ongoing").dispatch().await;
        assert_eq!(count(json(ongoing).await), 1);
        let upcoming = client
            .get("/api/elections?status=upcoming&category=gdg")
            .dispatch()
            .await;
        assert_eq!(count(json(upcoming).await), 1);

        // Status follows the clock, not what was stored at creation.
        clock.advance(Duration::days(2) + Duration::hours(1));
        let ongoing = client.get("/api/elections?status=ongoing").dispatch().await;
        let ongoing = json(ongoing).await;
        assert_eq!(count(ongoing.clone()), 1);
        assert_eq!(ongoing[0]["category"], "gdg");
        let completed = client.get("/api/elections?status=completed").dispatch().await;
        assert_eq!(count(json(completed).await), 1);

        let response = client.get("/api/elections?status=finished").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn invalid_elections_are_rejected() {
        let (client, _) = client().await;
        let candidate = id_of(&create_candidate(&client, &CandidateSpec::example()).await);
        let mut backwards = ElectionSpec::example(&[candidate]);
        std::mem::swap(&mut backwards.start_date, &mut backwards.end_date);
        assert_eq!(post(&client, &backwards).await, Status::BadRequest);

        let unknown = ElectionSpec::example(&[candidate, Id::new()]);
        assert_eq!(post(&client, &unknown).await, Status::NotFound);

        let mut malformed = ElectionSpec::example(&[candidate]);
        malformed.candidates.push("zzz".to_string());
        assert_eq!(post(&client, &malformed).await, Status::BadRequest);

        let mut repeated = ElectionSpec::example(&[candidate, candidate]);
        repeated.title = "Twice".to_string();
        assert_eq!(post(&client, &repeated).await, Status::BadRequest);

        let response = client
            .post("/api/elections")
            .header(ContentType::JSON)
            .header(voter("alice"))
            .body(serde_json::to_string(&ElectionSpec::example(&[candidate])).unwrap())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn update_reconcile_and_delete() {
        let (client, _) = client().await;
        let first = id_of(&create_candidate(&client, &CandidateSpec::example()).await);
        let second = id_of(&create_candidate(&client, &CandidateSpec::example()).await);
        let election_id = id_of(&create_election(&client, &ElectionSpec::example(&[first])).await);

        let mut spec = ElectionSpec::example(&[first, second]);
        spec.title = "Renamed".to_string();
        let response = client
            .put(format!("/api/elections/{election_id}"))
            .header(ContentType::JSON)
            .header(admin())
            .body(serde_json::to_string(&spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json(response).await;
        assert_eq!(body["message"], "Election updated successfully");
        assert_eq!(body["election"]["title"], "Renamed");
        assert_eq!(body["election"]["candidates"].as_array().unwrap().len(), 2);

        let response = client
            .post(format!("/api/elections/{election_id}/reconcile"))
            .header(admin())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert!(json(response).await.as_array().unwrap().is_empty());

        let response = client
            .delete(format!("/api/elections/{election_id}"))
            .header(admin())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(json(response).await["message"], "Election deleted successfully");
        let finalizers = client.rocket().state::<ElectionFinalizers>().unwrap();
        assert!(!finalizers.has_finalizer(election_id).await);

        let response = client
            .get(format!("/api/elections/{election_id}"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }
}
