use rocket::{http::Status, serde::json::Json, Catcher, Request, Route};
use serde::{Deserialize, Serialize};

use crate::model::api::message::ErrorBody;

mod candidates;
mod elections;
mod votes;

pub fn routes() -> Vec<Route> {
    let mut routes = routes![health];
    routes.extend(candidates::routes());
    routes.extend(elections::routes());
    routes.extend(votes::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub message: String,
}

#[get("/health")]
fn health() -> Json<Health> {
    Json(Health {
        status: "OK".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Give guard and parsing failures the same JSON shape as handler errors.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request<'_>) -> Json<ErrorBody> {
    let code = match status.code {
        400 | 422 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        _ if status.code >= 500 => "internal",
        _ => "error",
    };
    Json(ErrorBody {
        code: code.to_string(),
        message: status.reason_lossy().to_string(),
    })
}
