use jsonwebtoken::errors::Error as JwtError;
use log::{debug, error};
use mongodb::bson::oid::Error as OidError;
use rocket::{
    http::Status,
    response::{status, Responder},
    serde::json::Json,
    Request,
};
use thiserror::Error;

use crate::model::api::message::ErrorBody;
use crate::voting::{self, ErrorClass};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Voting(#[from] voting::Error),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("Malformed ID: {0}")]
    OidParse(#[from] OidError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn bad_request(msg: impl ToString) -> Self {
        Self::BadRequest(msg.to_string())
    }

    /// HTTP status and machine-readable code of this error.
    pub fn status_and_code(&self) -> (Status, &'static str) {
        match self {
            Self::Voting(err) => match (err.class(), err) {
                (ErrorClass::NotFound, _) => (Status::NotFound, "not_found"),
                (ErrorClass::InvalidState, voting::Error::ElectionNotYetOpen(_)) => {
                    (Status::BadRequest, "election_not_started")
                }
                (ErrorClass::InvalidState, _) => (Status::BadRequest, "election_closed"),
                (ErrorClass::Conflict, voting::Error::DuplicateVote { .. }) => {
                    (Status::Conflict, "duplicate_vote")
                }
                (ErrorClass::Conflict, _) => (Status::Conflict, "conflict"),
                (ErrorClass::BadRequest, _) => (Status::BadRequest, "bad_request"),
                (ErrorClass::StorageUnavailable, _) => {
                    (Status::ServiceUnavailable, "storage_unavailable")
                }
            },
            Self::Jwt(_) => (Status::Unauthorized, "unauthorized"),
            Self::OidParse(_) | Self::BadRequest(_) => (Status::BadRequest, "bad_request"),
            Self::Internal(_) => (Status::InternalServerError, "internal"),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let (status, code) = self.status_and_code();
        if status.code >= 500 {
            error!("{} {}: {self}", req.method(), req.uri());
        } else {
            debug!("{} {}: {self}", req.method(), req.uri());
        }
        let body = ErrorBody {
            code: code.to_string(),
            message: self.to_string(),
        };
        status::Custom(status, Json(body)).respond_to(req)
    }
}
