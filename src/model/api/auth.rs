use std::fmt::Display;
use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use rocket::{
    http::Status,
    outcome::try_outcome,
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::common::VoterId;

/// A kind of user, having defined rights.
pub trait User {
    /// The rights of this user type.
    const RIGHTS: Rights;
}

/// Different privilege levels.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rights {
    Voter,
    Admin,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
            }
        )
    }
}

/// Someone allowed to cast votes.
#[derive(Debug)]
pub struct Voter;

impl User for Voter {
    const RIGHTS: Rights = Rights::Voter;
}

/// Someone allowed to manage candidates and elections.
#[derive(Debug)]
pub struct Admin;

impl User for Admin {
    const RIGHTS: Rights = Rights::Admin;
}

/// A bearer token issued by the identity provider, naming a specific user
/// with specific rights.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthToken<U> {
    /// Stable identifier of the user.
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "rgt")]
    pub rights: Rights,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U> {
    /// Does this token permit the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.rights == target
    }

    /// The voter this token speaks for.
    pub fn voter_id(&self) -> VoterId {
        VoterId::new(self.subject.clone())
    }
}

impl<U> AuthToken<U>
where
    U: User,
{
    /// Create a new [`AuthToken`] for the given user, with the correct rights for that user type.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            rights: U::RIGHTS,
            phantom: PhantomData,
        }
    }

    /// Sign this token, valid for `ttl`.
    pub fn encode(self, config: &Config, ttl: Duration) -> Result<String, Error> {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + ttl,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )?;
        Ok(token)
    }

    /// Verify and decode a signed token.
    pub fn decode(token: &str, config: &Config) -> Result<Self, Error> {
        let data = jsonwebtoken::decode::<Claims<U>>(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )?;
        Ok(data.claims.token)
    }
}

/// Token claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the `Authorization` header and verify that
    /// it has the correct rights for this user type.
    ///
    /// Missing or invalid tokens forward with `401`, tokens with the wrong
    /// rights with `403`, so the matching catcher answers.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            Outcome::Success(config) => config,
            _ => {
                return Outcome::Error((
                    Status::InternalServerError,
                    Error::Internal("Token configuration is not managed".to_string()),
                ))
            }
        };

        let header = try_outcome!(match req.headers().get_one("Authorization") {
            Some(header) => Outcome::Success(header),
            None => Outcome::Forward(Status::Unauthorized),
        });
        let token = match header.strip_prefix("Bearer ") {
            Some(token) => token.trim(),
            None => return Outcome::Forward(Status::Unauthorized),
        };

        let token: Self = match Self::decode(token, config) {
            Ok(token) => token,
            Err(e) => {
                debug!("Rejected bearer token: {e}");
                return Outcome::Forward(Status::Unauthorized);
            }
        };

        if !token.permits(U::RIGHTS) {
            return Outcome::Forward(Status::Forbidden);
        }
        Outcome::Success(token)
    }
}
