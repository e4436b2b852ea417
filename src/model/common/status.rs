use std::{fmt, str::FromStr};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Where an election is relative to its voting window.
///
/// Always derivable from the window and the current time; the copy stored
/// alongside an election is only a cache.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionStatus {
    /// The window has not opened yet.
    #[serde(rename = "upcoming")]
    NotStarted,
    /// Votes are being accepted.
    #[serde(rename = "ongoing")]
    Open,
    /// The window has closed.
    #[serde(rename = "completed")]
    Closed,
}

impl ElectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "upcoming",
            Self::Open => "ongoing",
            Self::Closed => "completed",
        }
    }
}

impl fmt::Display for ElectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown election status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ElectionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(Self::NotStarted),
            "ongoing" => Ok(Self::Open),
            "completed" => Ok(Self::Closed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl From<ElectionStatus> for Bson {
    fn from(status: ElectionStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
