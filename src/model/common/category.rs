use std::{fmt, str::FromStr};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// The organisations that candidates stand for and elections are run by.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "gdg")]
    Gdg,
    #[serde(rename = "microsoft")]
    Microsoft,
    #[serde(rename = "amity")]
    Amity,
    #[serde(rename = "IEEE")]
    Ieee,
}

impl Category {
    pub const ALL: [Category; 4] = [Self::Gdg, Self::Microsoft, Self::Amity, Self::Ieee];

    /// The wire name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gdg => "gdg",
            Self::Microsoft => "microsoft",
            Self::Amity => "amity",
            Self::Ieee => "IEEE",
        }
    }

    /// Parse a listing filter, where `all` (or nothing) means no filter.
    pub fn parse_filter(filter: Option<&str>) -> Result<Option<Self>, UnknownCategory> {
        match filter {
            None | Some("all") => Ok(None),
            Some(name) => name.parse().map(Some),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category name that isn't one of [`Category::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

impl From<Category> for Bson {
    fn from(category: Category) -> Self {
        to_bson(&category).expect("Serialisation is infallible")
    }
}
