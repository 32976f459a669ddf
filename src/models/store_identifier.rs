use std::fmt;
use std::str::FromStr;

use failure::Error as FailureError;
use uuid::Uuid;

use models::StoreId;

/// What a caller knows about a store: its id or its slug
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreIdentifier {
    Id(StoreId),
    Slug(String),
}

impl From<StoreId> for StoreIdentifier {
    fn from(id: StoreId) -> Self {
        StoreIdentifier::Id(id)
    }
}

impl fmt::Display for StoreIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StoreIdentifier::Id(ref id) => write!(f, "{}", id),
            StoreIdentifier::Slug(ref slug) => write!(f, "'{}'", slug),
        }
    }
}

/// Uuids are tried first, anything else is taken as a slug
impl FromStr for StoreIdentifier {
    type Err = FailureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(format_err!("Empty store identifier"));
        }
        Ok(match Uuid::parse_str(s) {
            Ok(uuid) => StoreIdentifier::Id(StoreId(uuid)),
            Err(_) => StoreIdentifier::Slug(s.to_lowercase()),
        })
    }
}
