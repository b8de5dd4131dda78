use serde::{Deserialize, Serialize};

use crate::MediaRef;

/// Parameters extracted from a title for a metadata lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LookupQuery {
    Episode {
        series: String,
        season: u32,
        episode: u32,
    },
    Movie {
        name: String,
        year: String,
    },
}

/// A video together with what its title says about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub media: MediaRef,
    pub query: LookupQuery,
}

impl LookupRequest {
    pub fn new(media: MediaRef, query: LookupQuery) -> Self {
        Self { media, query }
    }
}
