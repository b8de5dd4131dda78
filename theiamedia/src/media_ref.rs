use serde::{Deserialize, Serialize};

use crate::MediaId;

/// Metadata snapshot of a cached row
///
/// Timestamps are RFC 3339 strings, as stored in the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMeta {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backdrop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tv_episode_id: Option<MediaId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<MediaId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_added: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_played: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_ms: Option<u64>,
}

impl MediaMeta {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// True once the lookup service linked an episode or a movie
    pub fn is_enriched(&self) -> bool {
        self.tv_episode_id.is_some() || self.movie_id.is_some()
    }
}

/// Point-in-time read of a cached row; never updated in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: MediaId,
    pub meta: MediaMeta,
}

impl MediaRef {
    pub fn new(id: MediaId, meta: MediaMeta) -> Self {
        Self { id, meta }
    }

    pub fn title(&self) -> &str {
        &self.meta.title
    }
}
