//! Metadata rows fetched from the TV and movie providers

use theiamedia::MediaId;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TvSeriesRecord {
    pub series_id: i64,
    pub name: String,
    pub overview: Option<String>,
    pub first_aired: Option<String>,
    pub network: Option<String>,
    pub poster: Option<String>,
    pub banner: Option<String>,
    pub fanart: Option<String>,
}

impl TvSeriesRecord {
    pub fn media_id(&self) -> MediaId {
        MediaId::TvSeries {
            series_id: self.series_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TvEpisodeRecord {
    pub series_id: i64,
    pub episode_id: i64,
    pub season: u32,
    pub episode: u32,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub first_aired: Option<String>,
    pub image: Option<String>,
}

impl TvEpisodeRecord {
    pub fn media_id(&self) -> MediaId {
        MediaId::TvEpisode {
            series_id: self.series_id,
            episode_id: self.episode_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieRecord {
    pub movie_id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub poster: Option<String>,
    pub backdrop: Option<String>,
}

impl MovieRecord {
    pub fn media_id(&self) -> MediaId {
        MediaId::Movie {
            movie_id: self.movie_id,
        }
    }
}

/// Artwork to store for a series or a movie
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Provider image type (`poster`, `fanart`, `backdrop`, ...)
    pub kind: String,
    pub path: String,
    pub rating: Option<f64>,
}

/// Artwork read back from the cache; `id` is a `TvImage` or `MovieImage`
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub id: MediaId,
    pub kind: String,
    pub path: String,
    pub rating: Option<f64>,
}
