//! Movie provider (TMDb v3 API, `api_key` query authentication)

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use theiacache::{ImageRecord, MovieRecord};
use theiaconfig::Config;

use crate::error::{LookupError, Result};
use crate::http::JsonClient;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, PartialEq)]
pub struct MovieHit {
    pub movie_id: i64,
    pub title: String,
}

pub trait MovieDbApi: Send + Sync {
    fn search_movie(&self, name: &str, year: &str) -> Result<Vec<MovieHit>>;
    fn movie(&self, movie_id: i64) -> Result<MovieRecord>;
    fn images(&self, movie_id: i64) -> Result<Vec<ImageRecord>>;
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<MovieDto>,
}

#[derive(Deserialize)]
struct MovieDto {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    backdrop_path: Option<String>,
}

#[derive(Deserialize)]
struct ImagesDto {
    #[serde(default)]
    backdrops: Vec<ImageDto>,
    #[serde(default)]
    posters: Vec<ImageDto>,
}

#[derive(Deserialize)]
struct ImageDto {
    file_path: String,
    #[serde(default)]
    vote_average: Option<f64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl MovieDto {
    fn into_record(self) -> MovieRecord {
        MovieRecord {
            movie_id: self.id,
            title: self.title.unwrap_or_default(),
            overview: non_empty(self.overview),
            release_date: non_empty(self.release_date),
            poster: non_empty(self.poster_path),
            backdrop: non_empty(self.backdrop_path),
        }
    }
}

impl ImagesDto {
    fn into_records(self) -> Vec<ImageRecord> {
        let tagged = |kind: &str, images: Vec<ImageDto>| -> Vec<ImageRecord> {
            images
                .into_iter()
                .map(|image| ImageRecord {
                    kind: kind.to_string(),
                    path: image.file_path,
                    rating: image.vote_average,
                })
                .collect()
        };
        let mut records = tagged("poster", self.posters);
        records.extend(tagged("backdrop", self.backdrops));
        records
    }
}

pub struct MovieDbClient {
    http: JsonClient,
    base_url: String,
    api_key: String,
}

impl MovieDbClient {
    pub fn new(limiter: Arc<RateLimiter>, base_url: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            http: JsonClient::new(limiter, timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn from_config(config: &Config, limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            limiter,
            &config.get_moviedb_base_url(),
            &config.get_moviedb_api_key(),
            Duration::from_secs(config.get_http_timeout_secs()),
        )
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        if self.api_key.is_empty() {
            return Err(LookupError::Unauthorized("no MovieDB API key configured".into()));
        }
        let mut params = vec![("api_key", self.api_key.as_str())];
        params.extend_from_slice(query);
        self.http
            .get(&format!("{}{}", self.base_url, path), &params, &[])
    }
}

impl MovieDbApi for MovieDbClient {
    fn search_movie(&self, name: &str, year: &str) -> Result<Vec<MovieHit>> {
        let mut query = vec![("query", name)];
        if !year.is_empty() {
            query.push(("year", year));
        }
        let page: SearchPage = self.get("/search/movie", &query)?;
        Ok(page
            .results
            .into_iter()
            .map(|m| MovieHit {
                movie_id: m.id,
                title: m.title.unwrap_or_default(),
            })
            .collect())
    }

    fn movie(&self, movie_id: i64) -> Result<MovieRecord> {
        let dto: MovieDto = self.get(&format!("/movie/{}", movie_id), &[])?;
        Ok(dto.into_record())
    }

    fn images(&self, movie_id: i64) -> Result<Vec<ImageRecord>> {
        let images: ImagesDto = self.get(&format!("/movie/{}/images", movie_id), &[])?;
        Ok(images.into_records())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_payload() {
        let json = r#"{"id":949,"title":"Heat","overview":"Obsessive master thief...",
            "release_date":"1995-12-15","poster_path":"/heat.jpg","backdrop_path":"",
            "runtime":170}"#;
        let record = serde_json::from_str::<MovieDto>(json).unwrap().into_record();
        assert_eq!(record.movie_id, 949);
        assert_eq!(record.release_date.as_deref(), Some("1995-12-15"));
        assert_eq!(record.backdrop, None);
    }

    #[test]
    fn test_images_payload() {
        let json = r#"{"id":949,"backdrops":[{"file_path":"/b.jpg","vote_average":5.3}],
            "posters":[{"file_path":"/p.jpg"}]}"#;
        let records = serde_json::from_str::<ImagesDto>(json).unwrap().into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, "poster");
        assert_eq!(records[0].rating, None);
        assert_eq!(records[1].kind, "backdrop");
        assert_eq!(records[1].rating, Some(5.3));
    }

    #[test]
    fn test_missing_key_is_unauthorized() {
        let limiter = Arc::new(RateLimiter::with_clock(
            Duration::ZERO,
            crate::clock::ManualClock::new(),
        ));
        let client = MovieDbClient::new(limiter, "http://127.0.0.1:9", "", Duration::from_secs(1));
        assert!(client.movie(1).unwrap_err().is_unauthorized());
    }
}
