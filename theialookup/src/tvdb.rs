//! TV episode provider (TheTVDB JSON API)
//!
//! A bearer token is obtained with `POST /login` and renewed whenever a
//! request answers 401. Every request carries the configured
//! `Accept-Language`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use theiacache::{ImageRecord, TvEpisodeRecord, TvSeriesRecord};
use theiaconfig::Config;
use tracing::{debug, info};

use crate::error::{LookupError, Result};
use crate::http::JsonClient;
use crate::rate_limiter::RateLimiter;

/// Image types fetched for a series
const IMAGE_KINDS: &[&str] = &["poster", "fanart"];

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesHit {
    pub series_id: i64,
    pub name: String,
}

pub trait TvDbApi: Send + Sync {
    fn search_series(&self, name: &str) -> Result<Vec<SeriesHit>>;
    fn series(&self, series_id: i64) -> Result<TvSeriesRecord>;
    fn episode(&self, series_id: i64, season: u32, episode: u32) -> Result<TvEpisodeRecord>;
    fn images(&self, series_id: i64) -> Result<Vec<ImageRecord>>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesDto {
    id: i64,
    #[serde(default)]
    series_name: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    first_aired: Option<String>,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    banner: Option<String>,
    #[serde(default)]
    poster: Option<String>,
    #[serde(default)]
    fanart: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeDto {
    id: i64,
    #[serde(default)]
    aired_season: Option<u32>,
    #[serde(default)]
    aired_episode_number: Option<u32>,
    #[serde(default)]
    episode_name: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    first_aired: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageDto {
    file_name: String,
    key_type: String,
    #[serde(default)]
    ratings_info: Option<RatingsDto>,
}

#[derive(Deserialize)]
struct RatingsDto {
    #[serde(default)]
    average: Option<f64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl SeriesDto {
    fn into_record(self) -> TvSeriesRecord {
        TvSeriesRecord {
            series_id: self.id,
            name: self.series_name.unwrap_or_default(),
            overview: non_empty(self.overview),
            first_aired: non_empty(self.first_aired),
            network: non_empty(self.network),
            poster: non_empty(self.poster),
            banner: non_empty(self.banner),
            fanart: non_empty(self.fanart),
        }
    }
}

pub struct TvDbClient {
    http: JsonClient,
    base_url: String,
    api_key: String,
    language: String,
    token: Mutex<Option<String>>,
}

impl TvDbClient {
    pub fn new(
        limiter: Arc<RateLimiter>,
        base_url: &str,
        api_key: &str,
        language: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            http: JsonClient::new(limiter, timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            language: language.to_string(),
            token: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config, limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            limiter,
            &config.get_tvdb_base_url(),
            &config.get_tvdb_api_key(),
            &config.get_tvdb_language(),
            Duration::from_secs(config.get_http_timeout_secs()),
        )
    }

    fn login(&self) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(LookupError::Unauthorized("no TVDB API key configured".into()));
        }
        let response: LoginResponse = self.http.post(
            &format!("{}/login", self.base_url),
            &json!({ "apikey": self.api_key }),
            &[],
        )?;
        info!("Logged in to TVDB");
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(response.token.clone());
        Ok(response.token)
    }

    fn token(&self) -> Result<String> {
        let cached = self.token.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match cached {
            Some(token) => Ok(token),
            None => self.login(),
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let call = |token: &str| {
            let bearer = format!("Bearer {}", token);
            self.http.get::<T>(
                &url,
                query,
                &[
                    ("Authorization", bearer.as_str()),
                    ("Accept-Language", self.language.as_str()),
                ],
            )
        };

        match call(&self.token()?) {
            Err(LookupError::Unauthorized(_)) => {
                debug!("TVDB token rejected, logging in again");
                call(&self.login()?)
            }
            other => other,
        }
    }
}

impl TvDbApi for TvDbClient {
    fn search_series(&self, name: &str) -> Result<Vec<SeriesHit>> {
        let found: Result<Envelope<Vec<SeriesDto>>> = self.get("/search/series", &[("name", name)]);
        let series = match found {
            Ok(envelope) => envelope.data,
            Err(LookupError::NotFound(_)) => Vec::new(),
            Err(err) => return Err(err),
        };
        Ok(series
            .into_iter()
            .map(|s| SeriesHit {
                series_id: s.id,
                name: s.series_name.unwrap_or_default(),
            })
            .collect())
    }

    fn series(&self, series_id: i64) -> Result<TvSeriesRecord> {
        let envelope: Envelope<SeriesDto> = self.get(&format!("/series/{}", series_id), &[])?;
        Ok(envelope.data.into_record())
    }

    fn episode(&self, series_id: i64, season: u32, episode: u32) -> Result<TvEpisodeRecord> {
        let season_str = season.to_string();
        let episode_str = episode.to_string();
        let envelope: Envelope<Vec<EpisodeDto>> = self.get(
            &format!("/series/{}/episodes/query", series_id),
            &[
                ("airedSeason", season_str.as_str()),
                ("airedEpisode", episode_str.as_str()),
            ],
        )?;

        let dto = envelope.data.into_iter().next().ok_or_else(|| {
            LookupError::NotFound(format!("series {} S{:02}E{:02}", series_id, season, episode))
        })?;
        Ok(TvEpisodeRecord {
            series_id,
            episode_id: dto.id,
            season: dto.aired_season.unwrap_or(season),
            episode: dto.aired_episode_number.unwrap_or(episode),
            name: non_empty(dto.episode_name),
            overview: non_empty(dto.overview),
            first_aired: non_empty(dto.first_aired),
            image: non_empty(dto.filename),
        })
    }

    fn images(&self, series_id: i64) -> Result<Vec<ImageRecord>> {
        let mut images = Vec::new();
        for kind in IMAGE_KINDS {
            let found: Result<Envelope<Vec<ImageDto>>> = self.get(
                &format!("/series/{}/images/query", series_id),
                &[("keyType", *kind)],
            );
            let dtos = match found {
                Ok(envelope) => envelope.data,
                Err(LookupError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            images.extend(dtos.into_iter().map(|dto| ImageRecord {
                kind: dto.key_type,
                path: dto.file_name,
                rating: dto.ratings_info.and_then(|r| r.average),
            }));
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_payload() {
        let json = r#"{"data":{"id":79349,"seriesName":"Dexter","overview":"",
            "firstAired":"2006-10-01","network":"Showtime","banner":"graphical/79349-g.jpg",
            "poster":"posters/79349-1.jpg","fanart":null}}"#;
        let envelope: Envelope<SeriesDto> = serde_json::from_str(json).unwrap();
        let record = envelope.data.into_record();
        assert_eq!(record.series_id, 79349);
        assert_eq!(record.name, "Dexter");
        assert_eq!(record.overview, None);
        assert_eq!(record.network.as_deref(), Some("Showtime"));
        assert_eq!(record.fanart, None);
    }

    #[test]
    fn test_image_payload() {
        let json = r#"{"data":[{"id":1,"keyType":"poster","fileName":"posters/1.jpg",
            "ratingsInfo":{"average":7.5,"count":4}}]}"#;
        let envelope: Envelope<Vec<ImageDto>> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data[0].key_type, "poster");
        assert_eq!(
            envelope.data[0].ratings_info.as_ref().and_then(|r| r.average),
            Some(7.5)
        );
    }
}
