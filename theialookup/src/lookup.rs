//! Cached lookups
//!
//! Each provider lookup answers from the association cache when it can and
//! otherwise searches the network, persists what it found and reads it back
//! from the cache, so both paths return the same rows.

use std::sync::Arc;

use theiacache::{MediaStore, MovieRecord, TvEpisodeRecord, TvSeriesRecord};
use theiaconfig::Config;
use theiamedia::{LookupQuery, MediaRef};
use tracing::{debug, info, warn};

use crate::error::{LookupError, Result};
use crate::moviedb::MovieDbApi;
use crate::title;
use crate::tvdb::TvDbApi;

#[derive(Debug, Clone, PartialEq)]
pub struct TvMatch {
    pub series: TvSeriesRecord,
    pub episode: TvEpisodeRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Episode(TvMatch),
    Movie(MovieRecord),
}

pub struct TvLookup {
    store: MediaStore,
    api: Arc<dyn TvDbApi>,
    candidates: usize,
}

impl TvLookup {
    pub fn new(store: MediaStore, api: Arc<dyn TvDbApi>, candidates: usize) -> Self {
        Self {
            store,
            api,
            candidates: candidates.max(1),
        }
    }

    pub fn lookup(&self, series: &str, season: u32, episode: u32) -> Result<TvMatch> {
        if let Some(series_id) = self.store.get_tv_association(series)? {
            match self.cached(series_id, season, episode) {
                Ok(found) => {
                    debug!(series, series_id, season, episode, "TV lookup served from cache");
                    return Ok(found);
                }
                Err(LookupError::Cache(err)) if err.is_not_found() => {
                    debug!(series, series_id, "Associated series incomplete, fetching");
                }
                Err(err) => return Err(err),
            }
        }
        self.fetch(series, season, episode)
    }

    /// Series and episode from the cache; a missing episode alone is fetched
    fn cached(&self, series_id: i64, season: u32, episode: u32) -> Result<TvMatch> {
        let series = self.store.get_tv_series(series_id)?;
        let episode = match self.store.get_tv_episode_by_number(series_id, season, episode) {
            Ok(found) => found,
            Err(err) if err.is_not_found() => self.fetch_episode(series_id, season, episode)?,
            Err(err) => return Err(err.into()),
        };
        Ok(TvMatch { series, episode })
    }

    fn fetch_episode(&self, series_id: i64, season: u32, episode: u32) -> Result<TvEpisodeRecord> {
        let record = self.api.episode(series_id, season, episode)?;
        self.store.add_tv_episode(&record)?;
        Ok(self
            .store
            .get_tv_episode_by_number(series_id, record.season, record.episode)?)
    }

    fn fetch(&self, series: &str, season: u32, episode: u32) -> Result<TvMatch> {
        let hits = self.api.search_series(series)?;
        let best = hits
            .first()
            .cloned()
            .ok_or_else(|| LookupError::NotFound(series.to_string()))?;

        for (rank, hit) in hits.iter().take(self.candidates).enumerate() {
            match self.fetch_series(hit.series_id) {
                Ok(()) => {}
                // the best match is required, the runners-up are a bonus
                Err(err) if rank > 0 => {
                    warn!(series_id = hit.series_id, error = %err, "Skipping candidate series")
                }
                Err(err) => return Err(err),
            }
        }

        self.store.set_tv_association(series, best.series_id)?;
        info!(series, series_id = best.series_id, name = best.name.as_str(), "Series resolved");

        self.fetch_episode(best.series_id, season, episode)?;
        self.cached(best.series_id, season, episode)
    }

    fn fetch_series(&self, series_id: i64) -> Result<()> {
        let record = self.api.series(series_id)?;
        self.store.add_tv_series(&record)?;
        let images = self.api.images(series_id)?;
        self.store.add_tv_images(series_id, &images)?;
        Ok(())
    }
}

pub struct MovieLookup {
    store: MediaStore,
    api: Arc<dyn MovieDbApi>,
    candidates: usize,
}

impl MovieLookup {
    pub fn new(store: MediaStore, api: Arc<dyn MovieDbApi>, candidates: usize) -> Self {
        Self {
            store,
            api,
            candidates: candidates.max(1),
        }
    }

    pub fn lookup(&self, name: &str, year: &str) -> Result<MovieRecord> {
        if let Some(movie_id) = self.store.get_movie_association(name, year)? {
            match self.store.get_movie(movie_id) {
                Ok(movie) => {
                    debug!(name, year, movie_id, "Movie lookup served from cache");
                    return Ok(movie);
                }
                Err(err) if err.is_not_found() => {
                    debug!(name, movie_id, "Associated movie missing, fetching");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let hits = self.api.search_movie(name, year)?;
        let best = hits
            .first()
            .cloned()
            .ok_or_else(|| LookupError::NotFound(format!("{} ({})", name, year)))?;

        for (rank, hit) in hits.iter().take(self.candidates).enumerate() {
            match self.fetch_movie(hit.movie_id) {
                Ok(()) => {}
                Err(err) if rank > 0 => {
                    warn!(movie_id = hit.movie_id, error = %err, "Skipping candidate movie")
                }
                Err(err) => return Err(err),
            }
        }

        self.store.set_movie_association(name, year, best.movie_id)?;
        info!(name, year, movie_id = best.movie_id, title = best.title.as_str(), "Movie resolved");
        Ok(self.store.get_movie(best.movie_id)?)
    }

    fn fetch_movie(&self, movie_id: i64) -> Result<()> {
        let record = self.api.movie(movie_id)?;
        self.store.add_movie(&record)?;
        let images = self.api.images(movie_id)?;
        self.store.add_movie_images(movie_id, &images)?;
        Ok(())
    }
}

/// Classifies a video title, looks it up and links the result to the video
pub struct LookupService {
    store: MediaStore,
    tv: TvLookup,
    movie: MovieLookup,
}

impl LookupService {
    pub fn new(
        store: MediaStore,
        tv_api: Arc<dyn TvDbApi>,
        movie_api: Arc<dyn MovieDbApi>,
        candidates: usize,
    ) -> Self {
        Self {
            tv: TvLookup::new(store.clone(), tv_api, candidates),
            movie: MovieLookup::new(store.clone(), movie_api, candidates),
            store,
        }
    }

    pub fn from_config(
        config: &Config,
        store: MediaStore,
        tv_api: Arc<dyn TvDbApi>,
        movie_api: Arc<dyn MovieDbApi>,
    ) -> Self {
        Self::new(store, tv_api, movie_api, config.get_lookup_candidates())
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Runs the query without touching the video row
    pub fn resolve(&self, query: &LookupQuery) -> Result<LookupOutcome> {
        match query {
            LookupQuery::Episode {
                series,
                season,
                episode,
            } => Ok(LookupOutcome::Episode(
                self.tv.lookup(series, *season, *episode)?,
            )),
            LookupQuery::Movie { name, year } => {
                Ok(LookupOutcome::Movie(self.movie.lookup(name, year)?))
            }
        }
    }

    pub fn lookup(&self, media: &MediaRef) -> Result<LookupOutcome> {
        if !media.id.is_video() {
            return Err(LookupError::NotAVideo(media.id.to_string()));
        }
        let request = title::lookup_request(media)?;
        let outcome = self.resolve(&request.query)?;

        match &outcome {
            LookupOutcome::Episode(found) => {
                self.store
                    .set_video_episode(&media.id, &found.episode.media_id())?;
            }
            LookupOutcome::Movie(movie) => {
                self.store.set_video_movie(&media.id, &movie.media_id())?;
            }
        }
        debug!(video = %media.id, title = media.title(), "Video enriched");
        Ok(outcome)
    }
}
