//! # theialookup - video metadata enrichment
//!
//! Turns video titles into episode or movie queries, resolves them against
//! TheTVDB and TMDb through one shared [`RateLimiter`], caches everything in
//! [`theiacache`] and links the result to the video row.
//!
//! ```ignore
//! let limiter = Arc::new(RateLimiter::from_config(&config));
//! let service = LookupService::from_config(
//!     &config,
//!     store,
//!     Arc::new(TvDbClient::from_config(&config, limiter.clone())),
//!     Arc::new(MovieDbClient::from_config(&config, limiter)),
//! );
//! service.lookup(&video)?;
//! ```

pub mod clock;
mod error;
mod http;
pub mod jobs;
pub mod lookup;
pub mod moviedb;
pub mod rate_limiter;
pub mod title;
pub mod tvdb;

pub use clock::{ManualClock, PacingClock, SystemClock};
pub use error::{LookupError, Result};
pub use jobs::{EXTRA_MEDIA_ID, JobCallback, JobId, LookupJobService};
pub use lookup::{LookupOutcome, LookupService, MovieLookup, TvLookup, TvMatch};
pub use moviedb::{MovieDbApi, MovieDbClient, MovieHit};
pub use rate_limiter::{RateLimiter, RatePermit};
pub use title::{classify, classify_movie, classify_tv, lookup_request, parse_title};
pub use tvdb::{SeriesHit, TvDbApi, TvDbClient};
