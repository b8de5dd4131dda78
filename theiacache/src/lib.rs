//! # theiacache - local media cache
//!
//! SQLite-backed cache of everything Theia discovered (UPnP servers, document
//! trees, local volumes) and of the metadata fetched for it, with a change
//! bus telling loaders when to re-query.
//!
//! Writes go through [`MediaStore`], which posts the [`DatabaseChange`]s each
//! write returns; [`MediaDao`] is the raw, non-notifying layer underneath.

pub mod changes;
pub mod dao;
mod error;
pub mod loaders;
pub mod records;
mod schema;
pub mod store;

pub use changes::{ChangeBus, ChangeSubscription, DatabaseChange, Throttled};
pub use dao::MediaDao;
pub use error::{CacheError, Result};
pub use loaders::CacheLoader;
pub use records::{ImageRecord, MovieRecord, StoredImage, TvEpisodeRecord, TvSeriesRecord};
pub use store::MediaStore;
