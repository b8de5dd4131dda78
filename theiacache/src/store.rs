//! Notifying facade over [`MediaDao`]
//!
//! Each write is forwarded to the DAO and the changes it returns are posted
//! on the bus, so no call site can forget to announce a write.

use std::path::Path;
use std::sync::Arc;

use theiamedia::{MediaId, MediaMeta, MediaRef};

use crate::changes::{ChangeBus, ChangeSubscription, DatabaseChange};
use crate::dao::MediaDao;
use crate::error::Result;
use crate::records::{ImageRecord, MovieRecord, StoredImage, TvEpisodeRecord, TvSeriesRecord};

/// Génère les écritures : appel du DAO puis publication des changements
macro_rules! notifying_writes {
    ($( $(#[$meta:meta])* fn $name:ident(&self $(, $arg:ident : $ty:ty)*); )*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self $(, $arg: $ty)*) -> Result<Vec<DatabaseChange>> {
                let changes = self.dao.$name($($arg),*)?;
                self.publish(&changes);
                Ok(changes)
            }
        )*
    };
}

/// Génère les lectures, transmises telles quelles au DAO
macro_rules! reads {
    ($( fn $name:ident(&self $(, $arg:ident : $ty:ty)*) -> $ret:ty; )*) => {
        $(
            pub fn $name(&self $(, $arg: $ty)*) -> Result<$ret> {
                self.dao.$name($($arg),*)
            }
        )*
    };
}

/// The cache as the rest of Theia sees it
#[derive(Clone)]
pub struct MediaStore {
    dao: Arc<MediaDao>,
    bus: ChangeBus,
}

impl MediaStore {
    pub fn new(dao: MediaDao) -> Self {
        Self::with_bus(dao, ChangeBus::new())
    }

    pub fn with_bus(dao: MediaDao, bus: ChangeBus) -> Self {
        Self {
            dao: Arc::new(dao),
            bus,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(MediaDao::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(MediaDao::open_in_memory()?))
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        self.bus.subscribe()
    }

    pub fn subscribe_with_baseline(&self) -> ChangeSubscription {
        self.bus.subscribe_with_baseline()
    }

    fn publish(&self, changes: &[DatabaseChange]) {
        for change in changes {
            self.bus.post(change.clone());
        }
    }

    notifying_writes! {
        fn add_device(&self, device: &MediaId, meta: &MediaMeta);
        fn hide_device(&self, device: &MediaId);
        fn remove_device(&self, device: &MediaId);
        fn add_upnp_device(&self, udn: &str, meta: &MediaMeta);
        fn hide_upnp_device(&self, udn: &str);
        /// Hard delete of the server and of everything browsed on it
        fn remove_upnp_device(&self, udn: &str);
        fn add_storage_device(&self, volume_id: &str, meta: &MediaMeta);
        fn add_document_tree(&self, tree_uri: &str, meta: &MediaMeta);
        fn add_child(&self, child: &MediaRef, update_id: u32);
        fn add_upnp_folder(&self, folder: &MediaRef);
        fn add_upnp_video(&self, video: &MediaRef);
        fn add_storage_folder(&self, folder: &MediaRef);
        fn add_storage_video(&self, video: &MediaRef);
        fn add_document_directory(&self, directory: &MediaRef);
        fn add_document_video(&self, video: &MediaRef);
        fn hide_children_of(&self, container: &MediaId);
        /// Hide-then-upsert of a freshly fetched listing, in one transaction
        fn reconcile_children(&self, container: &MediaId, children: &[MediaRef], update_id: u32);
        fn set_playback_position(&self, video: &MediaId, position_ms: u64);
        fn set_video_episode(&self, video: &MediaId, episode: &MediaId);
        fn set_video_movie(&self, video: &MediaId, movie: &MediaId);
        fn clear_video_enrichment(&self, video: &MediaId);
        fn add_tv_series(&self, series: &TvSeriesRecord);
        fn add_tv_episode(&self, episode: &TvEpisodeRecord);
        fn add_tv_images(&self, series_id: i64, images: &[ImageRecord]);
        fn set_tv_association(&self, query: &str, series_id: i64);
        fn add_movie(&self, movie: &MovieRecord);
        fn add_movie_images(&self, movie_id: i64, images: &[ImageRecord]);
        fn set_movie_association(&self, query: &str, year: &str, movie_id: i64);
    }

    reads! {
        fn get_upnp_devices(&self) -> Vec<MediaRef>;
        fn get_storage_devices(&self) -> Vec<MediaRef>;
        fn get_document_trees(&self) -> Vec<MediaRef>;
        fn get_device(&self, device: &MediaId) -> MediaRef;
        fn get_upnp_device(&self, udn: &str) -> MediaRef;
        fn get_children_under(&self, container: &MediaId) -> Vec<MediaRef>;
        fn get_storage_children_under(&self, container: &MediaId) -> Vec<MediaRef>;
        fn get_document_children_under(&self, container: &MediaId) -> Vec<MediaRef>;
        fn count_children_under(&self, container: &MediaId) -> usize;
        fn get_video(&self, video: &MediaId) -> MediaRef;
        fn get_upnp_video(&self, video: &MediaId) -> MediaRef;
        fn get_videos_under_recursive(&self, container: &MediaId) -> Vec<MediaRef>;
        fn get_newly_added(&self, limit: usize) -> Vec<MediaRef>;
        fn get_recently_played(&self, limit: usize) -> Vec<MediaRef>;
        fn get_tv_association(&self, query: &str) -> Option<i64>;
        fn get_tv_series(&self, series_id: i64) -> TvSeriesRecord;
        fn get_tv_episode(&self, episode_id: i64) -> TvEpisodeRecord;
        fn get_tv_episode_by_number(&self, series_id: i64, season: u32, episode: u32) -> TvEpisodeRecord;
        fn get_tv_images(&self, series_id: i64) -> Vec<StoredImage>;
        fn get_movie_association(&self, query: &str, year: &str) -> Option<i64>;
        fn get_movie(&self, movie_id: i64) -> MovieRecord;
        fn get_movie_images(&self, movie_id: i64) -> Vec<StoredImage>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_post_their_changes() {
        let store = MediaStore::open_in_memory().unwrap();
        let sub = store.subscribe();

        store
            .add_upnp_device("uuid:dev", &MediaMeta::titled("NAS"))
            .unwrap();
        assert_eq!(sub.try_recv().unwrap(), DatabaseChange::UpnpDevice);

        let root = MediaId::upnp_device("uuid:dev");
        let folder = MediaRef::new(
            MediaId::upnp_folder("uuid:dev", "0", "64"),
            MediaMeta::titled("Videos"),
        );
        store.reconcile_children(&root, &[folder], 3).unwrap();
        assert_eq!(sub.try_recv().unwrap(), DatabaseChange::UpnpFolder(root));
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn test_failed_write_posts_nothing() {
        let store = MediaStore::open_in_memory().unwrap();
        let sub = store.subscribe();

        assert!(store.hide_upnp_device("uuid:unknown").is_err());
        assert!(sub.try_recv().is_err());
        assert!(store.bus().latest().is_none());
    }
}
