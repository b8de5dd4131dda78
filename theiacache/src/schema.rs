//! Table layout
//!
//! The three browse families (UPnP, document trees, storage volumes) share
//! one layout: a device table, a folder table and a video table whose
//! children are keyed by `(device_id, parent_id, item_id)`.

use rusqlite::Connection;
use theiamedia::MediaId;

pub(crate) const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    Upnp,
    Document,
    Storage,
}

impl Family {
    pub(crate) const ALL: [Family; 3] = [Family::Upnp, Family::Document, Family::Storage];

    pub(crate) fn of(id: &MediaId) -> Option<Family> {
        match id {
            MediaId::UpnpDevice { .. } | MediaId::UpnpFolder { .. } | MediaId::UpnpVideo { .. } => {
                Some(Family::Upnp)
            }
            MediaId::DocumentTree { .. }
            | MediaId::DocumentDirectory { .. }
            | MediaId::DocumentVideo { .. } => Some(Family::Document),
            MediaId::StorageDevice { .. }
            | MediaId::StorageFolder { .. }
            | MediaId::StorageVideo { .. } => Some(Family::Storage),
            _ => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Family::Upnp => "upnp",
            Family::Document => "document",
            Family::Storage => "storage",
        }
    }

    pub(crate) fn device_table(self) -> &'static str {
        match self {
            Family::Upnp => "upnp_device",
            Family::Document => "document_tree",
            Family::Storage => "storage_device",
        }
    }

    pub(crate) fn folder_table(self) -> &'static str {
        match self {
            Family::Upnp => "upnp_folder",
            Family::Document => "document_directory",
            Family::Storage => "storage_folder",
        }
    }

    pub(crate) fn video_table(self) -> &'static str {
        match self {
            Family::Upnp => "upnp_video",
            Family::Document => "document_video",
            Family::Storage => "storage_video",
        }
    }

    pub(crate) fn device_id(self, device: String) -> MediaId {
        match self {
            Family::Upnp => MediaId::UpnpDevice { udn: device },
            Family::Document => MediaId::DocumentTree { tree_uri: device },
            Family::Storage => MediaId::StorageDevice { volume_id: device },
        }
    }

    pub(crate) fn folder_id(self, device: String, parent: String, item: String) -> MediaId {
        match self {
            Family::Upnp => MediaId::UpnpFolder {
                udn: device,
                parent_id: parent,
                folder_id: item,
            },
            Family::Document => MediaId::DocumentDirectory {
                tree_uri: device,
                parent_id: parent,
                document_id: item,
            },
            Family::Storage => MediaId::StorageFolder {
                volume_id: device,
                parent_path: parent,
                path: item,
            },
        }
    }

    pub(crate) fn video_id(self, device: String, parent: String, item: String) -> MediaId {
        match self {
            Family::Upnp => MediaId::UpnpVideo {
                udn: device,
                parent_id: parent,
                item_id: item,
            },
            Family::Document => MediaId::DocumentVideo {
                tree_uri: device,
                parent_id: parent,
                document_id: item,
            },
            Family::Storage => MediaId::StorageVideo {
                volume_id: device,
                parent_path: parent,
                path: item,
            },
        }
    }
}

/// `(device_id, parent_id, item_id)` of a child id
pub(crate) fn child_key(id: &MediaId) -> Option<(&str, &str, &str)> {
    let (device, parent) = id.parent_key()?;
    let item = match id {
        MediaId::UpnpFolder { folder_id, .. } => folder_id,
        MediaId::UpnpVideo { item_id, .. } => item_id,
        MediaId::DocumentDirectory { document_id, .. }
        | MediaId::DocumentVideo { document_id, .. } => document_id,
        MediaId::StorageFolder { path, .. } | MediaId::StorageVideo { path, .. } => path,
        _ => return None,
    };
    Some((device, parent, item))
}

fn family_tables(family: Family) -> String {
    let device = family.device_table();
    let folder = family.folder_table();
    let video = family.video_table();
    format!(
        "CREATE TABLE IF NOT EXISTS {device} (
            device_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            subtitle TEXT,
            artwork TEXT,
            hidden INTEGER NOT NULL DEFAULT 0,
            date_added TEXT NOT NULL,
            update_id INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS {folder} (
            id INTEGER PRIMARY KEY,
            device_id TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            title TEXT NOT NULL,
            subtitle TEXT,
            artwork TEXT,
            hidden INTEGER NOT NULL DEFAULT 0,
            date_added TEXT NOT NULL,
            update_id INTEGER NOT NULL DEFAULT 0,
            UNIQUE (device_id, parent_id, item_id)
        );
        CREATE INDEX IF NOT EXISTS idx_{folder}_parent ON {folder} (device_id, parent_id);
        CREATE TABLE IF NOT EXISTS {video} (
            id INTEGER PRIMARY KEY,
            device_id TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            title TEXT NOT NULL,
            subtitle TEXT,
            artwork TEXT,
            backdrop TEXT,
            media_uri TEXT,
            mime_type TEXT,
            duration_ms INTEGER,
            size INTEGER,
            episode_series_id INTEGER,
            episode_id INTEGER,
            movie_id INTEGER,
            hidden INTEGER NOT NULL DEFAULT 0,
            date_added TEXT NOT NULL,
            update_id INTEGER NOT NULL DEFAULT 0,
            UNIQUE (device_id, parent_id, item_id)
        );
        CREATE INDEX IF NOT EXISTS idx_{video}_parent ON {video} (device_id, parent_id);
        CREATE INDEX IF NOT EXISTS idx_{video}_added ON {video} (date_added DESC);"
    )
}

const METADATA_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS tv_series (
        series_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        overview TEXT,
        first_aired TEXT,
        network TEXT,
        poster TEXT,
        banner TEXT,
        fanart TEXT,
        date_added TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tv_episode (
        episode_id INTEGER PRIMARY KEY,
        series_id INTEGER NOT NULL,
        season INTEGER NOT NULL,
        episode INTEGER NOT NULL,
        name TEXT,
        overview TEXT,
        first_aired TEXT,
        image TEXT,
        UNIQUE (series_id, season, episode)
    );
    CREATE TABLE IF NOT EXISTS tv_image (
        image_id INTEGER PRIMARY KEY,
        series_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        path TEXT NOT NULL,
        rating REAL,
        UNIQUE (series_id, path)
    );
    CREATE TABLE IF NOT EXISTS tv_lookup (
        query TEXT PRIMARY KEY,
        series_id INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS movie (
        movie_id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        overview TEXT,
        release_date TEXT,
        poster TEXT,
        backdrop TEXT,
        date_added TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS movie_image (
        image_id INTEGER PRIMARY KEY,
        movie_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        path TEXT NOT NULL,
        rating REAL,
        UNIQUE (movie_id, path)
    );
    CREATE TABLE IF NOT EXISTS movie_lookup (
        query TEXT NOT NULL,
        year TEXT NOT NULL,
        movie_id INTEGER NOT NULL,
        PRIMARY KEY (query, year)
    );
    CREATE TABLE IF NOT EXISTS playback_position (
        family TEXT NOT NULL,
        device_id TEXT NOT NULL,
        parent_id TEXT NOT NULL,
        item_id TEXT NOT NULL,
        position_ms INTEGER NOT NULL,
        last_played TEXT NOT NULL,
        PRIMARY KEY (family, device_id, parent_id, item_id)
    );
    CREATE INDEX IF NOT EXISTS idx_playback_last ON playback_position (last_played DESC);";

pub(crate) fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    for family in Family::ALL {
        conn.execute_batch(&family_tables(family))?;
    }
    conn.execute_batch(METADATA_TABLES)
}
