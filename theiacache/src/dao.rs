//! Typed access to the SQLite cache
//!
//! Every write returns the [`DatabaseChange`]s it caused. The DAO does not
//! post them; [`crate::MediaStore`] does.

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use theiamedia::{MediaId, MediaMeta, MediaRef};
use tracing::{debug, trace};

use crate::changes::DatabaseChange;
use crate::error::{CacheError, Result};
use crate::records::{ImageRecord, MovieRecord, StoredImage, TvEpisodeRecord, TvSeriesRecord};
use crate::schema::{self, Family, SCHEMA_VERSION, child_key};

const DEVICE_COLUMNS: &str = "device_id, title, subtitle, artwork, date_added";
const FOLDER_COLUMNS: &str = "device_id, parent_id, item_id, title, subtitle, artwork, date_added";
const VIDEO_COLUMNS: &str = "v.device_id, v.parent_id, v.item_id, v.title, v.subtitle, \
     v.artwork, v.backdrop, v.media_uri, v.mime_type, v.duration_ms, v.size, \
     v.episode_series_id, v.episode_id, v.movie_id, v.date_added, p.last_played, p.position_ms";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Maps "no row" on a query that always yields one to a malfunction
fn required<T>(result: rusqlite::Result<T>, what: &str) -> Result<T> {
    result.map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            CacheError::Malfunction(format!("{} returned no row", what))
        }
        other => CacheError::Storage(other),
    })
}

fn video_source(family: Family) -> String {
    format!(
        "{} v LEFT JOIN playback_position p ON p.family = '{}' AND p.device_id = v.device_id \
         AND p.parent_id = v.parent_id AND p.item_id = v.item_id",
        family.video_table(),
        family.name()
    )
}

fn device_row(family: Family, row: &Row<'_>) -> rusqlite::Result<MediaRef> {
    Ok(MediaRef::new(
        family.device_id(row.get(0)?),
        MediaMeta {
            title: row.get(1)?,
            subtitle: row.get(2)?,
            artwork: row.get(3)?,
            date_added: row.get(4)?,
            ..Default::default()
        },
    ))
}

fn folder_row(family: Family, row: &Row<'_>) -> rusqlite::Result<MediaRef> {
    Ok(MediaRef::new(
        family.folder_id(row.get(0)?, row.get(1)?, row.get(2)?),
        MediaMeta {
            title: row.get(3)?,
            subtitle: row.get(4)?,
            artwork: row.get(5)?,
            date_added: row.get(6)?,
            ..Default::default()
        },
    ))
}

fn video_row(family: Family, row: &Row<'_>) -> rusqlite::Result<MediaRef> {
    let episode_series: Option<i64> = row.get(11)?;
    let episode: Option<i64> = row.get(12)?;
    let movie: Option<i64> = row.get(13)?;

    Ok(MediaRef::new(
        family.video_id(row.get(0)?, row.get(1)?, row.get(2)?),
        MediaMeta {
            title: row.get(3)?,
            subtitle: row.get(4)?,
            artwork: row.get(5)?,
            backdrop: row.get(6)?,
            media_uri: row.get(7)?,
            mime_type: row.get(8)?,
            duration_ms: row.get(9)?,
            size: row.get(10)?,
            tv_episode_id: episode_series
                .zip(episode)
                .map(|(series_id, episode_id)| MediaId::TvEpisode {
                    series_id,
                    episode_id,
                }),
            movie_id: movie.map(|movie_id| MediaId::Movie { movie_id }),
            date_added: row.get(14)?,
            last_played: row.get(15)?,
            position_ms: row.get(16)?,
        },
    ))
}

fn series_row(row: &Row<'_>) -> rusqlite::Result<TvSeriesRecord> {
    Ok(TvSeriesRecord {
        series_id: row.get(0)?,
        name: row.get(1)?,
        overview: row.get(2)?,
        first_aired: row.get(3)?,
        network: row.get(4)?,
        poster: row.get(5)?,
        banner: row.get(6)?,
        fanart: row.get(7)?,
    })
}

fn episode_row(row: &Row<'_>) -> rusqlite::Result<TvEpisodeRecord> {
    Ok(TvEpisodeRecord {
        episode_id: row.get(0)?,
        series_id: row.get(1)?,
        season: row.get(2)?,
        episode: row.get(3)?,
        name: row.get(4)?,
        overview: row.get(5)?,
        first_aired: row.get(6)?,
        image: row.get(7)?,
    })
}

fn movie_row(row: &Row<'_>) -> rusqlite::Result<MovieRecord> {
    Ok(MovieRecord {
        movie_id: row.get(0)?,
        title: row.get(1)?,
        overview: row.get(2)?,
        release_date: row.get(3)?,
        poster: row.get(4)?,
        backdrop: row.get(5)?,
    })
}

fn upsert_child(
    conn: &Connection,
    family: Family,
    child: &MediaRef,
    update_id: u32,
    added: &str,
) -> Result<()> {
    let (device, parent, item) =
        child_key(&child.id).ok_or_else(|| CacheError::WrongKind(child.id.clone()))?;
    let meta = &child.meta;

    if child.id.is_video() {
        let sql = format!(
            "INSERT INTO {} (device_id, parent_id, item_id, title, subtitle, artwork, backdrop,
                             media_uri, mime_type, duration_ms, size, hidden, date_added, update_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?13)
             ON CONFLICT(device_id, parent_id, item_id) DO UPDATE SET
                 title = excluded.title,
                 subtitle = excluded.subtitle,
                 artwork = excluded.artwork,
                 backdrop = excluded.backdrop,
                 media_uri = excluded.media_uri,
                 mime_type = excluded.mime_type,
                 duration_ms = excluded.duration_ms,
                 size = excluded.size,
                 hidden = 0,
                 update_id = excluded.update_id",
            family.video_table()
        );
        conn.execute(
            &sql,
            params![
                device,
                parent,
                item,
                meta.title,
                meta.subtitle,
                meta.artwork,
                meta.backdrop,
                meta.media_uri,
                meta.mime_type,
                meta.duration_ms,
                meta.size,
                added,
                update_id
            ],
        )?;
    } else {
        let sql = format!(
            "INSERT INTO {} (device_id, parent_id, item_id, title, subtitle, artwork,
                             hidden, date_added, update_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)
             ON CONFLICT(device_id, parent_id, item_id) DO UPDATE SET
                 title = excluded.title,
                 subtitle = excluded.subtitle,
                 artwork = excluded.artwork,
                 hidden = 0,
                 update_id = excluded.update_id",
            family.folder_table()
        );
        conn.execute(
            &sql,
            params![
                device,
                parent,
                item,
                meta.title,
                meta.subtitle,
                meta.artwork,
                added,
                update_id
            ],
        )?;
    }
    Ok(())
}

fn hide_children(conn: &Connection, family: Family, device: &str, parent: &str) -> Result<usize> {
    let mut hidden = 0;
    for table in [family.folder_table(), family.video_table()] {
        hidden += conn.execute(
            &format!(
                "UPDATE {} SET hidden = 1 WHERE device_id = ?1 AND parent_id = ?2 AND hidden = 0",
                table
            ),
            params![device, parent],
        )?;
    }
    Ok(hidden)
}

/// Base de données SQLite du cache média
///
/// Une seule connexion, protégée par un mutex : les écritures de la
/// réconciliation tiennent le verrou le temps d'une transaction.
#[derive(Debug)]
pub struct MediaDao {
    conn: Mutex<Connection>,
}

impl MediaDao {
    /// Opens (and creates if needed) the cache database at `path`
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use theiacache::MediaDao;
    /// use std::path::Path;
    ///
    /// let dao = MediaDao::open(Path::new("theia.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        schema::create_tables(&conn)?;

        let version: i64 = required(
            conn.query_row("PRAGMA user_version", [], |row| row.get(0)),
            "PRAGMA user_version",
        )?;
        if version == 0 {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        } else if version != SCHEMA_VERSION {
            return Err(CacheError::Malfunction(format!(
                "unsupported cache schema version {}",
                version
            )));
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panicking holder leaves no open transaction behind: it is rolled
        // back when the Transaction is dropped
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn family(id: &MediaId) -> Result<Family> {
        Family::of(id).ok_or_else(|| CacheError::WrongKind(id.clone()))
    }

    fn container_keys(container: &MediaId) -> Result<(Family, &str, &str)> {
        let family = Self::family(container)?;
        match (container.device_key(), container.container_key()) {
            (Some(device), Some(parent)) => Ok((family, device, parent)),
            _ => Err(CacheError::WrongKind(container.clone())),
        }
    }

    // ============= Devices =============

    /// Inserts or refreshes a device row and makes it visible
    pub fn add_device(&self, device: &MediaId, meta: &MediaMeta) -> Result<Vec<DatabaseChange>> {
        let family = Self::family(device)?;
        let key = match device.device_key() {
            Some(key) if device.is_device() => key,
            _ => return Err(CacheError::WrongKind(device.clone())),
        };

        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO {} (device_id, title, subtitle, artwork, hidden, date_added)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)
                 ON CONFLICT(device_id) DO UPDATE SET
                     title = excluded.title,
                     subtitle = excluded.subtitle,
                     artwork = excluded.artwork,
                     hidden = 0",
                family.device_table()
            ),
            params![key, meta.title, meta.subtitle, meta.artwork, now()],
        )?;

        Ok(DatabaseChange::for_device(device).into_iter().collect())
    }

    pub fn hide_device(&self, device: &MediaId) -> Result<Vec<DatabaseChange>> {
        let family = Self::family(device)?;
        let key = device
            .device_key()
            .filter(|_| device.is_device())
            .ok_or_else(|| CacheError::WrongKind(device.clone()))?;

        let updated = self.conn().execute(
            &format!(
                "UPDATE {} SET hidden = 1 WHERE device_id = ?1",
                family.device_table()
            ),
            [key],
        )?;
        if updated == 0 {
            return Err(CacheError::NotFound(device.to_string()));
        }

        Ok(DatabaseChange::for_device(device).into_iter().collect())
    }

    /// Deletes a device and everything cached under it
    pub fn remove_device(&self, device: &MediaId) -> Result<Vec<DatabaseChange>> {
        let family = Self::family(device)?;
        let key = device
            .device_key()
            .filter(|_| device.is_device())
            .ok_or_else(|| CacheError::WrongKind(device.clone()))?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for table in [
            family.video_table(),
            family.folder_table(),
            family.device_table(),
        ] {
            tx.execute(&format!("DELETE FROM {} WHERE device_id = ?1", table), [key])?;
        }
        tx.execute(
            "DELETE FROM playback_position WHERE family = ?1 AND device_id = ?2",
            params![family.name(), key],
        )?;
        tx.commit()?;

        debug!(device = %device, "Removed device and its subtree from the cache");
        Ok(DatabaseChange::for_device(device).into_iter().collect())
    }

    pub fn add_upnp_device(&self, udn: &str, meta: &MediaMeta) -> Result<Vec<DatabaseChange>> {
        self.add_device(&MediaId::upnp_device(udn), meta)
    }

    pub fn hide_upnp_device(&self, udn: &str) -> Result<Vec<DatabaseChange>> {
        self.hide_device(&MediaId::upnp_device(udn))
    }

    pub fn remove_upnp_device(&self, udn: &str) -> Result<Vec<DatabaseChange>> {
        self.remove_device(&MediaId::upnp_device(udn))
    }

    pub fn add_storage_device(
        &self,
        volume_id: &str,
        meta: &MediaMeta,
    ) -> Result<Vec<DatabaseChange>> {
        self.add_device(
            &MediaId::StorageDevice {
                volume_id: volume_id.to_string(),
            },
            meta,
        )
    }

    pub fn add_document_tree(&self, tree_uri: &str, meta: &MediaMeta) -> Result<Vec<DatabaseChange>> {
        self.add_device(
            &MediaId::DocumentTree {
                tree_uri: tree_uri.to_string(),
            },
            meta,
        )
    }

    /// Visible devices of one family, by title
    fn get_devices(&self, family: Family) -> Result<Vec<MediaRef>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE hidden = 0 ORDER BY title COLLATE NOCASE, device_id",
            DEVICE_COLUMNS,
            family.device_table()
        ))?;
        let rows = stmt.query_map([], |row| device_row(family, row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_upnp_devices(&self) -> Result<Vec<MediaRef>> {
        self.get_devices(Family::Upnp)
    }

    pub fn get_storage_devices(&self) -> Result<Vec<MediaRef>> {
        self.get_devices(Family::Storage)
    }

    pub fn get_document_trees(&self) -> Result<Vec<MediaRef>> {
        self.get_devices(Family::Document)
    }

    /// Device row, hidden or not
    pub fn get_device(&self, device: &MediaId) -> Result<MediaRef> {
        let family = Self::family(device)?;
        let key = device
            .device_key()
            .filter(|_| device.is_device())
            .ok_or_else(|| CacheError::WrongKind(device.clone()))?;

        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {} FROM {} WHERE device_id = ?1",
                DEVICE_COLUMNS,
                family.device_table()
            ),
            [key],
            |row| device_row(family, row),
        )
        .optional()?
        .ok_or_else(|| CacheError::NotFound(device.to_string()))
    }

    pub fn get_upnp_device(&self, udn: &str) -> Result<MediaRef> {
        self.get_device(&MediaId::upnp_device(udn))
    }

    // ============= Listings =============

    /// Inserts or refreshes one child row, clearing its hidden flag
    pub fn add_child(&self, child: &MediaRef, update_id: u32) -> Result<Vec<DatabaseChange>> {
        let family = Self::family(&child.id)?;
        upsert_child(&self.conn(), family, child, update_id, &now())?;
        Ok(DatabaseChange::for_child(&child.id).into_iter().collect())
    }

    fn add_child_of_kind(
        &self,
        child: &MediaRef,
        accept: fn(&MediaId) -> bool,
    ) -> Result<Vec<DatabaseChange>> {
        if !accept(&child.id) {
            return Err(CacheError::WrongKind(child.id.clone()));
        }
        self.add_child(child, 0)
    }

    pub fn add_upnp_folder(&self, folder: &MediaRef) -> Result<Vec<DatabaseChange>> {
        self.add_child_of_kind(folder, |id| matches!(id, MediaId::UpnpFolder { .. }))
    }

    pub fn add_upnp_video(&self, video: &MediaRef) -> Result<Vec<DatabaseChange>> {
        self.add_child_of_kind(video, |id| matches!(id, MediaId::UpnpVideo { .. }))
    }

    pub fn add_storage_folder(&self, folder: &MediaRef) -> Result<Vec<DatabaseChange>> {
        self.add_child_of_kind(folder, |id| matches!(id, MediaId::StorageFolder { .. }))
    }

    pub fn add_storage_video(&self, video: &MediaRef) -> Result<Vec<DatabaseChange>> {
        self.add_child_of_kind(video, |id| matches!(id, MediaId::StorageVideo { .. }))
    }

    pub fn add_document_directory(&self, directory: &MediaRef) -> Result<Vec<DatabaseChange>> {
        self.add_child_of_kind(directory, |id| {
            matches!(id, MediaId::DocumentDirectory { .. })
        })
    }

    pub fn add_document_video(&self, video: &MediaRef) -> Result<Vec<DatabaseChange>> {
        self.add_child_of_kind(video, |id| matches!(id, MediaId::DocumentVideo { .. }))
    }

    /// Flags every child of `container` as hidden
    pub fn hide_children_of(&self, container: &MediaId) -> Result<Vec<DatabaseChange>> {
        let (family, device, parent) = Self::container_keys(container)?;
        let hidden = hide_children(&self.conn(), family, device, parent)?;
        trace!(container = %container, hidden, "Hid children");
        Ok(DatabaseChange::for_container(container).into_iter().collect())
    }

    /// Replaces the visible listing of `container` with `children`
    ///
    /// Hides every current child, then upserts the batch, in a single
    /// transaction. Rows missing from the batch stay hidden; nothing is
    /// deleted. Callers only get here with a successfully fetched batch.
    pub fn reconcile_children(
        &self,
        container: &MediaId,
        children: &[MediaRef],
        update_id: u32,
    ) -> Result<Vec<DatabaseChange>> {
        let (family, device, parent) = Self::container_keys(container)?;
        if let Some(stray) = children
            .iter()
            .find(|c| c.id.parent_key() != Some((device, parent)))
        {
            return Err(CacheError::WrongKind(stray.id.clone()));
        }

        let added = now();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let hidden = hide_children(&tx, family, device, parent)?;
        for child in children {
            upsert_child(&tx, family, child, update_id, &added)?;
        }
        tx.commit()?;

        debug!(
            container = %container,
            hidden,
            upserted = children.len(),
            "Reconciled listing"
        );
        Ok(DatabaseChange::for_container(container).into_iter().collect())
    }

    /// Visible children of `container`: folders first, then videos
    pub fn get_children_under(&self, container: &MediaId) -> Result<Vec<MediaRef>> {
        let (family, device, parent) = Self::container_keys(container)?;
        let conn = self.conn();

        let mut children = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} WHERE device_id = ?1 AND parent_id = ?2 AND hidden = 0
                 ORDER BY title COLLATE NOCASE, item_id",
                FOLDER_COLUMNS,
                family.folder_table()
            ))?;
            let rows = stmt.query_map(params![device, parent], |row| folder_row(family, row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE v.device_id = ?1 AND v.parent_id = ?2 AND v.hidden = 0
             ORDER BY v.title COLLATE NOCASE, v.item_id",
            VIDEO_COLUMNS,
            video_source(family)
        ))?;
        let rows = stmt.query_map(params![device, parent], |row| video_row(family, row))?;
        for video in rows {
            children.push(video?);
        }
        Ok(children)
    }

    pub fn get_storage_children_under(&self, container: &MediaId) -> Result<Vec<MediaRef>> {
        match Family::of(container) {
            Some(Family::Storage) => self.get_children_under(container),
            _ => Err(CacheError::WrongKind(container.clone())),
        }
    }

    pub fn get_document_children_under(&self, container: &MediaId) -> Result<Vec<MediaRef>> {
        match Family::of(container) {
            Some(Family::Document) => self.get_children_under(container),
            _ => Err(CacheError::WrongKind(container.clone())),
        }
    }

    /// Number of visible children of `container`
    pub fn count_children_under(&self, container: &MediaId) -> Result<usize> {
        let (family, device, parent) = Self::container_keys(container)?;
        let conn = self.conn();
        let count: i64 = required(
            conn.query_row(
                &format!(
                    "SELECT (SELECT COUNT(*) FROM {} WHERE device_id = ?1 AND parent_id = ?2 AND hidden = 0)
                          + (SELECT COUNT(*) FROM {} WHERE device_id = ?1 AND parent_id = ?2 AND hidden = 0)",
                    family.folder_table(),
                    family.video_table()
                ),
                params![device, parent],
                |row| row.get(0),
            ),
            "child count",
        )?;
        Ok(count as usize)
    }

    /// Video row, hidden or not
    pub fn get_video(&self, video: &MediaId) -> Result<MediaRef> {
        let family = Self::family(video)?;
        let (device, parent, item) = child_key(video)
            .filter(|_| video.is_video())
            .ok_or_else(|| CacheError::WrongKind(video.clone()))?;

        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {} FROM {} WHERE v.device_id = ?1 AND v.parent_id = ?2 AND v.item_id = ?3",
                VIDEO_COLUMNS,
                video_source(family)
            ),
            params![device, parent, item],
            |row| video_row(family, row),
        )
        .optional()?
        .ok_or_else(|| CacheError::NotFound(video.to_string()))
    }

    pub fn get_upnp_video(&self, video: &MediaId) -> Result<MediaRef> {
        match video {
            MediaId::UpnpVideo { .. } => self.get_video(video),
            _ => Err(CacheError::WrongKind(video.clone())),
        }
    }

    /// Visible videos anywhere below `container`, following visible folders
    pub fn get_videos_under_recursive(&self, container: &MediaId) -> Result<Vec<MediaRef>> {
        let (family, device, parent) = Self::container_keys(container)?;
        let conn = self.conn();
        // UNION (not UNION ALL) stops on folder cycles
        let mut stmt = conn.prepare(&format!(
            "WITH RECURSIVE tree(folder) AS (
                 SELECT ?2
                 UNION
                 SELECT f.item_id FROM {folders} f JOIN tree t ON f.parent_id = t.folder
                 WHERE f.device_id = ?1 AND f.hidden = 0
             )
             SELECT {columns} FROM {videos}
             WHERE v.device_id = ?1 AND v.hidden = 0 AND v.parent_id IN (SELECT folder FROM tree)
             ORDER BY v.parent_id, v.title COLLATE NOCASE",
            folders = family.folder_table(),
            columns = VIDEO_COLUMNS,
            videos = video_source(family)
        ))?;
        let rows = stmt.query_map(params![device, parent], |row| video_row(family, row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Most recently added visible videos, all families together
    pub fn get_newly_added(&self, limit: usize) -> Result<Vec<MediaRef>> {
        let conn = self.conn();
        let mut videos = Vec::new();
        for family in Family::ALL {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} WHERE v.hidden = 0 ORDER BY v.date_added DESC, v.id DESC LIMIT ?1",
                VIDEO_COLUMNS,
                video_source(family)
            ))?;
            let rows = stmt.query_map([limit], |row| video_row(family, row))?;
            for video in rows {
                videos.push(video?);
            }
        }
        videos.sort_by(|a, b| b.meta.date_added.cmp(&a.meta.date_added));
        videos.truncate(limit);
        Ok(videos)
    }

    /// Visible videos with a playback position, latest first
    pub fn get_recently_played(&self, limit: usize) -> Result<Vec<MediaRef>> {
        let conn = self.conn();
        let mut videos = Vec::new();
        for family in Family::ALL {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} WHERE v.hidden = 0 AND p.last_played IS NOT NULL
                 ORDER BY p.last_played DESC LIMIT ?1",
                VIDEO_COLUMNS,
                video_source(family)
            ))?;
            let rows = stmt.query_map([limit], |row| video_row(family, row))?;
            for video in rows {
                videos.push(video?);
            }
        }
        videos.sort_by(|a, b| b.meta.last_played.cmp(&a.meta.last_played));
        videos.truncate(limit);
        Ok(videos)
    }

    pub fn set_playback_position(
        &self,
        video: &MediaId,
        position_ms: u64,
    ) -> Result<Vec<DatabaseChange>> {
        let family = Self::family(video)?;
        let (device, parent, item) = child_key(video)
            .filter(|_| video.is_video())
            .ok_or_else(|| CacheError::WrongKind(video.clone()))?;

        self.conn().execute(
            "INSERT INTO playback_position (family, device_id, parent_id, item_id, position_ms, last_played)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(family, device_id, parent_id, item_id) DO UPDATE SET
                 position_ms = excluded.position_ms,
                 last_played = excluded.last_played",
            params![family.name(), device, parent, item, position_ms, now()],
        )?;
        Ok(vec![DatabaseChange::PlaybackPosition(video.clone())])
    }

    // ============= Enrichment links =============

    fn update_video_links(
        &self,
        video: &MediaId,
        episode: Option<(i64, i64)>,
        movie: Option<i64>,
    ) -> Result<Vec<DatabaseChange>> {
        let family = Self::family(video)?;
        let (device, parent, item) = child_key(video)
            .filter(|_| video.is_video())
            .ok_or_else(|| CacheError::WrongKind(video.clone()))?;

        let updated = self.conn().execute(
            &format!(
                "UPDATE {} SET episode_series_id = ?4, episode_id = ?5, movie_id = ?6
                 WHERE device_id = ?1 AND parent_id = ?2 AND item_id = ?3",
                family.video_table()
            ),
            params![
                device,
                parent,
                item,
                episode.map(|(series, _)| series),
                episode.map(|(_, episode)| episode),
                movie
            ],
        )?;
        if updated == 0 {
            return Err(CacheError::NotFound(video.to_string()));
        }
        Ok(DatabaseChange::for_child(video).into_iter().collect())
    }

    /// Links a video to an episode, clearing any movie link
    pub fn set_video_episode(&self, video: &MediaId, episode: &MediaId) -> Result<Vec<DatabaseChange>> {
        match episode {
            MediaId::TvEpisode {
                series_id,
                episode_id,
            } => self.update_video_links(video, Some((*series_id, *episode_id)), None),
            _ => Err(CacheError::WrongKind(episode.clone())),
        }
    }

    /// Links a video to a movie, clearing any episode link
    pub fn set_video_movie(&self, video: &MediaId, movie: &MediaId) -> Result<Vec<DatabaseChange>> {
        match movie {
            MediaId::Movie { movie_id } => self.update_video_links(video, None, Some(*movie_id)),
            _ => Err(CacheError::WrongKind(movie.clone())),
        }
    }

    pub fn clear_video_enrichment(&self, video: &MediaId) -> Result<Vec<DatabaseChange>> {
        self.update_video_links(video, None, None)
    }

    // ============= TV metadata =============

    pub fn add_tv_series(&self, series: &TvSeriesRecord) -> Result<Vec<DatabaseChange>> {
        self.conn().execute(
            "INSERT INTO tv_series (series_id, name, overview, first_aired, network, poster, banner, fanart, date_added)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(series_id) DO UPDATE SET
                 name = excluded.name,
                 overview = excluded.overview,
                 first_aired = excluded.first_aired,
                 network = excluded.network,
                 poster = excluded.poster,
                 banner = excluded.banner,
                 fanart = excluded.fanart",
            params![
                series.series_id,
                series.name,
                series.overview,
                series.first_aired,
                series.network,
                series.poster,
                series.banner,
                series.fanart,
                now()
            ],
        )?;
        Ok(vec![DatabaseChange::TvSeries(series.media_id())])
    }

    pub fn add_tv_episode(&self, episode: &TvEpisodeRecord) -> Result<Vec<DatabaseChange>> {
        // REPLACE also evicts a stale row holding the same season/episode slot
        self.conn().execute(
            "INSERT OR REPLACE INTO tv_episode
                 (episode_id, series_id, season, episode, name, overview, first_aired, image)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                episode.episode_id,
                episode.series_id,
                episode.season,
                episode.episode,
                episode.name,
                episode.overview,
                episode.first_aired,
                episode.image
            ],
        )?;
        Ok(vec![DatabaseChange::TvSeries(MediaId::TvSeries {
            series_id: episode.series_id,
        })])
    }

    pub fn add_tv_images(
        &self,
        series_id: i64,
        images: &[ImageRecord],
    ) -> Result<Vec<DatabaseChange>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for image in images {
            tx.execute(
                "INSERT INTO tv_image (series_id, kind, path, rating) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(series_id, path) DO UPDATE SET kind = excluded.kind, rating = excluded.rating",
                params![series_id, image.kind, image.path, image.rating],
            )?;
        }
        tx.commit()?;
        Ok(vec![DatabaseChange::TvSeries(MediaId::TvSeries { series_id })])
    }

    /// Records that `query` (a normalised series name) resolved to `series_id`
    pub fn set_tv_association(&self, query: &str, series_id: i64) -> Result<Vec<DatabaseChange>> {
        self.conn().execute(
            "INSERT OR REPLACE INTO tv_lookup (query, series_id) VALUES (?1, ?2)",
            params![query, series_id],
        )?;
        Ok(vec![DatabaseChange::TvSeries(MediaId::TvSeries { series_id })])
    }

    /// Series previously resolved for `query`; `None` is a plain cache miss
    pub fn get_tv_association(&self, query: &str) -> Result<Option<i64>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT series_id FROM tv_lookup WHERE query = ?1",
                [query],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn get_tv_series(&self, series_id: i64) -> Result<TvSeriesRecord> {
        self.conn()
            .query_row(
                "SELECT series_id, name, overview, first_aired, network, poster, banner, fanart
                 FROM tv_series WHERE series_id = ?1",
                [series_id],
                series_row,
            )
            .optional()?
            .ok_or_else(|| CacheError::NotFound(format!("tv series {}", series_id)))
    }

    pub fn get_tv_episode(&self, episode_id: i64) -> Result<TvEpisodeRecord> {
        self.conn()
            .query_row(
                "SELECT episode_id, series_id, season, episode, name, overview, first_aired, image
                 FROM tv_episode WHERE episode_id = ?1",
                [episode_id],
                episode_row,
            )
            .optional()?
            .ok_or_else(|| CacheError::NotFound(format!("tv episode {}", episode_id)))
    }

    pub fn get_tv_episode_by_number(
        &self,
        series_id: i64,
        season: u32,
        episode: u32,
    ) -> Result<TvEpisodeRecord> {
        self.conn()
            .query_row(
                "SELECT episode_id, series_id, season, episode, name, overview, first_aired, image
                 FROM tv_episode WHERE series_id = ?1 AND season = ?2 AND episode = ?3",
                params![series_id, season, episode],
                episode_row,
            )
            .optional()?
            .ok_or_else(|| {
                CacheError::NotFound(format!(
                    "tv series {} episode S{:02}E{:02}",
                    series_id, season, episode
                ))
            })
    }

    pub fn get_tv_images(&self, series_id: i64) -> Result<Vec<StoredImage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT image_id, kind, path, rating FROM tv_image WHERE series_id = ?1
             ORDER BY rating IS NULL, rating DESC, image_id",
        )?;
        let rows = stmt.query_map([series_id], |row| {
            Ok(StoredImage {
                id: MediaId::TvImage {
                    series_id,
                    image_id: row.get(0)?,
                },
                kind: row.get(1)?,
                path: row.get(2)?,
                rating: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ============= Movie metadata =============

    pub fn add_movie(&self, movie: &MovieRecord) -> Result<Vec<DatabaseChange>> {
        self.conn().execute(
            "INSERT INTO movie (movie_id, title, overview, release_date, poster, backdrop, date_added)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(movie_id) DO UPDATE SET
                 title = excluded.title,
                 overview = excluded.overview,
                 release_date = excluded.release_date,
                 poster = excluded.poster,
                 backdrop = excluded.backdrop",
            params![
                movie.movie_id,
                movie.title,
                movie.overview,
                movie.release_date,
                movie.poster,
                movie.backdrop,
                now()
            ],
        )?;
        Ok(vec![DatabaseChange::Movie(movie.media_id())])
    }

    pub fn add_movie_images(
        &self,
        movie_id: i64,
        images: &[ImageRecord],
    ) -> Result<Vec<DatabaseChange>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for image in images {
            tx.execute(
                "INSERT INTO movie_image (movie_id, kind, path, rating) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(movie_id, path) DO UPDATE SET kind = excluded.kind, rating = excluded.rating",
                params![movie_id, image.kind, image.path, image.rating],
            )?;
        }
        tx.commit()?;
        Ok(vec![DatabaseChange::Movie(MediaId::Movie { movie_id })])
    }

    pub fn set_movie_association(
        &self,
        query: &str,
        year: &str,
        movie_id: i64,
    ) -> Result<Vec<DatabaseChange>> {
        self.conn().execute(
            "INSERT OR REPLACE INTO movie_lookup (query, year, movie_id) VALUES (?1, ?2, ?3)",
            params![query, year, movie_id],
        )?;
        Ok(vec![DatabaseChange::Movie(MediaId::Movie { movie_id })])
    }

    pub fn get_movie_association(&self, query: &str, year: &str) -> Result<Option<i64>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT movie_id FROM movie_lookup WHERE query = ?1 AND year = ?2",
                params![query, year],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn get_movie(&self, movie_id: i64) -> Result<MovieRecord> {
        self.conn()
            .query_row(
                "SELECT movie_id, title, overview, release_date, poster, backdrop
                 FROM movie WHERE movie_id = ?1",
                [movie_id],
                movie_row,
            )
            .optional()?
            .ok_or_else(|| CacheError::NotFound(format!("movie {}", movie_id)))
    }

    pub fn get_movie_images(&self, movie_id: i64) -> Result<Vec<StoredImage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT image_id, kind, path, rating FROM movie_image WHERE movie_id = ?1
             ORDER BY rating IS NULL, rating DESC, image_id",
        )?;
        let rows = stmt.query_map([movie_id], |row| {
            Ok(StoredImage {
                id: MediaId::MovieImage {
                    movie_id,
                    image_id: row.get(0)?,
                },
                kind: row.get(1)?,
                path: row.get(2)?,
                rating: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
