//! Browse engine
//!
//! `browse_once` turns the paginated DIDL-Lite answers of one container into
//! a batch of folders and playable videos; `refresh` reconciles that batch
//! into the cache. A failed fetch never touches the cache.
//!
//! On servers with a `BASICVIEW` feature the device root lists the video
//! container instead; that container is cached as the device root under
//! every name it is refreshed by.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use theiacache::MediaStore;
use theiaconfig::Config;
use theiadidl::{Container, DIDLLite, FeatureList, Item};
use theiamedia::{MediaId, MediaMeta, MediaRef, UPNP_ROOT_ID};
use tracing::{debug, info};

use crate::content_directory::ContentDirectory;
use crate::error::{BrowseError, Result};
use crate::resolver::DirectoryResolver;

pub const DEFAULT_PAGE_SIZE: u32 = 999;
pub const DEFAULT_MAX_PAGES: usize = 20;

/// One entry of a browsed listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowsedChild {
    Folder(MediaRef),
    Video(MediaRef),
}

impl BrowsedChild {
    pub fn media_ref(&self) -> &MediaRef {
        match self {
            BrowsedChild::Folder(r) | BrowsedChild::Video(r) => r,
        }
    }

    pub fn into_media_ref(self) -> MediaRef {
        match self {
            BrowsedChild::Folder(r) | BrowsedChild::Video(r) => r,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, BrowsedChild::Folder(_))
    }
}

/// Listing of one container as fetched from its server
#[derive(Debug, Clone)]
pub struct BrowseBatch {
    pub container: MediaId,
    pub children: Vec<BrowsedChild>,
    pub update_id: u32,
}

impl BrowseBatch {
    pub fn folders(&self) -> impl Iterator<Item = &MediaRef> {
        self.children
            .iter()
            .filter(|c| c.is_folder())
            .map(BrowsedChild::media_ref)
    }

    pub fn media_refs(&self) -> Vec<MediaRef> {
        self.children
            .iter()
            .map(|c| c.media_ref().clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BrowseOptions {
    pub page_size: u32,
    pub max_pages: usize,
}

impl Default for BrowseOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl BrowseOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: u32::try_from(config.get_browse_page_size())
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .max(1),
            max_pages: config.get_browse_max_pages().max(1),
        }
    }
}

/// Refreshes one cached container and reports the sub-containers found
///
/// Implemented by the UPnP engine and by the local storage scanner so that
/// both can be driven by the same scan queue.
pub trait Refresher: Send + Sync {
    fn refresh_container(&self, container: &MediaId) -> Result<Vec<MediaId>>;

    /// Refresh asked for by a visible listing
    fn refresh_on_demand(&self, container: &MediaId) -> Result<()> {
        self.refresh_container(container).map(|_| ())
    }
}

pub struct BrowseEngine {
    store: MediaStore,
    resolver: Arc<dyn DirectoryResolver>,
    options: BrowseOptions,
    // udn -> BASICVIEW video container, `None` when the server has none
    video_roots: Mutex<HashMap<String, Option<String>>>,
}

impl BrowseEngine {
    pub fn new(
        store: MediaStore,
        resolver: Arc<dyn DirectoryResolver>,
        options: BrowseOptions,
    ) -> Self {
        Self {
            store,
            resolver,
            options,
            video_roots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    fn known_video_root(&self, udn: &str) -> Option<Option<String>> {
        self.video_roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(udn)
            .cloned()
    }

    fn fetch_video_root(&self, service: &dyn ContentDirectory, udn: &str) -> Option<String> {
        let root = video_root(service, udn);
        self.video_roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(udn.to_string(), root.clone());
        root
    }

    /// Container whose cached listing receives the children of `container`
    fn listing_of(&self, container: &MediaId) -> MediaId {
        match container {
            MediaId::UpnpFolder { udn, folder_id, .. }
                if folder_id == UPNP_ROOT_ID
                    || self.known_video_root(udn).flatten().as_deref()
                        == Some(folder_id.as_str()) =>
            {
                MediaId::upnp_device(udn.as_str())
            }
            _ => container.clone(),
        }
    }

    /// Fetches the current listing of `container` without touching the cache
    pub fn browse_once(&self, container: &MediaId) -> Result<BrowseBatch> {
        let (udn, object_id) = match container {
            MediaId::UpnpDevice { udn } => (udn.as_str(), UPNP_ROOT_ID),
            MediaId::UpnpFolder { udn, folder_id, .. } => (udn.as_str(), folder_id.as_str()),
            _ => return Err(BrowseError::NotBrowsable(container.clone())),
        };

        let service = self.resolver.content_directory(udn)?;

        let browse_id = if object_id == UPNP_ROOT_ID {
            self.fetch_video_root(service.as_ref(), udn)
                .unwrap_or_else(|| UPNP_ROOT_ID.to_string())
        } else {
            if self.known_video_root(udn).is_none() {
                self.fetch_video_root(service.as_ref(), udn);
            }
            object_id.to_string()
        };

        let (didl, update_id) = self.fetch_all(service.as_ref(), &browse_id)?;

        let listing = self.listing_of(container);
        let parent_id = match listing {
            MediaId::UpnpDevice { .. } => UPNP_ROOT_ID,
            _ => object_id,
        };
        let children = map_children(udn, parent_id, &didl);
        debug!(
            server = udn,
            folder_id = parent_id,
            browsed_id = browse_id.as_str(),
            children = children.len(),
            "Browse complete"
        );

        Ok(BrowseBatch {
            container: listing,
            children,
            update_id,
        })
    }

    fn fetch_all(
        &self,
        service: &dyn ContentDirectory,
        object_id: &str,
    ) -> Result<(DIDLLite, u32)> {
        let mut merged = DIDLLite::default();
        let mut start: u32 = 0;
        let mut update_id = 0;

        for page_index in 0..self.options.max_pages {
            let page = service.browse(object_id, start, self.options.page_size)?;

            if page_index == 0 && page.total_matches == 0 && page.number_returned == 0 {
                return Err(BrowseError::NoResults(object_id.to_string()));
            }

            update_id = page.update_id;
            merged.containers.extend(page.didl.containers);
            merged.items.extend(page.didl.items);
            start = start.saturating_add(page.number_returned);

            if page.number_returned == 0
                || page.number_returned == page.total_matches
                || start >= page.total_matches
            {
                return Ok((merged, update_id));
            }
        }

        info!(
            folder_id = object_id,
            pages = self.options.max_pages,
            fetched = start,
            "Page cap reached, listing truncated"
        );
        Ok((merged, update_id))
    }

    /// `browse_once`, then reconciliation of the batch into the cache
    pub fn refresh(&self, container: &MediaId) -> Result<BrowseBatch> {
        let batch = self.browse_once(container)?;
        self.store
            .reconcile_children(&batch.container, &batch.media_refs(), batch.update_id)?;
        Ok(batch)
    }
}

impl Refresher for BrowseEngine {
    fn refresh_container(&self, container: &MediaId) -> Result<Vec<MediaId>> {
        let batch = self.refresh(container)?;
        Ok(batch.folders().map(|f| f.id.clone()).collect())
    }

    /// A server answering "no results" for a visible folder empties it
    fn refresh_on_demand(&self, container: &MediaId) -> Result<()> {
        match self.refresh(container) {
            Ok(_) => Ok(()),
            Err(BrowseError::NoResults(_)) => {
                debug!(%container, "Server returned no results, clearing listing");
                self.store
                    .reconcile_children(&self.listing_of(container), &[], 0)?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Video container advertised by the `BASICVIEW` feature, if any
///
/// Every failure means "no feature list" and the plain root is browsed.
fn video_root(service: &dyn ContentDirectory, udn: &str) -> Option<String> {
    let raw = match service.get_feature_list() {
        Ok(raw) => raw,
        Err(err) => {
            debug!(server = udn, error = %err, "X_GetFeatureList unavailable");
            return None;
        }
    };
    match FeatureList::parse(&raw) {
        Ok(features) => features.video_root().map(str::to_string),
        Err(err) => {
            debug!(server = udn, error = %err, "Unreadable feature list");
            None
        }
    }
}

fn map_children(udn: &str, parent_id: &str, didl: &DIDLLite) -> Vec<BrowsedChild> {
    let mut children = Vec::new();

    for container in &didl.containers {
        if container.is_storage_folder() {
            children.push(BrowsedChild::Folder(folder_ref(udn, parent_id, container)));
        } else {
            debug!(
                server = udn,
                object_id = container.id.as_str(),
                class = container.class.as_str(),
                "Skipping container"
            );
        }
    }

    for item in &didl.items {
        if item.is_playable_video() {
            children.push(BrowsedChild::Video(video_ref(udn, parent_id, item)));
        } else {
            debug!(
                server = udn,
                object_id = item.id.as_str(),
                class = item.class.as_str(),
                "Skipping item"
            );
        }
    }

    children
}

fn folder_ref(udn: &str, parent_id: &str, container: &Container) -> MediaRef {
    MediaRef::new(
        MediaId::upnp_folder(udn, parent_id, container.id.clone()),
        MediaMeta::titled(container.title.clone()),
    )
}

fn video_ref(udn: &str, parent_id: &str, item: &Item) -> MediaRef {
    let mut meta = MediaMeta::titled(item.title.clone());
    meta.subtitle = item.description.clone();
    meta.artwork = item.artwork().map(str::to_string);
    if let Some(res) = item.primary_resource() {
        meta.media_uri = Some(res.url.trim().to_string());
        meta.mime_type = res.mime_type().map(str::to_string);
        meta.duration_ms = res.duration_ms();
        meta.size = res.size_bytes();
    }
    MediaRef::new(MediaId::upnp_video(udn, parent_id, item.id.clone()), meta)
}
