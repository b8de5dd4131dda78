//! Listing of one visible container
//!
//! Opening a folder answers from the cache at once, asks the refresh worker
//! to fetch the container again, and re-reads the cache each time a change
//! touches that container.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use theiacache::{CacheLoader, MediaStore};
use theiamedia::{MediaId, MediaRef};
use tracing::{debug, warn};

use crate::engine::Refresher;
use crate::error::Result;

/// Sampling window of folder listings
pub const FOLDER_WINDOW: Duration = Duration::from_millis(250);

/// Thread running on-demand refreshes, apart from the background scanner
pub struct RefreshWorker {
    tx: Option<Sender<MediaId>>,
    worker: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    pub fn spawn(refresher: Arc<dyn Refresher>) -> io::Result<Self> {
        let (tx, rx) = unbounded::<MediaId>();
        let worker = thread::Builder::new()
            .name("browse-worker".into())
            .spawn(move || {
                for container in rx {
                    if let Err(err) = refresher.refresh_on_demand(&container) {
                        warn!(%container, error = %err, "On-demand refresh failed");
                    }
                }
                debug!("Browse worker stopped");
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn request(&self, container: MediaId) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(container);
        }
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        // closing the channel ends the loop after the queued refreshes
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Browse worker panicked");
            }
        }
    }
}

pub struct FolderLoader {
    container: MediaId,
    _loader: CacheLoader,
}

impl FolderLoader {
    /// Opens `container`; returns the loader and the cached listing
    ///
    /// `on_listing` receives every later snapshot of the listing.
    pub fn open<C>(
        store: &MediaStore,
        worker: &RefreshWorker,
        container: MediaId,
        window: Duration,
        on_listing: C,
    ) -> Result<(Self, Vec<MediaRef>)>
    where
        C: Fn(Vec<MediaRef>) + Send + 'static,
    {
        let watched = container.clone();
        // subscribed before the first read so that no change is missed
        let subscription = store
            .subscribe()
            .filter(move |change| change.affects_children_of(&watched));

        let cached = store.get_children_under(&container)?;

        let query_store = store.clone();
        let query_container = container.clone();
        let loader = CacheLoader::spawn(
            &format!("folder-{}", container),
            subscription,
            window,
            move || query_store.get_children_under(&query_container),
            on_listing,
        )?;

        worker.request(container.clone());

        Ok((
            Self {
                container,
                _loader: loader,
            },
            cached,
        ))
    }

    pub fn container(&self) -> &MediaId {
        &self.container
    }
}
