//! Background loaders re-querying the cache when it changes
//!
//! A loader owns a worker thread fed by a throttled bus subscription. Each
//! sampled change triggers one query whose snapshot goes to a callback.
//! Dropping the loader stops the worker and releases the subscription.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use theiamedia::MediaRef;
use tracing::{debug, warn};

use crate::changes::ChangeSubscription;
use crate::error::Result;
use crate::store::MediaStore;

/// Default sampling window of the "newly added" row
pub const NEWLY_ADDED_WINDOW: Duration = Duration::from_secs(1);

/// Default sampling window of the "recently played" row
pub const RECENTLY_PLAYED_WINDOW: Duration = Duration::from_secs(5);

const STOP_POLL: Duration = Duration::from_millis(100);

pub struct CacheLoader {
    name: String,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CacheLoader {
    /// Runs `query` for every sampled change of `subscription` and hands the
    /// result to `on_snapshot`
    pub fn spawn<Q, C>(
        name: &str,
        subscription: ChangeSubscription,
        window: Duration,
        query: Q,
        on_snapshot: C,
    ) -> io::Result<Self>
    where
        Q: Fn() -> Result<Vec<MediaRef>> + Send + 'static,
        C: Fn(Vec<MediaRef>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let loader_name = name.to_string();

        let worker = thread::Builder::new()
            .name(format!("loader-{}", name))
            .spawn(move || {
                let mut changes = subscription.throttled(window);
                while !stop_flag.load(Ordering::Relaxed) {
                    match changes.next_timeout(STOP_POLL) {
                        Ok(change) => {
                            debug!(loader = %loader_name, ?change, "Reloading");
                            match query() {
                                Ok(snapshot) => on_snapshot(snapshot),
                                Err(err) => {
                                    warn!(loader = %loader_name, error = %err, "Cache query failed")
                                }
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!(loader = %loader_name, "Change bus closed, loader exiting");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            stop,
            worker: Some(worker),
        })
    }

    /// Latest visible videos, re-queried at most once per `window`
    pub fn newly_added<C>(
        store: &MediaStore,
        limit: usize,
        window: Duration,
        on_snapshot: C,
    ) -> io::Result<Self>
    where
        C: Fn(Vec<MediaRef>) + Send + 'static,
    {
        let subscription = store
            .subscribe_with_baseline()
            .filter(|change| change.affects_videos());
        let store = store.clone();
        Self::spawn(
            "newly-added",
            subscription,
            window,
            move || store.get_newly_added(limit),
            on_snapshot,
        )
    }

    /// Videos with a playback position, re-queried at most once per `window`
    pub fn recently_played<C>(
        store: &MediaStore,
        limit: usize,
        window: Duration,
        on_snapshot: C,
    ) -> io::Result<Self>
    where
        C: Fn(Vec<MediaRef>) + Send + 'static,
    {
        let subscription = store
            .subscribe_with_baseline()
            .filter(|change| change.affects_playback());
        let store = store.clone();
        Self::spawn(
            "recently-played",
            subscription,
            window,
            move || store.get_recently_played(limit),
            on_snapshot,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CacheLoader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(loader = %self.name, "Loader worker panicked");
            }
        }
    }
}
