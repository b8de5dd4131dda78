//! Recursive background scanner
//!
//! A single worker thread drains a bounded queue of containers. Each job
//! refreshes one container; the folders it reveals are queued one level
//! deeper. Ids already queued or being scanned are not queued twice.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use theiaconfig::Config;
use theiamedia::MediaId;
use tracing::{debug, info, warn};

use crate::engine::Refresher;

pub const DEFAULT_MAX_DEPTH: usize = 16;
pub const DEFAULT_MAX_QUEUED: usize = 4096;

const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct ScannerOptions {
    pub max_depth: usize,
    pub max_queued: usize,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_queued: DEFAULT_MAX_QUEUED,
        }
    }
}

impl ScannerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_depth: config.get_scanner_max_depth(),
            max_queued: config.get_scanner_max_queued().max(1),
        }
    }
}

/// Outcome of [`Scanner::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    Duplicate,
    TooDeep,
    QueueFull,
    Stopped,
}

#[derive(Debug)]
struct ScanJob {
    container: MediaId,
    depth: usize,
}

/// Same listing, whatever parent the id happens to carry
type ScanKey = (String, String);

fn scan_key(container: &MediaId) -> Option<ScanKey> {
    Some((
        container.device_key()?.to_string(),
        container.container_key()?.to_string(),
    ))
}

struct ScanQueue {
    tx: Sender<ScanJob>,
    pending: Mutex<HashSet<ScanKey>>,
    max_depth: usize,
    stopped: AtomicBool,
}

impl ScanQueue {
    fn enqueue(&self, container: MediaId, depth: usize) -> Enqueued {
        if self.stopped.load(Ordering::Relaxed) {
            return Enqueued::Stopped;
        }
        if depth > self.max_depth {
            debug!(%container, depth, "Scan depth cap reached, not descending");
            return Enqueued::TooDeep;
        }
        let Some(key) = scan_key(&container) else {
            warn!(%container, "Not a container, not scanning");
            return Enqueued::Stopped;
        };

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains(&key) {
            debug!(%container, "Already queued");
            return Enqueued::Duplicate;
        }

        match self.tx.try_send(ScanJob { container, depth }) {
            Ok(()) => {
                pending.insert(key);
                Enqueued::Queued
            }
            Err(TrySendError::Full(job)) => {
                warn!(container = %job.container, "Scan queue full, dropping job");
                Enqueued::QueueFull
            }
            Err(TrySendError::Disconnected(_)) => Enqueued::Stopped,
        }
    }

    fn finish(&self, container: &MediaId) {
        if let Some(key) = scan_key(container) {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
        }
    }

    fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct Scanner {
    queue: Arc<ScanQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn spawn(
        name: &str,
        refresher: Arc<dyn Refresher>,
        options: ScannerOptions,
    ) -> io::Result<Self> {
        let (tx, rx) = bounded(options.max_queued.max(1));
        let queue = Arc::new(ScanQueue {
            tx,
            pending: Mutex::new(HashSet::new()),
            max_depth: options.max_depth,
            stopped: AtomicBool::new(false),
        });

        let worker_queue = Arc::clone(&queue);
        let worker = thread::Builder::new()
            .name(format!("scanner-{}", name))
            .spawn(move || run_worker(worker_queue, rx, refresher))?;

        Ok(Self {
            queue,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues a scan of `container`, `depth` levels below the scan root
    pub fn enqueue(&self, container: MediaId, depth: usize) -> Enqueued {
        self.queue.enqueue(container, depth)
    }

    /// Containers queued or being scanned
    pub fn pending(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Waits until nothing is queued or in flight; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Stops the worker once its current job is done; queued jobs are dropped
    pub fn shutdown(&self) {
        self.queue.stopped.store(true, Ordering::Relaxed);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Scanner worker panicked");
            }
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(queue: Arc<ScanQueue>, rx: Receiver<ScanJob>, refresher: Arc<dyn Refresher>) {
    while !queue.stopped.load(Ordering::Relaxed) {
        let job = match rx.recv_timeout(STOP_POLL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match refresher.refresh_container(&job.container) {
            Ok(folders) => {
                for folder in folders {
                    queue.enqueue(folder, job.depth + 1);
                }
            }
            Err(err) if err.is_no_results() => {
                debug!(container = %job.container, "Server returned no results, cache untouched");
            }
            Err(err) => {
                warn!(
                    container = %job.container,
                    error = %err,
                    "Scan failed, abandoning subtree"
                );
            }
        }
        queue.finish(&job.container);
    }

    info!("Scanner worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BrowseError, Result};

    /// Refresher exposing a fixed tree of folders
    struct Tree {
        calls: Mutex<Vec<MediaId>>,
        gate: Mutex<()>,
    }

    impl Refresher for Tree {
        fn refresh_container(&self, container: &MediaId) -> Result<Vec<MediaId>> {
            let _gate = self.gate.lock().unwrap();
            self.calls.lock().unwrap().push(container.clone());
            match container.container_key() {
                Some("0") => Ok(vec![
                    MediaId::upnp_folder("uuid:t", "0", "a"),
                    MediaId::upnp_folder("uuid:t", "0", "b"),
                ]),
                Some("a") => Ok(vec![MediaId::upnp_folder("uuid:t", "a", "a1")]),
                Some("a1") => Ok(vec![MediaId::upnp_folder("uuid:t", "a1", "a2")]),
                Some("b") => Err(BrowseError::NoResults("b".to_string())),
                _ => Ok(Vec::new()),
            }
        }
    }

    fn tree() -> Arc<Tree> {
        Arc::new(Tree {
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(()),
        })
    }

    #[test]
    fn test_default_options_match_embedded_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = theiaconfig::Config::load_config(dir.path().to_str().unwrap()).unwrap();
        let configured = ScannerOptions::from_config(&config);
        let defaults = ScannerOptions::default();
        assert_eq!(defaults.max_depth, configured.max_depth);
        assert_eq!(defaults.max_queued, configured.max_queued);
    }

    #[test]
    fn test_scan_walks_tree_within_depth() {
        let refresher = tree();
        let scanner = Scanner::spawn(
            "test",
            refresher.clone(),
            ScannerOptions {
                max_depth: 2,
                max_queued: 16,
            },
        )
        .unwrap();

        assert_eq!(
            scanner.enqueue(MediaId::upnp_device("uuid:t"), 0),
            Enqueued::Queued
        );
        assert!(scanner.wait_idle(Duration::from_secs(5)));

        let keys: Vec<String> = refresher
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|id| id.container_key().map(str::to_string))
            .collect();
        // a2 sits at depth 3
        assert_eq!(keys, vec!["0", "a", "b", "a1"]);
    }

    #[test]
    fn test_enqueue_deduplicates_and_caps() {
        let refresher = tree();
        let gate = refresher.gate.lock().unwrap();
        let scanner = Scanner::spawn(
            "dedup",
            refresher.clone(),
            ScannerOptions {
                max_depth: 1,
                max_queued: 1,
            },
        )
        .unwrap();

        let root = MediaId::upnp_device("uuid:t");
        assert_eq!(scanner.enqueue(root.clone(), 0), Enqueued::Queued);
        // the root listing, under another id
        assert_eq!(
            scanner.enqueue(MediaId::upnp_folder("uuid:t", "", "0"), 0),
            Enqueued::Duplicate
        );
        assert_eq!(
            scanner.enqueue(MediaId::upnp_folder("uuid:t", "0", "deep"), 2),
            Enqueued::TooDeep
        );

        drop(gate);
        assert!(scanner.wait_idle(Duration::from_secs(5)));
        scanner.shutdown();
        assert_eq!(scanner.enqueue(root, 0), Enqueued::Stopped);
    }
}
