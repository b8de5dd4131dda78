//! Change notification bus
//!
//! Every cache write announces what it touched as a [`DatabaseChange`]. The
//! bus carries no row data: a change only tells subscribers to re-query.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use theiamedia::MediaId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseChange {
    /// Synthetic first event of a subscription that asked for one
    Baseline,
    /// The set of UPnP servers changed
    UpnpDevice,
    /// Children of this container changed
    UpnpFolder(MediaId),
    /// This video row changed
    UpnpVideo(MediaId),
    /// A document tree, directory listing or document video changed
    Document(MediaId),
    StorageDevice,
    StorageFolder(MediaId),
    StorageVideo(MediaId),
    TvSeries(MediaId),
    Movie(MediaId),
    PlaybackPosition(MediaId),
}

impl DatabaseChange {
    /// Change announcing that the listing of `container` was rewritten
    pub fn for_container(container: &MediaId) -> Option<Self> {
        match container {
            MediaId::UpnpDevice { .. } | MediaId::UpnpFolder { .. } => {
                Some(DatabaseChange::UpnpFolder(container.clone()))
            }
            MediaId::DocumentTree { .. } | MediaId::DocumentDirectory { .. } => {
                Some(DatabaseChange::Document(container.clone()))
            }
            MediaId::StorageDevice { .. } | MediaId::StorageFolder { .. } => {
                Some(DatabaseChange::StorageFolder(container.clone()))
            }
            _ => None,
        }
    }

    /// Change announcing that a single child row was written
    pub fn for_child(child: &MediaId) -> Option<Self> {
        match child {
            MediaId::UpnpVideo { .. } => Some(DatabaseChange::UpnpVideo(child.clone())),
            MediaId::StorageVideo { .. } => Some(DatabaseChange::StorageVideo(child.clone())),
            MediaId::DocumentVideo { .. } => Some(DatabaseChange::Document(child.clone())),
            _ if child.is_container() && !child.is_device() => child
                .parent_container()
                .and_then(|parent| Self::for_container(&parent)),
            _ => None,
        }
    }

    /// Change announcing that the device list of `device`'s family changed
    pub fn for_device(device: &MediaId) -> Option<Self> {
        match device {
            MediaId::UpnpDevice { .. } => Some(DatabaseChange::UpnpDevice),
            MediaId::StorageDevice { .. } => Some(DatabaseChange::StorageDevice),
            MediaId::DocumentTree { .. } => Some(DatabaseChange::Document(device.clone())),
            _ => None,
        }
    }

    /// The media id carried by the change, if any
    pub fn media_id(&self) -> Option<&MediaId> {
        match self {
            DatabaseChange::Baseline
            | DatabaseChange::UpnpDevice
            | DatabaseChange::StorageDevice => None,
            DatabaseChange::UpnpFolder(id)
            | DatabaseChange::UpnpVideo(id)
            | DatabaseChange::Document(id)
            | DatabaseChange::StorageFolder(id)
            | DatabaseChange::StorageVideo(id)
            | DatabaseChange::TvSeries(id)
            | DatabaseChange::Movie(id)
            | DatabaseChange::PlaybackPosition(id) => Some(id),
        }
    }

    /// Whether a listing of `container`'s children may be stale after this
    /// change. The baseline affects everything.
    pub fn affects_children_of(&self, container: &MediaId) -> bool {
        match self {
            DatabaseChange::Baseline => true,
            DatabaseChange::UpnpFolder(id)
            | DatabaseChange::StorageFolder(id)
            | DatabaseChange::Document(id)
                if id.is_container() =>
            {
                id.same_container(container)
            }
            DatabaseChange::UpnpVideo(id)
            | DatabaseChange::StorageVideo(id)
            | DatabaseChange::Document(id)
            | DatabaseChange::PlaybackPosition(id) => id
                .parent_container()
                .is_some_and(|parent| parent.same_container(container)),
            _ => false,
        }
    }

    /// Whether the set of cached videos or their rows may have changed
    pub fn affects_videos(&self) -> bool {
        matches!(
            self,
            DatabaseChange::Baseline
                | DatabaseChange::UpnpFolder(_)
                | DatabaseChange::UpnpVideo(_)
                | DatabaseChange::Document(_)
                | DatabaseChange::StorageFolder(_)
                | DatabaseChange::StorageVideo(_)
        )
    }

    pub fn affects_playback(&self) -> bool {
        matches!(
            self,
            DatabaseChange::Baseline | DatabaseChange::PlaybackPosition(_)
        ) || self.affects_videos()
    }
}

/// Multicast point for cache changes
///
/// Keeps only the latest change; there is no replay. Subscribers that need
/// an initial load ask for a [`DatabaseChange::Baseline`].
#[derive(Clone, Default)]
pub struct ChangeBus {
    subscribers: Arc<Mutex<Vec<Sender<DatabaseChange>>>>,
    latest: Arc<Mutex<Option<DatabaseChange>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, change: DatabaseChange) {
        {
            let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
            *latest = Some(change.clone());
        }
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn latest(&self) -> Option<DatabaseChange> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        let (tx, rx) = unbounded::<DatabaseChange>();
        {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.push(tx);
        }
        ChangeSubscription { rx, filter: None }
    }

    /// Subscription whose first event is [`DatabaseChange::Baseline`]
    pub fn subscribe_with_baseline(&self) -> ChangeSubscription {
        let (tx, rx) = unbounded::<DatabaseChange>();
        let _ = tx.send(DatabaseChange::Baseline);
        {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.push(tx);
        }
        ChangeSubscription { rx, filter: None }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

type ChangeFilter = Box<dyn Fn(&DatabaseChange) -> bool + Send>;

/// Receiving end of a bus subscription; dropping it unsubscribes on the
/// next post
pub struct ChangeSubscription {
    rx: Receiver<DatabaseChange>,
    filter: Option<ChangeFilter>,
}

impl ChangeSubscription {
    /// Keeps only the changes matching `pred`, on top of any previous filter
    pub fn filter<F>(self, pred: F) -> Self
    where
        F: Fn(&DatabaseChange) -> bool + Send + 'static,
    {
        let filter: ChangeFilter = match self.filter {
            Some(previous) => Box::new(move |c| previous(c) && pred(c)),
            None => Box::new(pred),
        };
        Self {
            rx: self.rx,
            filter: Some(filter),
        }
    }

    fn accepts(&self, change: &DatabaseChange) -> bool {
        self.filter.as_ref().is_none_or(|f| f(change))
    }

    /// Blocks until a matching change arrives; `None` once the bus is gone
    pub fn recv(&self) -> Option<DatabaseChange> {
        loop {
            let change = self.rx.recv().ok()?;
            if self.accepts(&change) {
                return Some(change);
            }
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<DatabaseChange, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        loop {
            let change = self.rx.recv_deadline(deadline)?;
            if self.accepts(&change) {
                return Ok(change);
            }
        }
    }

    pub fn try_recv(&self) -> Result<DatabaseChange, TryRecvError> {
        loop {
            let change = self.rx.try_recv()?;
            if self.accepts(&change) {
                return Ok(change);
            }
        }
    }

    /// Samples the subscription at most once per `window`
    pub fn throttled(self, window: Duration) -> Throttled {
        Throttled { sub: self, window }
    }
}

/// Subscription sampled over a time window
///
/// After the first matching change it keeps draining for the window and
/// yields the last change seen, so a burst of writes costs one re-query.
/// A baseline is yielded at once.
pub struct Throttled {
    sub: ChangeSubscription,
    window: Duration,
}

impl Throttled {
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits up to `timeout` for a first change, then samples for the window
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<DatabaseChange, RecvTimeoutError> {
        let first = self.sub.recv_timeout(timeout)?;
        if first == DatabaseChange::Baseline {
            return Ok(first);
        }

        let deadline = Instant::now() + self.window;
        let mut last = first;
        loop {
            match self.sub.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(change) => last = change,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str) -> MediaId {
        MediaId::upnp_folder("uuid:dev", "0", id)
    }

    #[test]
    fn test_post_reaches_every_subscriber() {
        let bus = ChangeBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.post(DatabaseChange::UpnpDevice);

        assert_eq!(a.try_recv().unwrap(), DatabaseChange::UpnpDevice);
        assert_eq!(b.try_recv().unwrap(), DatabaseChange::UpnpDevice);
        assert_eq!(bus.latest(), Some(DatabaseChange::UpnpDevice));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.post(DatabaseChange::UpnpDevice);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_folder_filter() {
        let bus = ChangeBus::new();
        let x = folder("X");
        let y = folder("Y");

        let watch_x = bus.subscribe().filter({
            let x = x.clone();
            move |c| c.affects_children_of(&x)
        });
        let watch_y = bus.subscribe().filter({
            let y = y.clone();
            move |c| c.affects_children_of(&y)
        });

        bus.post(DatabaseChange::UpnpFolder(x.clone()));

        assert_eq!(
            watch_x.try_recv().unwrap(),
            DatabaseChange::UpnpFolder(x)
        );
        assert!(watch_y.try_recv().is_err());
    }

    #[test]
    fn test_video_change_affects_its_parent() {
        let video = MediaId::upnp_video("uuid:dev", "X", "X$1");
        let change = DatabaseChange::UpnpVideo(video);
        assert!(change.affects_children_of(&folder("X")));
        assert!(!change.affects_children_of(&folder("Y")));
        assert!(!DatabaseChange::UpnpDevice.affects_children_of(&folder("X")));
    }

    #[test]
    fn test_baseline_comes_first() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe_with_baseline();
        bus.post(DatabaseChange::StorageDevice);

        assert_eq!(sub.try_recv().unwrap(), DatabaseChange::Baseline);
        assert_eq!(sub.try_recv().unwrap(), DatabaseChange::StorageDevice);
    }

    #[test]
    fn test_throttled_collapses_bursts() {
        let bus = ChangeBus::new();
        let mut throttled = bus.subscribe().throttled(Duration::from_millis(50));

        for i in 0..10 {
            bus.post(DatabaseChange::UpnpFolder(folder(&i.to_string())));
        }

        let sampled = throttled.next_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(sampled, DatabaseChange::UpnpFolder(folder("9")));
        assert_eq!(
            throttled.next_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn test_throttled_yields_baseline_immediately() {
        let bus = ChangeBus::new();
        let mut throttled = bus
            .subscribe_with_baseline()
            .throttled(Duration::from_secs(60));
        let started = Instant::now();
        assert_eq!(
            throttled.next_timeout(Duration::from_secs(1)).unwrap(),
            DatabaseChange::Baseline
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
