//! Device lifecycle
//!
//! [`UpnpBrowseService`] keeps the cache in step with the network: servers
//! coming online get a device row, an event subscription and a root scan;
//! servers going away are hidden; ContentDirectory events rescan what they
//! name.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use theiacache::MediaStore;
use theiamedia::{MediaId, UPNP_ROOT_ID};
use tracing::{debug, info, warn};

use crate::discovery::DeviceListener;
use crate::engine::Refresher;
use crate::error::{BrowseError, Result};
use crate::events::{GenaSubscriber, MediaServerEvent};
use crate::registry::MediaServerInfo;
use crate::scanner::{Enqueued, Scanner};

/// Routes each container to the refresher of its device family
pub struct MediaRefresher {
    upnp: Arc<dyn Refresher>,
    storage: Option<Arc<dyn Refresher>>,
}

impl MediaRefresher {
    pub fn new(upnp: Arc<dyn Refresher>, storage: Option<Arc<dyn Refresher>>) -> Self {
        Self { upnp, storage }
    }

    fn route(&self, container: &MediaId) -> Result<&dyn Refresher> {
        match container {
            MediaId::UpnpDevice { .. } | MediaId::UpnpFolder { .. } => Ok(self.upnp.as_ref()),
            MediaId::StorageDevice { .. } | MediaId::StorageFolder { .. } => self
                .storage
                .as_deref()
                .ok_or_else(|| BrowseError::NotBrowsable(container.clone())),
            _ => Err(BrowseError::NotBrowsable(container.clone())),
        }
    }
}

impl Refresher for MediaRefresher {
    fn refresh_container(&self, container: &MediaId) -> Result<Vec<MediaId>> {
        self.route(container)?.refresh_container(container)
    }

    fn refresh_on_demand(&self, container: &MediaId) -> Result<()> {
        self.route(container)?.refresh_on_demand(container)
    }
}

/// Container named by a `ContainerUpdateIDs` entry
fn event_container(udn: &str, container_id: &str) -> MediaId {
    if container_id == UPNP_ROOT_ID {
        MediaId::upnp_device(udn)
    } else {
        MediaId::upnp_folder(udn, "", container_id)
    }
}

pub struct UpnpBrowseService {
    store: MediaStore,
    scanner: Arc<Scanner>,
    events: Option<GenaSubscriber>,
}

impl UpnpBrowseService {
    /// `events` is `None` when eventing is unavailable; rescans then only
    /// happen on discovery and on demand
    pub fn new(store: MediaStore, scanner: Arc<Scanner>, events: Option<GenaSubscriber>) -> Self {
        Self {
            store,
            scanner,
            events,
        }
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    fn enqueue_scan(&self, container: MediaId) {
        match self.scanner.enqueue(container.clone(), 0) {
            Enqueued::Queued | Enqueued::Duplicate => {}
            outcome => debug!(%container, ?outcome, "Rescan not queued"),
        }
    }

    pub fn handle_event(&self, event: &MediaServerEvent) {
        match event {
            MediaServerEvent::ContainersUpdated {
                udn,
                container_ids,
                ..
            } => {
                debug!(server = udn.as_str(), containers = ?container_ids, "Containers updated");
                for container_id in container_ids {
                    self.enqueue_scan(event_container(udn, container_id));
                }
            }
            MediaServerEvent::GlobalUpdated {
                udn,
                system_update_id,
            } => {
                debug!(server = udn.as_str(), ?system_update_id, "System update");
                self.enqueue_scan(MediaId::upnp_device(udn.as_str()));
            }
        }
    }

    /// Forwards GENA events to [`Self::handle_event`] until the channel closes
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        events: Receiver<MediaServerEvent>,
    ) -> io::Result<JoinHandle<()>> {
        let service = Arc::clone(self);
        thread::Builder::new()
            .name("gena-events".into())
            .spawn(move || {
                for event in events {
                    service.handle_event(&event);
                }
                debug!("Event pump stopped");
            })
    }

    pub fn shutdown(&self) {
        if let Some(events) = &self.events {
            events.shutdown();
        }
        self.scanner.shutdown();
    }
}

impl DeviceListener for UpnpBrowseService {
    fn device_added(&self, server: &MediaServerInfo) {
        if let Err(err) = self.store.add_upnp_device(&server.udn, &server.meta()) {
            warn!(server = server.udn.as_str(), error = %err, "Failed to store server");
            return;
        }
        if let Some(events) = &self.events {
            events.subscribe(server);
        }
        info!(server = server.friendly_name.as_str(), "Scanning server");
        self.enqueue_scan(server.media_id());
    }

    fn device_removed(&self, udn: &str) {
        match self.store.hide_upnp_device(udn) {
            Ok(_) => info!(server = udn, "Server hidden"),
            Err(err) if err.is_not_found() => debug!(server = udn, "Unknown server removed"),
            Err(err) => warn!(server = udn, error = %err, "Failed to hide server"),
        }
        if let Some(events) = &self.events {
            events.unsubscribe(udn);
        }
    }
}
