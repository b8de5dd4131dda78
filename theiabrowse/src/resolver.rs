//! From a device UDN to a ContentDirectory handle
//!
//! Known devices resolve straight from the registry. Unknown ones register a
//! one-shot waiter, fire an M-SEARCH and wait for discovery to report the
//! device, or give up after the discovery timeout.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use theiaupnp::ssdp::{SsdpClient, ST_CONTENT_DIRECTORY, ST_MEDIA_SERVER};
use tracing::{debug, warn};

use crate::content_directory::{ContentDirectory, UpnpContentDirectory};
use crate::error::{BrowseError, Result};
use crate::registry::{DeviceRegistry, MediaServerInfo};

/// Something able to send a discovery request on the network
pub trait SearchTrigger: Send + Sync {
    fn search(&self) -> io::Result<()>;
}

impl SearchTrigger for SsdpClient {
    fn search(&self) -> io::Result<()> {
        self.send_msearch(ST_MEDIA_SERVER, 2)?;
        self.send_msearch(ST_CONTENT_DIRECTORY, 2)
    }
}

/// Source of ContentDirectory handles for the browse engine
pub trait DirectoryResolver: Send + Sync {
    fn content_directory(&self, udn: &str) -> Result<Arc<dyn ContentDirectory>>;
}

struct Waiter {
    id: u64,
    udn: String,
    tx: Sender<MediaServerInfo>,
}

/// Listeners waiting for one particular device to show up
#[derive(Default)]
pub struct DiscoveryWaiters {
    waiters: Mutex<Vec<Waiter>>,
    next_id: AtomicU64,
}

impl DiscoveryWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `udn`; the receiver gets at most one server
    pub fn register(&self, udn: &str) -> (u64, Receiver<MediaServerInfo>) {
        let (tx, rx) = bounded(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Waiter {
                id,
                udn: udn.to_ascii_lowercase(),
                tx,
            });
        (id, rx)
    }

    pub fn cancel(&self, id: u64) {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|w| w.id != id);
    }

    /// Hands `server` to every waiter of its UDN and drops those waiters
    pub fn notify(&self, server: &MediaServerInfo) -> usize {
        let udn = server.udn.to_ascii_lowercase();
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        let mut served = 0;
        waiters.retain(|w| {
            if w.udn != udn {
                return true;
            }
            if w.tx.try_send(server.clone()).is_ok() {
                served += 1;
            }
            false
        });
        served
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ServiceResolver {
    registry: Arc<RwLock<DeviceRegistry>>,
    waiters: Arc<DiscoveryWaiters>,
    trigger: Arc<dyn SearchTrigger>,
    discovery_timeout: Duration,
    http_timeout: Duration,
}

impl ServiceResolver {
    pub fn new(
        registry: Arc<RwLock<DeviceRegistry>>,
        waiters: Arc<DiscoveryWaiters>,
        trigger: Arc<dyn SearchTrigger>,
        discovery_timeout: Duration,
        http_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            waiters,
            trigger,
            discovery_timeout,
            http_timeout,
        }
    }

    fn known_server(&self, udn: &str) -> Option<MediaServerInfo> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get_server_by_udn(udn)
            .filter(|server| server.online)
    }

    /// Looks the device up in the registry, else waits for discovery
    pub fn resolve(&self, udn: &str) -> Result<MediaServerInfo> {
        if let Some(server) = self.known_server(udn) {
            return Ok(server);
        }

        let (waiter_id, rx) = self.waiters.register(udn);

        // discovery may have completed between the lookup and the registration
        if let Some(server) = self.known_server(udn) {
            self.waiters.cancel(waiter_id);
            return Ok(server);
        }

        debug!(server = udn, "Device unknown, searching");
        if let Err(err) = self.trigger.search() {
            warn!(server = udn, error = %err, "M-SEARCH failed");
        }

        let outcome = rx.recv_timeout(self.discovery_timeout);
        self.waiters.cancel(waiter_id);
        outcome.map_err(|_| BrowseError::DeviceNotFound(udn.to_string()))
    }

    pub fn upnp_content_directory(&self, udn: &str) -> Result<UpnpContentDirectory> {
        let server = self.resolve(udn)?;
        let endpoint = server
            .content_directory
            .as_ref()
            .ok_or_else(|| BrowseError::NoContentDirectory(udn.to_string()))?;
        Ok(UpnpContentDirectory::new(
            &server.udn,
            &endpoint.control_url,
            &endpoint.service_type,
            self.http_timeout,
        ))
    }
}

impl DirectoryResolver for ServiceResolver {
    fn content_directory(&self, udn: &str) -> Result<Arc<dyn ContentDirectory>> {
        Ok(Arc::new(self.upnp_content_directory(udn)?))
    }
}
