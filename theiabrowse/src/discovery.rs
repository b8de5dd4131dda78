//! SSDP discovery of media servers
//!
//! Announcements and search responses feed the [`DeviceRegistry`]. New
//! servers are described over HTTP, handed to the resolver's waiters and to
//! the [`DeviceListener`]; byebyes and expired announcements take them
//! offline.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use theiaupnp::ssdp::{SsdpClient, SsdpEvent, ST_CONTENT_DIRECTORY, ST_MEDIA_SERVER, udn_from_usn};
use tracing::{debug, info, warn};

use crate::description::{DescriptionProvider, DiscoveredEndpoint};
use crate::registry::{DeviceRegistry, MediaServerInfo, PushOutcome};
use crate::resolver::{DiscoveryWaiters, SearchTrigger};

/// How long a failed description fetch is not retried
const DESCRIPTION_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Interval between sweeps for expired announcements
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Receives server lifecycle events
pub trait DeviceListener: Send + Sync {
    fn device_added(&self, server: &MediaServerInfo);
    fn device_removed(&self, udn: &str);
}

fn is_interesting_type(t: &str) -> bool {
    t.eq_ignore_ascii_case(ST_MEDIA_SERVER) || t.eq_ignore_ascii_case(ST_CONTENT_DIRECTORY)
}

/// SSDP event handling, independent of the socket
pub struct DiscoveryManager<P: DescriptionProvider> {
    provider: P,
    registry: Arc<RwLock<DeviceRegistry>>,
    waiters: Arc<DiscoveryWaiters>,
    listener: Arc<dyn DeviceListener>,
    failures: HashMap<String, Instant>,
    last_sweep: Instant,
}

impl<P: DescriptionProvider> DiscoveryManager<P> {
    pub fn new(
        provider: P,
        registry: Arc<RwLock<DeviceRegistry>>,
        waiters: Arc<DiscoveryWaiters>,
        listener: Arc<dyn DeviceListener>,
    ) -> Self {
        Self {
            provider,
            registry,
            waiters,
            listener,
            failures: HashMap::new(),
            last_sweep: Instant::now(),
        }
    }

    pub fn handle_ssdp_event(&mut self, event: SsdpEvent) {
        match event {
            SsdpEvent::Alive {
                usn,
                nt,
                location,
                server,
                max_age,
                ..
            } => self.handle_alive(&usn, &nt, location, server, max_age),
            SsdpEvent::SearchResponse {
                usn,
                st,
                location,
                server,
                max_age,
                ..
            } => self.handle_alive(&usn, &st, location, server, max_age),
            SsdpEvent::ByeBye { usn, nt, .. } => {
                if is_interesting_type(&nt) {
                    if let Some(udn) = udn_from_usn(&usn) {
                        self.take_offline(&udn);
                    }
                }
            }
        }

        if self.last_sweep.elapsed() >= EXPIRY_SWEEP_INTERVAL {
            self.sweep_expired(SystemTime::now());
        }
    }

    fn handle_alive(
        &mut self,
        usn: &str,
        device_type: &str,
        location: String,
        server_header: String,
        max_age: u32,
    ) {
        if !is_interesting_type(device_type) {
            return;
        }
        let Some(udn) = udn_from_usn(usn) else {
            return;
        };

        let known = {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            let same_location = registry
                .get_server_by_udn(&udn)
                .is_some_and(|s| s.online && s.location == location);
            same_location && registry.touch(&udn, max_age)
        };
        if known {
            return;
        }

        let key = udn.to_ascii_lowercase();
        if let Some(failed_at) = self.failures.get(&key) {
            if failed_at.elapsed() < DESCRIPTION_RETRY_DELAY {
                return;
            }
        }

        let endpoint = DiscoveredEndpoint {
            udn: udn.clone(),
            location,
            server_header,
            max_age,
        };
        let Some(server) = self.provider.describe(&endpoint) else {
            self.failures.insert(key, Instant::now());
            return;
        };
        self.failures.remove(&key);

        let outcome = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_server(server.clone());
        self.waiters.notify(&server);

        if !server.has_content_directory() {
            debug!(server = udn.as_str(), "MediaServer without ContentDirectory");
            return;
        }
        if outcome != PushOutcome::Refreshed {
            info!(
                server = server.friendly_name.as_str(),
                udn = server.udn.as_str(),
                location = server.location.as_str(),
                "MediaServer online"
            );
            self.listener.device_added(&server);
        }
    }

    fn take_offline(&mut self, udn: &str) {
        let removed = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .mark_offline(udn);
        if let Some(server) = removed {
            info!(server = server.friendly_name.as_str(), udn, "MediaServer offline");
            self.listener.device_removed(&server.udn);
        }
    }

    pub fn sweep_expired(&mut self, now: SystemTime) {
        self.last_sweep = Instant::now();
        let expired = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .expire(now);
        for server in expired {
            info!(server = server.friendly_name.as_str(), "MediaServer announcement expired");
            self.listener.device_removed(&server.udn);
        }
    }
}

/// Background SSDP listener thread
pub struct Discovery {
    client: SsdpClient,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Discovery {
    /// Starts listening on `client` and sends a first M-SEARCH
    pub fn spawn<P: DescriptionProvider + 'static>(
        client: SsdpClient,
        mut manager: DiscoveryManager<P>,
    ) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let loop_client = client.clone();
        let loop_running = Arc::clone(&running);

        let worker = thread::Builder::new()
            .name("ssdp-discovery".into())
            .spawn(move || {
                loop_client.run_event_loop(&loop_running, |event| manager.handle_ssdp_event(event));
                info!("SSDP discovery stopped");
            })?;

        let discovery = Self {
            client,
            running,
            worker: Mutex::new(Some(worker)),
        };
        if let Err(err) = discovery.search() {
            warn!(error = %err, "Initial M-SEARCH failed");
        }
        Ok(discovery)
    }

    pub fn search(&self) -> io::Result<()> {
        self.client.search()
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("SSDP discovery thread panicked");
            }
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceEndpoint;
    use std::net::SocketAddr;

    #[derive(Default)]
    struct Recorder {
        added: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    impl DeviceListener for Recorder {
        fn device_added(&self, server: &MediaServerInfo) {
            self.added.lock().unwrap().push(server.udn.clone());
        }
        fn device_removed(&self, udn: &str) {
            self.removed.lock().unwrap().push(udn.to_string());
        }
    }

    struct StaticProvider {
        with_content_directory: bool,
        calls: Arc<Mutex<usize>>,
    }

    impl DescriptionProvider for StaticProvider {
        fn describe(&self, endpoint: &DiscoveredEndpoint) -> Option<MediaServerInfo> {
            *self.calls.lock().unwrap() += 1;
            let server = MediaServerInfo::new(&endpoint.udn, "NAS", &endpoint.location);
            if !self.with_content_directory {
                return Some(server);
            }
            Some(server.with_content_directory(ServiceEndpoint {
                service_type: "urn:schemas-upnp-org:service:ContentDirectory:1".to_string(),
                control_url: "http://10.0.0.2/ctl".to_string(),
                event_sub_url: None,
            }))
        }
    }

    fn from() -> SocketAddr {
        "10.0.0.2:1900".parse().unwrap()
    }

    fn alive(location: &str) -> SsdpEvent {
        SsdpEvent::Alive {
            usn: format!("uuid:nas::{}", ST_MEDIA_SERVER),
            nt: ST_MEDIA_SERVER.to_string(),
            location: location.to_string(),
            server: "Linux UPnP/1.0".to_string(),
            max_age: 1800,
            from: from(),
        }
    }

    fn manager(
        with_content_directory: bool,
    ) -> (
        DiscoveryManager<StaticProvider>,
        Arc<Recorder>,
        Arc<Mutex<usize>>,
        Arc<DiscoveryWaiters>,
    ) {
        let recorder = Arc::new(Recorder::default());
        let calls = Arc::new(Mutex::new(0));
        let waiters = Arc::new(DiscoveryWaiters::new());
        let manager = DiscoveryManager::new(
            StaticProvider {
                with_content_directory,
                calls: Arc::clone(&calls),
            },
            Arc::new(RwLock::new(DeviceRegistry::new())),
            Arc::clone(&waiters),
            recorder.clone(),
        );
        (manager, recorder, calls, waiters)
    }

    #[test]
    fn test_alive_then_byebye() {
        let (mut manager, recorder, calls, waiters) = manager(true);
        let (_, rx) = waiters.register("uuid:nas");

        manager.handle_ssdp_event(alive("http://10.0.0.2/desc.xml"));
        manager.handle_ssdp_event(alive("http://10.0.0.2/desc.xml"));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(*recorder.added.lock().unwrap(), vec!["uuid:nas"]);
        assert_eq!(rx.try_recv().unwrap().udn, "uuid:nas");

        manager.handle_ssdp_event(SsdpEvent::ByeBye {
            usn: format!("uuid:nas::{}", ST_MEDIA_SERVER),
            nt: ST_MEDIA_SERVER.to_string(),
            from: from(),
        });
        assert_eq!(*recorder.removed.lock().unwrap(), vec!["uuid:nas"]);
    }

    #[test]
    fn test_server_without_content_directory_is_not_announced() {
        let (mut manager, recorder, _, _) = manager(false);
        manager.handle_ssdp_event(alive("http://10.0.0.2/desc.xml"));
        assert!(recorder.added.lock().unwrap().is_empty());
    }

    #[test]
    fn test_other_device_types_are_ignored() {
        let (mut manager, recorder, calls, _) = manager(true);
        manager.handle_ssdp_event(SsdpEvent::Alive {
            usn: "uuid:tv::urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
            nt: "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
            location: "http://10.0.0.3/desc.xml".to_string(),
            server: String::new(),
            max_age: 1800,
            from: from(),
        });
        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(recorder.added.lock().unwrap().is_empty());
    }

    #[test]
    fn test_expired_servers_are_removed() {
        let (mut manager, recorder, _, _) = manager(true);
        manager.handle_ssdp_event(alive("http://10.0.0.2/desc.xml"));
        manager.sweep_expired(SystemTime::now() + Duration::from_secs(3600));
        assert_eq!(*recorder.removed.lock().unwrap(), vec!["uuid:nas"]);
    }
}
