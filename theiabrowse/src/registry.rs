use std::collections::HashMap;
use std::time::SystemTime;

use theiamedia::{MediaId, MediaMeta};
use theiaupnp::ssdp::MAX_AGE;

/// ContentDirectory endpoints read from a device description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service_type: String,
    pub control_url: String,
    pub event_sub_url: Option<String>,
}

/// Snapshot of a media server discovered through SSDP
#[derive(Debug, Clone)]
pub struct MediaServerInfo {
    pub udn: String,
    pub friendly_name: String,
    pub model_name: String,
    pub manufacturer: String,
    pub location: String,
    pub server_header: String,
    pub content_directory: Option<ServiceEndpoint>,
    pub online: bool,
    pub last_seen: SystemTime,
    pub max_age: u32,
}

impl MediaServerInfo {
    pub fn new(udn: &str, friendly_name: &str, location: &str) -> Self {
        Self {
            udn: udn.to_string(),
            friendly_name: friendly_name.to_string(),
            model_name: String::new(),
            manufacturer: String::new(),
            location: location.to_string(),
            server_header: String::new(),
            content_directory: None,
            online: true,
            last_seen: SystemTime::now(),
            max_age: MAX_AGE,
        }
    }

    pub fn with_content_directory(mut self, endpoint: ServiceEndpoint) -> Self {
        self.content_directory = Some(endpoint);
        self
    }

    pub fn has_content_directory(&self) -> bool {
        self.content_directory.is_some()
    }

    pub fn media_id(&self) -> MediaId {
        MediaId::upnp_device(self.udn.clone())
    }

    /// Row metadata of the device in the cache
    pub fn meta(&self) -> MediaMeta {
        let mut meta = MediaMeta::titled(self.friendly_name.clone());
        if !self.model_name.is_empty() {
            meta.subtitle = Some(self.model_name.clone());
        }
        meta
    }
}

/// Outcome of [`DeviceRegistry::push_server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// First sighting, or back after going offline
    Added,
    /// Same device at a new description URL
    Moved,
    /// Known device seen again
    Refreshed,
}

/// Media servers indexed by case-insensitive UDN
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    servers: HashMap<String, MediaServerInfo>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_server(&mut self, info: MediaServerInfo) -> PushOutcome {
        let key = info.udn.to_ascii_lowercase();
        match self.servers.get_mut(&key) {
            Some(existing) if existing.online && existing.location == info.location => {
                existing.last_seen = SystemTime::now();
                existing.max_age = info.max_age;
                PushOutcome::Refreshed
            }
            Some(existing) => {
                let outcome = if existing.online {
                    PushOutcome::Moved
                } else {
                    PushOutcome::Added
                };
                *existing = MediaServerInfo {
                    online: true,
                    last_seen: SystemTime::now(),
                    ..info
                };
                outcome
            }
            None => {
                self.servers.insert(key, info);
                PushOutcome::Added
            }
        }
    }

    /// Refreshes `last_seen` of a known online server
    pub fn touch(&mut self, udn: &str, max_age: u32) -> bool {
        match self.servers.get_mut(&udn.to_ascii_lowercase()) {
            Some(server) if server.online => {
                server.last_seen = SystemTime::now();
                server.max_age = max_age;
                true
            }
            _ => false,
        }
    }

    /// Marks a server offline; returns it when it was online
    pub fn mark_offline(&mut self, udn: &str) -> Option<MediaServerInfo> {
        let server = self.servers.get_mut(&udn.to_ascii_lowercase())?;
        if !server.online {
            return None;
        }
        server.online = false;
        Some(server.clone())
    }

    /// Online servers whose announcement expired
    pub fn expire(&mut self, now: SystemTime) -> Vec<MediaServerInfo> {
        let mut expired = Vec::new();
        for server in self.servers.values_mut() {
            let deadline = server.last_seen + std::time::Duration::from_secs(server.max_age.into());
            if server.online && deadline < now {
                server.online = false;
                expired.push(server.clone());
            }
        }
        expired
    }

    pub fn get_server_by_udn(&self, udn: &str) -> Option<MediaServerInfo> {
        self.servers.get(&udn.to_ascii_lowercase()).cloned()
    }

    /// Server owning a browse-tree id
    pub fn get_server(&self, id: &MediaId) -> Option<MediaServerInfo> {
        if !id.is_upnp() {
            return None;
        }
        self.get_server_by_udn(id.device_key()?)
    }

    pub fn list_servers(&self) -> Vec<MediaServerInfo> {
        self.servers.values().filter(|s| s.online).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_udn_lookup_ignores_case() {
        let mut registry = DeviceRegistry::new();
        let outcome = registry.push_server(MediaServerInfo::new(
            "uuid:ABCD-1234",
            "NAS",
            "http://10.0.0.2/desc.xml",
        ));
        assert_eq!(outcome, PushOutcome::Added);

        assert!(registry.get_server_by_udn("uuid:abcd-1234").is_some());
        assert!(
            registry
                .get_server(&MediaId::upnp_folder("UUID:abcd-1234", "0", "64"))
                .is_some()
        );
    }

    #[test]
    fn test_push_outcomes() {
        let mut registry = DeviceRegistry::new();
        let info = MediaServerInfo::new("uuid:dev", "NAS", "http://10.0.0.2/desc.xml");
        registry.push_server(info.clone());
        assert_eq!(registry.push_server(info.clone()), PushOutcome::Refreshed);

        let moved = MediaServerInfo::new("uuid:dev", "NAS", "http://10.0.0.3/desc.xml");
        assert_eq!(registry.push_server(moved.clone()), PushOutcome::Moved);

        assert!(registry.mark_offline("uuid:dev").is_some());
        assert!(registry.mark_offline("uuid:dev").is_none());
        assert!(registry.list_servers().is_empty());
        assert_eq!(registry.push_server(moved), PushOutcome::Added);
    }

    #[test]
    fn test_expire() {
        let mut registry = DeviceRegistry::new();
        let mut info = MediaServerInfo::new("uuid:dev", "NAS", "http://10.0.0.2/desc.xml");
        info.max_age = 10;
        registry.push_server(info);

        assert!(registry.expire(SystemTime::now()).is_empty());
        let later = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(registry.expire(later).len(), 1);
        assert!(registry.get_server_by_udn("uuid:dev").is_some_and(|s| !s.online));
    }
}
