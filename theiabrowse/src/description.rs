use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, warn};
use ureq::Agent;
use xmltree::{Element, XMLNode};

use crate::content_directory::CONTENT_DIRECTORY_URN;
use crate::registry::{MediaServerInfo, ServiceEndpoint};

const MEDIA_SERVER_DEVICE: &str = "urn:schemas-upnp-org:device:mediaserver:";

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("XML parsing error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("Missing required device element: {0}")]
    MissingField(&'static str),
}

/// What SSDP told us about an endpoint
#[derive(Debug, Clone)]
pub struct DiscoveredEndpoint {
    pub udn: String,
    pub location: String,
    pub server_header: String,
    pub max_age: u32,
}

/// Builds server snapshots from discovered endpoints
pub trait DescriptionProvider: Send {
    /// `None` when the endpoint is not a media server or cannot be described
    fn describe(&self, endpoint: &DiscoveredEndpoint) -> Option<MediaServerInfo>;
}

/// Fetches and parses the UPnP description.xml at the endpoint location
pub struct HttpDescriptionProvider {
    timeout: Duration,
}

impl HttpDescriptionProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn fetch(&self, endpoint: &DiscoveredEndpoint) -> Result<MediaServerInfo, DescriptionError> {
        debug!(
            "Fetching description for {} at {}",
            endpoint.udn, endpoint.location
        );

        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .into();

        let mut response = agent.get(&endpoint.location).call()?;
        let body = response.body_mut().read_to_vec()?;
        parse_device_description(&body, endpoint)
    }
}

impl DescriptionProvider for HttpDescriptionProvider {
    fn describe(&self, endpoint: &DiscoveredEndpoint) -> Option<MediaServerInfo> {
        match self.fetch(endpoint) {
            Ok(server) => Some(server),
            Err(DescriptionError::MissingField("MediaServer deviceType")) => None,
            Err(err) => {
                warn!(
                    "Failed to fetch/parse server description for {} at {}: {}",
                    endpoint.udn, endpoint.location, err
                );
                None
            }
        }
    }
}

/// Parses a device description into a server snapshot
///
/// The ContentDirectory service may sit on the root device or on an
/// embedded one; its URLs are resolved against the description location.
pub fn parse_device_description(
    xml: &[u8],
    endpoint: &DiscoveredEndpoint,
) -> Result<MediaServerInfo, DescriptionError> {
    let root = Element::parse(xml)?;
    let device = root
        .get_child("device")
        .ok_or(DescriptionError::MissingField("device"))?;

    let device_type = child_text(device, "deviceType")
        .ok_or(DescriptionError::MissingField("deviceType"))?;
    if !device_type
        .to_ascii_lowercase()
        .contains(MEDIA_SERVER_DEVICE)
    {
        debug!(
            "Ignoring deviceType for {}: {}",
            endpoint.udn, device_type
        );
        return Err(DescriptionError::MissingField("MediaServer deviceType"));
    }

    let friendly_name = child_text(device, "friendlyName")
        .ok_or(DescriptionError::MissingField("friendlyName"))?;

    let base = child_text(&root, "URLBase").unwrap_or_else(|| endpoint.location.clone());

    let udn = child_text(device, "UDN").unwrap_or_else(|| endpoint.udn.clone());

    Ok(MediaServerInfo {
        udn,
        friendly_name,
        model_name: child_text(device, "modelName").unwrap_or_default(),
        manufacturer: child_text(device, "manufacturer").unwrap_or_default(),
        location: endpoint.location.clone(),
        server_header: endpoint.server_header.clone(),
        content_directory: find_content_directory(device, &base),
        online: true,
        last_seen: SystemTime::now(),
        max_age: endpoint.max_age,
    })
}

fn find_content_directory(device: &Element, base: &str) -> Option<ServiceEndpoint> {
    if let Some(services) = device.get_child("serviceList") {
        for service in xml_children(services) {
            let Some(service_type) = child_text(service, "serviceType") else {
                continue;
            };
            if !service_type
                .to_ascii_lowercase()
                .starts_with(&CONTENT_DIRECTORY_URN.to_ascii_lowercase())
            {
                continue;
            }
            let Some(control_url) = child_text(service, "controlURL") else {
                continue;
            };
            return Some(ServiceEndpoint {
                service_type,
                control_url: resolve_url(base, &control_url),
                event_sub_url: child_text(service, "eventSubURL")
                    .map(|url| resolve_url(base, &url)),
            });
        }
    }

    let embedded = device.get_child("deviceList")?;
    xml_children(embedded).find_map(|child| find_content_directory(child, base))
}

fn xml_children(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(elem) => Some(elem),
        _ => None,
    })
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    xml_children(element)
        .find(|child| child.name == name)
        .and_then(|child| child.get_text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Resolve a possibly relative URL against the description URL.
///
/// - If `url` is already absolute (starts with http:// or https://), it is returned as-is.
/// - Otherwise, it is resolved against the scheme://host:port of `base`.
pub fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }

    if let Some((scheme, rest)) = base.split_once("://") {
        let authority = rest.split('/').next().unwrap_or(rest);
        let origin = format!("{}://{}", scheme, authority);
        return if url.starts_with('/') {
            format!("{}{}", origin, url)
        } else {
            format!("{}/{}", origin, url)
        };
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
    <friendlyName>NAS Videos</friendlyName>
    <manufacturer>Justin Maggard</manufacturer>
    <modelName>Windows Media Connect compatible (MiniDLNA)</modelName>
    <UDN>uuid:4d696e69-444c-164e-9d41-001c42b0a3c8</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <controlURL>/ctl/ConnectionMgr</controlURL>
        <eventSubURL>/evt/ConnectionMgr</eventSubURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
        <controlURL>/ctl/ContentDir</controlURL>
        <eventSubURL>/evt/ContentDir</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    fn endpoint() -> DiscoveredEndpoint {
        DiscoveredEndpoint {
            udn: "uuid:4d696e69-444c-164e-9d41-001c42b0a3c8".to_string(),
            location: "http://10.0.0.2:8200/rootDesc.xml".to_string(),
            server_header: "Linux UPnP/1.0 MiniDLNA/1.3.0".to_string(),
            max_age: 900,
        }
    }

    #[test]
    fn test_parse_media_server() {
        let server = parse_device_description(DESCRIPTION.as_bytes(), &endpoint()).unwrap();
        assert_eq!(server.friendly_name, "NAS Videos");
        assert_eq!(server.max_age, 900);

        let cd = server.content_directory.unwrap();
        assert_eq!(cd.control_url, "http://10.0.0.2:8200/ctl/ContentDir");
        assert_eq!(
            cd.event_sub_url.as_deref(),
            Some("http://10.0.0.2:8200/evt/ContentDir")
        );
    }

    #[test]
    fn test_renderer_is_rejected() {
        let xml = DESCRIPTION.replace("device:MediaServer:1", "device:MediaRenderer:1");
        assert!(matches!(
            parse_device_description(xml.as_bytes(), &endpoint()),
            Err(DescriptionError::MissingField(_))
        ));
    }

    #[test]
    fn test_resolve_url() {
        let base = "http://10.0.0.2:8200/rootDesc.xml";
        assert_eq!(resolve_url(base, "/ctl/cd"), "http://10.0.0.2:8200/ctl/cd");
        assert_eq!(resolve_url(base, "ctl/cd"), "http://10.0.0.2:8200/ctl/cd");
        assert_eq!(resolve_url(base, "http://other/cd"), "http://other/cd");
    }
}
