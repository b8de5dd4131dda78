//! # SSDP - Simple Service Discovery Protocol
//!
//! Control-point side only: the client sends M-SEARCH requests and listens for
//! `ssdp:alive` / `ssdp:byebye` announcements and search responses.
//!
//! - **Multicast Address**: 239.255.255.250:1900
//! - **Default Max-Age**: 1800 seconds

mod client;

pub use client::{SsdpClient, SsdpEvent};

/// SSDP multicast address
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// SSDP port
pub const SSDP_PORT: u16 = 1900;

/// Announcement validity used when a device sends no usable CACHE-CONTROL
pub const MAX_AGE: u32 = 1800;

/// Search target for media servers
pub const ST_MEDIA_SERVER: &str = "urn:schemas-upnp-org:device:MediaServer:1";

/// Search target for ContentDirectory services
pub const ST_CONTENT_DIRECTORY: &str = "urn:schemas-upnp-org:service:ContentDirectory:1";

/// Extracts the `uuid:…` UDN from a USN header
///
/// `uuid:abcd::urn:schemas-upnp-org:device:MediaServer:1` gives `uuid:abcd`.
pub fn udn_from_usn(usn: &str) -> Option<String> {
    let usn = usn.trim();
    if !usn.to_ascii_lowercase().starts_with("uuid:") {
        return None;
    }
    let udn = usn.split("::").next()?.trim();
    if udn.len() <= "uuid:".len() {
        return None;
    }
    Some(udn.to_string())
}
