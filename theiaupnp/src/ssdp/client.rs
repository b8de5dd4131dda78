/*!
The Theia SSDP client is a *control point*.
It must **not** bind to UDP port 1900.

If several sockets share port 1900 the kernel load-balances incoming
datagrams between them, and NOTIFY / HTTP 200 messages get lost at random.
The client binds an ephemeral port, sends M-SEARCH from it and receives the
unicast replies there. It still joins the multicast group so that it also
hears `ssdp:alive` and `ssdp:byebye` announcements.
*/

use super::{MAX_AGE, SSDP_MULTICAST_ADDR, SSDP_PORT};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// SSDP events a control point cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpEvent {
    Alive {
        usn: String,
        nt: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
    ByeBye {
        usn: String,
        nt: String,
        from: SocketAddr,
    },
    SearchResponse {
        usn: String,
        st: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
}

impl SsdpEvent {
    pub fn usn(&self) -> &str {
        match self {
            SsdpEvent::Alive { usn, .. }
            | SsdpEvent::ByeBye { usn, .. }
            | SsdpEvent::SearchResponse { usn, .. } => usn,
        }
    }
}

/// SSDP client sending M-SEARCH and listening for announcements
#[derive(Clone)]
pub struct SsdpClient {
    socket: Arc<UdpSocket>,
}

impl SsdpClient {
    pub fn new() -> std::io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;
        socket.set_multicast_loop_v4(true)?;

        let group: Ipv4Addr = SSDP_MULTICAST_ADDR
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        for iface in get_if_addrs::get_if_addrs()? {
            if let std::net::IpAddr::V4(ipv4) = iface.ip() {
                if ipv4.is_loopback() {
                    continue;
                }
                match socket.join_multicast_v4(&group, &ipv4) {
                    Ok(()) => debug!("SSDP: joined {} on {}", SSDP_MULTICAST_ADDR, ipv4),
                    Err(e) => warn!(
                        "SSDP: failed to join {} on {}: {}",
                        SSDP_MULTICAST_ADDR, ipv4, e
                    ),
                }
            }
        }

        info!("SSDP client ready on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Sends an M-SEARCH for the given search target
    pub fn send_msearch(&self, st: &str, mx: u32) -> std::io::Result<()> {
        let mx = mx.max(1);
        let msg = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}:{}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             USER-AGENT: Theia SSDP Client\r\n\
             \r\n",
            SSDP_MULTICAST_ADDR, SSDP_PORT, mx, st
        );

        let group: Ipv4Addr = SSDP_MULTICAST_ADDR
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let addr = SocketAddr::V4(SocketAddrV4::new(group, SSDP_PORT));

        match self.socket.send_to(msg.as_bytes(), addr) {
            Ok(_) => {
                debug!("M-SEARCH sent (ST={}, MX={})", st, mx);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send M-SEARCH: {}", e);
                Err(e)
            }
        }
    }

    /// Blocking receive loop; returns once `running` turns false
    pub fn run_event_loop<F>(&self, running: &AtomicBool, mut on_event: F)
    where
        F: FnMut(SsdpEvent),
    {
        let mut buf = [0u8; 8192];
        while running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let data = String::from_utf8_lossy(&buf[..n]);
                    if let Some(event) = parse_message(&data, from) {
                        trace!("SSDP event from {}: {:?}", from, event);
                        on_event(event);
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("SSDP client read error: {}", e);
                }
            }
        }
    }
}

pub(crate) fn parse_message(data: &str, from: SocketAddr) -> Option<SsdpEvent> {
    let mut lines = data.lines();
    let first_line = lines.next()?.trim();
    let upper = first_line.to_ascii_uppercase();
    let headers = parse_headers(lines);

    if upper.starts_with("NOTIFY ") {
        handle_notify(&headers, from)
    } else if upper.starts_with("HTTP/") && upper.contains(" 200") {
        handle_search_response(&headers, from)
    } else {
        // M-SEARCH from other control points and anything unknown
        trace!("Ignoring SSDP message from {}: {}", from, first_line);
        None
    }
}

fn handle_notify(headers: &HashMap<String, String>, from: SocketAddr) -> Option<SsdpEvent> {
    let nts = headers.get("NTS")?.to_ascii_lowercase();
    let nt = headers.get("NT")?.to_string();
    let usn = headers.get("USN")?.to_string();

    match nts.as_str() {
        "ssdp:alive" => {
            let Some(location) = headers.get("LOCATION") else {
                trace!("NOTIFY ssdp:alive from {} missing LOCATION header", from);
                return None;
            };
            Some(SsdpEvent::Alive {
                usn,
                nt,
                location: location.to_string(),
                server: headers
                    .get("SERVER")
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                max_age: parse_max_age(headers.get("CACHE-CONTROL")),
                from,
            })
        }
        "ssdp:byebye" => Some(SsdpEvent::ByeBye { usn, nt, from }),
        _ => {
            trace!("Unknown NTS value from {}: {}", from, nts);
            None
        }
    }
}

fn handle_search_response(
    headers: &HashMap<String, String>,
    from: SocketAddr,
) -> Option<SsdpEvent> {
    let st = headers.get("ST")?.to_string();
    let usn = headers.get("USN")?.to_string();
    let Some(location) = headers.get("LOCATION") else {
        trace!("M-SEARCH response from {} missing LOCATION header", from);
        return None;
    };

    Some(SsdpEvent::SearchResponse {
        usn,
        st,
        location: location.to_string(),
        server: headers
            .get("SERVER")
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string()),
        max_age: parse_max_age(headers.get("CACHE-CONTROL")),
        from,
    })
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        // values may contain ':' (URLs), split on the first one only
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_uppercase();
            let value = value.trim().to_string();
            if !name.is_empty() && !value.is_empty() {
                headers.insert(name, value);
            }
        } else {
            trace!("Skipping line without colon: '{}'", line);
        }
    }
    headers
}

fn parse_max_age(value: Option<&String>) -> u32 {
    if let Some(v) = value {
        let lower = v.to_ascii_lowercase();
        if let Some(idx) = lower.find("max-age") {
            let after_key = &lower[idx + 7..];
            let after_eq = after_key.trim_start().trim_start_matches('=').trim_start();
            let digits: String = after_eq
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(age) = digits.parse::<u32>() {
                return age;
            }
        }
        trace!("Could not parse max-age from CACHE-CONTROL: '{}'", v);
    }
    MAX_AGE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from() -> SocketAddr {
        "192.168.1.20:1900".parse().unwrap()
    }

    #[test]
    fn test_parse_search_response() {
        let msg = "HTTP/1.1 200 OK\r\n\
                   CACHE-CONTROL: max-age = 900\r\n\
                   LOCATION: http://192.168.1.20:9000/desc.xml\r\n\
                   SERVER: Linux UPnP/1.0 Serviio/2.0\r\n\
                   ST: urn:schemas-upnp-org:device:MediaServer:1\r\n\
                   USN: uuid:abc::urn:schemas-upnp-org:device:MediaServer:1\r\n\r\n";

        match parse_message(msg, from()).unwrap() {
            SsdpEvent::SearchResponse {
                location, max_age, st, ..
            } => {
                assert_eq!(location, "http://192.168.1.20:9000/desc.xml");
                assert_eq!(max_age, 900);
                assert_eq!(st, "urn:schemas-upnp-org:device:MediaServer:1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_byebye() {
        let msg = "NOTIFY * HTTP/1.1\r\n\
                   HOST: 239.255.255.250:1900\r\n\
                   NT: urn:schemas-upnp-org:device:MediaServer:1\r\n\
                   NTS: ssdp:byebye\r\n\
                   USN: uuid:abc::urn:schemas-upnp-org:device:MediaServer:1\r\n\r\n";
        let event = parse_message(msg, from()).unwrap();
        assert!(matches!(event, SsdpEvent::ByeBye { .. }));
        assert!(event.usn().starts_with("uuid:abc"));
    }

    #[test]
    fn test_alive_without_location_is_ignored() {
        let msg = "NOTIFY * HTTP/1.1\r\nNT: x\r\nNTS: ssdp:alive\r\nUSN: uuid:abc\r\n\r\n";
        assert!(parse_message(msg, from()).is_none());
    }

    #[test]
    fn test_default_max_age() {
        assert_eq!(parse_max_age(None), MAX_AGE);
        assert_eq!(parse_max_age(Some(&"no-cache".to_string())), MAX_AGE);
    }
}
