//! GENA eventing for ContentDirectory services
//!
//! A listener thread accepts NOTIFY requests and forwards them to the
//! subscription worker. The worker owns every subscription: it sends
//! SUBSCRIBE, renews leases before they run out, backs off after failures
//! and turns property sets into [`MediaServerEvent`]s.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use tracing::{debug, info, warn};
use ureq::{Agent, Body, http};
use xmltree::{Element, XMLNode};

use crate::registry::MediaServerInfo;

const DEFAULT_LEASE: Duration = Duration::from_secs(300);
const RENEW_MARGIN: Duration = Duration::from_secs(60);
const NOTIFY_READ_TIMEOUT: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_millis(250);
const RETRY_BACKOFF: Duration = Duration::from_secs(15);
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Change announced by a ContentDirectory event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaServerEvent {
    /// Only `SystemUpdateID` moved: something changed somewhere
    GlobalUpdated {
        udn: String,
        system_update_id: Option<u32>,
    },
    /// These containers changed
    ContainersUpdated {
        udn: String,
        container_ids: Vec<String>,
        system_update_id: Option<u32>,
    },
}

impl MediaServerEvent {
    pub fn udn(&self) -> &str {
        match self {
            MediaServerEvent::GlobalUpdated { udn, .. }
            | MediaServerEvent::ContainersUpdated { udn, .. } => udn,
        }
    }
}

enum Command {
    Subscribe {
        udn: String,
        name: String,
        event_url: String,
    },
    Unsubscribe(String),
}

/// Handle on the GENA listener and subscription worker
///
/// Dropping it stops the worker, which cancels its subscriptions.
pub struct GenaSubscriber {
    commands: Sender<Command>,
    running: Arc<AtomicBool>,
    listener_port: u16,
}

impl GenaSubscriber {
    /// Binds the NOTIFY listener and starts both threads
    ///
    /// Events are delivered on the returned receiver.
    pub fn spawn(http_timeout: Duration) -> io::Result<(Self, Receiver<MediaServerEvent>)> {
        let listener = TcpListener::bind("0.0.0.0:0")?;
        let listener_port = listener.local_addr()?.port();
        info!(port = listener_port, "GENA listener bound");

        let (notify_tx, notify_rx) = unbounded();
        thread::Builder::new()
            .name("gena-http".into())
            .spawn(move || serve_notifications(listener, notify_tx))?;

        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let worker = EventWorker {
            agent: gena_agent(http_timeout.max(Duration::from_secs(1))),
            listener_port,
            events: event_tx,
            running: Arc::clone(&running),
            subscriptions: HashMap::new(),
            by_path: HashMap::new(),
            next_path: 0,
        };
        thread::Builder::new()
            .name("gena-worker".into())
            .spawn(move || worker.run(command_rx, notify_rx))?;

        Ok((
            Self {
                commands: command_tx,
                running,
                listener_port,
            },
            event_rx,
        ))
    }

    /// Asks the worker to subscribe to `server`'s ContentDirectory events
    ///
    /// Returns false when the server advertises no eventSubURL.
    pub fn subscribe(&self, server: &MediaServerInfo) -> bool {
        let Some(event_url) = server
            .content_directory
            .as_ref()
            .and_then(|cd| cd.event_sub_url.clone())
        else {
            debug!(server = server.udn.as_str(), "No ContentDirectory eventSubURL");
            return false;
        };

        self.commands
            .send(Command::Subscribe {
                udn: server.udn.to_ascii_lowercase(),
                name: server.friendly_name.clone(),
                event_url,
            })
            .is_ok()
    }

    pub fn unsubscribe(&self, udn: &str) {
        let _ = self
            .commands
            .send(Command::Unsubscribe(udn.to_ascii_lowercase()));
    }

    pub fn listener_port(&self) -> u16 {
        self.listener_port
    }

    /// Stops the worker; it unsubscribes from every server on its way out
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn gena_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .allow_non_standard_methods(true)
        .build()
        .into()
}

/// A NOTIFY as received by the listener
struct Notification {
    path: String,
    sid: Option<String>,
    body: Vec<u8>,
}

impl Notification {
    /// Reads one HTTP request; returns its method with the parsed request
    fn read<R: Read>(stream: R) -> io::Result<(String, Self)> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;

        let mut words = line.split_whitespace();
        let (Some(method), Some(path)) = (words.next(), words.next()) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed request line",
            ));
        };
        let method = method.to_ascii_uppercase();
        let path = path.to_string();

        let mut sid = None;
        let mut length = 0usize;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("sid") {
                sid = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("content-length") {
                length = value.parse().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "bad Content-Length")
                })?;
            }
        }

        let mut body = vec![0; length];
        reader.read_exact(&mut body)?;
        Ok((method, Self { path, sid, body }))
    }

    fn sid_matches(&self, expected: Option<&str>) -> bool {
        matches!(
            (self.sid.as_deref(), expected),
            (Some(got), Some(want)) if got.eq_ignore_ascii_case(want)
        )
    }
}

fn reply(stream: &mut TcpStream, status: u16) {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        _ => "Service Unavailable",
    };
    let _ = write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, reason
    );
}

fn serve_notifications(listener: TcpListener, sink: Sender<Notification>) {
    for connection in listener.incoming() {
        let mut stream = match connection {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "NOTIFY connection failed");
                continue;
            }
        };
        let _ = stream.set_read_timeout(Some(NOTIFY_READ_TIMEOUT));

        let status = match Notification::read(&stream) {
            Ok((method, _)) if method != "NOTIFY" => 405,
            Ok((_, notification)) => {
                if sink.send(notification).is_err() {
                    reply(&mut stream, 503);
                    debug!("GENA worker gone, listener exiting");
                    return;
                }
                200
            }
            Err(err) => {
                debug!(error = %err, "Unreadable NOTIFY");
                400
            }
        };
        reply(&mut stream, status);
    }
}

/// Where a server's eventSubURL points
#[derive(Debug, PartialEq)]
struct EventTarget {
    host: String,
    port: u16,
}

impl EventTarget {
    fn parse(url: &str) -> Result<Self> {
        let uri: http::Uri = url
            .parse()
            .with_context(|| format!("Bad eventSubURL {}", url))?;
        let host = uri
            .host()
            .with_context(|| format!("eventSubURL {} has no host", url))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri
            .port_u16()
            .unwrap_or(if uri.scheme_str() == Some("https") { 443 } else { 80 });
        Ok(Self { host, port })
    }

    fn is_ipv6(&self) -> bool {
        self.host.contains(':')
    }

    fn host_header(&self) -> String {
        if self.is_ipv6() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Our address on the route to the server, for the CALLBACK header
    fn local_ip(&self) -> io::Result<IpAddr> {
        let bind = if self.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.connect((self.host.as_str(), self.port))?;
        Ok(socket.local_addr()?.ip())
    }
}

fn lease_header() -> String {
    format!("Second-{}", DEFAULT_LEASE.as_secs())
}

/// Lease granted in a `TIMEOUT` header; `Second-infinite` gets the default
fn lease_of(raw: Option<&str>) -> Duration {
    raw.map(|value| value.trim().to_ascii_lowercase())
        .and_then(|value| value.strip_prefix("second-").and_then(|s| s.parse().ok()))
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_LEASE)
}

fn header_value(response: &http::Response<Body>, name: &str) -> Option<String> {
    response.headers().get(name)?.to_str().ok().map(str::to_string)
}

fn gena_request(
    agent: &Agent,
    method: &str,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<http::Response<Body>> {
    let mut request = http::Request::builder().method(method).uri(url);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = agent.run(request.body(())?)?;
    if !response.status().is_success() {
        anyhow::bail!("{} answered HTTP {}", method, response.status());
    }
    Ok(response)
}

struct Subscription {
    udn: String,
    name: String,
    event_url: String,
    callback_path: String,
    sid: Option<String>,
    expires_at: Option<Instant>,
    next_attempt: Instant,
}

impl Subscription {
    fn new(udn: String, name: String, event_url: String, callback_path: String) -> Self {
        Self {
            udn,
            name,
            event_url,
            callback_path,
            sid: None,
            expires_at: None,
            next_attempt: Instant::now(),
        }
    }

    fn due(&self, now: Instant) -> bool {
        self.sid.is_none() && now >= self.next_attempt
    }

    fn expiring(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now + RENEW_MARGIN)
    }

    /// Drops the lease and tries again after `delay`
    fn lapse(&mut self, delay: Duration) {
        self.sid = None;
        self.expires_at = None;
        self.next_attempt = Instant::now() + delay;
    }

    fn subscribe(&mut self, agent: &Agent, listener_port: u16) -> Result<()> {
        let target = EventTarget::parse(&self.event_url)?;
        let local_ip = target
            .local_ip()
            .context("No local address towards the server")?;
        let callback = match local_ip {
            IpAddr::V4(ip) => format!("<http://{}:{}{}>", ip, listener_port, self.callback_path),
            IpAddr::V6(ip) => format!("<http://[{}]:{}{}>", ip, listener_port, self.callback_path),
        };

        let host = target.host_header();
        let lease = lease_header();
        let response = gena_request(
            agent,
            "SUBSCRIBE",
            &self.event_url,
            &[
                ("HOST", host.as_str()),
                ("CALLBACK", callback.as_str()),
                ("NT", "upnp:event"),
                ("TIMEOUT", lease.as_str()),
            ],
        )?;
        let sid = header_value(&response, "SID").context("SUBSCRIBE answer without SID")?;
        let lease = lease_of(header_value(&response, "TIMEOUT").as_deref());

        self.sid = Some(sid);
        self.expires_at = Some(Instant::now() + lease);
        info!(
            server = self.name.as_str(),
            lease_secs = lease.as_secs(),
            "Subscribed to ContentDirectory events"
        );
        Ok(())
    }

    fn renew(&mut self, agent: &Agent) -> Result<()> {
        let sid = self.sid.clone().context("No SID to renew")?;
        let target = EventTarget::parse(&self.event_url)?;
        let host = target.host_header();
        let lease = lease_header();
        let response = gena_request(
            agent,
            "SUBSCRIBE",
            &self.event_url,
            &[
                ("HOST", host.as_str()),
                ("SID", sid.as_str()),
                ("TIMEOUT", lease.as_str()),
            ],
        )?;
        let lease = lease_of(header_value(&response, "TIMEOUT").as_deref());
        self.expires_at = Some(Instant::now() + lease);
        debug!(server = self.name.as_str(), "Subscription renewed");
        Ok(())
    }

    fn cancel(&mut self, agent: &Agent) {
        let Some(sid) = self.sid.take() else {
            return;
        };
        let outcome = EventTarget::parse(&self.event_url).and_then(|target| {
            let host = target.host_header();
            gena_request(
                agent,
                "UNSUBSCRIBE",
                &self.event_url,
                &[("HOST", host.as_str()), ("SID", sid.as_str())],
            )
        });
        match outcome {
            Ok(_) => debug!(server = self.name.as_str(), "Unsubscribed"),
            Err(err) => warn!(server = self.name.as_str(), error = %err, "UNSUBSCRIBE failed"),
        }
    }
}

struct EventWorker {
    agent: Agent,
    listener_port: u16,
    events: Sender<MediaServerEvent>,
    running: Arc<AtomicBool>,
    subscriptions: HashMap<String, Subscription>,
    by_path: HashMap<String, String>,
    next_path: u64,
}

impl EventWorker {
    fn run(mut self, commands: Receiver<Command>, notifications: Receiver<Notification>) {
        while self.running.load(Ordering::Relaxed) {
            let connected = select! {
                recv(commands) -> command => match command {
                    Ok(command) => {
                        self.apply(command);
                        true
                    }
                    Err(_) => false,
                },
                recv(notifications) -> notification => match notification {
                    Ok(notification) => {
                        self.dispatch(notification);
                        true
                    }
                    Err(_) => false,
                },
                default(TICK) => true,
            };
            if !connected {
                break;
            }
            self.maintain(Instant::now());
        }

        for (_, mut subscription) in self.subscriptions.drain() {
            subscription.cancel(&self.agent);
        }
        info!("GENA worker stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                udn,
                name,
                event_url,
            } => {
                let unchanged = self
                    .subscriptions
                    .get(&udn)
                    .is_some_and(|sub| sub.event_url == event_url);
                if unchanged {
                    return;
                }
                // new server, or same server at a new address
                self.remove(&udn);
                self.next_path += 1;
                let path = format!("/theia/events/{}", self.next_path);
                self.by_path.insert(path.clone(), udn.clone());
                self.subscriptions
                    .insert(udn.clone(), Subscription::new(udn, name, event_url, path));
            }
            Command::Unsubscribe(udn) => self.remove(&udn),
        }
    }

    fn remove(&mut self, udn: &str) {
        if let Some(mut subscription) = self.subscriptions.remove(udn) {
            self.by_path.remove(&subscription.callback_path);
            subscription.cancel(&self.agent);
        }
    }

    fn maintain(&mut self, now: Instant) {
        for sub in self.subscriptions.values_mut() {
            if sub.due(now) {
                if let Err(err) = sub.subscribe(&self.agent, self.listener_port) {
                    warn!(server = sub.name.as_str(), error = %err, "SUBSCRIBE failed");
                    sub.lapse(RETRY_BACKOFF);
                }
            } else if sub.expiring(now) {
                if let Err(err) = sub.renew(&self.agent) {
                    warn!(server = sub.name.as_str(), error = %err, "Renewal failed");
                    sub.lapse(RESUBSCRIBE_DELAY);
                }
            }
        }
    }

    fn dispatch(&self, notification: Notification) {
        let Some(sub) = self
            .by_path
            .get(&notification.path)
            .and_then(|udn| self.subscriptions.get(udn))
        else {
            debug!(path = notification.path.as_str(), "NOTIFY for no subscription");
            return;
        };

        if !notification.sid_matches(sub.sid.as_deref()) {
            debug!(
                server = sub.name.as_str(),
                received = notification.sid.as_deref().unwrap_or("none"),
                "NOTIFY with a stale SID"
            );
            return;
        }

        if let Some(event) = parse_property_set(&sub.udn, &notification.body) {
            debug!(server = sub.name.as_str(), ?event, "ContentDirectory event");
            let _ = self.events.send(event);
        }
    }
}

fn elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(child) => Some(child),
        _ => None,
    })
}

/// Reads a property set; changed containers win over the system update id
fn parse_property_set(udn: &str, body: &[u8]) -> Option<MediaServerEvent> {
    let root = match Element::parse(body) {
        Ok(root) => root,
        Err(err) => {
            warn!(server = udn, error = %err, "Unreadable property set");
            return None;
        }
    };

    let mut system_update_id = None;
    let mut container_ids = Vec::new();
    for variable in elements(&root).flat_map(|property| elements(property)) {
        let Some(text) = variable.get_text() else {
            continue;
        };
        match variable.name.as_str() {
            "SystemUpdateID" => system_update_id = text.trim().parse::<u32>().ok(),
            "ContainerUpdateIDs" => container_ids = changed_containers(&text),
            _ => {}
        }
    }

    let udn = udn.to_string();
    match (container_ids.is_empty(), system_update_id) {
        (false, _) => Some(MediaServerEvent::ContainersUpdated {
            udn,
            container_ids,
            system_update_id,
        }),
        (true, Some(_)) => Some(MediaServerEvent::GlobalUpdated {
            udn,
            system_update_id,
        }),
        (true, None) => None,
    }
}

/// Container ids of a `ContainerUpdateIDs` value
///
/// The value pairs each id with its update id (`id,n,id,n`). Ids may hold
/// `$` themselves (`64$3`). Only when the fields do not pair up is the
/// vendor `id$n` form tried.
fn changed_containers(raw: &str) -> Vec<String> {
    let fields: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .collect();
    let is_update_id = |field: &str| field.parse::<u32>().is_ok();

    let paired = fields.len() % 2 == 0 && fields.chunks(2).all(|pair| is_update_id(pair[1]));
    let vendor = !paired
        && fields.iter().all(|field| {
            field
                .rsplit_once('$')
                .is_some_and(|(id, n)| !id.is_empty() && is_update_id(n))
        });

    if vendor {
        fields
            .iter()
            .filter_map(|field| field.rsplit_once('$'))
            .map(|(id, _)| id.to_string())
            .collect()
    } else {
        fields.chunks(2).map(|pair| pair[0].to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROPERTY_SET: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property><SystemUpdateID>42</SystemUpdateID></e:property>
  <e:property><ContainerUpdateIDs>64,3,65,9</ContainerUpdateIDs></e:property>
</e:propertyset>"#;

    #[test]
    fn test_containers_event() {
        let event = parse_property_set("uuid:nas", PROPERTY_SET.as_bytes()).unwrap();
        assert_eq!(
            event,
            MediaServerEvent::ContainersUpdated {
                udn: "uuid:nas".to_string(),
                container_ids: vec!["64".to_string(), "65".to_string()],
                system_update_id: Some(42),
            }
        );
    }

    #[test]
    fn test_global_event() {
        let xml = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property><SystemUpdateID>7</SystemUpdateID></e:property>
</e:propertyset>"#;
        let event = parse_property_set("uuid:nas", xml.as_bytes()).unwrap();
        assert!(matches!(
            event,
            MediaServerEvent::GlobalUpdated {
                system_update_id: Some(7),
                ..
            }
        ));
        assert!(parse_property_set("uuid:nas", b"not xml").is_none());
    }

    #[test]
    fn test_container_update_id_formats() {
        assert_eq!(changed_containers("a,1,b,2"), vec!["a", "b"]);
        assert_eq!(changed_containers("a$1,b$2"), vec!["a", "b"]);
        assert_eq!(changed_containers("a,1,b"), vec!["a", "b"]);
        assert!(changed_containers("  ").is_empty());
    }

    #[test]
    fn test_changed_containers_keep_dollar_ids() {
        assert_eq!(changed_containers("64$3,12,64$4,7"), vec!["64$3", "64$4"]);
        assert_eq!(changed_containers("64$3$1,12"), vec!["64$3$1"]);
        assert_eq!(changed_containers("64$3$1,64$4$2"), vec!["64$3", "64$4"]);
    }

    #[test]
    fn test_lease_of() {
        assert_eq!(lease_of(Some("Second-1800")), Duration::from_secs(1800));
        assert_eq!(lease_of(Some("second-infinite")), DEFAULT_LEASE);
        assert_eq!(lease_of(Some("bogus")), DEFAULT_LEASE);
        assert_eq!(lease_of(None), DEFAULT_LEASE);
    }

    #[test]
    fn test_event_target() {
        let target = EventTarget::parse("http://10.0.0.2:8200/evt/ContentDir").unwrap();
        assert_eq!(target.host_header(), "10.0.0.2:8200");

        let target = EventTarget::parse("http://nas.local/evt").unwrap();
        assert_eq!(target.port, 80);

        let target = EventTarget::parse("http://[fe80::1]:9000/evt").unwrap();
        assert_eq!(target.host, "fe80::1");
        assert_eq!(target.host_header(), "[fe80::1]:9000");

        assert!(EventTarget::parse("/evt/relative").is_err());
    }

    #[test]
    fn test_read_notification() {
        let raw = format!(
            "NOTIFY /theia/events/1 HTTP/1.1\r\nSID: uuid:sub-1\r\nContent-Length: {}\r\n\r\n{}",
            PROPERTY_SET.len(),
            PROPERTY_SET
        );
        let (method, notification) = Notification::read(raw.as_bytes()).unwrap();
        assert_eq!(method, "NOTIFY");
        assert_eq!(notification.path, "/theia/events/1");
        assert_eq!(notification.body, PROPERTY_SET.as_bytes());
        assert!(notification.sid_matches(Some("UUID:SUB-1")));
        assert!(!notification.sid_matches(Some("uuid:sub-2")));
        assert!(!notification.sid_matches(None));
    }

    #[test]
    fn test_malformed_request_line() {
        assert!(Notification::read(&b"\r\n\r\n"[..]).is_err());
    }
}
