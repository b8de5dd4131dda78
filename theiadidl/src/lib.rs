//! # theiadidl - DIDL-Lite parser
//!
//! Model and parser for the DIDL-Lite listings returned by ContentDirectory
//! `Browse`, restricted to what a video library needs: folders, video items
//! and their resources. The vendor `X_GetFeatureList` document is parsed
//! here too, since it points at the video root of some servers.

use serde::{Deserialize, Serialize};

mod features;

pub use features::{BASIC_VIEW_FEATURE, Feature, FeatureContainer, FeatureList};

/// Class prefix of the containers the browser descends into
pub const STORAGE_FOLDER_CLASS: &str = "object.container.storageFolder";

/// Class prefix of the items the browser keeps
pub const VIDEO_ITEM_CLASS: &str = "object.item.videoItem";

#[derive(Debug, thiserror::Error)]
pub enum DidlError {
    #[error("invalid DIDL-Lite document: {0}")]
    Parse(#[from] quick_xml::DeError),
}

pub type Result<T> = std::result::Result<T, DidlError>;

/// Root of a DIDL-Lite document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "DIDL-Lite")]
pub struct DIDLLite {
    #[serde(rename = "@xmlns", skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,

    #[serde(rename = "container", default)]
    pub containers: Vec<Container>,

    #[serde(rename = "item", default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@parentID")]
    pub parent_id: String,

    #[serde(rename = "@restricted", skip_serializing_if = "Option::is_none")]
    pub restricted: Option<String>,

    #[serde(rename = "@childCount", skip_serializing_if = "Option::is_none")]
    pub child_count: Option<String>,

    #[serde(rename = "dc:title", alias = "title", default)]
    pub title: String,

    #[serde(rename = "upnp:class", alias = "class", default)]
    pub class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@parentID")]
    pub parent_id: String,

    #[serde(rename = "@restricted", skip_serializing_if = "Option::is_none")]
    pub restricted: Option<String>,

    #[serde(rename = "dc:title", alias = "title", default)]
    pub title: String,

    #[serde(rename = "upnp:class", alias = "class", default)]
    pub class: String,

    #[serde(
        rename = "dc:date",
        alias = "date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<String>,

    #[serde(
        rename = "dc:description",
        alias = "description",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    #[serde(rename = "upnp:albumArtURI", alias = "albumArtURI", default)]
    pub album_art: Vec<String>,

    #[serde(rename = "res", default)]
    pub resources: Vec<Resource>,
}

/// Media resource of an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "@protocolInfo", default)]
    pub protocol_info: String,

    #[serde(rename = "@size", skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(rename = "@resolution", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    #[serde(rename = "$text", default)]
    pub url: String,
}

impl DIDLLite {
    /// Parses a DIDL-Lite document, as found in the `Result` argument of a
    /// Browse response (already XML-unescaped)
    pub fn parse(input: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(input)?)
    }

    /// Containers the browser descends into
    pub fn storage_folders(&self) -> impl Iterator<Item = &Container> {
        self.containers.iter().filter(|c| c.is_storage_folder())
    }

    /// Video items that can be streamed over HTTP
    pub fn playable_videos(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|i| i.is_playable_video())
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.items.is_empty()
    }
}

impl Container {
    pub fn is_storage_folder(&self) -> bool {
        self.class.starts_with(STORAGE_FOLDER_CLASS)
    }
}

impl Item {
    pub fn is_video(&self) -> bool {
        self.class.starts_with(VIDEO_ITEM_CLASS)
    }

    /// A video whose first resource is served with `http-get`
    ///
    /// Only the first resource counts: servers list the native stream first
    /// and transcoded or RTSP variants after it.
    pub fn is_playable_video(&self) -> bool {
        self.is_video()
            && self
                .primary_resource()
                .is_some_and(|r| r.transport().eq_ignore_ascii_case("http-get"))
    }

    pub fn primary_resource(&self) -> Option<&Resource> {
        self.resources.first()
    }

    pub fn artwork(&self) -> Option<&str> {
        self.album_art.first().map(String::as_str)
    }
}

impl Resource {
    /// First field of `protocolInfo` (`http-get`, `rtsp-rtp-udp`, ...)
    pub fn transport(&self) -> &str {
        self.protocol_info.split(':').next().unwrap_or("").trim()
    }

    /// Third field of `protocolInfo`, when it names a concrete MIME type
    pub fn mime_type(&self) -> Option<&str> {
        self.protocol_info
            .split(':')
            .nth(2)
            .map(str::trim)
            .filter(|m| !m.is_empty() && *m != "*")
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.trim().parse().ok())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration.as_deref().and_then(parse_duration_ms)
    }
}

/// Parses a DIDL `H+:MM:SS[.F+]` or `H+:MM:SS[.F0/F1]` duration into
/// milliseconds
pub fn parse_duration_ms(value: &str) -> Option<u64> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.trim().parse().ok()?;
    let rest = parts.next()?.trim();

    let (secs, frac) = match rest.split_once('.') {
        Some((s, f)) => (s, Some(f)),
        None => (rest, None),
    };
    let seconds: u64 = secs.parse().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    let millis = match frac {
        None | Some("") => 0,
        Some(f) => match f.split_once('/') {
            Some((num, den)) => {
                let num: u64 = num.parse().ok()?;
                let den: u64 = den.parse().ok()?;
                if den == 0 || num >= den {
                    return None;
                }
                num * 1000 / den
            }
            None => {
                let digits: String = f.chars().take(3).collect();
                let scale = 10u64.pow(3 - digits.len() as u32);
                digits.parse::<u64>().ok()? * scale
            }
        },
    };

    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}
