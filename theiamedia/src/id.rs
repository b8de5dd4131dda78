//! Closed identifier type and its versioned JSON form
//!
//! ```json
//! {"kind": "upnp_video", "v": 1, "fields": {"udn": "...", "parent_id": "...", "item_id": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{PATH_ROOT, UPNP_ROOT_ID};

/// Current version of the JSON encoding
pub const MEDIA_ID_VERSION: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum MediaIdError {
    #[error("invalid media id JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("media id is not a JSON object")]
    NotAnObject,

    #[error("media id has no version")]
    MissingVersion,

    #[error("unsupported media id version {0}")]
    UnsupportedVersion(u64),
}

/// Coarse role of an id in the browse tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Device,
    Container,
    Video,
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum MediaId {
    UpnpDevice {
        udn: String,
    },
    UpnpFolder {
        udn: String,
        parent_id: String,
        folder_id: String,
    },
    UpnpVideo {
        udn: String,
        parent_id: String,
        item_id: String,
    },
    DocumentTree {
        tree_uri: String,
    },
    DocumentDirectory {
        tree_uri: String,
        parent_id: String,
        document_id: String,
    },
    DocumentVideo {
        tree_uri: String,
        parent_id: String,
        document_id: String,
    },
    StorageDevice {
        volume_id: String,
    },
    StorageFolder {
        volume_id: String,
        parent_path: String,
        path: String,
    },
    StorageVideo {
        volume_id: String,
        parent_path: String,
        path: String,
    },
    TvSeries {
        series_id: i64,
    },
    TvEpisode {
        series_id: i64,
        episode_id: i64,
    },
    TvImage {
        series_id: i64,
        image_id: i64,
    },
    Movie {
        movie_id: i64,
    },
    MovieImage {
        movie_id: i64,
        image_id: i64,
    },
}

impl MediaId {
    pub fn upnp_device(udn: impl Into<String>) -> Self {
        MediaId::UpnpDevice { udn: udn.into() }
    }

    pub fn upnp_folder(
        udn: impl Into<String>,
        parent_id: impl Into<String>,
        folder_id: impl Into<String>,
    ) -> Self {
        MediaId::UpnpFolder {
            udn: udn.into(),
            parent_id: parent_id.into(),
            folder_id: folder_id.into(),
        }
    }

    pub fn upnp_video(
        udn: impl Into<String>,
        parent_id: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        MediaId::UpnpVideo {
            udn: udn.into(),
            parent_id: parent_id.into(),
            item_id: item_id.into(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            MediaId::UpnpDevice { .. }
            | MediaId::DocumentTree { .. }
            | MediaId::StorageDevice { .. } => MediaKind::Device,
            MediaId::UpnpFolder { .. }
            | MediaId::DocumentDirectory { .. }
            | MediaId::StorageFolder { .. } => MediaKind::Container,
            MediaId::UpnpVideo { .. }
            | MediaId::DocumentVideo { .. }
            | MediaId::StorageVideo { .. } => MediaKind::Video,
            MediaId::TvSeries { .. }
            | MediaId::TvEpisode { .. }
            | MediaId::TvImage { .. }
            | MediaId::Movie { .. }
            | MediaId::MovieImage { .. } => MediaKind::Metadata,
        }
    }

    pub fn is_device(&self) -> bool {
        self.kind() == MediaKind::Device
    }

    /// Devices are containers too: they list the children of their root
    pub fn is_container(&self) -> bool {
        matches!(self.kind(), MediaKind::Device | MediaKind::Container)
    }

    pub fn is_video(&self) -> bool {
        self.kind() == MediaKind::Video
    }

    pub fn is_upnp(&self) -> bool {
        matches!(
            self,
            MediaId::UpnpDevice { .. } | MediaId::UpnpFolder { .. } | MediaId::UpnpVideo { .. }
        )
    }

    /// UDN, tree URI or volume id this id lives under
    pub fn device_key(&self) -> Option<&str> {
        match self {
            MediaId::UpnpDevice { udn }
            | MediaId::UpnpFolder { udn, .. }
            | MediaId::UpnpVideo { udn, .. } => Some(udn),
            MediaId::DocumentTree { tree_uri }
            | MediaId::DocumentDirectory { tree_uri, .. }
            | MediaId::DocumentVideo { tree_uri, .. } => Some(tree_uri),
            MediaId::StorageDevice { volume_id }
            | MediaId::StorageFolder { volume_id, .. }
            | MediaId::StorageVideo { volume_id, .. } => Some(volume_id),
            _ => None,
        }
    }

    /// Key that children of this container store as their parent
    ///
    /// A device answers with its root, so a device id and the id of its
    /// root folder name the same listing.
    pub fn container_key(&self) -> Option<&str> {
        match self {
            MediaId::UpnpDevice { .. } => Some(UPNP_ROOT_ID),
            MediaId::DocumentTree { .. } | MediaId::StorageDevice { .. } => Some(PATH_ROOT),
            MediaId::UpnpFolder { folder_id, .. } => Some(folder_id),
            MediaId::DocumentDirectory { document_id, .. } => Some(document_id),
            MediaId::StorageFolder { path, .. } => Some(path),
            _ => None,
        }
    }

    /// `(device, parent)` key of the listing this child belongs to
    pub fn parent_key(&self) -> Option<(&str, &str)> {
        match self {
            MediaId::UpnpFolder { udn, parent_id, .. }
            | MediaId::UpnpVideo { udn, parent_id, .. } => Some((udn, parent_id)),
            MediaId::DocumentDirectory {
                tree_uri,
                parent_id,
                ..
            }
            | MediaId::DocumentVideo {
                tree_uri,
                parent_id,
                ..
            } => Some((tree_uri, parent_id)),
            MediaId::StorageFolder {
                volume_id,
                parent_path,
                ..
            }
            | MediaId::StorageVideo {
                volume_id,
                parent_path,
                ..
            } => Some((volume_id, parent_path)),
            _ => None,
        }
    }

    /// Container whose listing holds this child
    ///
    /// UPnP and document ids do not record the grandparent, so the returned
    /// folder leaves its own `parent_id` empty. Compare it with
    /// [`MediaId::same_container`], not `==`.
    pub fn parent_container(&self) -> Option<MediaId> {
        match self {
            MediaId::UpnpFolder { udn, parent_id, .. }
            | MediaId::UpnpVideo { udn, parent_id, .. } => Some(if parent_id == UPNP_ROOT_ID {
                MediaId::upnp_device(udn.clone())
            } else {
                MediaId::upnp_folder(udn.clone(), String::new(), parent_id.clone())
            }),
            MediaId::DocumentDirectory {
                tree_uri,
                parent_id,
                ..
            }
            | MediaId::DocumentVideo {
                tree_uri,
                parent_id,
                ..
            } => Some(if parent_id == PATH_ROOT {
                MediaId::DocumentTree {
                    tree_uri: tree_uri.clone(),
                }
            } else {
                MediaId::DocumentDirectory {
                    tree_uri: tree_uri.clone(),
                    parent_id: String::new(),
                    document_id: parent_id.clone(),
                }
            }),
            MediaId::StorageFolder {
                volume_id,
                parent_path,
                ..
            }
            | MediaId::StorageVideo {
                volume_id,
                parent_path,
                ..
            } => Some(if parent_path == PATH_ROOT {
                MediaId::StorageDevice {
                    volume_id: volume_id.clone(),
                }
            } else {
                MediaId::StorageFolder {
                    volume_id: volume_id.clone(),
                    parent_path: parent_path
                        .rsplit_once('/')
                        .map(|(p, _)| p.to_string())
                        .unwrap_or_default(),
                    path: parent_path.clone(),
                }
            }),
            _ => None,
        }
    }

    /// True when both ids name the same listing
    pub fn same_container(&self, other: &MediaId) -> bool {
        self.is_container()
            && other.is_container()
            && self.device_key() == other.device_key()
            && self.container_key() == other.container_key()
    }

    /// The device id owning this id, for browse-tree ids
    pub fn device(&self) -> Option<MediaId> {
        match self {
            MediaId::UpnpDevice { udn }
            | MediaId::UpnpFolder { udn, .. }
            | MediaId::UpnpVideo { udn, .. } => Some(MediaId::upnp_device(udn.clone())),
            MediaId::DocumentTree { tree_uri }
            | MediaId::DocumentDirectory { tree_uri, .. }
            | MediaId::DocumentVideo { tree_uri, .. } => Some(MediaId::DocumentTree {
                tree_uri: tree_uri.clone(),
            }),
            MediaId::StorageDevice { volume_id }
            | MediaId::StorageFolder { volume_id, .. }
            | MediaId::StorageVideo { volume_id, .. } => Some(MediaId::StorageDevice {
                volume_id: volume_id.clone(),
            }),
            _ => None,
        }
    }

    /// Encodes the id as versioned JSON
    pub fn to_json(&self) -> Result<String, MediaIdError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("v".to_string(), Value::from(MEDIA_ID_VERSION));
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Decodes versioned JSON produced by [`MediaId::to_json`]
    pub fn from_json(input: &str) -> Result<Self, MediaIdError> {
        let value: Value = serde_json::from_str(input)?;
        let Value::Object(mut map) = value else {
            return Err(MediaIdError::NotAnObject);
        };
        check_version(&mut map)?;
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

fn check_version(map: &mut Map<String, Value>) -> Result<(), MediaIdError> {
    let version = map
        .remove("v")
        .ok_or(MediaIdError::MissingVersion)?
        .as_u64()
        .ok_or(MediaIdError::MissingVersion)?;
    if version != MEDIA_ID_VERSION {
        return Err(MediaIdError::UnsupportedVersion(version));
    }
    Ok(())
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaId::UpnpDevice { udn } => write!(f, "upnp:{}", udn),
            MediaId::UpnpFolder {
                udn,
                parent_id,
                folder_id,
            } => write!(f, "upnp:{}/{}/{}", udn, parent_id, folder_id),
            MediaId::UpnpVideo {
                udn,
                parent_id,
                item_id,
            } => write!(f, "upnp:{}/{}/{}", udn, parent_id, item_id),
            MediaId::DocumentTree { tree_uri } => write!(f, "doc:{}", tree_uri),
            MediaId::DocumentDirectory {
                tree_uri,
                document_id,
                ..
            }
            | MediaId::DocumentVideo {
                tree_uri,
                document_id,
                ..
            } => write!(f, "doc:{}#{}", tree_uri, document_id),
            MediaId::StorageDevice { volume_id } => write!(f, "storage:{}", volume_id),
            MediaId::StorageFolder { volume_id, path, .. }
            | MediaId::StorageVideo { volume_id, path, .. } => {
                write!(f, "storage:{}/{}", volume_id, path)
            }
            MediaId::TvSeries { series_id } => write!(f, "tv:{}", series_id),
            MediaId::TvEpisode {
                series_id,
                episode_id,
            } => write!(f, "tv:{}/episode/{}", series_id, episode_id),
            MediaId::TvImage {
                series_id,
                image_id,
            } => write!(f, "tv:{}/image/{}", series_id, image_id),
            MediaId::Movie { movie_id } => write!(f, "movie:{}", movie_id),
            MediaId::MovieImage { movie_id, image_id } => {
                write!(f, "movie:{}/image/{}", movie_id, image_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let id = MediaId::upnp_video("uuid:abc", "64", "64$3");
        let value: Value = serde_json::from_str(&id.to_json().unwrap()).unwrap();

        assert_eq!(value["kind"], "upnp_video");
        assert_eq!(value["v"], 1);
        assert_eq!(value["fields"]["udn"], "uuid:abc");
        assert_eq!(value["fields"]["item_id"], "64$3");
    }

    #[test]
    fn test_decode_every_variant() {
        let ids = vec![
            MediaId::upnp_device("uuid:abc"),
            MediaId::upnp_folder("uuid:abc", "0", "64"),
            MediaId::DocumentTree {
                tree_uri: "content://tree/primary".to_string(),
            },
            MediaId::StorageVideo {
                volume_id: "sdcard".to_string(),
                parent_path: "Movies".to_string(),
                path: "Movies/a.mkv".to_string(),
            },
            MediaId::TvEpisode {
                series_id: 7,
                episode_id: 42,
            },
            MediaId::MovieImage {
                movie_id: 3,
                image_id: 9,
            },
        ];
        for id in ids {
            let decoded = MediaId::from_json(&id.to_json().unwrap()).unwrap();
            assert_eq!(decoded, id);
        }
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let err = MediaId::from_json(r#"{"kind":"vhs_tape","v":1,"fields":{}}"#).unwrap_err();
        assert!(matches!(err, MediaIdError::Json(_)));
    }

    #[test]
    fn test_rejects_missing_field() {
        let err =
            MediaId::from_json(r#"{"kind":"upnp_folder","v":1,"fields":{"udn":"x"}}"#).unwrap_err();
        assert!(matches!(err, MediaIdError::Json(_)));
    }

    #[test]
    fn test_rejects_other_versions() {
        let err = MediaId::from_json(r#"{"kind":"movie","v":2,"fields":{"movie_id":1}}"#)
            .unwrap_err();
        assert!(matches!(err, MediaIdError::UnsupportedVersion(2)));

        let err =
            MediaId::from_json(r#"{"kind":"movie","fields":{"movie_id":1}}"#).unwrap_err();
        assert!(matches!(err, MediaIdError::MissingVersion));
    }

    #[test]
    fn test_device_and_root_name_the_same_listing() {
        let device = MediaId::upnp_device("uuid:abc");
        let root = MediaId::upnp_folder("uuid:abc", "-1", "0");
        let other = MediaId::upnp_folder("uuid:abc", "0", "64");

        assert!(device.same_container(&root));
        assert!(!device.same_container(&other));
        assert!(device.is_device() && device.is_container());
    }

    #[test]
    fn test_parent_key() {
        let video = MediaId::upnp_video("uuid:abc", "64", "64$3");
        assert_eq!(video.parent_key(), Some(("uuid:abc", "64")));
        assert_eq!(video.device(), Some(MediaId::upnp_device("uuid:abc")));
        assert!(MediaId::Movie { movie_id: 1 }.parent_key().is_none());
    }

    #[test]
    fn test_parent_container() {
        let in_root = MediaId::upnp_video("uuid:abc", "0", "7");
        assert_eq!(
            in_root.parent_container(),
            Some(MediaId::upnp_device("uuid:abc"))
        );

        let nested = MediaId::upnp_video("uuid:abc", "64", "64$3");
        let parent = nested.parent_container().unwrap();
        assert!(parent.same_container(&MediaId::upnp_folder("uuid:abc", "0", "64")));

        let file = MediaId::StorageVideo {
            volume_id: "sd".to_string(),
            parent_path: "Movies/Old".to_string(),
            path: "Movies/Old/a.mkv".to_string(),
        };
        assert_eq!(
            file.parent_container(),
            Some(MediaId::StorageFolder {
                volume_id: "sd".to_string(),
                parent_path: "Movies".to_string(),
                path: "Movies/Old".to_string(),
            })
        );
    }
}
