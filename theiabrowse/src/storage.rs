//! Local storage volumes
//!
//! A configured directory becomes a storage device. Each directory listing
//! is reconciled like a ContentDirectory listing: sub-directories become
//! folders, files with a video extension become videos.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use theiacache::MediaStore;
use theiamedia::{MediaId, MediaMeta, MediaRef, PATH_ROOT};
use tracing::{debug, info, warn};

use crate::engine::Refresher;
use crate::error::{BrowseError, Result};

/// Video file extensions and the MIME type served for them
pub const VIDEO_EXTENSIONS: &[(&str, &str)] = &[
    ("mkv", "video/x-matroska"),
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("wmv", "video/x-ms-wmv"),
    ("mpg", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("ts", "video/mp2t"),
    ("m2ts", "video/mp2t"),
    ("webm", "video/webm"),
    ("flv", "video/x-flv"),
    ("3gp", "video/3gpp"),
    ("ogv", "video/ogg"),
];

/// MIME type of a video file, from its extension
pub fn guess_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    VIDEO_EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mime)| *mime)
}

pub struct StorageScanner {
    store: MediaStore,
    volumes: HashMap<String, PathBuf>,
}

impl StorageScanner {
    /// Volumes are identified by their root path
    pub fn new(store: MediaStore, roots: &[String]) -> Self {
        let volumes = roots
            .iter()
            .map(|root| (root.clone(), PathBuf::from(root)))
            .collect();
        Self { store, volumes }
    }

    /// Upserts one device row per readable volume and returns their ids
    pub fn register_volumes(&self) -> Result<Vec<MediaId>> {
        let mut devices = Vec::new();
        for (volume_id, root) in &self.volumes {
            if !root.is_dir() {
                warn!(volume = volume_id.as_str(), "Storage volume is not a directory");
                continue;
            }
            let title = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| volume_id.clone());
            self.store
                .add_storage_device(volume_id, &MediaMeta::titled(title))?;
            info!(volume = volume_id.as_str(), "Storage volume registered");
            devices.push(MediaId::StorageDevice {
                volume_id: volume_id.clone(),
            });
        }
        Ok(devices)
    }

    fn directory_of(&self, container: &MediaId) -> Result<(String, String, PathBuf)> {
        let (volume_id, rel_path) = match container {
            MediaId::StorageDevice { volume_id } => (volume_id, PATH_ROOT),
            MediaId::StorageFolder {
                volume_id, path, ..
            } => (volume_id, path.as_str()),
            _ => return Err(BrowseError::NotBrowsable(container.clone())),
        };
        let root = self
            .volumes
            .get(volume_id)
            .ok_or_else(|| BrowseError::DeviceNotFound(volume_id.clone()))?;
        let dir = if rel_path.is_empty() {
            root.clone()
        } else {
            root.join(rel_path)
        };
        Ok((volume_id.clone(), rel_path.to_string(), dir))
    }

    /// Current listing of a volume directory
    pub fn list(&self, container: &MediaId) -> Result<Vec<MediaRef>> {
        let (volume_id, rel_path, dir) = self.directory_of(container)?;

        let mut entries: Vec<_> = fs::read_dir(&dir)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        let mut children = Vec::new();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let child_path = if rel_path.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel_path, name)
            };
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                children.push(MediaRef::new(
                    MediaId::StorageFolder {
                        volume_id: volume_id.clone(),
                        parent_path: rel_path.clone(),
                        path: child_path,
                    },
                    MediaMeta::titled(name),
                ));
            } else if let Some(mime) = guess_mime_type(&entry.path()) {
                let mut meta = MediaMeta::titled(name);
                meta.media_uri = Some(entry.path().to_string_lossy().into_owned());
                meta.mime_type = Some(mime.to_string());
                meta.size = entry.metadata().ok().map(|m| m.len());
                children.push(MediaRef::new(
                    MediaId::StorageVideo {
                        volume_id: volume_id.clone(),
                        parent_path: rel_path.clone(),
                        path: child_path,
                    },
                    meta,
                ));
            } else {
                debug!(path = child_path.as_str(), "Skipping non-video file");
            }
        }
        Ok(children)
    }
}

impl Refresher for StorageScanner {
    fn refresh_container(&self, container: &MediaId) -> Result<Vec<MediaId>> {
        let children = self.list(container)?;
        self.store.reconcile_children(container, &children, 0)?;
        Ok(children
            .into_iter()
            .filter(|c| c.id.is_container())
            .map(|c| c.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("a/Movie.MKV")), Some("video/x-matroska"));
        assert_eq!(guess_mime_type(Path::new("clip.mp4")), Some("video/mp4"));
        assert_eq!(guess_mime_type(Path::new("notes.txt")), None);
        assert_eq!(guess_mime_type(Path::new("README")), None);
    }
}
