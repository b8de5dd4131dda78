use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use theiabrowse::{
    FolderLoader, MediaRefresher, RefreshWorker, Refresher, Scanner, ScannerOptions,
    StorageScanner,
};
use theiacache::MediaStore;
use theiamedia::MediaId;

fn volume() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("Movies/Classics")).unwrap();
    fs::create_dir_all(dir.path().join(".thumbnails")).unwrap();
    fs::write(dir.path().join("clip.mp4"), b"0123456789").unwrap();
    fs::write(dir.path().join("notes.txt"), b"not a video").unwrap();
    fs::write(dir.path().join("Movies/Heat.1995.mkv"), b"mkv").unwrap();
    fs::write(dir.path().join("Movies/Classics/Metropolis.1927.avi"), b"avi").unwrap();
    dir
}

fn volume_id(dir: &TempDir) -> String {
    dir.path().to_string_lossy().into_owned()
}

#[test]
fn test_volume_root_listing() {
    let dir = volume();
    let store = MediaStore::open_in_memory().unwrap();
    let scanner = StorageScanner::new(store.clone(), &[volume_id(&dir)]);

    let devices = scanner.register_volumes().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(store.get_storage_devices().unwrap().len(), 1);

    let device = devices[0].clone();
    let folders = scanner.refresh_container(&device).unwrap();
    assert_eq!(
        folders,
        vec![MediaId::StorageFolder {
            volume_id: volume_id(&dir),
            parent_path: String::new(),
            path: "Movies".to_string(),
        }]
    );

    let children = store.get_children_under(&device).unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].title(), "Movies");
    assert_eq!(children[1].title(), "clip.mp4");
    assert_eq!(children[1].meta.mime_type.as_deref(), Some("video/mp4"));
    assert_eq!(children[1].meta.size, Some(10));
}

#[test]
fn test_scanner_walks_volume() {
    let dir = volume();
    let store = MediaStore::open_in_memory().unwrap();
    let storage = Arc::new(StorageScanner::new(store.clone(), &[volume_id(&dir)]));
    let device = storage.register_volumes().unwrap().remove(0);

    let scanner = Scanner::spawn("storage", storage, ScannerOptions::default()).unwrap();
    scanner.enqueue(device.clone(), 0);
    assert!(scanner.wait_idle(Duration::from_secs(5)));

    let mut titles: Vec<String> = store
        .get_videos_under_recursive(&device)
        .unwrap()
        .iter()
        .map(|v| v.title().to_string())
        .collect();
    titles.sort();
    assert_eq!(
        titles,
        vec!["Heat.1995.mkv", "Metropolis.1927.avi", "clip.mp4"]
    );
}

#[test]
fn test_deleted_files_are_hidden_on_rescan() {
    let dir = volume();
    let store = MediaStore::open_in_memory().unwrap();
    let scanner = StorageScanner::new(store.clone(), &[volume_id(&dir)]);
    let device = scanner.register_volumes().unwrap().remove(0);

    scanner.refresh_container(&device).unwrap();
    fs::remove_file(dir.path().join("clip.mp4")).unwrap();
    scanner.refresh_container(&device).unwrap();

    let children = store.get_children_under(&device).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].title(), "Movies");
}

#[test]
fn test_folder_loader_serves_cache_then_refreshed_listing() {
    let dir = volume();
    let store = MediaStore::open_in_memory().unwrap();
    let storage = Arc::new(StorageScanner::new(store.clone(), &[volume_id(&dir)]));
    let device = storage.register_volumes().unwrap().remove(0);

    let refresher: Arc<dyn Refresher> = Arc::new(MediaRefresher::new(
        Arc::new(NoUpnp),
        Some(storage.clone()),
    ));
    let worker = RefreshWorker::spawn(refresher).unwrap();

    let (tx, rx) = mpsc::channel();
    let (_loader, cached) = FolderLoader::open(
        &store,
        &worker,
        device.clone(),
        Duration::from_millis(10),
        move |listing| {
            let _ = tx.send(listing);
        },
    )
    .unwrap();
    assert!(cached.is_empty());

    let listing = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(listing.len(), 2);
}

struct NoUpnp;

impl Refresher for NoUpnp {
    fn refresh_container(&self, container: &MediaId) -> theiabrowse::Result<Vec<MediaId>> {
        Err(theiabrowse::BrowseError::NotBrowsable(container.clone()))
    }
}
