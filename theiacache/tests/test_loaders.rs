use std::time::Duration;

use crossbeam_channel::unbounded;
use theiacache::{CacheLoader, MediaStore};
use theiamedia::{MediaId, MediaMeta, MediaRef};

const UDN: &str = "uuid:loader-test";

fn clip(item: &str) -> MediaRef {
    MediaRef::new(
        MediaId::upnp_video(UDN, "0", item),
        MediaMeta::titled(item),
    )
}

#[test]
fn test_newly_added_loader_reacts_to_writes() {
    let store = MediaStore::open_in_memory().unwrap();
    let (tx, rx) = unbounded();

    let loader = CacheLoader::newly_added(&store, 10, Duration::from_millis(20), move |snapshot| {
        let _ = tx.send(snapshot);
    })
    .unwrap();

    // baseline load
    let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(first.is_empty());

    store
        .reconcile_children(&MediaId::upnp_device(UDN), &[clip("a"), clip("b")], 0)
        .unwrap();

    let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(second.len(), 2);

    drop(loader);
    store
        .reconcile_children(&MediaId::upnp_device(UDN), &[clip("a")], 1)
        .unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_recently_played_loader_ignores_metadata_changes() {
    let store = MediaStore::open_in_memory().unwrap();
    store.add_upnp_video(&clip("a")).unwrap();

    let (tx, rx) = unbounded();
    let _loader =
        CacheLoader::recently_played(&store, 10, Duration::from_millis(20), move |snapshot| {
            let _ = tx.send(snapshot);
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_empty());

    store.add_tv_series(&Default::default()).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    store
        .set_playback_position(&MediaId::upnp_video(UDN, "0", "a"), 1_000)
        .unwrap();
    let played = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(played.len(), 1);
}
