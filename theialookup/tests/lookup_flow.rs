use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use theiacache::{ImageRecord, MediaStore, MovieRecord, TvEpisodeRecord, TvSeriesRecord};
use theialookup::{
    EXTRA_MEDIA_ID, JobCallback, JobId, LookupError, LookupJobService, LookupOutcome,
    LookupService, MovieDbApi, MovieHit, Result, SeriesHit, TvDbApi, TvLookup,
};
use theiamedia::{MediaId, MediaMeta, MediaRef};

const UDN: &str = "uuid:nas";

#[derive(Default)]
struct FakeTvDb {
    calls: Mutex<Vec<String>>,
    timeout: AtomicBool,
    // first call blocks until this fires
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FakeTvDb {
    fn record(&self, call: String) -> Result<()> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.calls.lock().unwrap().push(call);
        if self.timeout.load(Ordering::SeqCst) {
            return Err(LookupError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "read timed out",
            )));
        }
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl TvDbApi for FakeTvDb {
    fn search_series(&self, name: &str) -> Result<Vec<SeriesHit>> {
        self.record(format!("search {}", name))?;
        if name != "the office" {
            return Ok(Vec::new());
        }
        Ok(vec![
            SeriesHit {
                series_id: 1,
                name: "The Office (US)".to_string(),
            },
            SeriesHit {
                series_id: 2,
                name: "The Office".to_string(),
            },
            SeriesHit {
                series_id: 3,
                name: "The Office Christmas".to_string(),
            },
        ])
    }

    fn series(&self, series_id: i64) -> Result<TvSeriesRecord> {
        self.record(format!("series {}", series_id))?;
        Ok(TvSeriesRecord {
            series_id,
            name: format!("Series {}", series_id),
            ..Default::default()
        })
    }

    fn episode(&self, series_id: i64, season: u32, episode: u32) -> Result<TvEpisodeRecord> {
        self.record(format!("episode {} {} {}", series_id, season, episode))?;
        Ok(TvEpisodeRecord {
            series_id,
            episode_id: series_id * 10_000 + i64::from(season) * 100 + i64::from(episode),
            season,
            episode,
            name: Some(format!("Episode {}", episode)),
            ..Default::default()
        })
    }

    fn images(&self, series_id: i64) -> Result<Vec<ImageRecord>> {
        self.record(format!("images {}", series_id))?;
        Ok(vec![ImageRecord {
            kind: "poster".to_string(),
            path: format!("posters/{}.jpg", series_id),
            rating: Some(8.0),
        }])
    }
}

#[derive(Default)]
struct FakeMovieDb {
    calls: Mutex<Vec<String>>,
}

impl MovieDbApi for FakeMovieDb {
    fn search_movie(&self, name: &str, year: &str) -> Result<Vec<MovieHit>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("search {} {}", name, year));
        if name == "heat" && year == "1995" {
            Ok(vec![MovieHit {
                movie_id: 949,
                title: "Heat".to_string(),
            }])
        } else {
            Ok(Vec::new())
        }
    }

    fn movie(&self, movie_id: i64) -> Result<MovieRecord> {
        self.calls.lock().unwrap().push(format!("movie {}", movie_id));
        Ok(MovieRecord {
            movie_id,
            title: "Heat".to_string(),
            release_date: Some("1995-12-15".to_string()),
            ..Default::default()
        })
    }

    fn images(&self, movie_id: i64) -> Result<Vec<ImageRecord>> {
        self.calls.lock().unwrap().push(format!("images {}", movie_id));
        Ok(Vec::new())
    }
}

fn video(item_id: &str, title: &str) -> MediaRef {
    MediaRef::new(MediaId::upnp_video(UDN, "0", item_id), MediaMeta::titled(title))
}

fn store_with_videos() -> MediaStore {
    let store = MediaStore::open_in_memory().unwrap();
    store
        .add_upnp_device(UDN, &MediaMeta::titled("NAS"))
        .unwrap();
    store
        .reconcile_children(
            &MediaId::upnp_device(UDN),
            &[
                video("v1", "The.Office.S02E03.mkv"),
                video("v2", "Heat.1995.mkv"),
                video("v3", "holiday.mp4"),
            ],
            1,
        )
        .unwrap();
    store
}

fn service(store: &MediaStore) -> (Arc<LookupService>, Arc<FakeTvDb>, Arc<FakeMovieDb>) {
    let tv = Arc::new(FakeTvDb::default());
    let movie = Arc::new(FakeMovieDb::default());
    let service = LookupService::new(store.clone(), tv.clone(), movie.clone(), 2);
    (Arc::new(service), tv, movie)
}

#[test]
fn test_tv_lookup_goes_to_network_once() {
    let store = MediaStore::open_in_memory().unwrap();
    let api = Arc::new(FakeTvDb::default());
    let lookup = TvLookup::new(store.clone(), api.clone(), 2);

    let first = lookup.lookup("the office", 2, 3).unwrap();
    assert_eq!(first.series.series_id, 1);
    assert_eq!(first.episode.episode_id, 10_203);
    assert_eq!(
        api.calls(),
        vec![
            "search the office",
            "series 1",
            "images 1",
            "series 2",
            "images 2",
            "episode 1 2 3",
        ]
    );
    assert_eq!(store.get_tv_association("the office").unwrap(), Some(1));
    assert_eq!(store.get_tv_images(2).unwrap().len(), 1);

    let second = lookup.lookup("the office", 2, 3).unwrap();
    assert_eq!(second, first);
    assert_eq!(api.calls().len(), 6);
}

#[test]
fn test_cached_series_fetches_only_the_missing_episode() {
    let store = MediaStore::open_in_memory().unwrap();
    let api = Arc::new(FakeTvDb::default());
    let lookup = TvLookup::new(store, api.clone(), 1);

    lookup.lookup("the office", 2, 3).unwrap();
    let calls_before = api.calls().len();
    let other = lookup.lookup("the office", 2, 4).unwrap();

    assert_eq!(other.episode.episode, 4);
    assert_eq!(api.calls()[calls_before..], ["episode 1 2 4".to_string()]);
}

#[test]
fn test_unknown_series_is_not_found() {
    let store = MediaStore::open_in_memory().unwrap();
    let lookup = TvLookup::new(store, Arc::new(FakeTvDb::default()), 2);
    assert!(matches!(
        lookup.lookup("no such show", 1, 1),
        Err(LookupError::NotFound(_))
    ));
}

#[test]
fn test_service_links_episode_and_movie() {
    let store = store_with_videos();
    let (service, _tv, movie_api) = service(&store);

    let outcome = service.lookup(&video("v1", "The.Office.S02E03.mkv")).unwrap();
    assert!(matches!(outcome, LookupOutcome::Episode(_)));
    let enriched = store
        .get_video(&MediaId::upnp_video(UDN, "0", "v1"))
        .unwrap();
    assert_eq!(
        enriched.meta.tv_episode_id,
        Some(MediaId::TvEpisode {
            series_id: 1,
            episode_id: 10_203
        })
    );

    let outcome = service.lookup(&video("v2", "Heat.1995.mkv")).unwrap();
    let LookupOutcome::Movie(movie) = outcome else {
        panic!("expected a movie");
    };
    assert_eq!(movie.movie_id, 949);
    let enriched = store
        .get_video(&MediaId::upnp_video(UDN, "0", "v2"))
        .unwrap();
    assert_eq!(enriched.meta.movie_id, Some(MediaId::Movie { movie_id: 949 }));
    assert_eq!(enriched.meta.tv_episode_id, None);

    // second movie lookup is answered by the association
    service.lookup(&video("v2", "Heat.1995.mkv")).unwrap();
    assert_eq!(movie_api.calls.lock().unwrap().len(), 3);
}

#[test]
fn test_service_rejects_unparseable_titles() {
    let store = store_with_videos();
    let (service, tv, _movie) = service(&store);
    assert!(matches!(
        service.lookup(&video("v3", "holiday.mp4")),
        Err(LookupError::Unparseable(_))
    ));
    assert!(tv.calls().is_empty());
}

struct ChannelCallback(Mutex<mpsc::Sender<(JobId, bool)>>);

impl JobCallback for ChannelCallback {
    fn job_finished(&self, job_id: JobId, reschedule: bool) {
        let _ = self.0.lock().unwrap().send((job_id, reschedule));
    }
}

fn jobs(service: Arc<LookupService>) -> (LookupJobService, mpsc::Receiver<(JobId, bool)>) {
    let (tx, rx) = mpsc::channel();
    let jobs = LookupJobService::new(service, Arc::new(ChannelCallback(Mutex::new(tx))));
    (jobs, rx)
}

fn extras(id: &MediaId) -> HashMap<String, String> {
    HashMap::from([(EXTRA_MEDIA_ID.to_string(), id.to_json().unwrap())])
}

#[test]
fn test_job_rejects_unusable_extras() {
    let store = store_with_videos();
    let (service, _, _) = service(&store);
    let (jobs, rx) = jobs(service);

    assert!(!jobs.start_job(1, &HashMap::new()));
    assert!(!jobs.start_job(
        2,
        &HashMap::from([(EXTRA_MEDIA_ID.to_string(), "{not json".to_string())])
    ));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_job_enriches_every_video_under_container() {
    let store = store_with_videos();
    let (service, _, _) = service(&store);
    let (jobs, rx) = jobs(service);

    assert!(jobs.start_job(7, &extras(&MediaId::upnp_device(UDN))));
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (7, false));
    assert!(!jobs.stop_job(7));

    let videos = store
        .get_videos_under_recursive(&MediaId::upnp_device(UDN))
        .unwrap();
    let enriched: Vec<bool> = videos.iter().map(|v| v.meta.is_enriched()).collect();
    assert_eq!(enriched.iter().filter(|e| **e).count(), 2);
    assert_eq!(jobs.running_jobs(), 0);
}

#[test]
fn test_job_timeout_asks_for_reschedule() {
    let store = store_with_videos();
    let (service, tv, _) = service(&store);
    tv.timeout.store(true, Ordering::SeqCst);
    let (jobs, rx) = jobs(service);

    assert!(jobs.start_job(
        9,
        &extras(&MediaId::upnp_video(UDN, "0", "v1"))
    ));
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (9, true));
}

#[test]
fn test_job_id_already_running_is_refused() {
    let store = store_with_videos();
    let (service, tv, _) = service(&store);
    let (release, gate) = mpsc::channel();
    *tv.gate.lock().unwrap() = Some(gate);
    let (jobs, rx) = jobs(service);
    let target = extras(&MediaId::upnp_video(UDN, "0", "v1"));

    assert!(jobs.start_job(5, &target));
    assert!(!jobs.start_job(5, &target));
    assert_eq!(jobs.running_jobs(), 1);

    release.send(()).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (5, false));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(jobs.running_jobs(), 0);

    // the id is free again once the first run reported back
    assert!(jobs.start_job(5, &target));
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (5, false));
}

#[test]
fn test_job_on_disk_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = MediaStore::open(&dir.path().join("theia.db")).unwrap();
    store
        .add_upnp_device(UDN, &MediaMeta::titled("NAS"))
        .unwrap();
    store
        .reconcile_children(
            &MediaId::upnp_device(UDN),
            &[video("v1", "Heat.1995.mkv")],
            1,
        )
        .unwrap();
    let (service, _, _) = service(&store);
    let (jobs, rx) = jobs(service);

    assert!(jobs.start_job(3, &extras(&MediaId::upnp_video(UDN, "0", "v1"))));
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (3, false));
    assert!(store
        .get_video(&MediaId::upnp_video(UDN, "0", "v1"))
        .unwrap()
        .meta
        .movie_id
        .is_some());
}
