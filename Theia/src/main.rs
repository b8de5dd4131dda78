use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use theiabrowse::{
    BrowseEngine, BrowseOptions, DeviceListener, DeviceRegistry, Discovery, DiscoveryManager,
    DiscoveryWaiters, GenaSubscriber, HttpDescriptionProvider, MediaRefresher, Refresher,
    RefreshWorker, Scanner, ScannerOptions, ServiceResolver, StorageScanner, UpnpBrowseService,
};
use theiacache::MediaStore;
use theiaconfig::{Config, get_config};
use theialookup::{
    EXTRA_MEDIA_ID, JobCallback, JobId, LookupJobService, LookupService, MovieDbClient,
    RateLimiter, TvDbClient,
};
use theiamedia::MediaId;
use theiaupnp::ssdp::SsdpClient;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Logs job ends; a real scheduler would requeue the rescheduled ones
struct LoggingCallback;

impl JobCallback for LoggingCallback {
    fn job_finished(&self, job_id: JobId, reschedule: bool) {
        if reschedule {
            warn!(job_id, "Lookup job interrupted, run `lookup` again to resume");
        } else {
            info!(job_id, "Lookup job done");
        }
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.get_log_min_level().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn all_devices(store: &MediaStore) -> Vec<MediaId> {
    let mut devices = Vec::new();
    for listing in [store.get_upnp_devices(), store.get_storage_devices()] {
        match listing {
            Ok(found) => devices.extend(found.into_iter().map(|d| d.id)),
            Err(err) => warn!(error = %err, "Cannot list devices"),
        }
    }
    devices
}

fn start_lookups(jobs: &LookupJobService, store: &MediaStore, next_job: &AtomicU32) -> Result<()> {
    for device in all_devices(store) {
        let job_id = next_job.fetch_add(1, Ordering::Relaxed);
        let extras = HashMap::from([(EXTRA_MEDIA_ID.to_string(), device.to_json()?)]);
        if !jobs.start_job(job_id, &extras) {
            warn!(job_id, %device, "Lookup job refused");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let config = get_config();
    init_logging(&config);

    let database = config.get_cache_database()?;
    let store = MediaStore::open(Path::new(&database))
        .with_context(|| format!("Cannot open cache database {}", database))?;
    info!(database = database.as_str(), "Cache opened");

    let http_timeout = Duration::from_secs(config.get_http_timeout_secs());
    let discovery_timeout = Duration::from_secs(config.get_discovery_timeout_secs());

    // ========== Browsing ==========
    let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
    let waiters = Arc::new(DiscoveryWaiters::new());
    let ssdp = SsdpClient::new().context("Cannot open the SSDP socket")?;
    let resolver = ServiceResolver::new(
        registry.clone(),
        waiters.clone(),
        Arc::new(ssdp.clone()),
        discovery_timeout,
        http_timeout,
    );
    let engine: Arc<dyn Refresher> = Arc::new(BrowseEngine::new(
        store.clone(),
        Arc::new(resolver),
        BrowseOptions::from_config(&config),
    ));

    let storage = StorageScanner::new(store.clone(), &config.get_storage_volumes());
    let volumes = storage.register_volumes()?;
    let refresher: Arc<dyn Refresher> = Arc::new(MediaRefresher::new(
        engine,
        Some(Arc::new(storage) as Arc<dyn Refresher>),
    ));
    let scanner = Arc::new(Scanner::spawn(
        "media",
        refresher.clone(),
        ScannerOptions::from_config(&config),
    )?);
    let worker = RefreshWorker::spawn(refresher)?;

    let (events, pump) = match GenaSubscriber::spawn(http_timeout) {
        Ok((subscriber, receiver)) => (Some(subscriber), Some(receiver)),
        Err(err) => {
            warn!(error = %err, "Eventing unavailable, rescans only on discovery");
            (None, None)
        }
    };
    let service = Arc::new(UpnpBrowseService::new(store.clone(), scanner.clone(), events));
    if let Some(receiver) = pump {
        service.spawn_event_pump(receiver)?;
    }

    let listener: Arc<dyn DeviceListener> = service.clone();
    let manager = DiscoveryManager::new(
        HttpDescriptionProvider::new(http_timeout),
        registry,
        waiters,
        listener,
    );
    let discovery = Discovery::spawn(ssdp, manager)?;

    for volume in volumes {
        scanner.enqueue(volume, 0);
    }

    // ========== Lookup ==========
    let limiter = Arc::new(RateLimiter::from_config(&config));
    let lookup = Arc::new(LookupService::from_config(
        &config,
        store.clone(),
        Arc::new(TvDbClient::from_config(&config, limiter.clone())),
        Arc::new(MovieDbClient::from_config(&config, limiter)),
    ));
    let jobs = LookupJobService::new(lookup, Arc::new(LoggingCallback));
    let next_job = AtomicU32::new(1);

    info!("Theia is ready: scan, lookup, list, quit");
    for line in io::stdin().lock().lines() {
        match line?.trim() {
            "" => {}
            "scan" => {
                discovery.search()?;
                for device in all_devices(&store) {
                    scanner.enqueue(device, 0);
                }
            }
            "lookup" => start_lookups(&jobs, &store, &next_job)?,
            "list" => {
                for device in all_devices(&store) {
                    worker.request(device.clone());
                    let count = store.count_children_under(&device).unwrap_or(0);
                    info!(%device, children = count, "Device");
                }
            }
            "quit" => break,
            other => warn!(command = other, "Unknown command"),
        }
    }

    info!("Shutting down");
    discovery.shutdown();
    service.shutdown();
    Ok(())
}
