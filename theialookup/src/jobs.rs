//! Background lookup jobs
//!
//! A job scheduler starts a job with an id and a bag of string extras
//! holding a serialized [`MediaId`]. The job enriches every video under that
//! id and reports back exactly once through [`JobCallback::job_finished`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use theiamedia::{MediaId, MediaRef};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::lookup::LookupService;

/// Extra carrying the JSON-encoded media id
pub const EXTRA_MEDIA_ID: &str = "media_id";

pub type JobId = u32;

pub trait JobCallback: Send + Sync {
    fn job_finished(&self, job_id: JobId, reschedule: bool);
}

/// How a job run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobEnd {
    Done,
    Cancelled,
    TimedOut,
    Failed,
}

impl JobEnd {
    fn reschedule(self) -> bool {
        matches!(self, JobEnd::Cancelled | JobEnd::TimedOut)
    }
}

pub struct LookupJobService {
    lookup: Arc<LookupService>,
    callback: Arc<dyn JobCallback>,
    running: Arc<Mutex<HashMap<JobId, Arc<AtomicBool>>>>,
}

impl LookupJobService {
    pub fn new(lookup: Arc<LookupService>, callback: Arc<dyn JobCallback>) -> Self {
        Self {
            lookup,
            callback,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Accepts the job when its extras name a media id and the id is not
    /// already running
    pub fn start_job(&self, job_id: JobId, extras: &HashMap<String, String>) -> bool {
        let Some(raw) = extras.get(EXTRA_MEDIA_ID) else {
            warn!(job_id, "Lookup job without {}", EXTRA_MEDIA_ID);
            return false;
        };
        let target = match MediaId::from_json(raw) {
            Ok(id) => id,
            Err(err) => {
                warn!(job_id, error = %err, "Lookup job with an unreadable media id");
                return false;
            }
        };
        if !target.is_video() && !target.is_container() {
            warn!(job_id, %target, "Lookup job target holds no videos");
            return false;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if running.contains_key(&job_id) {
                warn!(job_id, "Lookup job already running");
                return false;
            }
            running.insert(job_id, Arc::clone(&cancelled));
        }

        let lookup = Arc::clone(&self.lookup);
        let callback = Arc::clone(&self.callback);
        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name(format!("lookup-job-{}", job_id))
            .spawn(move || {
                let end = run_job(&lookup, &target, &cancelled);
                info!(job_id, ?end, "Lookup job finished");
                running
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&job_id);
                callback.job_finished(job_id, end.reschedule());
            });

        match spawned {
            Ok(_) => true,
            Err(err) => {
                warn!(job_id, error = %err, "Failed to start lookup job");
                self.running
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&job_id);
                false
            }
        }
    }

    /// Asks a running job to stop between two videos
    ///
    /// Always false: the job's own finish callback asks for the reschedule.
    pub fn stop_job(&self, job_id: JobId) -> bool {
        if let Some(cancelled) = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
        {
            debug!(job_id, "Cancelling lookup job");
            cancelled.store(true, Ordering::Relaxed);
        }
        false
    }

    pub fn running_jobs(&self) -> usize {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn videos_under(lookup: &LookupService, target: &MediaId) -> Result<Vec<MediaRef>> {
    let store = lookup.store();
    if target.is_video() {
        Ok(vec![store.get_video(target)?])
    } else {
        Ok(store.get_videos_under_recursive(target)?)
    }
}

fn run_job(lookup: &LookupService, target: &MediaId, cancelled: &AtomicBool) -> JobEnd {
    let videos = match videos_under(lookup, target) {
        Ok(videos) => videos,
        Err(err) => {
            warn!(%target, error = %err, "Cannot list videos for lookup");
            return JobEnd::Failed;
        }
    };
    debug!(%target, videos = videos.len(), "Lookup job started");

    for video in videos {
        if cancelled.load(Ordering::Relaxed) {
            return JobEnd::Cancelled;
        }
        if video.meta.is_enriched() {
            continue;
        }
        match lookup.lookup(&video) {
            Ok(_) => {}
            Err(err) if err.is_miss() => {
                debug!(video = %video.id, title = video.title(), error = %err, "No metadata");
            }
            Err(err) if err.is_timeout() => {
                warn!(video = %video.id, error = %err, "Lookup timed out");
                return JobEnd::TimedOut;
            }
            Err(err) => {
                warn!(video = %video.id, error = %err, "Lookup failed");
                return JobEnd::Failed;
            }
        }
    }
    JobEnd::Done
}
