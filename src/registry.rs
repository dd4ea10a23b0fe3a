use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Where a submitted job lives, so a later status check reaches the right service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRoute {
    pub provider: &'static str,
    pub segment_index: usize,
    pub audio_url: String,
}

#[derive(Debug)]
struct JobEntry {
    route: JobRoute,
    completed_at: Option<Instant>,
}

/// Job id -> route map. Entries are evicted `retention` after they complete.
#[derive(Debug)]
pub struct JobRegistry {
    retention: Duration,
    entries: Mutex<HashMap<String, JobEntry>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, job_id: &str, route: JobRoute) {
        self.purge_expired();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            job_id.to_string(),
            JobEntry {
                route,
                completed_at: None,
            },
        );
    }

    /// Starts the retention clock for `job_id`.
    pub fn mark_completed(&self, job_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(job_id) {
            entry.completed_at.get_or_insert_with(Instant::now);
        }
    }

    pub fn lookup(&self, job_id: &str) -> Option<JobRoute> {
        self.purge_expired();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(job_id).map(|entry| entry.route.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| match entry.completed_at {
            Some(done) => now.saturating_duration_since(done) < self.retention,
            None => true,
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "evicted finished jobs from registry");
        }
        removed
    }
}
