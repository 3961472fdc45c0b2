use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Job, JobRequest, SharedJob};
use crate::config::JobsConfig;
use crate::error::Result;

/// In-memory table of live jobs.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, SharedJob>>,
    work_root: PathBuf,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new(config: &JobsConfig) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            work_root: config.work_root.clone(),
            ttl: config.ttl(),
        }
    }

    /// Validate `request` and register a pending job with its own work directory.
    pub fn create(&self, request: JobRequest) -> Result<SharedJob> {
        request.validate()?;

        let id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let work_dir = self.work_root.join(&id);
        std::fs::create_dir_all(&work_dir)?;

        info!(job_id = %id, source = ?request.source, "Job created");
        let job = Job::new(id.clone(), request, work_dir).into_shared();
        self.jobs.write().insert(id, job.clone());
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<SharedJob> {
        self.jobs.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<SharedJob> {
        self.jobs.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Drop jobs older than the TTL, returning their work directories.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> Vec<PathBuf> {
        let ttl = self.ttl;
        let mut jobs = self.jobs.write();
        let expired: Vec<String> = jobs
            .iter()
            .filter(|(_, job)| {
                (now - job.read().created_at())
                    .to_std()
                    .is_ok_and(|age| age > ttl)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let dirs: Vec<PathBuf> = expired
            .iter()
            .filter_map(|id| jobs.remove(id))
            .map(|job| job.read().work_dir().clone())
            .collect();

        if !dirs.is_empty() {
            info!(count = dirs.len(), "Expired jobs cleaned up");
        }
        dirs
    }

    /// Sweep expired jobs every `interval`, deleting their work directories.
    pub fn spawn_cleanup_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for dir in self.cleanup_expired(Utc::now()) {
                    match tokio::fs::remove_dir_all(&dir).await {
                        Ok(()) => debug!("Removed work directory {}", dir.display()),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
                    }
                }
            }
        })
    }
}
