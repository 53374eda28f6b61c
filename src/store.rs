//! In-memory job store.
//!
//! Writes to a job go through [`JobHandle::update`], which holds that job's
//! mutex for the duration of the closure and then publishes a fresh
//! [`JobStatus`] snapshot. Status reads load the snapshot through `ArcSwap`
//! and never touch the mutex, so polling cannot stall a worker.

use crate::error::OcrError;
use crate::job::{Job, JobId, JobState, JobStatus};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One job plus its published snapshot.
pub struct JobHandle {
    id: JobId,
    job: Mutex<Job>,
    snapshot: ArcSwap<JobStatus>,
    state_tx: watch::Sender<JobState>,
    settled: AtomicBool,
}

impl JobHandle {
    fn new(job: Job) -> Self {
        let snapshot = ArcSwap::from_pointee(job.status());
        let (state_tx, _) = watch::channel(job.state);
        Self {
            id: job.id,
            job: Mutex::new(job),
            snapshot,
            state_tx,
            settled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Run `f` with exclusive access to the job, then publish the new state.
    pub fn update<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        let mut job = self.job.lock();
        let out = f(&mut job);
        self.snapshot.store(Arc::new(job.status()));
        let state = job.state;
        drop(job);
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
        out
    }

    /// Lock-free view of the last published state.
    pub fn status(&self) -> Arc<JobStatus> {
        self.snapshot.load_full()
    }

    pub fn state(&self) -> JobState {
        self.snapshot.load().state
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait_terminal(&self) -> JobState {
        let mut rx = self.state_tx.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // The sender lives as long as `self`, so this is unreachable in
            // practice; fall back to the snapshot.
            Err(_) => self.state(),
        };
        state
    }

    /// Returns `true` exactly once, for the first caller after the job
    /// became terminal.
    pub(crate) fn mark_settled(&self) -> bool {
        self.state().is_terminal() && !self.settled.swap(true, Ordering::SeqCst)
    }

    fn artifact(&self) -> Option<PathBuf> {
        self.job.lock().artifact.clone()
    }
}

/// Job counts by state, for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub partially_failed: usize,
    pub cancelled: usize,
}

impl JobCounts {
    pub fn active(&self) -> usize {
        self.queued + self.processing
    }
}

/// Mapping from job id to job record, plus retention.
pub struct JobStore {
    jobs: DashMap<JobId, Arc<JobHandle>>,
    retention: Duration,
}

impl JobStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            retention,
        }
    }

    pub fn create(&self, job: Job) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle::new(job));
        self.jobs.insert(handle.id(), Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: JobId) -> Result<Arc<JobHandle>, OcrError> {
        self.jobs
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(OcrError::JobNotFound { id })
    }

    pub fn status(&self, id: JobId) -> Result<Arc<JobStatus>, OcrError> {
        Ok(self.get(id)?.status())
    }

    /// Location of the published artifact.
    ///
    /// `NotReady` while the job is still running, `NoArtifact` when it ended
    /// without one (failed or cancelled).
    pub fn artifact(&self, id: JobId) -> Result<PathBuf, OcrError> {
        let handle = self.get(id)?;
        let state = handle.state();
        if !state.is_terminal() {
            return Err(OcrError::NotReady { id, state });
        }
        match handle.artifact() {
            Some(path) if state.has_artifact() => Ok(path),
            _ => Err(OcrError::NoArtifact { id, state }),
        }
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for entry in self.jobs.iter() {
            match entry.value().state() {
                JobState::Queued => counts.queued += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::PartiallyFailed => counts.partially_failed += 1,
                JobState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Handles of every job that has not reached a terminal state.
    pub fn active(&self) -> Vec<Arc<JobHandle>> {
        self.jobs
            .iter()
            .filter(|entry| !entry.value().state().is_terminal())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove terminal jobs whose completion is older than the retention
    /// period, deleting their artifacts. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let expired: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|entry| {
                let status = entry.value().status();
                status.state.is_terminal()
                    && status
                        .completed_at
                        .is_some_and(|done| done + retention <= now)
            })
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for id in expired {
            let Some((_, handle)) = self.jobs.remove(&id) else {
                continue;
            };
            removed += 1;
            if let Some(path) = handle.artifact() {
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!(job_id = %id, path = %path.display(), "Artifact deleted"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(job_id = %id, path = %path.display(), "Failed to delete artifact: {e}"),
                }
            }
        }
        if removed > 0 {
            info!(removed, remaining = self.jobs.len(), "Retention sweep removed expired jobs");
        }
        removed
    }
}
