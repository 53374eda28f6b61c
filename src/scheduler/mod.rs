//! The scheduler: admission, the shared worker pool, retries, and the
//! per-job fan-in barrier.
//!
//! ## Shape
//!
//! ```text
//! submit ─▶ validate ─▶ admit (pages) ─▶ store.create ─▶ enqueue every page
//!                                                           │
//!            ┌──────────────── W workers ◀──────────────────┘
//!            │  claim ─▶ run_page ─▶ record
//!            │                         ├─ retry  ─▶ sleep(backoff) ─▶ requeue
//!            │                         └─ terminal ─▶ barrier? ─▶ assemble ─▶ publish
//! ```
//!
//! The queue carries `(job, page index)` pairs and is unbounded; its size is
//! bounded by admission, which counts pages. Workers share one receiver.
//! All job bookkeeping goes through [`JobHandle::update`], so each job has
//! a single writer at a time no matter which worker holds which page.

mod admission;
mod worker;

pub use admission::Admission;

use crate::config::{OcrConfig, RetryPolicy};
use crate::error::OcrError;
use crate::job::{CancelOutcome, Job, JobId};
use crate::pipeline::engine::{EngineSet, PageSettings};
use crate::pipeline::validate::{self, SubmitOptions};
use crate::progress::SharedObserver;
use crate::store::{JobHandle, JobStore};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One unit of queued work: page `index` of `job`.
pub(crate) struct PageWork {
    pub job: Arc<JobHandle>,
    pub index: usize,
}

/// Worker-pool figures for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub running_pages: usize,
    pub queue_capacity: usize,
    pub queue_in_use: usize,
    pub accepting: bool,
}

pub(crate) struct Inner {
    pub config: Arc<OcrConfig>,
    pub engines: EngineSet,
    pub settings: PageSettings,
    pub retry: RetryPolicy,
    pub store: Arc<JobStore>,
    pub observer: SharedObserver,
    pub admission: Admission,
    pub queue: mpsc::UnboundedSender<PageWork>,
    pub running_pages: AtomicUsize,
    pub accepting: AtomicBool,
    pub shutdown: CancellationToken,
}

/// Fixed-size worker pool shared by every job.
pub struct Scheduler {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn `config.workers` workers on the current Tokio runtime.
    pub fn start(
        config: Arc<OcrConfig>,
        engines: EngineSet,
        store: Arc<JobStore>,
        observer: SharedObserver,
    ) -> Result<Self, OcrError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            settings: PageSettings::from_config(&config),
            retry: config.retry_policy(),
            admission: Admission::new(
                config.queue_capacity,
                config.admission_mode,
                config.admission_timeout(),
            ),
            engines,
            store,
            observer,
            queue: tx,
            running_pages: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            config,
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..inner.config.workers)
            .map(|n| tokio::spawn(worker::run(n, Arc::clone(&inner), Arc::clone(&rx))))
            .collect();
        info!(
            workers = inner.config.workers,
            queue_capacity = inner.admission.capacity(),
            "Worker pool started"
        );
        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Validate, admit and enqueue a document. Returns once every page is
    /// queued; processing continues in the background.
    pub async fn submit(
        &self,
        bytes: Arc<[u8]>,
        options: SubmitOptions,
    ) -> Result<Arc<JobHandle>, OcrError> {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::SeqCst) {
            return Err(OcrError::ShuttingDown);
        }

        let config = Arc::clone(&inner.config);
        let validated = tokio::task::spawn_blocking(move || {
            validate::validate(bytes, &options, &config)
        })
        .await
        .map_err(|e| OcrError::Internal(format!("validation task panicked: {e}")))??;

        let pages = validated.document.page_count();
        inner.admission.acquire(pages).await?;
        if !inner.accepting.load(Ordering::SeqCst) {
            inner.admission.release(pages);
            return Err(OcrError::ShuttingDown);
        }

        let id = JobId::new();
        let languages = validated.options.languages.clone();
        let job = Job::new(id, Arc::new(validated.document), validated.options);
        let handle = inner.store.create(job);
        info!(job_id = %id, pages, languages = %languages, "Job accepted");
        inner.observer.on_job_submitted(id, pages);

        inner.enqueue(&handle, pages)?;
        Ok(handle)
    }

    /// Request cooperative cancellation. Queued pages never start; running
    /// pages finish and their results are dropped.
    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, OcrError> {
        let handle = self.inner.store.get(id)?;
        let outcome = handle.update(|job| job.request_cancel());
        info!(job_id = %id, outcome = ?outcome, "Cancel requested");
        self.inner.settle(&handle);
        Ok(outcome)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.inner.config.workers,
            running_pages: self.inner.running_pages.load(Ordering::SeqCst),
            queue_capacity: self.inner.admission.capacity(),
            queue_in_use: self.inner.admission.in_use(),
            accepting: self.inner.accepting.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting jobs, let active jobs finish for up to `grace`, cancel
    /// whatever is left, then stop the workers once their current page is
    /// done. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        let inner = &self.inner;
        if inner.accepting.swap(false, Ordering::SeqCst) {
            inner.admission.close();
            let active = inner.store.active();
            info!(active_jobs = active.len(), grace_secs = grace.as_secs(), "Draining worker pool");

            let drained = tokio::time::timeout(
                grace,
                join_all(active.iter().map(|handle| handle.wait_terminal())),
            )
            .await
            .is_ok();
            if !drained {
                for handle in inner.store.active() {
                    warn!(job_id = %handle.id(), "Cancelling job still active after grace period");
                    handle.update(|job| job.request_cancel());
                    inner.settle(&handle);
                }
            }
        }

        inner.shutdown.cancel();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker task ended abnormally: {e}");
            }
        }
        debug!("Worker pool stopped");
    }
}

impl Inner {
    /// Queue every page of a freshly created job.
    ///
    /// `accepting` is checked again after the job is in the store: either
    /// shutdown's snapshot of active jobs includes it, or it is cancelled
    /// here.
    fn enqueue(&self, handle: &Arc<JobHandle>, pages: usize) -> Result<(), OcrError> {
        let id = handle.id();
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(job_id = %id, "Shutdown began during submission");
            handle.update(|job| job.request_cancel());
            self.settle(handle);
            return Err(OcrError::ShuttingDown);
        }
        for index in 0..pages {
            let work = PageWork {
                job: Arc::clone(handle),
                index,
            };
            if self.queue.send(work).is_err() {
                warn!(job_id = %id, "Work queue closed during submission");
                handle.update(|job| job.request_cancel());
                self.settle(handle);
                return Err(OcrError::ShuttingDown);
            }
        }
        Ok(())
    }

    /// Give back admission slots and report the job once it is terminal.
    pub(crate) fn settle(&self, handle: &JobHandle) {
        let released = handle.update(|job| job.release_all_permits());
        self.admission.release(released);
        if handle.mark_settled() {
            let status = handle.status();
            info!(
                job_id = %handle.id(),
                state = %status.state,
                pages = status.page_count,
                failed = status.progress.failed,
                "Job finished"
            );
            self.observer.on_job_finished(handle.id(), status.state);
        }
    }
}
