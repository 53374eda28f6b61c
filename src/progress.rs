//! Observer trait for job and page lifecycle events.
//!
//! Install an [`Arc<dyn PipelineObserver>`] on the [`crate::OcrService`] to
//! receive events as the worker pool processes pages. Events can be forwarded
//! to metrics, a progress UI, or (as the tests do) counters that check the
//! scheduler's concurrency bound.
//!
//! # Example
//!
//! ```rust
//! use ocrlayer::{JobId, PipelineObserver};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct PeakRunning {
//!     now: AtomicUsize,
//!     peak: AtomicUsize,
//! }
//!
//! impl PipelineObserver for PeakRunning {
//!     fn on_page_start(&self, _job: JobId, _page: usize, _attempt: u32) {
//!         let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
//!         self.peak.fetch_max(now, Ordering::SeqCst);
//!     }
//!
//!     fn on_page_end(&self, _job: JobId, _page: usize) {
//!         self.now.fetch_sub(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::error::PageError;
use crate::job::{JobId, JobState};
use std::sync::Arc;
use std::time::Duration;

/// Called by the scheduler as jobs and pages move through the pipeline.
///
/// Methods are invoked from worker tasks, concurrently for different pages
/// and jobs, so implementations must synchronise their own state. All
/// methods default to no-ops. Page numbers are 0-based indices.
pub trait PipelineObserver: Send + Sync {
    /// A job passed validation and admission and its pages are queued.
    fn on_job_submitted(&self, job: JobId, total_pages: usize) {
        let _ = (job, total_pages);
    }

    /// A worker claimed a page and is about to run the pipeline on it.
    fn on_page_start(&self, job: JobId, page: usize, attempt: u32) {
        let _ = (job, page, attempt);
    }

    /// The page pipeline returned, whatever the outcome. Always paired with
    /// a preceding [`on_page_start`](Self::on_page_start).
    fn on_page_end(&self, job: JobId, page: usize) {
        let _ = (job, page);
    }

    /// An attempt failed with a retryable error; another follows after `delay`.
    fn on_page_retry(&self, job: JobId, page: usize, error: &PageError, delay: Duration) {
        let _ = (job, page, error, delay);
    }

    /// The page reached `Succeeded`.
    fn on_page_complete(&self, job: JobId, page: usize) {
        let _ = (job, page);
    }

    /// The page reached `Failed`.
    fn on_page_failed(&self, job: JobId, page: usize, error: &PageError) {
        let _ = (job, page, error);
    }

    /// The job reached a terminal state.
    fn on_job_finished(&self, job: JobId, state: JobState) {
        let _ = (job, state);
    }
}

/// Observer that ignores everything. The default.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

pub type SharedObserver = Arc<dyn PipelineObserver>;
