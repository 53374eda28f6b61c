//! Job and page-task state machines.
//!
//! A [`Job`] owns one [`PageTask`] per page in a plain `Vec`, indexed by the
//! 0-based page index. Workers and the scheduler refer to pages by that
//! index only, so results arriving out of order land in the right slot
//! without any shared pointers between tasks.
//!
//! ```text
//! Job:   Queued ──▶ Processing ──▶ Completed | Failed | PartiallyFailed | Cancelled
//!          └────────────────────────────────────────────────────────────▶ Cancelled
//!
//! Page:  Queued ──▶ Running ──▶ Succeeded | Failed
//!          ▲           │
//!          └── RetryPending (after backoff)
//! ```
//!
//! Every method here is synchronous and pure bookkeeping; the store wraps a
//! `Job` in a mutex so each job has exactly one writer at a time.

use crate::config::{ExistingTextPolicy, FailurePolicy, RetryPolicy};
use crate::document::{Document, DocumentMetadata};
use crate::error::PageError;
use crate::language::LanguageSet;
use crate::pipeline::composite::PageFragment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ── Identity ─────────────────────────────────────────────────────────────

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── States ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    PartiallyFailed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::PartiallyFailed | JobState::Cancelled
        )
    }

    /// Whether `self → next` is a legal transition. Terminal states have no
    /// successors.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match self {
            JobState::Queued => matches!(next, JobState::Processing | JobState::Cancelled),
            JobState::Processing => next.is_terminal(),
            _ => false,
        }
    }

    /// Terminal states that come with a downloadable artifact.
    pub fn has_artifact(self) -> bool {
        matches!(self, JobState::Completed | JobState::PartiallyFailed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::PartiallyFailed => "partially_failed",
            JobState::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Queued,
    Running,
    RetryPending,
    Succeeded,
    Failed,
}

impl PageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PageState::Succeeded | PageState::Failed)
    }
}

// ── Page task ────────────────────────────────────────────────────────────

/// One page of one job. Exactly one exists per page.
#[derive(Debug)]
pub struct PageTask {
    pub index: usize,
    pub state: PageState,
    /// Pipeline executions started so far.
    pub attempts: u32,
    /// Last error seen; kept on retry so the final failure shows its cause.
    pub error: Option<PageError>,
    pub fragment: Option<PageFragment>,
    /// The page is passed through as it is instead of being recognized,
    /// because it already has text.
    pub keep_original: bool,
}

impl PageTask {
    fn new(index: usize, keep_original: bool) -> Self {
        Self {
            index,
            state: PageState::Queued,
            attempts: 0,
            error: None,
            fragment: None,
            keep_original,
        }
    }
}

/// Per-job options chosen at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub languages: LanguageSet,
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub existing_text: ExistingTextPolicy,
}

// ── Transition results ───────────────────────────────────────────────────

/// Result of a worker trying to claim a queued page.
#[derive(Debug)]
pub enum Claim {
    /// The page is now `Running`; execute attempt number `attempt`.
    Run {
        attempt: u32,
        document: Arc<Document>,
        languages: LanguageSet,
        /// Pass the original page through without recognition.
        keep_original: bool,
    },
    /// Nothing to do: the job was cancelled, or the page is not `Queued`.
    Skip,
}

/// What happened when a finished attempt was recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Succeeded,
    /// The page goes back to the queue after `delay`.
    Retry { delay: Duration, error: PageError },
    Failed(PageError),
    /// The job was cancelled while this page ran; the result was dropped.
    Discarded,
}

impl PageOutcome {
    /// Whether the page reached `Succeeded` or `Failed` with this attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PageOutcome::Succeeded | PageOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No page was running; the job is `Cancelled` now.
    Cancelled,
    /// Running pages will finish first; the job becomes `Cancelled` after.
    Draining { running: usize },
    /// Cancel was already requested.
    AlreadyRequested,
    /// The job is terminal or already assembling; nothing changes.
    AlreadyFinished(JobState),
}

/// Everything the assembler needs, moved out of the job under its lock.
#[derive(Debug)]
pub struct FinalizeInput {
    pub document: Arc<Document>,
    pub failure_policy: FailurePolicy,
    /// Indexed by page; `None` for pages that failed.
    pub fragments: Vec<Option<PageFragment>>,
    pub failed_pages: Vec<usize>,
}

// ── Job ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub options: JobOptions,
    pub metadata: DocumentMetadata,
    pub pages: Vec<PageTask>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub artifact: Option<PathBuf>,
    /// Job-level failure detail (assembly error, fail-closed summary).
    pub failure: Option<String>,
    /// Kept until the job is terminal; released afterwards.
    document: Option<Arc<Document>>,
    cancel_requested: bool,
    finalizing: bool,
    running: usize,
    /// Admission slots still owned by this job.
    permits_held: usize,
}

impl Job {
    pub fn new(id: JobId, document: Arc<Document>, options: JobOptions) -> Self {
        let page_count = document.page_count();
        let skip_text = options.existing_text == ExistingTextPolicy::Skip;
        let pages = (0..page_count)
            .map(|index| PageTask::new(index, skip_text && document.page_has_text(index)))
            .collect();
        Self {
            id,
            state: JobState::Queued,
            options,
            metadata: document.metadata().clone(),
            pages,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            artifact: None,
            failure: None,
            document: Some(document),
            cancel_requested: false,
            finalizing: false,
            running: 0,
            permits_held: page_count,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {} → {}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            return;
        }
        let now = Utc::now();
        if next == JobState::Processing {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
            self.document = None;
            for page in &mut self.pages {
                page.fragment = None;
            }
        }
        self.state = next;
    }

    /// Claim a queued page for execution.
    ///
    /// This is the exactly-once gate: only a `Queued` page of a live job can
    /// move to `Running`, and the caller holds the job lock while it does.
    pub fn claim(&mut self, index: usize) -> Claim {
        if self.cancel_requested || self.state.is_terminal() {
            return Claim::Skip;
        }
        let Some(document) = self.document.clone() else {
            return Claim::Skip;
        };
        let Some(page) = self.pages.get_mut(index) else {
            return Claim::Skip;
        };
        if page.state != PageState::Queued {
            return Claim::Skip;
        }
        page.state = PageState::Running;
        page.attempts = page.attempts.saturating_add(1);
        let attempt = page.attempts;
        let keep_original = page.keep_original;
        self.running += 1;
        if self.state == JobState::Queued {
            self.transition(JobState::Processing);
        }
        Claim::Run {
            attempt,
            document,
            languages: self.options.languages.clone(),
            keep_original,
        }
    }

    /// Record the result of a running attempt and apply the retry policy.
    pub fn record(
        &mut self,
        index: usize,
        result: Result<PageFragment, PageError>,
        retry: &RetryPolicy,
    ) -> PageOutcome {
        let cancelled = self.cancel_requested;
        let Some(page) = self.pages.get_mut(index) else {
            return PageOutcome::Discarded;
        };
        if page.state != PageState::Running {
            return PageOutcome::Discarded;
        }
        self.running = self.running.saturating_sub(1);

        let outcome = if cancelled {
            // Finished pages keep a truthful state, but nothing is kept or retried.
            match result {
                Ok(_) => page.state = PageState::Succeeded,
                Err(err) => {
                    page.state = PageState::Failed;
                    page.error = Some(err);
                }
            }
            PageOutcome::Discarded
        } else {
            match result {
                Ok(fragment) => {
                    page.state = PageState::Succeeded;
                    page.fragment = Some(fragment);
                    PageOutcome::Succeeded
                }
                Err(err) if err.is_retryable() && page.attempts < retry.max_attempts() => {
                    page.state = PageState::RetryPending;
                    page.error = Some(err.clone());
                    PageOutcome::Retry {
                        delay: retry.delay_before(page.attempts.saturating_add(1)),
                        error: err,
                    }
                }
                Err(err) => {
                    page.state = PageState::Failed;
                    page.error = Some(err.clone());
                    PageOutcome::Failed(err)
                }
            }
        };

        if self.cancel_requested && self.running == 0 && !self.state.is_terminal() {
            self.transition(JobState::Cancelled);
        }
        outcome
    }

    /// Move a page back from `RetryPending` to `Queued` once its backoff has
    /// elapsed. Returns `false` if the page should not be re-enqueued.
    pub fn requeue(&mut self, index: usize) -> bool {
        if self.cancel_requested || self.state.is_terminal() {
            return false;
        }
        match self.pages.get_mut(index) {
            Some(page) if page.state == PageState::RetryPending => {
                page.state = PageState::Queued;
                true
            }
            _ => false,
        }
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn request_cancel(&mut self) -> CancelOutcome {
        if self.state.is_terminal() || self.finalizing {
            return CancelOutcome::AlreadyFinished(self.state);
        }
        if self.cancel_requested {
            return CancelOutcome::AlreadyRequested;
        }
        self.cancel_requested = true;
        if self.running == 0 {
            self.transition(JobState::Cancelled);
            CancelOutcome::Cancelled
        } else {
            CancelOutcome::Draining {
                running: self.running,
            }
        }
    }

    pub fn all_pages_terminal(&self) -> bool {
        self.pages.iter().all(|p| p.state.is_terminal())
    }

    /// Pass the fan-in barrier: once every page is terminal, hand over the
    /// fragments exactly once. Returns `None` until then, after a cancel,
    /// and on every call after the first success.
    pub fn begin_finalize(&mut self) -> Option<FinalizeInput> {
        if self.finalizing
            || self.cancel_requested
            || self.state.is_terminal()
            || !self.all_pages_terminal()
        {
            return None;
        }
        let document = self.document.clone()?;
        self.finalizing = true;
        let failed_pages = self
            .pages
            .iter()
            .filter(|p| p.state == PageState::Failed)
            .map(|p| p.index)
            .collect();
        let fragments = self.pages.iter_mut().map(|p| p.fragment.take()).collect();
        Some(FinalizeInput {
            document,
            failure_policy: self.options.failure_policy,
            fragments,
            failed_pages,
        })
    }

    /// Record the final outcome after assembly (or the decision to skip it).
    pub fn finish(&mut self, state: JobState, artifact: Option<PathBuf>, failure: Option<String>) {
        if !self.state.can_transition_to(state) {
            return;
        }
        self.artifact = artifact;
        self.failure = failure;
        self.finalizing = false;
        self.transition(state);
    }

    /// Give back one admission slot as a page reaches a terminal state.
    pub fn release_page_permit(&mut self) -> usize {
        if self.permits_held == 0 {
            return 0;
        }
        self.permits_held -= 1;
        1
    }

    /// Give back every remaining admission slot once the job is terminal.
    pub fn release_all_permits(&mut self) -> usize {
        if !self.state.is_terminal() {
            return 0;
        }
        std::mem::take(&mut self.permits_held)
    }

    /// A consistent, serialisable copy of the job's externally visible state.
    pub fn status(&self) -> JobStatus {
        let mut progress = PageCounts::default();
        let mut failed_pages = Vec::new();
        let mut pages = Vec::with_capacity(self.pages.len());
        for page in &self.pages {
            progress.add(page.state);
            if page.state == PageState::Failed {
                if let Some(err) = &page.error {
                    failed_pages.push(FailedPage {
                        page: page.index + 1,
                        kind: err.kind().to_string(),
                        error: err.to_string(),
                    });
                }
            }
            pages.push(PageProgress {
                page: page.index + 1,
                state: page.state,
                attempts: page.attempts,
                kept_original: page.keep_original,
            });
        }
        JobStatus {
            job_id: self.id,
            state: self.state,
            page_count: self.pages.len(),
            progress,
            pages,
            failed_pages,
            languages: self.options.languages.to_engine_arg(),
            failure_policy: self.options.failure_policy,
            title: self.metadata.title.clone(),
            cancel_requested: self.cancel_requested,
            error: self.failure.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

// ── Status snapshot ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCounts {
    pub queued: usize,
    pub running: usize,
    pub retry_pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PageCounts {
    fn add(&mut self, state: PageState) {
        match state {
            PageState::Queued => self.queued += 1,
            PageState::Running => self.running += 1,
            PageState::RetryPending => self.retry_pending += 1,
            PageState::Succeeded => self.succeeded += 1,
            PageState::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageProgress {
    /// 1-based page number.
    pub page: usize,
    pub state: PageState,
    pub attempts: u32,
    /// The page already had text and was passed through unrecognized.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub kept_original: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPage {
    /// 1-based page number.
    pub page: usize,
    pub kind: String,
    pub error: String,
}

/// Snapshot returned by status polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub page_count: usize,
    pub progress: PageCounts,
    pub pages: Vec<PageProgress>,
    pub failed_pages: Vec<FailedPage>,
    pub languages: String,
    pub failure_policy: FailurePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    /// 1-based numbers of the pages that ended `Failed`.
    pub fn failed_page_numbers(&self) -> Vec<usize> {
        self.failed_pages.iter().map(|p| p.page).collect()
    }
}
