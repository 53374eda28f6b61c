//! Error types for the ocrlayer library.
//!
//! Errors come in two tiers, mirroring the two places a failure can land:
//!
//! * [`OcrError`] is **fatal for the request**: the submission is rejected
//!   (bad input, no capacity), a query cannot be answered (unknown job, not
//!   ready), or the final artifact cannot be produced. Returned as
//!   `Err(OcrError)` from [`crate::OcrService`] and mapped to HTTP statuses
//!   in [`crate::api`].
//!
//! * [`PageError`] is **non-fatal**: one page could not be processed. Stored
//!   on the page task and surfaced through the job status with page-level
//!   granularity. Whether the job survives it depends on the
//!   [`crate::config::FailurePolicy`].
//!
//! Capability providers report [`EngineError`] and classify their own
//! failures as transient or permanent; [`PageError::is_retryable`] is the
//! only place the scheduler looks to decide whether to try a page again.

use crate::job::{JobId, JobState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All request-level errors returned by the ocrlayer library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Submission errors ─────────────────────────────────────────────────
    /// The document or its options were rejected before a job was created.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Admission queue is full; the caller should retry later.
    #[error("Queue is full: {requested} pages requested, {available}/{capacity} slots free")]
    ResourceExhausted {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    /// The service is draining and no longer accepts jobs.
    #[error("Service is shutting down and no longer accepts jobs")]
    ShuttingDown,

    // ── Job store errors ──────────────────────────────────────────────────
    /// No job with this id exists (never created, or swept after retention).
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    /// The job has not reached a terminal state yet.
    #[error("Job {id} is not finished (state: {state})")]
    NotReady { id: JobId, state: JobState },

    /// The job is terminal but produced no artifact (failed or cancelled).
    #[error("Job {id} ended {state} and has no artifact")]
    NoArtifact { id: JobId, state: JobState },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The final document could not be assembled.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// Reading or writing the artifact store failed.
    #[error("Artifact storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a submission is rejected before any job exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Bytes are not a parseable PDF.
    #[error("Malformed document: {detail}")]
    Malformed { detail: String },

    /// Body exceeds the configured size limit.
    #[error("Document is {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// PDF parsed but has no pages.
    #[error("Document has no pages")]
    EmptyDocument,

    /// PDF is encrypted; passwords are not supported.
    #[error("Document is encrypted")]
    Encrypted,

    /// Language code is not syntactically valid (e.g. `eng`, `chi_sim`).
    #[error("Invalid language code '{code}'")]
    InvalidLanguage { code: String },

    /// Language code is well-formed but not installed/allowed.
    #[error("Unsupported language '{code}' (supported: {supported})")]
    UnsupportedLanguage { code: String, supported: String },

    /// Page count exceeds the effective limit.
    #[error("Document has {pages} pages, limit is {limit}")]
    PageLimitExceeded { pages: usize, limit: usize },
}

/// A failure reported by a capability provider (rasterizer, preprocessor,
/// recognizer). Providers classify their own failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Crash, resource exhaustion, or other flakiness; worth retrying.
    #[error("transient engine failure: {detail}")]
    Transient { detail: String },

    /// The input itself cannot be processed (corrupt image, bad page).
    #[error("permanent engine failure: {detail}")]
    Permanent { detail: String },

    /// The engine has no model for this language.
    #[error("language '{code}' is not available in the engine")]
    UnsupportedLanguage { code: String },
}

impl EngineError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient {
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::Permanent {
            detail: detail.into(),
        }
    }
}

/// The pipeline stage a page error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Rasterize,
    Preprocess,
    Recognize,
    Composite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Rasterize => "rasterize",
            Stage::Preprocess => "preprocess",
            Stage::Recognize => "recognize",
            Stage::Composite => "composite",
        })
    }
}

/// A non-fatal error for a single page.
///
/// Stored on the page task; the last one recorded for a `Failed` page is
/// what the status endpoint reports.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// Capability provider failed.
    #[error("{stage} failed ({}): {detail}", transience(.transient))]
    Engine {
        stage: Stage,
        transient: bool,
        detail: String,
    },

    /// Capability call exceeded the per-call timeout.
    #[error("{stage} timed out after {after_ms}ms")]
    Timeout { stage: Stage, after_ms: u64 },

    /// The engine rejected the request itself (e.g. a language it lacks).
    #[error("{stage} rejected the request: {detail}")]
    Validation { stage: Stage, detail: String },

    /// Recognized geometry could not be mapped onto the page.
    #[error("composition failed: {detail}")]
    Composition { detail: String },
}

impl PageError {
    /// Wrap a provider failure with the stage it happened in.
    pub fn from_engine(stage: Stage, err: EngineError) -> Self {
        match err {
            EngineError::Transient { detail } => PageError::Engine {
                stage,
                transient: true,
                detail,
            },
            EngineError::Permanent { detail } => PageError::Engine {
                stage,
                transient: false,
                detail,
            },
            EngineError::UnsupportedLanguage { code } => PageError::Validation {
                stage,
                detail: format!("unsupported language '{code}'"),
            },
        }
    }

    /// Transient engine failures and timeouts are retried; everything else
    /// is final on the first occurrence.
    pub fn is_retryable(&self) -> bool {
        match self {
            PageError::Engine { transient, .. } => *transient,
            PageError::Timeout { .. } => true,
            PageError::Validation { .. } | PageError::Composition { .. } => false,
        }
    }

    /// Short machine-readable kind, used in status payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PageError::Engine { .. } => "engine",
            PageError::Timeout { .. } => "timeout",
            PageError::Validation { .. } => "validation",
            PageError::Composition { .. } => "composition",
        }
    }
}

fn transience(transient: &bool) -> &'static str {
    if *transient {
        "transient"
    } else {
        "permanent"
    }
}

impl From<CompositionError> for PageError {
    fn from(err: CompositionError) -> Self {
        PageError::Composition {
            detail: err.to_string(),
        }
    }
}

/// Recognized layout could not be placed on the original page.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompositionError {
    /// Raster proportions do not match the page they were rendered from.
    #[error(
        "raster {raster_width}x{raster_height}px does not match page {page_width:.1}x{page_height:.1}pt"
    )]
    GeometryMismatch {
        raster_width: u32,
        raster_height: u32,
        page_width: f32,
        page_height: f32,
    },

    /// The page index does not exist in the source document.
    #[error("page {index} not found in source document")]
    MissingPage { index: usize },

    /// The PDF structure could not be read or written.
    #[error("PDF error: {0}")]
    Pdf(String),
}

/// Final document assembly failed. Always fails the job.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssemblyError {
    /// The fan-in barrier handed over the wrong number of fragments.
    #[error("expected {expected} page fragments, got {actual}")]
    FragmentCountMismatch { expected: usize, actual: usize },

    /// Fragments are not in page order.
    #[error("fragment for page index {found} found at position {position}")]
    OutOfOrder { position: usize, found: usize },

    /// A fragment could not be parsed or the output could not be serialised.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// The temporary output could not be written or published.
    #[error("failed to write '{path}': {detail}")]
    Write { path: PathBuf, detail: String },
}
