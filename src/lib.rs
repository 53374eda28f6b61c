//! # ocrlayer
//!
//! Turn scanned PDFs and images into searchable PDFs. Every page keeps its original
//! appearance; recognized text is laid over it as an invisible layer, so the
//! result can be searched, selected, and copied.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF or image bytes
//!  │
//!  ├─ 0. Ingest      images are wrapped into a one-page PDF
//!  ├─ 1. Validate    parse, check pages, size and languages (no job on failure)
//!  ├─ 2. Admit       bounded queue counted in pages, reject or wait when full
//!  │
//!  │   per page, on a shared pool of W workers, any order
//!  │   (pages that already carry text are kept as they are by default):
//!  ├─ 3. Rasterize   pdfium, spawn_blocking
//!  ├─ 4. Preprocess  optional deskew / denoise
//!  ├─ 5. Recognize   tesseract, with retry and backoff on transient failures
//!  ├─ 6. Composite   invisible text over the original page
//!  │
//!  ├─ 7. Assemble    fan-in barrier, fragments in page order
//!  └─ 8. Publish     atomic rename into the artifact directory
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocrlayer::{ocr_bytes, OcrConfig, SubmitOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scan = std::fs::read("scan.pdf")?;
//!     let config = OcrConfig::builder().workers(4).build()?;
//!     let output = ocr_bytes(scan, SubmitOptions::default().languages("eng"), config).await?;
//!     std::fs::write("searchable.pdf", &output.pdf)?;
//!     eprintln!("{} pages, state {}", output.status.page_count, output.status.state);
//!     Ok(())
//! }
//! ```
//!
//! Long-running callers keep an [`OcrService`] and go through
//! [`OcrService::submit`], [`OcrService::status`] and
//! [`OcrService::result`]; [`api::router`] exposes the same over HTTP.
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | Enables the `ocrlayer` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `server` when embedding the library:
//! ```toml
//! ocrlayer = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod document;
pub mod error;
pub mod job;
pub mod language;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AdmissionMode, EngineKind, ExistingTextPolicy, FailurePolicy, OcrConfig, OcrConfigBuilder,
    ServerConfig, Settings,
};
pub use document::{Document, DocumentMetadata, PageGeometry};
pub use error::{AssemblyError, EngineError, OcrError, PageError, Stage, ValidationError};
pub use job::{CancelOutcome, JobId, JobState, JobStatus, PageState};
pub use language::LanguageSet;
pub use pipeline::engine::EngineSet;
pub use pipeline::mock::{sample_image, sample_pdf, text_pdf, MockEngine, MockFailure};
pub use pipeline::validate::SubmitOptions;
pub use progress::{NoopObserver, PipelineObserver, SharedObserver};
pub use service::{ocr_bytes, ExtractedText, Health, OcrOutput, OcrService, PageText};
