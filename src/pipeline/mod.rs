//! Per-page pipeline stages and the document-level stages around them.
//!
//! Each submodule implements one transformation step, so each can be tested
//! on its own and a provider can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! ingest ──▶ validate ──▶ render ──▶ preprocess ──▶ recognize ──▶ postprocess ──▶ composite
//! (image)    (lopdf)      (pdfium)   (imageproc)    (tesseract)   (cleanup)       (lopdf)
//!                                                                                     │
//!                                                 assemble ◀── fan-in of every page ──┘
//! ```
//!
//! 1. [`ingest`] sniffs the upload and wraps PNG, JPEG, TIFF and BMP images
//!    into a one-page PDF. [`validate`] parses and checks the result; no job
//!    exists before it passes.
//! 2. [`render`], [`preprocess`] and [`recognize`] define the three
//!    capability traits and their production providers. Providers are
//!    blocking; [`engine::run_page`] calls them through `spawn_blocking`
//!    with a timeout per call. Pages that already carry text go through
//!    [`engine::keep_page`] instead, unless OCR is forced.
//! 3. [`postprocess`] drops low-confidence runs and normalises whitespace.
//! 4. [`composite`] turns one recognized page into a single-page fragment
//!    with the original content plus invisible text.
//! 5. [`assemble`] joins the fragments in page order and publishes the
//!    artifact atomically.
//!
//! [`mock`] is an in-process provider for tests and for running the server
//! without native libraries.

pub mod assemble;
pub mod composite;
pub mod engine;
pub mod ingest;
pub mod mock;
pub mod postprocess;
pub mod preprocess;
pub mod recognize;
pub mod render;
pub mod validate;
