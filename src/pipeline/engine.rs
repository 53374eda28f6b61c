//! The capability set and the per-page pipeline that drives it.
//!
//! ```text
//! rasterize ──▶ preprocess ──▶ recognize ──▶ postprocess ──▶ composite
//!  (engine)      (engine,        (engine)      (pure)         (lopdf)
//!                 optional)
//! ```
//!
//! Every engine call is synchronous. [`run_page`] moves each one onto the
//! blocking pool with `spawn_blocking` and bounds it with the per-call
//! timeout. A call that overruns is reported as [`PageError::Timeout`]; the
//! blocking thread is left to finish on its own, because an external
//! engine cannot be interrupted mid-call.

use crate::config::{EngineKind, OcrConfig, PreprocessOptions};
use crate::document::Document;
use crate::error::{PageError, Stage};
use crate::language::LanguageSet;
use crate::pipeline::composite::{compose, placeholder, PageFragment};
use crate::pipeline::mock::MockEngine;
use crate::pipeline::postprocess;
use crate::pipeline::preprocess::{ImagePreprocessor, Preprocessed, Preprocessor};
use crate::pipeline::recognize::{Recognizer, TesseractRecognizer};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The three capability providers a page needs, behind trait objects so
/// the real engines and the mock are interchangeable.
#[derive(Clone)]
pub struct EngineSet {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub preprocessor: Arc<dyn Preprocessor>,
    pub recognizer: Arc<dyn Recognizer>,
}

impl EngineSet {
    pub fn from_config(config: &OcrConfig) -> Self {
        match config.engine {
            EngineKind::PdfiumTesseract => Self {
                rasterizer: Arc::new(PdfiumRasterizer::new(
                    config.pdfium_lib_path.clone(),
                    config.max_rendered_pixels,
                )),
                preprocessor: Arc::new(ImagePreprocessor),
                recognizer: Arc::new(TesseractRecognizer::new(
                    config.tesseract_path.clone(),
                    config.tesseract_psm,
                )),
            },
            EngineKind::Mock => Self::uniform(Arc::new(MockEngine::new())),
        }
    }

    /// Use one value for all three capabilities.
    pub fn uniform<E>(engine: Arc<E>) -> Self
    where
        E: Rasterizer + Preprocessor + Recognizer + 'static,
    {
        Self {
            rasterizer: engine.clone(),
            preprocessor: engine.clone(),
            recognizer: engine,
        }
    }
}

impl std::fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSet").finish_non_exhaustive()
    }
}

/// The slice of [`OcrConfig`] a single page run needs.
#[derive(Debug, Clone, Copy)]
pub struct PageSettings {
    pub dpi: u32,
    pub preprocess: PreprocessOptions,
    pub call_timeout: Duration,
    pub min_confidence: f32,
}

impl PageSettings {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            dpi: config.dpi,
            preprocess: config.preprocess_options(),
            call_timeout: config.call_timeout(),
            min_confidence: config.min_confidence,
        }
    }
}

/// Run one attempt of the page pipeline for page `index` of `document`.
pub async fn run_page(
    engines: &EngineSet,
    settings: PageSettings,
    document: Arc<Document>,
    index: usize,
    languages: LanguageSet,
) -> Result<PageFragment, PageError> {
    let page = index + 1;
    let timeout = settings.call_timeout;

    // ── Rasterize ────────────────────────────────────────────────────────
    let t = Instant::now();
    let raster = {
        let rasterizer = Arc::clone(&engines.rasterizer);
        let document = Arc::clone(&document);
        let dpi = settings.dpi;
        run_blocking(Stage::Rasterize, timeout, move || {
            rasterizer
                .rasterize(&document, index, dpi)
                .map_err(|e| PageError::from_engine(Stage::Rasterize, e))
        })
        .await?
    };
    debug!(page, elapsed_ms = t.elapsed().as_millis() as u64, "rasterize");

    // ── Preprocess ───────────────────────────────────────────────────────
    let prepared = if settings.preprocess.is_enabled() {
        let t = Instant::now();
        let preprocessor = Arc::clone(&engines.preprocessor);
        let options = settings.preprocess;
        let prepared = run_blocking(Stage::Preprocess, timeout, move || {
            preprocessor
                .clean(raster, options)
                .map_err(|e| PageError::from_engine(Stage::Preprocess, e))
        })
        .await?;
        debug!(page, elapsed_ms = t.elapsed().as_millis() as u64, "preprocess");
        prepared
    } else {
        Preprocessed::unchanged(raster)
    };
    let rotation = prepared.rotation_degrees;

    // ── Recognize ────────────────────────────────────────────────────────
    let t = Instant::now();
    let result = {
        let recognizer = Arc::clone(&engines.recognizer);
        run_blocking(Stage::Recognize, timeout, move || {
            recognizer
                .recognize(&prepared.image, &languages)
                .map_err(|e| PageError::from_engine(Stage::Recognize, e))
        })
        .await?
    };
    let result = postprocess::clean_result(result.for_page(index, rotation), settings.min_confidence);
    debug!(
        page,
        runs = result.runs.len(),
        elapsed_ms = t.elapsed().as_millis() as u64,
        "recognize"
    );

    // ── Composite ────────────────────────────────────────────────────────
    let t = Instant::now();
    let fragment = run_blocking(Stage::Composite, timeout, move || {
        compose(&document, &result).map_err(PageError::from)
    })
    .await?;
    debug!(page, elapsed_ms = t.elapsed().as_millis() as u64, "composite");
    Ok(fragment)
}

/// Pass page `index` through as it is, with no recognition and no text
/// layer. Used for pages that already have text of their own.
pub async fn keep_page(
    document: Arc<Document>,
    index: usize,
    timeout: Duration,
) -> Result<PageFragment, PageError> {
    let fragment = run_blocking(Stage::Composite, timeout, move || {
        placeholder(&document, index).map_err(PageError::from)
    })
    .await?;
    debug!(page = index + 1, "Page already has text, kept as is");
    Ok(fragment)
}

/// Run a synchronous call on the blocking pool, bounded by `timeout`.
///
/// A panic inside the call is reported as a transient engine failure of
/// `stage`, so it counts against the page's retry budget like a crash of an
/// external engine would.
pub async fn run_blocking<T, F>(stage: Stage, timeout: Duration, f: F) -> Result<T, PageError>
where
    F: FnOnce() -> Result<T, PageError> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(PageError::Timeout {
            stage,
            after_ms: timeout.as_millis() as u64,
        }),
        Ok(Err(join)) => Err(PageError::Engine {
            stage,
            transient: true,
            detail: format!("{stage} task panicked: {join}"),
        }),
        Ok(Ok(result)) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::pipeline::assemble::{assemble, text_layer};
    use crate::pipeline::mock::{test_document, MockFailure};

    fn settings() -> PageSettings {
        PageSettings {
            dpi: 72,
            preprocess: PreprocessOptions::default(),
            call_timeout: Duration::from_secs(5),
            min_confidence: 0.0,
        }
    }

    fn eng() -> LanguageSet {
        LanguageSet::parse("eng").unwrap()
    }

    #[tokio::test]
    async fn page_runs_through_every_stage() {
        let engines = EngineSet::uniform(Arc::new(MockEngine::new()));
        let doc = Arc::new(test_document(3));
        let mut fragments = Vec::new();
        for index in 0..3 {
            let fragment = run_page(&engines, settings(), Arc::clone(&doc), index, eng())
                .await
                .unwrap();
            assert_eq!(fragment.index, index);
            assert!(fragment.has_text_layer);
            assert_eq!(fragment.run_count, 1);
            fragments.push(fragment);
        }

        let bytes = assemble(fragments, 3, doc.metadata()).unwrap();
        assert_eq!(
            text_layer(&bytes).unwrap(),
            ["page 1 text", "page 2 text", "page 3 text"]
        );
    }

    #[tokio::test]
    async fn engine_failures_carry_their_stage() {
        let engine = MockEngine::new().with_failure(0, MockFailure::Permanent);
        let engines = EngineSet::uniform(Arc::new(engine));
        let err = run_page(&engines, settings(), Arc::new(test_document(1)), 0, eng())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PageError::from_engine(Stage::Recognize, EngineError::permanent("mock: page 1 is unreadable"))
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let engine = MockEngine::new().with_failure(0, MockFailure::Hang(Duration::from_millis(400)));
        let engines = EngineSet::uniform(Arc::new(engine));
        let settings = PageSettings {
            call_timeout: Duration::from_millis(50),
            ..settings()
        };
        let err = run_page(&engines, settings, Arc::new(test_document(1)), 0, eng())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PageError::Timeout {
                stage: Stage::Recognize,
                after_ms: 50
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn panics_become_transient_failures() {
        let err = run_blocking::<(), _>(Stage::Preprocess, Duration::from_secs(1), || {
            panic!("boom")
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PageError::Engine {
                stage: Stage::Preprocess,
                transient: true,
                ..
            }
        ));
    }
}
