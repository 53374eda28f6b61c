//! Input validation: turn raw request bytes into a [`Document`].
//!
//! Nothing here creates a job. Every failure is a [`ValidationError`] that
//! the API reports as a 4xx, and the submission stops there.
//!
//! Checks run cheapest first: size, language set, format sniffing (images
//! are wrapped into a PDF here), then the full `lopdf` parse, encryption,
//! and page count.

use crate::config::{ExistingTextPolicy, FailurePolicy, OcrConfig};
use crate::document::Document;
use crate::error::ValidationError;
use crate::job::JobOptions;
use crate::language::LanguageSet;
use crate::pipeline::ingest::{self, InputKind};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Per-submission options, as accepted on the query string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    /// `eng`, `pan+eng`, or `pan,eng`. Falls back to the configured default.
    pub languages: Option<String>,
    /// Reject documents with more pages than this. Capped by `max_pages`.
    pub page_limit: Option<usize>,
    /// Overrides the configured policy for this job.
    pub failure_policy: Option<FailurePolicy>,
    /// Overrides the configured treatment of pages that already have text.
    pub existing_text: Option<ExistingTextPolicy>,
}

impl SubmitOptions {
    pub fn languages(mut self, spec: impl Into<String>) -> Self {
        self.languages = Some(spec.into());
        self
    }

    pub fn page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn existing_text(mut self, policy: ExistingTextPolicy) -> Self {
        self.existing_text = Some(policy);
        self
    }
}

/// A document that passed validation, with the options resolved against
/// the service configuration.
#[derive(Debug)]
pub struct Validated {
    pub document: Document,
    pub options: JobOptions,
}

/// Validate `bytes` and `options`. Synchronous and CPU-bound; the scheduler
/// calls it from `spawn_blocking`.
pub fn validate(
    bytes: Arc<[u8]>,
    options: &SubmitOptions,
    config: &OcrConfig,
) -> Result<Validated, ValidationError> {
    if bytes.len() > config.max_document_bytes {
        return Err(ValidationError::TooLarge {
            size: bytes.len(),
            max: config.max_document_bytes,
        });
    }

    let languages = resolve_languages(options.languages.as_deref(), config)?;

    let bytes: Arc<[u8]> = match ingest::sniff(&bytes) {
        Some(InputKind::Pdf) => bytes,
        Some(InputKind::Image(format)) => {
            Arc::from(ingest::image_to_pdf(&bytes, format, config.image_dpi)?)
        }
        None => {
            return Err(ValidationError::Malformed {
                detail: "neither a PDF nor a PNG, JPEG, TIFF or BMP image".to_string(),
            })
        }
    };

    let pdf = match lopdf::Document::load_mem(&bytes) {
        Ok(pdf) => pdf,
        Err(e) if mentions_encryption(&bytes) => {
            debug!("Encrypted document failed to load: {e}");
            return Err(ValidationError::Encrypted);
        }
        Err(e) => {
            return Err(ValidationError::Malformed {
                detail: e.to_string(),
            })
        }
    };
    if pdf.trailer.get(b"Encrypt").is_ok() {
        return Err(ValidationError::Encrypted);
    }

    let document = Document::from_parts(bytes, pdf);
    let pages = document.page_count();
    if pages == 0 {
        return Err(ValidationError::EmptyDocument);
    }
    let limit = options
        .page_limit
        .map_or(config.max_pages, |l| l.min(config.max_pages));
    if pages > limit {
        return Err(ValidationError::PageLimitExceeded { pages, limit });
    }

    debug!(
        pages,
        text_pages = document.text_page_count(),
        bytes = document.bytes().len(),
        version = %document.metadata().pdf_version,
        languages = %languages,
        "Document validated"
    );

    Ok(Validated {
        document,
        options: JobOptions {
            languages,
            failure_policy: options.failure_policy.unwrap_or(config.failure_policy),
            existing_text: options.existing_text.unwrap_or(config.existing_text),
        },
    })
}

/// Parse the requested language set (or the default) and check every code
/// against the supported list.
pub fn resolve_languages(
    requested: Option<&str>,
    config: &OcrConfig,
) -> Result<LanguageSet, ValidationError> {
    let spec = requested
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(config.default_languages.as_str());
    let set = LanguageSet::parse(spec)?;
    set.ensure_supported(&config.supported_languages)?;
    Ok(set)
}

fn mentions_encryption(bytes: &[u8]) -> bool {
    bytes.windows(8).any(|w| w == b"/Encrypt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mock::{sample_image, sample_pdf};
    use image::ImageFormat;

    fn config() -> OcrConfig {
        OcrConfig::builder()
            .supported_languages(["eng", "pan"])
            .max_pages(10)
            .build()
            .unwrap()
    }

    fn run(bytes: Vec<u8>, options: SubmitOptions) -> Result<Validated, ValidationError> {
        validate(Arc::from(bytes), &options, &config())
    }

    #[test]
    fn accepts_clean_document() {
        let v = run(sample_pdf(3, None), SubmitOptions::default().languages("pan+eng")).unwrap();
        assert_eq!(v.document.page_count(), 3);
        assert_eq!(v.options.languages.to_engine_arg(), "pan+eng");
        assert_eq!(v.options.failure_policy, FailurePolicy::FailClosed);
    }

    #[test]
    fn rejects_garbage() {
        let err = run(b"hello, this is not a pdf".to_vec(), SubmitOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed { .. }));
    }

    #[test]
    fn rejects_truncated_pdf() {
        let mut bytes = sample_pdf(2, None);
        bytes.truncate(40);
        let err = run(bytes, SubmitOptions::default()).unwrap_err();
        assert!(
            matches!(
                err,
                ValidationError::Malformed { .. } | ValidationError::EmptyDocument
            ),
            "{err:?}"
        );
    }

    #[test]
    fn rejects_unsupported_language_before_parsing() {
        let err = run(b"junk".to_vec(), SubmitOptions::default().languages("fra")).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedLanguage { .. }));
    }

    #[test]
    fn page_limit_is_capped_by_config() {
        let err = run(sample_pdf(4, None), SubmitOptions::default().page_limit(3)).unwrap_err();
        assert_eq!(err, ValidationError::PageLimitExceeded { pages: 4, limit: 3 });

        let err = run(sample_pdf(11, None), SubmitOptions::default().page_limit(50)).unwrap_err();
        assert_eq!(err, ValidationError::PageLimitExceeded { pages: 11, limit: 10 });
    }

    #[test]
    fn rejects_oversized_body() {
        let config = OcrConfig::builder().max_document_bytes(16).build().unwrap();
        let err = validate(Arc::from(sample_pdf(1, None)), &SubmitOptions::default(), &config)
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { max: 16, .. }));
    }

    #[test]
    fn images_become_one_page_documents() {
        for format in [ImageFormat::Jpeg, ImageFormat::Tiff, ImageFormat::Bmp] {
            let v = run(sample_image(300, 150, format), SubmitOptions::default()).unwrap();
            assert_eq!(v.document.page_count(), 1, "{format:?}");
            assert!(v.document.bytes().starts_with(b"%PDF-"));
            let (w, h) = v.document.page_geometry(0).unwrap().display_size();
            assert!((w - 72.0).abs() < 0.01 && (h - 36.0).abs() < 0.01, "{w}x{h}");
            assert!(!v.document.page_has_text(0));
        }
    }

    #[test]
    fn image_size_limit_applies_to_the_upload() {
        let config = OcrConfig::builder().max_document_bytes(64).build().unwrap();
        let upload = sample_image(200, 200, ImageFormat::Bmp);
        let err = validate(Arc::from(upload), &SubmitOptions::default(), &config).unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { max: 64, .. }));
    }

    #[test]
    fn submission_policy_overrides_config() {
        let v = run(
            sample_pdf(1, None),
            SubmitOptions::default().failure_policy(FailurePolicy::BestEffort),
        )
        .unwrap();
        assert_eq!(v.options.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(v.options.existing_text, ExistingTextPolicy::Skip);

        let v = run(
            sample_pdf(1, None),
            SubmitOptions::default().existing_text(ExistingTextPolicy::Ocr),
        )
        .unwrap();
        assert_eq!(v.options.existing_text, ExistingTextPolicy::Ocr);
    }
}
