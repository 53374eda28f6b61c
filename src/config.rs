//! Configuration for the OCR pipeline and the HTTP service.
//!
//! Pipeline and scheduler behaviour is controlled through [`OcrConfig`],
//! built via its [`OcrConfigBuilder`] or deserialised from a config file.
//! Every field has a default, so a config file only needs the keys it
//! changes. The server binary wraps it in [`Settings`] together with the
//! listen address and loads both with [`Settings::load`].

use crate::error::OcrError;
use crate::language::LanguageSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound accepted for [`OcrConfig::max_retries`].
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Configuration for the OCR pipeline, scheduler, and job store.
///
/// # Example
/// ```rust
/// use ocrlayer::{FailurePolicy, OcrConfig};
///
/// let config = OcrConfig::builder()
///     .workers(8)
///     .dpi(300)
///     .failure_policy(FailurePolicy::BestEffort)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Size of the shared worker pool (`W`). Default: 4.
    ///
    /// At most this many pages are inside the pipeline at once, across all
    /// jobs. Recognition is CPU-bound, so this is usually the core count.
    pub workers: usize,

    /// Rasterisation DPI. Range: 72–600. Default: 300.
    ///
    /// 300 DPI is the usual recognition sweet spot; below 200 small print
    /// starts to lose accuracy.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 6000.
    ///
    /// Caps the longest edge independently of DPI so an oversized page
    /// cannot exhaust memory. Scaling is uniform, so the compositor can still
    /// map the raster back onto the page.
    pub max_rendered_pixels: u32,

    /// Straighten rotated scans before recognition. Default: false.
    pub deskew: bool,

    /// Remove speckle noise before recognition. Default: false.
    pub denoise: bool,

    /// Timeout for each capability call (rasterize, preprocess, recognize)
    /// in milliseconds. Default: 60 000.
    pub call_timeout_ms: u64,

    /// Retries after the first attempt on a retryable page error. Default: 3.
    ///
    /// A page runs at most `max_retries + 1` times. Range: 0–100.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound on a single backoff delay in milliseconds. Default: 8000.
    pub retry_backoff_max_ms: u64,

    /// What happens to a job when some pages fail. Default: fail-closed.
    pub failure_policy: FailurePolicy,

    /// What happens to pages that already carry text. Default: skip.
    pub existing_text: ExistingTextPolicy,

    /// Resolution assumed for uploaded images when they are wrapped into a
    /// one-page PDF. Range: 72–600. Default: 300.
    pub image_dpi: u32,

    /// Language codes submissions may ask for. Default: `["eng"]`.
    pub supported_languages: Vec<String>,

    /// Languages used when a submission names none. Default: `eng`.
    pub default_languages: String,

    /// Maximum pages per document. Default: 500.
    pub max_pages: usize,

    /// Maximum document size in bytes. Default: 256 MiB.
    pub max_document_bytes: usize,

    /// Admission bound, counted in pages queued or running. Default: 1024.
    pub queue_capacity: usize,

    /// What a submission does when the queue is full. Default: reject.
    pub admission_mode: AdmissionMode,

    /// How long a `wait` admission may block in milliseconds. Default: 5000.
    ///
    /// Independent of `call_timeout_ms`; neither implies the other.
    pub admission_timeout_ms: u64,

    /// Recognized runs below this confidence are dropped. Default: 0.0.
    pub min_confidence: f32,

    /// How long terminal jobs and their artifacts are kept, in seconds.
    /// Default: 3600.
    pub retention_secs: u64,

    /// How often the retention sweep runs, in seconds. Default: 60.
    pub sweep_interval_secs: u64,

    /// Where final artifacts are published. Default: `./data/artifacts`.
    pub artifact_dir: PathBuf,

    /// Which capability providers to use. Default: pdfium + tesseract.
    pub engine: EngineKind,

    /// Explicit path to libpdfium. Default: search the system library path.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Tesseract executable. Default: `tesseract` (resolved through PATH).
    pub tesseract_path: String,

    /// Tesseract page segmentation mode. Default: 3 (fully automatic).
    pub tesseract_psm: u8,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dpi: 300,
            max_rendered_pixels: 6000,
            deskew: false,
            denoise: false,
            call_timeout_ms: 60_000,
            max_retries: 3,
            retry_backoff_ms: 500,
            retry_backoff_max_ms: 8_000,
            failure_policy: FailurePolicy::default(),
            existing_text: ExistingTextPolicy::default(),
            image_dpi: 300,
            supported_languages: vec!["eng".to_string()],
            default_languages: "eng".to_string(),
            max_pages: 500,
            max_document_bytes: 256 * 1024 * 1024,
            queue_capacity: 1024,
            admission_mode: AdmissionMode::default(),
            admission_timeout_ms: 5_000,
            min_confidence: 0.0,
            retention_secs: 3_600,
            sweep_interval_secs: 60,
            artifact_dir: PathBuf::from("./data/artifacts"),
            engine: EngineKind::default(),
            pdfium_lib_path: None,
            tesseract_path: "tesseract".to_string(),
            tesseract_psm: 3,
        }
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            max_delay: Duration::from_millis(self.retry_backoff_max_ms),
        }
    }

    pub fn preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions {
            deskew: self.deskew,
            denoise: self.denoise,
        }
    }

    /// Check cross-field constraints. Called by the builder and by
    /// [`Settings::load`].
    pub fn validate(&self) -> Result<(), OcrError> {
        if !(72..=600).contains(&self.dpi) {
            return Err(OcrError::InvalidConfig(format!(
                "dpi must be 72–600, got {}",
                self.dpi
            )));
        }
        if !(72..=600).contains(&self.image_dpi) {
            return Err(OcrError::InvalidConfig(format!(
                "image_dpi must be 72–600, got {}",
                self.image_dpi
            )));
        }
        if self.workers == 0 {
            return Err(OcrError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(OcrError::InvalidConfig("queue_capacity must be ≥ 1".into()));
        }
        if self.max_pages == 0 {
            return Err(OcrError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(OcrError::InvalidConfig(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.max_retries
            )));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_ms {
            return Err(OcrError::InvalidConfig(format!(
                "retry_backoff_max_ms ({}) is below retry_backoff_ms ({})",
                self.retry_backoff_max_ms, self.retry_backoff_ms
            )));
        }
        if self.supported_languages.is_empty() {
            return Err(OcrError::InvalidConfig(
                "supported_languages must not be empty".into(),
            ));
        }
        for code in &self.supported_languages {
            LanguageSet::parse(code)
                .map_err(|e| OcrError::InvalidConfig(format!("supported_languages: {e}")))?;
        }
        LanguageSet::parse(&self.default_languages)
            .and_then(|set| set.ensure_supported(&self.supported_languages))
            .map_err(|e| OcrError::InvalidConfig(format!("default_languages: {e}")))?;
        Ok(())
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn deskew(mut self, v: bool) -> Self {
        self.config.deskew = v;
        self
    }

    pub fn denoise(mut self, v: bool) -> Self {
        self.config.denoise = v;
        self
    }

    pub fn call_timeout_ms(mut self, ms: u64) -> Self {
        self.config.call_timeout_ms = ms;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, base: u64, ceiling: u64) -> Self {
        self.config.retry_backoff_ms = base;
        self.config.retry_backoff_max_ms = ceiling;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn existing_text(mut self, policy: ExistingTextPolicy) -> Self {
        self.config.existing_text = policy;
        self
    }

    pub fn image_dpi(mut self, dpi: u32) -> Self {
        self.config.image_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn supported_languages<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.supported_languages = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_languages(mut self, spec: impl Into<String>) -> Self {
        self.config.default_languages = spec.into();
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_document_bytes(mut self, n: usize) -> Self {
        self.config.max_document_bytes = n;
        self
    }

    pub fn queue_capacity(mut self, pages: usize) -> Self {
        self.config.queue_capacity = pages;
        self
    }

    pub fn admission(mut self, mode: AdmissionMode, timeout_ms: u64) -> Self {
        self.config.admission_mode = mode;
        self.config.admission_timeout_ms = timeout_ms;
        self
    }

    pub fn min_confidence(mut self, c: f32) -> Self {
        self.config.min_confidence = c.clamp(0.0, 1.0);
        self
    }

    pub fn retention_secs(mut self, secs: u64) -> Self {
        self.config.retention_secs = secs;
        self
    }

    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.artifact_dir = dir.into();
        self
    }

    pub fn engine(mut self, kind: EngineKind) -> Self {
        self.config.engine = kind;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<String>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Job-level policy for pages that end `Failed`.
///
/// | Policy | Any page failed | Artifact |
/// |--------|-----------------|----------|
/// | `fail-closed` | job `Failed` | none |
/// | `best-effort` | job `PartiallyFailed` | failed pages kept without a text layer |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any failed page fails the whole job. (default)
    #[default]
    FailClosed,
    /// Assemble what succeeded; failed pages keep their original image only.
    BestEffort,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-closed" | "fail_closed" => Ok(Self::FailClosed),
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            other => Err(format!(
                "unknown failure policy '{other}' (expected fail-closed or best-effort)"
            )),
        }
    }
}

/// Treatment of pages whose content already shows text, either born-digital
/// or carrying an earlier OCR layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExistingTextPolicy {
    /// Keep the page as it is, without recognition. (default)
    #[default]
    Skip,
    /// Recognize it anyway and add a layer on top of the existing text.
    Ocr,
}

impl std::str::FromStr for ExistingTextPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "ocr" => Ok(Self::Ocr),
            other => Err(format!(
                "unknown existing-text policy '{other}' (expected skip or ocr)"
            )),
        }
    }
}

/// Backpressure behaviour when the admission queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionMode {
    /// Fail immediately with `ResourceExhausted`. (default)
    #[default]
    Reject,
    /// Block the submitter up to `admission_timeout_ms`, then fail.
    Wait,
}

/// Which capability providers back the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// pdfium rasterizer, image/imageproc preprocessor, tesseract recognizer.
    #[default]
    PdfiumTesseract,
    /// Deterministic in-process engine; no native libraries needed.
    Mock,
}

/// Retry schedule for retryable page errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Total attempts a page may use.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before attempt `next_attempt` (2-based: the first retry is
    /// attempt 2). Doubles each time: 500 ms → 1 s → 2 s …, capped.
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Preprocessing switches handed to the preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreprocessOptions {
    pub deskew: bool,
    pub denoise: bool,
}

impl PreprocessOptions {
    pub fn is_enabled(&self) -> bool {
        self.deskew || self.denoise
    }
}

// ── Service settings ─────────────────────────────────────────────────────

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long shutdown waits for in-flight jobs, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_grace_secs: 30,
        }
    }
}

/// Everything the server binary reads at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub ocr: OcrConfig,
}

impl Settings {
    /// Load settings from an optional file overlaid by `OCRLAYER__*`
    /// environment variables (e.g. `OCRLAYER__OCR__WORKERS=8`).
    ///
    /// Without an explicit path, `ocrlayer.toml` in the working directory is
    /// used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, OcrError> {
        use ::config::{Config, Environment, File};

        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("ocrlayer").required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("OCRLAYER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ocr.supported_languages")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| OcrError::InvalidConfig(format!("Failed to build config: {e}")))?
            .try_deserialize()
            .map_err(|e| OcrError::InvalidConfig(format!("Failed to deserialize config: {e}")))?;

        settings.ocr.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        OcrConfig::default().validate().unwrap();
    }

    #[test]
    fn builder_clamps_and_validates() {
        let config = OcrConfig::builder().dpi(10).workers(0).build().unwrap();
        assert_eq!(config.dpi, 72);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn default_languages_must_be_supported() {
        let err = OcrConfig::builder()
            .supported_languages(["eng"])
            .default_languages("pan+eng")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("pan"), "got: {err}");
    }

    #[test]
    fn backoff_ceiling_below_base_is_rejected() {
        assert!(OcrConfig::builder()
            .retry_backoff_ms(1000, 10)
            .build()
            .is_err());
    }

    #[test]
    fn oversized_retry_budget_is_rejected() {
        let err = OcrConfig::builder()
            .max_retries(u32::MAX)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_retries"), "got: {err}");
        assert!(OcrConfig::builder()
            .max_retries(MAX_RETRIES_LIMIT)
            .build()
            .is_ok());
    }

    #[test]
    fn existing_text_policy_parses() {
        assert_eq!(
            "ocr".parse::<ExistingTextPolicy>().unwrap(),
            ExistingTextPolicy::Ocr
        );
        assert_eq!(OcrConfig::default().existing_text, ExistingTextPolicy::Skip);
        assert!("maybe".parse::<ExistingTextPolicy>().is_err());
    }

    #[test]
    fn max_attempts_saturates() {
        let policy = RetryPolicy {
            max_retries: u32::MAX,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        assert_eq!(policy.max_attempts(), u32::MAX);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
        };
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(1500));
        assert_eq!(policy.delay_before(40), Duration::from_millis(1500));
    }

    #[test]
    fn failure_policy_parses_kebab_and_snake() {
        assert_eq!(
            "best-effort".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::BestEffort
        );
        assert_eq!(
            "fail_closed".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::FailClosed
        );
        assert!("lenient".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn settings_deserialize_with_partial_keys() {
        let settings: Settings = serde_json::from_str(
            r#"{"server": {"port": 9000}, "ocr": {"workers": 2, "failure_policy": "best-effort"}}"#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.ocr.workers, 2);
        assert_eq!(settings.ocr.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(settings.ocr.dpi, 300);
    }
}
