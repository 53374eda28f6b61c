//! Deterministic in-process engine, plus small PDF fixtures.
//!
//! [`MockEngine`] implements all three capabilities without native
//! libraries. Its rasters are blank pages of the right size with the page
//! index encoded in the top-left pixel, so the recognizer knows which page
//! it is looking at and emits `"page N text"` (1-based) for it. Failures,
//! hangs and delays can be injected per page to exercise the scheduler.

use crate::config::PreprocessOptions;
use crate::document::Document;
use crate::error::{EngineError, Stage};
use crate::language::LanguageSet;
use crate::pipeline::preprocess::{Preprocessed, Preprocessor};
use crate::pipeline::recognize::{BoundingBox, RecognitionResult, Recognizer, TextRun};
use crate::pipeline::render::Rasterizer;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Object, Stream};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::time::Duration;

/// What the mock engine does for a given page at a given stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Every call fails with a transient error.
    AlwaysTransient,
    /// The first `n` calls fail transiently, later ones succeed.
    TransientTimes(u32),
    /// Every call fails with a permanent error.
    Permanent,
    /// Every call blocks this long, then succeeds.
    Hang(Duration),
}

#[derive(Debug, Default)]
pub struct MockEngine {
    delay: Duration,
    max_random_delay: Option<Duration>,
    page_delays: HashMap<usize, Duration>,
    failures: HashMap<(Stage, usize), MockFailure>,
    unsupported: HashSet<String>,
    calls: Mutex<HashMap<(Stage, usize), u32>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed delay added to every recognize call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Random extra delay in `[0, max]` per recognize call, which makes pages
    /// finish out of order.
    pub fn with_random_delay(mut self, max: Duration) -> Self {
        self.max_random_delay = Some(max);
        self
    }

    /// Extra delay for one page (0-based index).
    pub fn with_page_delay(mut self, index: usize, delay: Duration) -> Self {
        self.page_delays.insert(index, delay);
        self
    }

    /// Inject a recognize failure for one page (0-based index).
    pub fn with_failure(self, index: usize, failure: MockFailure) -> Self {
        self.with_stage_failure(Stage::Recognize, index, failure)
    }

    /// Inject a rasterize failure for one page (0-based index).
    pub fn with_raster_failure(self, index: usize, failure: MockFailure) -> Self {
        self.with_stage_failure(Stage::Rasterize, index, failure)
    }

    /// Inject a failure at any capability stage. Preprocess failures only
    /// fire when deskew or denoise is enabled, since the stage is skipped
    /// otherwise.
    pub fn with_stage_failure(mut self, stage: Stage, index: usize, failure: MockFailure) -> Self {
        self.failures.insert((stage, index), failure);
        self
    }

    /// Report this language as missing from the engine.
    pub fn with_unsupported_language(mut self, code: impl Into<String>) -> Self {
        self.unsupported.insert(code.into());
        self
    }

    /// Calls made so far at `stage` for page `index`, across all jobs.
    pub fn stage_calls(&self, stage: Stage, index: usize) -> u32 {
        self.calls.lock().get(&(stage, index)).copied().unwrap_or(0)
    }

    /// Recognize calls made so far for page `index`, across all jobs.
    pub fn recognize_calls(&self, index: usize) -> u32 {
        self.stage_calls(Stage::Recognize, index)
    }

    pub fn total_recognize_calls(&self) -> u32 {
        self.total_calls(Stage::Recognize)
    }

    pub fn total_rasterize_calls(&self) -> usize {
        self.total_calls(Stage::Rasterize) as usize
    }

    fn total_calls(&self, stage: Stage) -> u32 {
        self.calls
            .lock()
            .iter()
            .filter(|((s, _), _)| *s == stage)
            .map(|(_, n)| *n)
            .sum()
    }

    fn count_call(&self, stage: Stage, index: usize) -> u32 {
        let mut calls = self.calls.lock();
        let n = calls.entry((stage, index)).or_insert(0);
        *n += 1;
        *n
    }

    /// Apply whatever failure is configured for this stage and page.
    fn inject(&self, stage: Stage, index: usize, call: u32) -> Result<(), EngineError> {
        let page = index + 1;
        match self.failures.get(&(stage, index)) {
            Some(MockFailure::AlwaysTransient) => Err(EngineError::transient(format!(
                "mock: {stage} crashed on page {page}"
            ))),
            Some(MockFailure::TransientTimes(n)) if call <= *n => Err(EngineError::transient(
                format!("mock: {stage} crashed on page {page} (call {call})"),
            )),
            Some(MockFailure::Permanent) => Err(EngineError::permanent(format!(
                "mock: page {page} is unreadable"
            ))),
            Some(MockFailure::Hang(duration)) => {
                std::thread::sleep(*duration);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn delay_for(&self, index: usize) -> Duration {
        let mut delay = self.delay + self.page_delays.get(&index).copied().unwrap_or_default();
        if let Some(max) = self.max_random_delay {
            let max_ms = max.as_millis() as u64;
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms));
        }
        delay
    }
}

fn encode_index(index: usize) -> Rgb<u8> {
    Rgb([(index >> 16) as u8, (index >> 8) as u8, index as u8])
}

fn decode_index(image: &DynamicImage) -> Option<usize> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }
    let px = image.get_pixel(0, 0).0;
    Some(((px[0] as usize) << 16) | ((px[1] as usize) << 8) | px[2] as usize)
}

impl Rasterizer for MockEngine {
    fn rasterize(
        &self,
        document: &Document,
        page_index: usize,
        dpi: u32,
    ) -> Result<DynamicImage, EngineError> {
        let call = self.count_call(Stage::Rasterize, page_index);
        self.inject(Stage::Rasterize, page_index, call)?;
        let geometry = document
            .page_geometry(page_index)
            .ok_or_else(|| EngineError::permanent(format!("mock: no page {}", page_index + 1)))?;
        let (w, h) = geometry.display_size();
        let scale = dpi as f32 / 72.0;
        let width = ((w * scale).round() as u32).max(1);
        let height = ((h * scale).round() as u32).max(1);

        let mut raster = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        raster.put_pixel(0, 0, encode_index(page_index));
        Ok(DynamicImage::ImageRgb8(raster))
    }
}

impl Preprocessor for MockEngine {
    fn clean(
        &self,
        image: DynamicImage,
        _options: PreprocessOptions,
    ) -> Result<Preprocessed, EngineError> {
        if let Some(index) = decode_index(&image) {
            let call = self.count_call(Stage::Preprocess, index);
            self.inject(Stage::Preprocess, index, call)?;
        }
        Ok(Preprocessed::unchanged(image))
    }
}

impl Recognizer for MockEngine {
    fn recognize(
        &self,
        image: &DynamicImage,
        languages: &LanguageSet,
    ) -> Result<RecognitionResult, EngineError> {
        let index = decode_index(image)
            .ok_or_else(|| EngineError::permanent("mock: raster carries no page marker"))?;
        let call = self.count_call(Stage::Recognize, index);

        if let Some(code) = languages.codes().iter().find(|c| self.unsupported.contains(*c)) {
            return Err(EngineError::UnsupportedLanguage { code: code.clone() });
        }

        let delay = self.delay_for(index);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.inject(Stage::Recognize, index, call)?;

        let (w, h) = (image.width() as f32, image.height() as f32);
        let run = TextRun {
            text: format!("page {} text", index + 1),
            bbox: BoundingBox::new(w * 0.1, h * 0.1, w * 0.6, h * 0.14),
            confidence: 0.95,
        };
        Ok(RecognitionResult::new(image.width(), image.height(), vec![run]))
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

/// A small valid PDF with `pages` Letter-sized pages that look like scans:
/// each draws a filled bar and no text. MediaBox and Resources live on the
/// page-tree root and are inherited by every page.
pub fn sample_pdf(pages: usize, title: Option<&str>) -> Vec<u8> {
    let contents = (1..=pages)
        .map(|n| format!("0.2 g 72 {} 360 24 re f\n", 700 - 12 * (n % 20)))
        .collect();
    fixture_pdf(contents, title)
}

/// A PDF with one page per entry, each showing that string as real text.
/// An empty entry yields a page whose only text operator draws nothing.
pub fn text_pdf(pages: &[&str]) -> Vec<u8> {
    let contents = pages
        .iter()
        .map(|text| format!("BT /F1 24 Tf 72 720 Td ({text}) Tj ET\n"))
        .collect();
    fixture_pdf(contents, None)
}

/// An encoded raster image (PNG, JPEG, TIFF or BMP) with a dark bar on white.
pub fn sample_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let raster = RgbImage::from_fn(width, height, |_, y| {
        if y > height / 4 && y < height / 4 + 8 {
            Rgb([20, 20, 20])
        } else {
            Rgb([255, 255, 255])
        }
    });
    let mut out = Cursor::new(Vec::new());
    match DynamicImage::ImageRgb8(raster).write_to(&mut out, format) {
        Ok(()) => out.into_inner(),
        Err(_) => Vec::new(),
    }
}

fn fixture_pdf(contents: Vec<String>, title: Option<&str>) -> Vec<u8> {
    let mut pdf = lopdf::Document::with_version("1.5");
    let pages_id = pdf.new_object_id();
    let font_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = pdf.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let count = contents.len();
    let mut kids: Vec<Object> = Vec::with_capacity(count);
    for content in contents {
        let content_id = pdf.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
        }),
    );
    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    pdf.trailer.set("Root", catalog_id);
    if let Some(title) = title {
        let info_id = pdf.add_object(dictionary! {
            "Title" => Object::string_literal(title),
        });
        pdf.trailer.set("Info", info_id);
    }

    let mut bytes = Vec::new();
    match pdf.save_to(&mut bytes) {
        Ok(_) => bytes,
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
pub(crate) fn test_document(pages: usize) -> Document {
    load(sample_pdf(pages, None))
}

#[cfg(test)]
pub(crate) fn test_document_with_text(pages: &[&str]) -> Document {
    load(text_pdf(pages))
}

/// Title with non-ASCII characters is stored UTF-16BE, like real producers do.
#[cfg(test)]
pub(crate) fn test_document_titled(pages: usize, title: &str) -> Document {
    let mut raw = vec![0xFE, 0xFF];
    raw.extend(title.encode_utf16().flat_map(u16::to_be_bytes));
    let bytes = sample_pdf(pages, None);
    let mut pdf = lopdf::Document::load_mem(&bytes).unwrap();
    let info_id = pdf.add_object(dictionary! {
        "Title" => Object::String(raw, lopdf::StringFormat::Hexadecimal),
    });
    pdf.trailer.set("Info", info_id);
    let mut out = Vec::new();
    pdf.save_to(&mut out).unwrap();
    load(out)
}

#[cfg(test)]
fn load(bytes: Vec<u8>) -> Document {
    let pdf = lopdf::Document::load_mem(&bytes).unwrap();
    Document::from_parts(std::sync::Arc::from(bytes), pdf)
}
