//! Text recognition: raster + language set → positioned text runs.
//!
//! The production recognizer shells out to the `tesseract` CLI and parses
//! its TSV output. Words are grouped into line-level runs, which is the
//! granularity the compositor places text at: fine enough for selection to
//! line up with the image, coarse enough to keep the text layer small.
//!
//! The recognizer classifies its own failures (see [`classify_failure`]):
//! a crash or resource problem is transient, an unreadable image is
//! permanent, and a missing language model is reported as
//! [`EngineError::UnsupportedLanguage`] so it is never retried.

use crate::error::EngineError;
use crate::language::LanguageSet;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::Command;
use tracing::debug;

/// Axis-aligned box in raster pixel space (origin top-left, y down).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }
}

/// One recognized run of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub bbox: BoundingBox,
    /// In `[0, 1]`.
    pub confidence: f32,
}

/// Everything recognized on one page raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// 0-based source page; set by the pipeline, not the recognizer.
    pub page_index: usize,
    /// Size of the raster the boxes refer to.
    pub image_width: u32,
    pub image_height: u32,
    /// Clockwise rotation applied to the raster before recognition.
    pub rotation_degrees: f32,
    pub runs: Vec<TextRun>,
}

impl RecognitionResult {
    pub fn new(image_width: u32, image_height: u32, runs: Vec<TextRun>) -> Self {
        Self {
            page_index: 0,
            image_width,
            image_height,
            rotation_degrees: 0.0,
            runs,
        }
    }

    /// Attach the page identity and the preprocessing rotation.
    pub fn for_page(mut self, page_index: usize, rotation_degrees: f32) -> Self {
        self.page_index = page_index;
        self.rotation_degrees = rotation_degrees;
        self
    }

    /// All run texts joined with single spaces.
    pub fn text(&self) -> String {
        self.runs
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Capability: raster image + language set → recognized layout.
pub trait Recognizer: Send + Sync {
    fn recognize(
        &self,
        image: &DynamicImage,
        languages: &LanguageSet,
    ) -> Result<RecognitionResult, EngineError>;
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// Recognizer that runs the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    binary: String,
    psm: u8,
}

impl TesseractRecognizer {
    pub fn new(binary: impl Into<String>, psm: u8) -> Self {
        Self {
            binary: binary.into(),
            psm,
        }
    }

    /// Whether the binary can be started at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(
        &self,
        image: &DynamicImage,
        languages: &LanguageSet,
    ) -> Result<RecognitionResult, EngineError> {
        let input = tempfile::Builder::new()
            .prefix("ocrlayer-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| EngineError::transient(format!("temp file: {e}")))?;
        image
            .save_with_format(input.path(), ImageFormat::Png)
            .map_err(|e| EngineError::permanent(format!("encode raster as PNG: {e}")))?;

        let output = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(languages.to_engine_arg())
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => EngineError::permanent(
                    format!("cannot run '{}': {e}", self.binary),
                ),
                _ => EngineError::transient(format!("spawn '{}': {e}", self.binary)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(output.status.code(), &stderr, languages));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let runs = parse_tsv(&tsv);
        debug!(
            runs = runs.len(),
            width = image.width(),
            height = image.height(),
            "tesseract finished"
        );
        Ok(RecognitionResult::new(image.width(), image.height(), runs))
    }
}

/// Map a failed tesseract exit to an [`EngineError`].
///
/// * killed by a signal (`code == None`): transient, usually OOM or a crash
/// * language data missing: unsupported language
/// * image unreadable: permanent
/// * anything else: transient
pub fn classify_failure(code: Option<i32>, stderr: &str, languages: &LanguageSet) -> EngineError {
    let detail = stderr.trim().lines().last().unwrap_or("").to_string();
    let Some(code) = code else {
        return EngineError::transient(format!("tesseract terminated by signal: {detail}"));
    };
    if stderr.contains("Failed loading language") || stderr.contains("Error opening data file") {
        let code = languages
            .codes()
            .iter()
            .find(|c| stderr.contains(&format!("'{c}'")))
            .cloned()
            .unwrap_or_else(|| languages.to_engine_arg());
        return EngineError::UnsupportedLanguage { code };
    }
    if stderr.contains("Error in pixRead")
        || stderr.contains("Unsupported image type")
        || stderr.contains("cannot be read")
    {
        return EngineError::permanent(format!("tesseract could not read the raster: {detail}"));
    }
    EngineError::transient(format!("tesseract exited with status {code}: {detail}"))
}

/// Parse tesseract's TSV output into line-level runs.
///
/// Columns: `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Only level-5 (word) rows carry text; they are
/// grouped by `(block, par, line)` in reading order.
pub fn parse_tsv(tsv: &str) -> Vec<TextRun> {
    struct Line {
        words: Vec<String>,
        bbox: BoundingBox,
        conf_sum: f32,
        conf_n: u32,
    }

    let mut lines: BTreeMap<(u32, u32, u32, u32), Line> = BTreeMap::new();
    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let nums: Option<Vec<f32>> = cols[1..11].iter().map(|c| c.trim().parse().ok()).collect();
        let Some(n) = nums else {
            continue;
        };
        // n: page block par line word left top width height conf
        let key = (n[0] as u32, n[1] as u32, n[2] as u32, n[3] as u32);
        let bbox = BoundingBox::new(n[5], n[6], n[5] + n[7], n[6] + n[8]);
        let conf = n[9];

        let line = lines.entry(key).or_insert_with(|| Line {
            words: Vec::new(),
            bbox,
            conf_sum: 0.0,
            conf_n: 0,
        });
        line.words.push(text.to_string());
        line.bbox = line.bbox.union(&bbox);
        if conf >= 0.0 {
            line.conf_sum += conf;
            line.conf_n += 1;
        }
    }

    lines
        .into_values()
        .map(|line| TextRun {
            text: line.words.join(" "),
            bbox: line.bbox,
            confidence: if line.conf_n == 0 {
                0.0
            } else {
                line.conf_sum / line.conf_n as f32 / 100.0
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t1000\t800\t-1\t\n\
4\t1\t1\t1\t1\t0\t100\t50\t300\t40\t-1\t\n\
5\t1\t1\t1\t1\t1\t100\t50\t120\t40\t96.5\tHello\n\
5\t1\t1\t1\t1\t2\t240\t52\t160\t38\t91.5\tworld\n\
5\t1\t1\t1\t2\t1\t100\t120\t90\t30\t80\tSecond\n\
5\t1\t2\t1\t1\t1\t500\t600\t50\t20\t-1\t \n";

    #[test]
    fn words_are_grouped_into_lines() {
        let runs = parse_tsv(TSV);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text, "Hello world");
        assert_eq!(runs[0].bbox, BoundingBox::new(100.0, 50.0, 400.0, 90.0));
        assert!((runs[0].confidence - 0.94).abs() < 1e-4);
        assert_eq!(runs[1].text, "Second");
        assert!((runs[1].confidence - 0.80).abs() < 1e-4);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let runs = parse_tsv("header\n5\t1\tx\n5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\tok\n");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "ok");
    }

    #[test]
    fn failures_are_classified() {
        let langs = LanguageSet::parse("eng+pan").unwrap();
        let missing = "Error opening data file /usr/share/tessdata/pan.traineddata\n\
                       Failed loading language 'pan'\n";
        assert_eq!(
            classify_failure(Some(1), missing, &langs),
            EngineError::UnsupportedLanguage { code: "pan".into() }
        );
        assert!(matches!(
            classify_failure(None, "", &langs),
            EngineError::Transient { .. }
        ));
        assert!(matches!(
            classify_failure(Some(1), "Error in pixReadMem: Unknown format", &langs),
            EngineError::Permanent { .. }
        ));
        assert!(matches!(
            classify_failure(Some(3), "something odd", &langs),
            EngineError::Transient { .. }
        ));
    }

    #[test]
    fn missing_binary_is_permanent() {
        let recognizer = TesseractRecognizer::new("/nonexistent/tesseract-binary", 3);
        assert!(!recognizer.is_available());
        let image = DynamicImage::new_luma8(10, 10);
        let err = recognizer
            .recognize(&image, &LanguageSet::parse("eng").unwrap())
            .unwrap_err();
        assert!(matches!(err, EngineError::Permanent { .. }), "{err:?}");
    }
}
