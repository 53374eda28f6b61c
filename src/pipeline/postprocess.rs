//! Post-processing: deterministic cleanup of recognized runs.
//!
//! Recognition engines return text that is correct but awkward to embed:
//! stray carriage returns, zero-width characters, runs of whitespace,
//! confidence values slightly outside `[0, 1]`, boxes that poke past the
//! raster edge. None of that should reach the text layer, where it would
//! break search and copy-paste.
//!
//! ## Rule Order
//!
//! Text rules run before run-level filters, so a run that is only
//! whitespace or invisible characters is recognised as empty and dropped.

use crate::pipeline::recognize::{BoundingBox, RecognitionResult, TextRun};
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to a recognition result.
///
/// Text rules (per run, in order):
/// 1. Normalise line endings to spaces (a run is one line of the layer)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 3. Replace remaining control characters with spaces
/// 4. Collapse whitespace and trim
///
/// Run rules:
/// 5. Clamp confidence into `[0, 1]` (NaN becomes 0)
/// 6. Drop runs below `min_confidence`
/// 7. Clip boxes to the raster and drop empty or zero-area runs
pub fn clean_result(mut result: RecognitionResult, min_confidence: f32) -> RecognitionResult {
    let (w, h) = (result.image_width as f32, result.image_height as f32);
    result.runs = result
        .runs
        .into_iter()
        .filter_map(|run| clean_run(run, min_confidence, w, h))
        .collect();
    result
}

fn clean_run(run: TextRun, min_confidence: f32, width: f32, height: f32) -> Option<TextRun> {
    let text = clean_text(&run.text);
    if text.is_empty() {
        return None;
    }
    let confidence = clamp_confidence(run.confidence);
    if confidence < min_confidence {
        return None;
    }
    let bbox = clip_box(run.bbox, width, height);
    if bbox.is_degenerate() {
        return None;
    }
    Some(TextRun {
        text,
        bbox,
        confidence,
    })
}

/// Text rules 1–4.
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = replace_control_chars(&s);
    collapse_whitespace(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Replace control characters ──────────────────────────────────────

fn replace_control_chars(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

// ── Rule 4: Collapse whitespace ─────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input.trim(), " ").into_owned()
}

// ── Rule 5: Clamp confidence ────────────────────────────────────────────────

fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

// ── Rule 7: Clip boxes to the raster ────────────────────────────────────────

fn clip_box(b: BoundingBox, width: f32, height: f32) -> BoundingBox {
    BoundingBox {
        x0: b.x0.clamp(0.0, width),
        y0: b.y0.clamp(0.0, height),
        x1: b.x1.clamp(0.0, width),
        y1: b.y1.clamp(0.0, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, conf: f32, bbox: BoundingBox) -> TextRun {
        TextRun {
            text: text.to_string(),
            bbox,
            confidence: conf,
        }
    }

    fn full_box() -> BoundingBox {
        BoundingBox::new(10.0, 10.0, 90.0, 30.0)
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc\nd"), "a b c d");
    }

    #[test]
    fn test_remove_invisible_chars() {
        assert_eq!(remove_invisible_chars("in\u{200B}vis\u{00AD}ible\u{FEFF}"), "invisible");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(clean_text("  many \t  spaces\u{0007}here  "), "many spaces here");
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(clamp_confidence(1.3), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
    }

    #[test]
    fn test_clean_result_filters_runs() {
        let result = RecognitionResult::new(
            100,
            50,
            vec![
                run("keep  me", 0.9, full_box()),
                run("\u{200B} \n", 0.9, full_box()),
                run("too unsure", 0.2, full_box()),
                run("offscreen", 0.9, BoundingBox::new(120.0, 10.0, 150.0, 30.0)),
                run("clipped", 1.5, BoundingBox::new(80.0, 40.0, 130.0, 70.0)),
            ],
        );
        let cleaned = clean_result(result, 0.5);
        let texts: Vec<&str> = cleaned.runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["keep me", "clipped"]);
        assert_eq!(cleaned.runs[1].bbox, BoundingBox::new(80.0, 40.0, 100.0, 50.0));
        assert_eq!(cleaned.runs[1].confidence, 1.0);
    }

    #[test]
    fn test_zero_min_confidence_keeps_everything_textual() {
        let result = RecognitionResult::new(100, 50, vec![run("x", 0.0, full_box())]);
        assert_eq!(clean_result(result, 0.0).runs.len(), 1);
    }
}
