//! A validated input document.
//!
//! The raw bytes are kept for the rasterizer (pdfium reads from a byte slice)
//! and the parsed `lopdf` structure for the compositor, which copies the
//! original page objects into each fragment.

use lopdf::content::Content;
use lopdf::{Dictionary, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// US Letter, used when a page (and all its ancestors) lacks a MediaBox.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Document-level information carried through to the status and the artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
    pub byte_size: usize,
}

/// The visible area and orientation of one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// Visible box in PDF user space: `[x0, y0, x1, y1]` (CropBox if present,
    /// otherwise MediaBox).
    pub bounds: [f32; 4],
    /// Clockwise display rotation, normalised to 0, 90, 180 or 270.
    pub rotation: u16,
}

impl PageGeometry {
    pub fn width(&self) -> f32 {
        (self.bounds[2] - self.bounds[0]).abs()
    }

    pub fn height(&self) -> f32 {
        (self.bounds[3] - self.bounds[1]).abs()
    }

    /// Size of the page as displayed, in points, after `/Rotate` is applied.
    pub fn display_size(&self) -> (f32, f32) {
        match self.rotation {
            90 | 270 => (self.height(), self.width()),
            _ => (self.width(), self.height()),
        }
    }
}

/// An accepted PDF: immutable bytes, the parsed object graph, and metadata.
pub struct Document {
    bytes: Arc<[u8]>,
    pdf: lopdf::Document,
    page_ids: Vec<ObjectId>,
    pages: Vec<PageGeometry>,
    /// Per page: the content stream already shows text.
    text_pages: Vec<bool>,
    metadata: DocumentMetadata,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl Document {
    /// Build from already-parsed bytes. The validator is the only caller that
    /// should need this; it has already checked encryption and page count.
    pub(crate) fn from_parts(bytes: Arc<[u8]>, pdf: lopdf::Document) -> Self {
        let page_ids: Vec<ObjectId> = pdf.get_pages().into_values().collect();
        let pages = page_ids
            .iter()
            .map(|&id| page_geometry(&pdf, id))
            .collect::<Vec<_>>();
        let text_pages = page_ids.iter().map(|&id| shows_text(&pdf, id)).collect();

        let info = info_dictionary(&pdf);
        let metadata = DocumentMetadata {
            title: info.and_then(|d| text_entry(&pdf, d, b"Title")),
            author: info.and_then(|d| text_entry(&pdf, d, b"Author")),
            page_count: page_ids.len(),
            pdf_version: pdf.version.clone(),
            byte_size: bytes.len(),
        };

        Self {
            bytes,
            pdf,
            page_ids,
            pages,
            text_pages,
            metadata,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pdf(&self) -> &lopdf::Document {
        &self.pdf
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Object id of the page at `index` (0-based).
    pub fn page_id(&self, index: usize) -> Option<ObjectId> {
        self.page_ids.get(index).copied()
    }

    pub fn page_geometry(&self, index: usize) -> Option<PageGeometry> {
        self.pages.get(index).copied()
    }

    /// Whether page `index` already has text of its own. Only the page's
    /// content streams are inspected, not text inside form XObjects.
    pub fn page_has_text(&self, index: usize) -> bool {
        self.text_pages.get(index).copied().unwrap_or(false)
    }

    /// How many pages already have text.
    pub fn text_page_count(&self) -> usize {
        self.text_pages.iter().filter(|&&t| t).count()
    }
}

// ── Object graph helpers ─────────────────────────────────────────────────

/// Follow a reference one level; direct objects are returned as-is.
pub(crate) fn resolve<'a>(pdf: &'a lopdf::Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => pdf.get_object(*id).ok(),
        other => Some(other),
    }
}

pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Look up a page attribute, walking up the `/Parent` chain for the
/// inheritable ones (Resources, MediaBox, CropBox, Rotate).
pub(crate) fn inherited<'a>(
    pdf: &'a lopdf::Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = pdf.get_dictionary(page_id).ok()?;
    // Bounded so a cyclic /Parent chain cannot loop forever.
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return resolve(pdf, value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = pdf.get_dictionary(parent).ok()?;
    }
    None
}

fn rect(pdf: &lopdf::Document, obj: &Object) -> Option<[f32; 4]> {
    let values = obj.as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let mut out = [0.0f32; 4];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = number(resolve(pdf, value)?)?;
    }
    // Normalise so that x0 < x1 and y0 < y1.
    Some([
        out[0].min(out[2]),
        out[1].min(out[3]),
        out[0].max(out[2]),
        out[1].max(out[3]),
    ])
}

fn page_geometry(pdf: &lopdf::Document, page_id: ObjectId) -> PageGeometry {
    let media = inherited(pdf, page_id, b"MediaBox")
        .and_then(|o| rect(pdf, o))
        .unwrap_or(DEFAULT_MEDIA_BOX);
    let bounds = inherited(pdf, page_id, b"CropBox")
        .and_then(|o| rect(pdf, o))
        .map(|crop| intersect(crop, media))
        .unwrap_or(media);
    let rotation = inherited(pdf, page_id, b"Rotate")
        .and_then(|o| o.as_i64().ok())
        .map(|r| r.rem_euclid(360) as u16)
        .map(|r| (r / 90) * 90)
        .unwrap_or(0);
    PageGeometry { bounds, rotation }
}

/// True if any text-showing operator in the page content draws a non-empty
/// string. Unparseable content counts as no text, so the page gets OCR.
fn shows_text(pdf: &lopdf::Document, page_id: ObjectId) -> bool {
    let Ok(data) = pdf.get_page_content(page_id) else {
        return false;
    };
    let Ok(content) = Content::decode(&data) else {
        return false;
    };
    content.operations.iter().any(|op| match op.operator.as_str() {
        "Tj" | "'" | "\"" => op.operands.last().is_some_and(non_empty_string),
        "TJ" => op
            .operands
            .first()
            .and_then(|o| o.as_array().ok())
            .is_some_and(|items| items.iter().any(non_empty_string)),
        _ => false,
    })
}

fn non_empty_string(obj: &Object) -> bool {
    matches!(obj, Object::String(raw, _) if !raw.is_empty())
}

fn intersect(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    let r = [a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])];
    if r[2] > r[0] && r[3] > r[1] {
        r
    } else {
        b
    }
}

fn info_dictionary(pdf: &lopdf::Document) -> Option<&Dictionary> {
    let info = pdf.trailer.get(b"Info").ok()?;
    resolve(pdf, info)?.as_dict().ok()
}

fn text_entry(pdf: &lopdf::Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    let value = resolve(pdf, dict.get(key).ok()?)?;
    let Object::String(raw, _) = value else {
        return None;
    };
    let text = decode_pdf_string(raw);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Decode a PDF text string: UTF-16BE with a BOM, otherwise byte-per-char.
pub(crate) fn decode_pdf_string(raw: &[u8]) -> String {
    if raw.len() >= 2 && raw[0] == 0xFE && raw[1] == 0xFF {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mock::{sample_pdf, text_pdf};

    fn load(bytes: Vec<u8>) -> Document {
        let pdf = lopdf::Document::load_mem(&bytes).unwrap();
        Document::from_parts(Arc::from(bytes), pdf)
    }

    #[test]
    fn reads_page_count_and_title() {
        let doc = load(sample_pdf(3, Some("Quarterly report")));
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.metadata().page_count, 3);
        assert_eq!(doc.metadata().title.as_deref(), Some("Quarterly report"));
    }

    #[test]
    fn geometry_defaults_to_letter() {
        let doc = load(sample_pdf(1, None));
        let g = doc.page_geometry(0).unwrap();
        assert_eq!(g.bounds, DEFAULT_MEDIA_BOX);
        assert_eq!(g.rotation, 0);
        assert_eq!(g.display_size(), (612.0, 792.0));
    }

    #[test]
    fn rotated_page_swaps_display_size() {
        let g = PageGeometry {
            bounds: [0.0, 0.0, 612.0, 792.0],
            rotation: 90,
        };
        assert_eq!(g.display_size(), (792.0, 612.0));
    }

    #[test]
    fn scanned_pages_have_no_text() {
        let doc = load(sample_pdf(2, None));
        assert!(!doc.page_has_text(0));
        assert_eq!(doc.text_page_count(), 0);
    }

    #[test]
    fn text_operators_are_detected() {
        let doc = load(text_pdf(&["Hello", ""]));
        assert!(doc.page_has_text(0));
        assert!(!doc.page_has_text(1));
        assert!(!doc.page_has_text(9));
        assert_eq!(doc.text_page_count(), 1);
    }

    #[test]
    fn utf16_strings_are_decoded() {
        let raw = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69];
        assert_eq!(decode_pdf_string(&raw), "Hi");
        assert_eq!(decode_pdf_string(b"plain"), "plain");
    }
}
