//! Compositing: place recognized text on the original page as an invisible,
//! selectable layer.
//!
//! Each page becomes a self-contained single-page PDF (a [`PageFragment`]):
//! the original page object and everything it references are copied out of
//! the source document, inherited attributes are made explicit, and the
//! original content stream is left byte-for-byte intact, bracketed by
//! `q`/`Q` so the text layer starts from a clean graphics state.
//!
//! ## The text layer
//!
//! * one `BT … ET` object per recognized run
//! * render mode 3 (`3 Tr`): neither filled nor stroked, so nothing is drawn
//! * a glyph-less `Type0` font with `Identity-H` encoding; character codes
//!   are UTF-16 code units and the `ToUnicode` map is the identity, so text
//!   extraction returns exactly what was recognized
//! * horizontal scaling (`Tz`) stretches each run to its box width
//!
//! ## Coordinates
//!
//! Recognized boxes are in raster pixels, origin top-left, y down, on the
//! page *as displayed* (pdfium applies `/Rotate`). They are scaled to points
//! and then mapped into PDF user space, undoing the page rotation. The
//! deskew rotation, if any, is undone first.

use crate::document::{inherited, Document, PageGeometry};
use crate::error::CompositionError;
use crate::pipeline::recognize::{BoundingBox, RecognitionResult};
use lopdf::{dictionary, Dictionary, Object, ObjectId, Stream};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Resource name of the text-layer font. Also how the layer is recognised
/// when reading an artifact back.
pub const TEXT_FONT_NAME: &str = "OCRText";

/// Maximum relative difference between raster and page aspect ratios.
const ASPECT_TOLERANCE: f32 = 0.02;

/// Advance width of every glyph in the text font, in 1/1000 em.
const GLYPH_WIDTH: f32 = 500.0;

/// Attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// One page, ready for assembly.
#[derive(Debug, Clone)]
pub struct PageFragment {
    /// 0-based page index in the source document.
    pub index: usize,
    /// False for placeholders.
    pub has_text_layer: bool,
    /// Number of runs placed in the text layer.
    pub run_count: usize,
    pdf: lopdf::Document,
}

impl PageFragment {
    /// The single-page document.
    pub fn pdf(&self) -> &lopdf::Document {
        &self.pdf
    }

    pub fn into_pdf(self) -> lopdf::Document {
        self.pdf
    }

    #[cfg(test)]
    pub(crate) fn empty_for_tests(index: usize) -> Self {
        Self {
            index,
            has_text_layer: false,
            run_count: 0,
            pdf: lopdf::Document::with_version("1.7"),
        }
    }
}

/// Merge `result` onto page `result.page_index` of `document`.
pub fn compose(
    document: &Document,
    result: &RecognitionResult,
) -> Result<PageFragment, CompositionError> {
    let index = result.page_index;
    let geometry = document
        .page_geometry(index)
        .ok_or(CompositionError::MissingPage { index })?;
    check_aspect(&geometry, result.image_width, result.image_height)?;

    let content = text_layer_content(&geometry, result);
    let (mut pdf, page_id) = extract_page(document, index)?;
    let run_count = result.runs.len();
    let has_text_layer = !content.is_empty();
    if has_text_layer {
        attach_text_layer(&mut pdf, page_id, content)?;
    }
    Ok(PageFragment {
        index,
        has_text_layer,
        run_count,
        pdf,
    })
}

/// The original page with no text layer, used for failed pages under the
/// best-effort policy.
pub fn placeholder(document: &Document, index: usize) -> Result<PageFragment, CompositionError> {
    let (pdf, _) = extract_page(document, index)?;
    Ok(PageFragment {
        index,
        has_text_layer: false,
        run_count: 0,
        pdf,
    })
}

fn check_aspect(geometry: &PageGeometry, width: u32, height: u32) -> Result<(), CompositionError> {
    let (page_w, page_h) = geometry.display_size();
    let mismatch = || CompositionError::GeometryMismatch {
        raster_width: width,
        raster_height: height,
        page_width: page_w,
        page_height: page_h,
    };
    if width == 0 || height == 0 || page_w <= 0.0 || page_h <= 0.0 {
        return Err(mismatch());
    }
    let raster_aspect = width as f32 / height as f32;
    let page_aspect = page_w / page_h;
    if ((raster_aspect - page_aspect) / page_aspect).abs() > ASPECT_TOLERANCE {
        return Err(mismatch());
    }
    Ok(())
}

// ── Geometry ─────────────────────────────────────────────────────────────

/// Map a point on the displayed page (points, origin top-left, y down) to
/// PDF user space.
pub fn display_to_user(geometry: &PageGeometry, dx: f32, dy: f32) -> (f32, f32) {
    let [x0, y0, x1, y1] = geometry.bounds;
    match geometry.rotation {
        90 => (x0 + dy, y0 + dx),
        180 => (x1 - dx, y0 + dy),
        270 => (x1 - dy, y1 - dx),
        _ => (x0 + dx, y1 - dy),
    }
}

/// Linear part of the text matrix: the user-space directions of "right"
/// and "up" on the displayed page.
pub fn text_orientation(rotation: u16) -> [i32; 4] {
    match rotation {
        90 => [0, 1, -1, 0],
        180 => [-1, 0, 0, -1],
        270 => [0, -1, 1, 0],
        _ => [1, 0, 0, 1],
    }
}

/// Undo a clockwise rotation of `degrees` about the raster centre.
fn unrotate_box(b: BoundingBox, degrees: f32, width: u32, height: u32) -> BoundingBox {
    if degrees == 0.0 {
        return b;
    }
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (sin, cos) = (-degrees).to_radians().sin_cos();
    let corners = [(b.x0, b.y0), (b.x1, b.y0), (b.x0, b.y1), (b.x1, b.y1)];
    let mapped = corners.map(|(x, y)| {
        let (rx, ry) = (x - cx, y - cy);
        (cx + cos * rx - sin * ry, cy + sin * rx + cos * ry)
    });
    mapped[1..].iter().fold(
        BoundingBox::new(mapped[0].0, mapped[0].1, mapped[0].0, mapped[0].1),
        |acc, &(x, y)| acc.union(&BoundingBox::new(x, y, x, y)),
    )
}

/// UTF-16 code units for the text layer. Characters outside the Basic
/// Multilingual Plane become U+FFFD so each code maps to one glyph.
pub fn encode_utf16_bmp(text: &str) -> Vec<u16> {
    text.chars()
        .map(|c| u16::try_from(c as u32).unwrap_or(0xFFFD))
        .collect()
}

fn text_layer_content(geometry: &PageGeometry, result: &RecognitionResult) -> Vec<u8> {
    if result.runs.is_empty() {
        return Vec::new();
    }
    let (page_w, page_h) = geometry.display_size();
    let sx = page_w / result.image_width as f32;
    let sy = page_h / result.image_height as f32;
    let [a, b, c, d] = text_orientation(geometry.rotation);

    let mut out = String::from("Q\n");
    for run in &result.runs {
        let bbox = unrotate_box(
            run.bbox,
            result.rotation_degrees,
            result.image_width,
            result.image_height,
        );
        let units = encode_utf16_bmp(&run.text);
        let size = bbox.height() * sy;
        let width = bbox.width() * sx;
        if units.is_empty() || !(size > 0.0) || !(width > 0.0) {
            continue;
        }
        let natural = units.len() as f32 * GLYPH_WIDTH / 1000.0 * size;
        let scale = (100.0 * width / natural).clamp(1.0, 1000.0);
        let (e, f) = display_to_user(geometry, bbox.x0 * sx, bbox.y1 * sy);

        let hex: String = units.iter().map(|u| format!("{u:04X}")).collect();
        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "BT\n3 Tr\n/{TEXT_FONT_NAME} {size:.2} Tf\n{scale:.2} Tz\n{a} {b} {c} {d} {e:.2} {f:.2} Tm\n<{hex}> Tj\nET\n"
        );
    }
    if out.len() == 2 {
        return Vec::new();
    }
    out.into_bytes()
}

// ── PDF structure ────────────────────────────────────────────────────────

/// Copy page `index` and everything it references into a new single-page
/// document. Returns the document and the page's object id in it.
fn extract_page(
    document: &Document,
    index: usize,
) -> Result<(lopdf::Document, ObjectId), CompositionError> {
    let src = document.pdf();
    let page_id = document
        .page_id(index)
        .ok_or(CompositionError::MissingPage { index })?;
    let mut page = src
        .get_dictionary(page_id)
        .map_err(|e| CompositionError::Pdf(format!("page {}: {e}", index + 1)))?
        .clone();
    for key in INHERITABLE {
        if !page.has(key.as_bytes()) {
            if let Some(value) = inherited(src, page_id, key.as_bytes()) {
                page.set(key, value.clone());
            }
        }
    }

    // Everything reachable from the page, without climbing back up the page
    // tree or wandering into other pages (link annotations point at them).
    let mut keep: BTreeSet<ObjectId> = BTreeSet::new();
    let mut stack = Vec::new();
    collect_refs(&Object::Dictionary(page.clone()), &mut stack);
    while let Some(id) = stack.pop() {
        if id == page_id || keep.contains(&id) {
            continue;
        }
        let Ok(obj) = src.get_object(id) else {
            continue;
        };
        if is_page_tree_node(obj) {
            continue;
        }
        keep.insert(id);
        collect_refs(obj, &mut stack);
    }

    let mut pdf = lopdf::Document::with_version(src.version.clone());
    pdf.max_id = src.max_id;
    for id in &keep {
        let mut obj = src
            .get_object(*id)
            .map_err(|e| CompositionError::Pdf(format!("object {id:?}: {e}")))?
            .clone();
        sanitize(&mut obj, &keep, page_id);
        pdf.objects.insert(*id, obj);
    }
    let mut page_obj = Object::Dictionary(page);
    sanitize(&mut page_obj, &keep, page_id);
    let Object::Dictionary(mut page) = page_obj else {
        return Err(CompositionError::Pdf("page is not a dictionary".into()));
    };

    let pages_id = pdf.new_object_id();
    page.set("Parent", pages_id);
    pdf.objects.insert(page_id, Object::Dictionary(page));
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    pdf.trailer.set("Root", catalog_id);
    Ok((pdf, page_id))
}

fn collect_refs(obj: &Object, out: &mut Vec<ObjectId>) {
    match obj {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|o| collect_refs(o, out)),
        Object::Dictionary(dict) => collect_dict_refs(dict, out),
        Object::Stream(stream) => collect_dict_refs(&stream.dict, out),
        _ => {}
    }
}

fn collect_dict_refs(dict: &Dictionary, out: &mut Vec<ObjectId>) {
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            collect_refs(value, out);
        }
    }
}

fn is_page_tree_node(obj: &Object) -> bool {
    let dict = match obj {
        Object::Dictionary(d) => d,
        _ => return false,
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Page") | Ok(b"Pages")
    )
}

/// Drop `/Parent` links and null out references to objects that were not
/// copied, so the fragment has no dangling references.
fn sanitize(obj: &mut Object, keep: &BTreeSet<ObjectId>, page_id: ObjectId) {
    if let Object::Reference(id) = *obj {
        if id != page_id && !keep.contains(&id) {
            *obj = Object::Null;
        }
        return;
    }
    match obj {
        Object::Array(items) => items.iter_mut().for_each(|o| sanitize(o, keep, page_id)),
        Object::Dictionary(dict) => sanitize_dict(dict, keep, page_id),
        Object::Stream(stream) => sanitize_dict(&mut stream.dict, keep, page_id),
        _ => {}
    }
}

fn sanitize_dict(dict: &mut Dictionary, keep: &BTreeSet<ObjectId>, page_id: ObjectId) {
    dict.remove(b"Parent");
    for (_, value) in dict.iter_mut() {
        sanitize(value, keep, page_id);
    }
}

fn attach_text_layer(
    pdf: &mut lopdf::Document,
    page_id: ObjectId,
    content: Vec<u8>,
) -> Result<(), CompositionError> {
    let font_id = add_text_font(pdf);
    let open_id = pdf.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let layer_id = pdf.add_object(Stream::new(Dictionary::new(), content));

    let page = pdf
        .get_dictionary(page_id)
        .map_err(|e| CompositionError::Pdf(e.to_string()))?
        .clone();

    let mut resources = match page.get(b"Resources") {
        Ok(Object::Reference(id)) => pdf
            .get_dictionary(*id)
            .map(Dictionary::clone)
            .unwrap_or_default(),
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };
    let mut fonts = match resources.get(b"Font") {
        Ok(Object::Reference(id)) => pdf
            .get_dictionary(*id)
            .map(Dictionary::clone)
            .unwrap_or_default(),
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };
    fonts.set(TEXT_FONT_NAME, font_id);
    resources.set("Font", fonts);

    let mut contents: Vec<Object> = vec![open_id.into()];
    match page.get(b"Contents") {
        Ok(Object::Array(items)) => contents.extend(items.iter().cloned()),
        Ok(Object::Reference(id)) => contents.push(Object::Reference(*id)),
        _ => {}
    }
    contents.push(layer_id.into());

    let page = pdf
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| CompositionError::Pdf(e.to_string()))?;
    page.set("Resources", resources);
    page.set("Contents", contents);
    Ok(())
}

fn add_text_font(pdf: &mut lopdf::Document) -> ObjectId {
    let descriptor = pdf.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => "GlyphLessFont",
        "Flags" => 5,
        "FontBBox" => vec![0.into(), 0.into(), 500.into(), 1000.into()],
        "ItalicAngle" => 0,
        "Ascent" => 1000,
        "Descent" => 0,
        "CapHeight" => 1000,
        "StemV" => 80,
    });
    let cid_font = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => "GlyphLessFont",
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor,
        "DW" => GLYPH_WIDTH as i64,
        "CIDToGIDMap" => "Identity",
    });
    let to_unicode = pdf.add_object(Stream::new(
        Dictionary::new(),
        identity_to_unicode_cmap().into_bytes(),
    ));
    pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "GlyphLessFont",
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![cid_font.into()],
        "ToUnicode" => to_unicode,
    })
}

/// ToUnicode CMap mapping every 2-byte code to the same UTF-16 unit.
/// Ranges never cross a high-byte boundary and each block holds at most
/// 100 entries, as the CMap format requires.
fn identity_to_unicode_cmap() -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );
    let high_bytes: Vec<u32> = (0..=0xFF).collect();
    for block in high_bytes.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfrange", block.len());
        for hi in block {
            let _ = writeln!(cmap, "<{hi:02X}00> <{hi:02X}FF> <{hi:02X}00>");
        }
        cmap.push_str("endbfrange\n");
    }
    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}
