//! Assembly: concatenate page fragments, in page order, into the final PDF
//! and publish it atomically.
//!
//! The scheduler only calls this after its fan-in barrier, so a wrong
//! fragment count or order is a defect. Both are still checked, because a
//! silently reordered artifact would be far worse than a failed job.

use crate::document::{decode_pdf_string, DocumentMetadata};
use crate::error::AssemblyError;
use crate::job::JobId;
use crate::pipeline::composite::{PageFragment, TEXT_FONT_NAME};
use lopdf::content::Content;
use lopdf::{dictionary, Object, ObjectId, StringFormat};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const PRODUCER: &str = concat!("ocrlayer ", env!("CARGO_PKG_VERSION"));

/// Merge `fragments` into one PDF. `fragments[i]` must be page `i`.
pub fn assemble(
    fragments: Vec<PageFragment>,
    expected_pages: usize,
    metadata: &DocumentMetadata,
) -> Result<Vec<u8>, AssemblyError> {
    if fragments.len() != expected_pages {
        return Err(AssemblyError::FragmentCountMismatch {
            expected: expected_pages,
            actual: fragments.len(),
        });
    }
    if let Some((position, f)) = fragments
        .iter()
        .enumerate()
        .find(|(position, f)| f.index != *position)
    {
        return Err(AssemblyError::OutOfOrder {
            position,
            found: f.index,
        });
    }

    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut page_ids: Vec<ObjectId> = Vec::with_capacity(fragments.len());
    let mut next_id = 1;

    for fragment in fragments {
        let index = fragment.index;
        let mut pdf = fragment.into_pdf();
        pdf.renumber_objects_with(next_id);
        next_id = pdf.max_id + 1;

        let pages = pdf.get_pages();
        let Some(&page_id) = pages.values().next().filter(|_| pages.len() == 1) else {
            return Err(AssemblyError::Pdf(format!(
                "fragment for page {} has {} pages",
                index + 1,
                pages.len()
            )));
        };
        // The fragment's own catalog and page-tree root are replaced below.
        let catalog_id = pdf
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|e| AssemblyError::Pdf(format!("fragment {}: {e}", index + 1)))?;
        let pages_root = pdf
            .get_dictionary(catalog_id)
            .and_then(|c| c.get(b"Pages"))
            .and_then(Object::as_reference)
            .map_err(|e| AssemblyError::Pdf(format!("fragment {}: {e}", index + 1)))?;
        pdf.objects.remove(&catalog_id);
        pdf.objects.remove(&pages_root);

        objects.extend(pdf.objects);
        page_ids.push(page_id);
    }

    let version = if metadata.pdf_version.is_empty() {
        "1.7".to_string()
    } else {
        metadata.pdf_version.clone()
    };
    let mut out = lopdf::Document::with_version(version);
    out.objects = objects;
    out.max_id = next_id - 1;

    let pages_id = out.new_object_id();
    for &page_id in &page_ids {
        if let Ok(page) = out.get_object_mut(page_id).and_then(Object::as_dict_mut) {
            page.set("Parent", pages_id);
        }
    }
    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    out.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );
    let catalog_id = out.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    out.trailer.set("Root", catalog_id);

    let mut info = dictionary! {
        "Producer" => pdf_text_string(PRODUCER),
    };
    if let Some(title) = &metadata.title {
        info.set("Title", pdf_text_string(title));
    }
    if let Some(author) = &metadata.author {
        info.set("Author", pdf_text_string(author));
    }
    let info_id = out.add_object(info);
    out.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    out.save_to(&mut bytes)
        .map_err(|e| AssemblyError::Pdf(format!("serialise: {e}")))?;
    debug!(pages = page_ids.len(), bytes = bytes.len(), "Document assembled");
    Ok(bytes)
}

/// Write `bytes` to `{dir}/{job_id}.pdf` via a temporary file in the same
/// directory and a rename, so readers never see a partial file.
pub fn publish(bytes: &[u8], dir: &Path, job_id: JobId) -> Result<PathBuf, AssemblyError> {
    let path = dir.join(format!("{job_id}.pdf"));
    let write_err = |detail: String| AssemblyError::Write {
        path: path.clone(),
        detail,
    };

    std::fs::create_dir_all(dir).map_err(|e| write_err(format!("create directory: {e}")))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(".pdf")
        .tempfile_in(dir)
        .map_err(|e| write_err(format!("temp file: {e}")))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| write_err(e.to_string()))?;
    tmp.persist(&path)
        .map_err(|e| write_err(format!("rename: {}", e.error)))?;
    Ok(path)
}

/// Read the invisible text layer back out of an assembled PDF, one string
/// per page (runs joined by newlines).
///
/// Pages without a layer report the text they already carried, as far as
/// lopdf can decode it, and an empty string otherwise.
pub fn text_layer(bytes: &[u8]) -> Result<Vec<String>, AssemblyError> {
    let pdf = lopdf::Document::load_mem(bytes).map_err(|e| AssemblyError::Pdf(e.to_string()))?;
    let mut pages = Vec::new();
    for (page_number, page_id) in pdf.get_pages() {
        let mut runs = Vec::new();
        for stream_id in pdf.get_page_contents(page_id) {
            let Ok(stream) = pdf.get_object(stream_id).and_then(Object::as_stream) else {
                continue;
            };
            let data = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            // Original scan streams may hold inline images the content
            // parser rejects; the text layer lives in its own stream.
            let Ok(content) = Content::decode(&data) else {
                continue;
            };
            let mut in_layer = false;
            for op in &content.operations {
                match op.operator.as_str() {
                    "Tf" => {
                        in_layer = op
                            .operands
                            .first()
                            .and_then(|o| o.as_name().ok())
                            .is_some_and(|name| name == TEXT_FONT_NAME.as_bytes());
                    }
                    "Tj" if in_layer => {
                        if let Some(Object::String(raw, _)) = op.operands.first() {
                            runs.push(decode_utf16be(raw));
                        }
                    }
                    _ => {}
                }
            }
        }
        if runs.is_empty() {
            pages.push(native_text(&pdf, page_number));
        } else {
            pages.push(runs.join("\n"));
        }
    }
    Ok(pages)
}

fn decode_utf16be(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a text string for the document information dictionary: plain
/// literal when ASCII, UTF-16BE with a byte-order mark otherwise.
fn pdf_text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::string_literal(text)
    } else {
        let mut raw = vec![0xFE, 0xFF];
        raw.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
        Object::String(raw, StringFormat::Hexadecimal)
    }
}

/// Title recorded in an assembled artifact, if any.
pub fn artifact_title(bytes: &[u8]) -> Option<String> {
    let pdf = lopdf::Document::load_mem(bytes).ok()?;
    let info = pdf.trailer.get(b"Info").ok()?.as_reference().ok()?;
    match pdf.get_dictionary(info).ok()?.get(b"Title").ok()? {
        Object::String(raw, _) => Some(decode_pdf_string(raw)),
        _ => None,
    }
}

fn native_text(pdf: &lopdf::Document, page_number: u32) -> String {
    match pdf.extract_text(&[page_number]) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            debug!(page = page_number, "No readable text on page: {e}");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::composite::{compose, placeholder};
    use crate::pipeline::mock::test_document_titled;
    use crate::pipeline::recognize::{BoundingBox, RecognitionResult, TextRun};

    fn fragments(n: usize) -> (crate::document::Document, Vec<PageFragment>) {
        let doc = test_document_titled(n, "Ledger Ü");
        let frags = (0..n)
            .map(|i| {
                let result = RecognitionResult::new(
                    612,
                    792,
                    vec![TextRun {
                        text: format!("page {} text", i + 1),
                        bbox: BoundingBox::new(72.0, 72.0, 300.0, 90.0),
                        confidence: 0.9,
                    }],
                )
                .for_page(i, 0.0);
                compose(&doc, &result).unwrap()
            })
            .collect();
        (doc, frags)
    }

    #[test]
    fn pages_keep_input_order_and_metadata() {
        let (doc, frags) = fragments(4);
        let bytes = assemble(frags, 4, doc.metadata()).unwrap();
        let text = text_layer(&bytes).unwrap();
        assert_eq!(
            text,
            ["page 1 text", "page 2 text", "page 3 text", "page 4 text"]
        );
        assert_eq!(artifact_title(&bytes).as_deref(), Some("Ledger Ü"));
    }

    #[test]
    fn placeholders_carry_no_text() {
        let (doc, mut frags) = fragments(3);
        frags[1] = placeholder(&doc, 1).unwrap();
        let bytes = assemble(frags, 3, doc.metadata()).unwrap();
        let text = text_layer(&bytes).unwrap();
        assert_eq!(text, ["page 1 text", "", "page 3 text"]);
    }

    #[test]
    fn wrong_count_is_rejected() {
        let (doc, mut frags) = fragments(3);
        frags.pop();
        assert_eq!(
            assemble(frags, 3, doc.metadata()).unwrap_err(),
            AssemblyError::FragmentCountMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn wrong_order_is_rejected() {
        let (doc, mut frags) = fragments(3);
        frags.swap(0, 2);
        assert_eq!(
            assemble(frags, 3, doc.metadata()).unwrap_err(),
            AssemblyError::OutOfOrder {
                position: 0,
                found: 2
            }
        );
    }

    #[test]
    fn publish_is_atomic_and_named_by_job() {
        let dir = tempfile::tempdir().unwrap();
        let id = JobId::new();
        let path = publish(b"%PDF-1.7 test", dir.path(), id).unwrap();
        assert_eq!(path, dir.path().join(format!("{id}.pdf")));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7 test");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".partial-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
