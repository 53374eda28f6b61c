//! Input sniffing ahead of validation.
//!
//! PDFs pass through untouched. PNG, JPEG, TIFF and BMP uploads are decoded
//! with `image` and wrapped into a one-page PDF whose page is exactly the
//! picture, sized from `image_dpi`. From there on an image submission is an
//! ordinary one-page scan.

use crate::error::ValidationError;
use image::{DynamicImage, ImageFormat};
use lopdf::{dictionary, Object, Stream};
use tracing::debug;

/// How far into the file the `%PDF-` header may appear. Some producers emit
/// a few bytes of junk first, and readers tolerate it.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// Raster formats accepted as uploads.
pub const IMAGE_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
];

/// What an upload turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image(ImageFormat),
}

/// Classify an upload by its leading bytes. `None` for anything else.
pub fn sniff(bytes: &[u8]) -> Option<InputKind> {
    if has_pdf_header(bytes) {
        return Some(InputKind::Pdf);
    }
    image::guess_format(bytes)
        .ok()
        .filter(|format| IMAGE_FORMATS.contains(format))
        .map(InputKind::Image)
}

pub(crate) fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// Decode an image upload and return the bytes of a one-page PDF showing it.
pub fn image_to_pdf(
    bytes: &[u8],
    format: ImageFormat,
    dpi: u32,
) -> Result<Vec<u8>, ValidationError> {
    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        ValidationError::Malformed {
            detail: format!("cannot decode {format:?} image: {e}"),
        }
    })?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(ValidationError::Malformed {
            detail: "image has no pixels".to_string(),
        });
    }

    let pdf = wrap_image(decoded, dpi)?;
    debug!(?format, width, height, dpi, pdf_bytes = pdf.len(), "Image wrapped into PDF");
    Ok(pdf)
}

fn wrap_image(image: DynamicImage, dpi: u32) -> Result<Vec<u8>, ValidationError> {
    let (width, height) = (image.width(), image.height());
    let scale = 72.0 / dpi.max(1) as f32;
    let page_w = width as f32 * scale;
    let page_h = height as f32 * scale;

    let (color_space, samples) = match image {
        DynamicImage::ImageLuma8(gray) => ("DeviceGray", gray.into_raw()),
        other => ("DeviceRGB", other.into_rgb8().into_raw()),
    };

    let mut pdf = lopdf::Document::with_version("1.5");
    let pages_id = pdf.new_object_id();

    let mut picture = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
        },
        samples,
    );
    // Stored raw when compression fails.
    if let Err(e) = picture.compress() {
        debug!("Image stream left uncompressed: {e}");
    }
    let image_id = pdf.add_object(picture);

    let draw = format!("q\n{page_w:.3} 0 0 {page_h:.3} 0 0 cm\n/Im0 Do\nQ\n");
    let content_id = pdf.add_object(Stream::new(dictionary! {}, draw.into_bytes()));
    let page_id = pdf.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), Object::Real(page_w), Object::Real(page_h)],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "Contents" => content_id,
    });
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

    let mut out = Vec::new();
    pdf.save_to(&mut out).map_err(|e| ValidationError::Malformed {
        detail: format!("cannot wrap image into a PDF: {e}"),
    })?;
    Ok(out)
}
