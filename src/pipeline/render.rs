//! Rasterisation: render one page to a `DynamicImage`.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 300 DPI would produce a
//! 10,000 × 14,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size. pdfium scales uniformly, so the raster keeps
//! the page's aspect ratio and the compositor can still map boxes back.
//!
//! Calls are synchronous. The scheduler runs them inside `spawn_blocking`
//! with the per-call timeout, since pdfium keeps thread-local state and
//! rendering is CPU-heavy.

use crate::document::Document;
use crate::error::EngineError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// Capability: page index → raster image at a target resolution.
pub trait Rasterizer: Send + Sync {
    fn rasterize(
        &self,
        document: &Document,
        page_index: usize,
        dpi: u32,
    ) -> Result<DynamicImage, EngineError>;
}

/// Rasterizer backed by the pdfium library.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    /// Bind to the library at `library_path`, or look in the working
    /// directory and then the system library path when `None`.
    pub fn new(library_path: Option<PathBuf>, max_pixels: u32) -> Self {
        Self {
            library_path,
            max_pixels,
        }
    }

    fn bind(&self) -> Result<Pdfium, EngineError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| EngineError::permanent(format!("pdfium library unavailable: {e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        document: &Document,
        page_index: usize,
        dpi: u32,
    ) -> Result<DynamicImage, EngineError> {
        let pdfium = self.bind()?;

        // The bytes already passed validation, so a load failure here means
        // pdfium and lopdf disagree about the file; retrying will not help.
        let pdf = pdfium
            .load_pdf_from_byte_slice(document.bytes(), None)
            .map_err(|e| EngineError::permanent(format!("pdfium could not open document: {e:?}")))?;

        let index = u16::try_from(page_index)
            .map_err(|_| EngineError::permanent(format!("page index {page_index} out of range")))?;
        let page = pdf
            .pages()
            .get(index)
            .map_err(|e| EngineError::permanent(format!("page {}: {e:?}", page_index + 1)))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| EngineError::transient(format!("render page {}: {e:?}", page_index + 1)))?;

        let image = bitmap.as_image();
        debug!(
            page = page_index + 1,
            width = image.width(),
            height = image.height(),
            "Rendered page"
        );
        Ok(image)
    }
}
