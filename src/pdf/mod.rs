//! PDF collaborators: the rasterizer/text-extraction interface and the
//! page-range splitter.
//!
//! Rasterisation and text-layer extraction are heavyweight native concerns
//! kept behind `PdfRasterizer`; splitting by page ranges is small enough to
//! implement here directly on top of `lopdf`.

mod splitter;
mod text_engine;

pub use splitter::{split_page_ranges, SplitPart};
pub use text_engine::LopdfTextEngine;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF is corrupt or unreadable: {0}")]
    Corrupt(String),

    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    #[error("Rendering failed for page {page}: {detail}")]
    Render { page: usize, detail: String },
}

/// Raster settings for vision-bound page images.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Raster scale factor relative to the page's natural size.
    pub scale: f32,
    /// Cap on the rendered width in pixels.
    pub max_width: u32,
    /// Encoder quality (0-100).
    pub quality: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            scale: 2.0,
            max_width: 1024,
            quality: 85,
        }
    }
}

/// Fraction of page height taken by the header strip crop.
pub const HEADER_CROP_FRACTION: f32 = 0.2;

/// Text extracted from one page's text layer.
#[derive(Debug, Clone, Default)]
pub struct PageText {
    /// Full text of the page, possibly empty for scanned documents.
    pub text: String,
}

impl PageText {
    /// First non-empty line, which is where part headers live on engraved
    /// sheet music.
    pub fn header_line(&self) -> Option<&str> {
        self.text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }
}

/// Raster and text-layer primitives, provided by an external engine.
#[async_trait]
pub trait PdfRasterizer: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, PdfError>;

    /// Render one page (0-indexed) to an encoded PNG.
    async fn render_page_png(
        &self,
        pdf: &[u8],
        page_index: usize,
        options: RenderOptions,
    ) -> Result<Vec<u8>, PdfError>;

    /// Render the top strip of one page (0-indexed) to an encoded PNG.
    async fn render_header_crop_png(
        &self,
        pdf: &[u8],
        page_index: usize,
    ) -> Result<Vec<u8>, PdfError>;

    /// Extract the text layer of one page (0-indexed). An empty result means
    /// the page is a pure scan.
    async fn extract_page_text(&self, pdf: &[u8], page_index: usize)
        -> Result<PageText, PdfError>;
}
