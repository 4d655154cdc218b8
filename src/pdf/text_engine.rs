//! Default PDF engine: text-layer primitives via lopdf.
//!
//! Covers engraved PDFs, which carry a real text layer and never need
//! rasterisation for the deterministic path. Scanned documents need an
//! external raster engine plugged in behind [`super::PdfRasterizer`]; this
//! engine reports rasterisation as unavailable rather than guessing.

use super::{PageText, PdfError, PdfRasterizer, RenderOptions};
use async_trait::async_trait;
use lopdf::Document;

pub struct LopdfTextEngine;

impl LopdfTextEngine {
    pub fn new() -> Self {
        Self
    }

    fn load(pdf: &[u8]) -> Result<Document, PdfError> {
        Document::load_mem(pdf).map_err(|e| PdfError::Corrupt(e.to_string()))
    }
}

impl Default for LopdfTextEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PdfRasterizer for LopdfTextEngine {
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, PdfError> {
        Ok(Self::load(pdf)?.get_pages().len())
    }

    async fn render_page_png(
        &self,
        _pdf: &[u8],
        page_index: usize,
        _options: RenderOptions,
    ) -> Result<Vec<u8>, PdfError> {
        Err(PdfError::Render {
            page: page_index + 1,
            detail: "no raster engine configured".to_string(),
        })
    }

    async fn render_header_crop_png(
        &self,
        _pdf: &[u8],
        page_index: usize,
    ) -> Result<Vec<u8>, PdfError> {
        Err(PdfError::Render {
            page: page_index + 1,
            detail: "no raster engine configured".to_string(),
        })
    }

    async fn extract_page_text(
        &self,
        pdf: &[u8],
        page_index: usize,
    ) -> Result<PageText, PdfError> {
        let doc = Self::load(pdf)?;
        let total = doc.get_pages().len();
        if page_index >= total {
            return Err(PdfError::PageOutOfRange {
                page: page_index + 1,
                total,
            });
        }
        let text = doc
            .extract_text(&[(page_index + 1) as u32])
            .unwrap_or_default();
        Ok(PageText { text })
    }
}
