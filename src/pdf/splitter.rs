//! Split a PDF into per-part documents by page range.

use super::PdfError;
use lopdf::Document;
use tracing::debug;

/// One split output document.
#[derive(Debug, Clone)]
pub struct SplitPart {
    pub bytes: Vec<u8>,
    pub page_count: u32,
}

/// Extract each 0-indexed inclusive page range into its own document.
///
/// Ranges are cut independently: overlapping ranges each produce a complete
/// part, matching how duplicate cutting instructions are handled downstream.
pub fn split_page_ranges(
    pdf_bytes: &[u8],
    ranges: &[(usize, usize)],
) -> Result<Vec<SplitPart>, PdfError> {
    let source = Document::load_mem(pdf_bytes).map_err(|e| PdfError::Corrupt(e.to_string()))?;
    let total_pages = source.get_pages().len();

    let mut parts = Vec::with_capacity(ranges.len());
    for &(start, end) in ranges {
        if start > end || end >= total_pages {
            return Err(PdfError::PageOutOfRange {
                page: end + 1,
                total: total_pages,
            });
        }

        // lopdf numbers pages from 1; drop everything outside the range.
        let mut doc = Document::load_mem(pdf_bytes).map_err(|e| PdfError::Corrupt(e.to_string()))?;
        let delete: Vec<u32> = (1..=total_pages as u32)
            .filter(|page| {
                let index = (page - 1) as usize;
                index < start || index > end
            })
            .collect();
        if !delete.is_empty() {
            doc.delete_pages(&delete);
        }
        doc.prune_objects();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| PdfError::Render {
                page: start + 1,
                detail: e.to_string(),
            })?;

        let page_count = (end - start + 1) as u32;
        debug!(start, end, bytes = bytes.len(), "Split page range");
        parts.push(SplitPart { bytes, page_count });
    }

    Ok(parts)
}
