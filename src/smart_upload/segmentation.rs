//! Deterministic segmentation of page headers into cutting instructions.
//!
//! Works entirely from per-page header text, whether that came from a real
//! PDF text layer or from the header-crop labeling pass. No model calls
//! happen here; confidence reflects how much of the document carried labels
//! and where they came from.

use super::instruments::{classify, normalize_header};
use super::models::CuttingInstruction;

/// Header observation for one page.
#[derive(Debug, Clone)]
pub struct PageHeader {
    /// 0-based page index.
    pub page_index: usize,
    pub header_text: String,
    /// False when the page had no legible header at all.
    pub has_text: bool,
}

/// Output of the segmentation sweep. Ranges are 0-indexed inclusive; the
/// caller converts to 1-indexed when persisting.
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub instructions: Vec<CuttingInstruction>,
    /// 0..=100.
    pub confidence: f64,
    /// Fraction of pages that carried a usable label.
    pub labeled_fraction: f64,
}

const BASE_CONFIDENCE: f64 = 50.0;
const TEXT_LAYER_BONUS: f64 = 15.0;
const COVERAGE_BONUS: f64 = 10.0;

struct OpenSegment {
    key: String,
    display_name: String,
    part_number: u32,
    start: usize,
    end: usize,
}

impl OpenSegment {
    fn into_instruction(self) -> CuttingInstruction {
        let (section, transposition) = classify(&self.key);
        let part_name = if self.part_number > 1 {
            format!("{} {}", self.display_name, self.part_number)
        } else {
            self.display_name.clone()
        };
        CuttingInstruction {
            part_name,
            instrument: self.display_name,
            section: section.to_string(),
            transposition: transposition.to_string(),
            part_number: self.part_number,
            page_range: [self.start as i64, self.end as i64],
        }
    }
}

/// Sweep pages in order, opening a new segment whenever the normalized
/// instrument identity changes. Pages without a legible header extend the
/// current segment; front matter before the first label is absorbed into the
/// first segment.
///
/// `from_text_layer` is a confidence hint only: a true text layer is more
/// trustworthy than vision-labeled header crops.
pub fn segment(
    page_headers: &[PageHeader],
    total_pages: usize,
    from_text_layer: bool,
) -> SegmentationResult {
    if total_pages == 0 {
        return SegmentationResult {
            instructions: Vec::new(),
            confidence: 0.0,
            labeled_fraction: 0.0,
        };
    }

    let mut header_by_page: Vec<Option<&PageHeader>> = vec![None; total_pages];
    for header in page_headers {
        if header.page_index < total_pages {
            header_by_page[header.page_index] = Some(header);
        }
    }

    let mut segments: Vec<OpenSegment> = Vec::new();
    let mut current: Option<OpenSegment> = None;
    let mut labeled_pages = 0usize;

    for page_index in 0..total_pages {
        let normalized = header_by_page[page_index]
            .filter(|h| h.has_text)
            .and_then(|h| normalize_header(&h.header_text));

        match normalized {
            None => {
                // Unlabeled pages extend whatever segment is open.
                if let Some(segment) = current.as_mut() {
                    segment.end = page_index;
                }
            }
            Some(header) => {
                labeled_pages += 1;
                let part_number = header.part_number.unwrap_or(1);
                let key = format!("{}#{}", header.instrument_key, part_number);

                match current.as_mut() {
                    Some(segment) if segment.key == key => {
                        segment.end = page_index;
                    }
                    Some(_) => {
                        segments.push(current.take().unwrap());
                        current = Some(OpenSegment {
                            key,
                            display_name: header.display_name,
                            part_number,
                            start: page_index,
                            end: page_index,
                        });
                    }
                    None => {
                        // First label seen: absorb any front matter.
                        current = Some(OpenSegment {
                            key,
                            display_name: header.display_name,
                            part_number,
                            start: 0,
                            end: page_index,
                        });
                    }
                }
            }
        }
    }
    if let Some(segment) = current.take() {
        segments.push(segment);
    }

    if segments.is_empty() {
        // Zero labeled pages: single whole-document fallback at confidence 0;
        // the processor falls through to LLM-driven segmentation.
        return SegmentationResult {
            instructions: vec![CuttingInstruction {
                part_name: "Full Score".to_string(),
                instrument: "Full Score".to_string(),
                section: "Score".to_string(),
                transposition: "C".to_string(),
                part_number: 1,
                page_range: [0, total_pages as i64 - 1],
            }],
            confidence: 0.0,
            labeled_fraction: 0.0,
        };
    }

    let labeled_fraction = labeled_pages as f64 / total_pages as f64;
    let confidence = (BASE_CONFIDENCE
        + if from_text_layer { TEXT_LAYER_BONUS } else { 0.0 }
        + COVERAGE_BONUS * labeled_fraction)
        .min(100.0);

    SegmentationResult {
        instructions: segments.into_iter().map(OpenSegment::into_instruction).collect(),
        confidence,
        labeled_fraction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(specs: &[(usize, &str)]) -> Vec<PageHeader> {
        specs
            .iter()
            .map(|(index, text)| PageHeader {
                page_index: *index,
                header_text: text.to_string(),
                has_text: !text.is_empty(),
            })
            .collect()
    }

    #[test]
    fn uniform_headers_make_one_segment() {
        let result = segment(&headers(&[(0, "Flute"), (1, "Flute")]), 2, true);
        assert_eq!(result.instructions.len(), 1);
        let instruction = &result.instructions[0];
        assert_eq!(instruction.instrument, "Flute");
        assert_eq!(instruction.page_range, [0, 1]);
        assert_eq!(instruction.section, "Woodwinds");
        assert_eq!(result.confidence, 75.0);
    }

    #[test]
    fn part_number_changes_open_new_segments() {
        let result = segment(
            &headers(&[
                (0, "Flute 1"),
                (1, "Flute 1"),
                (2, "Flute 1"),
                (3, "Flute 2"),
                (4, "Flute 2"),
                (5, "Flute 2"),
                (6, "Bb Clarinet"),
                (7, "Bb Clarinet"),
                (8, "Bb Clarinet"),
                (9, "Bb Clarinet"),
            ]),
            10,
            true,
        );
        assert_eq!(result.instructions.len(), 3);
        assert_eq!(result.instructions[0].page_range, [0, 2]);
        assert_eq!(result.instructions[1].page_range, [3, 5]);
        assert_eq!(result.instructions[2].page_range, [6, 9]);
        assert_eq!(result.instructions[0].transposition, "C");
        assert_eq!(result.instructions[2].transposition, "Bb");
        assert!(result.instructions.iter().all(|i| i.section == "Woodwinds"));
        assert!(result.confidence >= 75.0);
    }

    #[test]
    fn unlabeled_pages_extend_the_current_segment() {
        let result = segment(
            &headers(&[(0, "Trumpet 1"), (3, "Trumpet 2")]),
            6,
            false,
        );
        assert_eq!(result.instructions.len(), 2);
        assert_eq!(result.instructions[0].page_range, [0, 2]);
        assert_eq!(result.instructions[1].page_range, [3, 5]);
    }

    #[test]
    fn front_matter_is_absorbed_into_the_first_segment() {
        let result = segment(&headers(&[(2, "Oboe")]), 4, true);
        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.instructions[0].page_range, [0, 3]);
    }

    #[test]
    fn zero_labels_fall_back_to_full_score_at_zero_confidence() {
        let result = segment(&[], 12, false);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.instructions[0].instrument, "Full Score");
        assert_eq!(result.instructions[0].page_range, [0, 11]);
    }

    #[test]
    fn text_layer_bonus_applies_only_when_claimed() {
        let labeled = headers(&[(0, "Flute"), (1, "Flute")]);
        let with_layer = segment(&labeled, 2, true);
        let without_layer = segment(&labeled, 2, false);
        assert_eq!(with_layer.confidence - without_layer.confidence, 15.0);
    }

    #[test]
    fn forbidden_headers_count_as_unlabeled() {
        let result = segment(
            &headers(&[(0, "Flute"), (1, "unknown"), (2, "n/a")]),
            3,
            true,
        );
        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.instructions[0].page_range, [0, 2]);
        assert!(result.labeled_fraction < 0.5);
    }

    #[test]
    fn confidence_never_exceeds_100() {
        let all_labeled: Vec<PageHeader> = (0..4)
            .map(|i| PageHeader {
                page_index: i,
                header_text: "Flute".to_string(),
                has_text: true,
            })
            .collect();
        let result = segment(&all_labeled, 4, true);
        assert!(result.confidence <= 100.0);
    }
}
