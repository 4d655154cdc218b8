//! Quality gates deciding whether a session may commit autonomously.
//!
//! Pure predicate composition; every failed gate appends a human-readable
//! reason, and `failed == false` exactly when no reasons accumulated.

use super::instruments::is_forbidden_label;
use super::models::{ExtractedMetadata, ParsedPart};

/// Input snapshot for one evaluation.
pub struct QualityInput<'a> {
    pub parsed_parts: &'a [ParsedPart],
    pub metadata: &'a ExtractedMetadata,
    pub total_pages: usize,
    pub max_pages_per_part: u32,
    /// Present when deterministic segmentation contributed to the result.
    pub segmentation_confidence: Option<f64>,
}

/// Gate verdict plus the blended final confidence.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub failed: bool,
    pub reasons: Vec<String>,
    /// 0..=100.
    pub final_confidence: f64,
}

pub fn evaluate(input: &QualityInput) -> GateOutcome {
    let mut reasons: Vec<String> = Vec::new();

    // Gate 1: something was actually produced.
    if input.parsed_parts.is_empty() {
        reasons.push("no parts were produced".to_string());
    }

    // Gate 2: part sizes within bounds.
    for part in input.parsed_parts {
        if part.page_count > input.max_pages_per_part {
            reasons.push(format!(
                "part '{}' spans {} pages (limit {})",
                part.part_name, part.page_count, input.max_pages_per_part
            ));
        }
    }

    // Gate 3: exact cover of [1, total_pages], no gaps, no overlaps.
    check_exact_cover(input.parsed_parts, input.total_pages, &mut reasons);

    // Gate 4: no uninformative labels survived.
    for part in input.parsed_parts {
        if is_forbidden_label(&part.instrument) {
            reasons.push(format!(
                "part covering pages {}-{} has no usable instrument label",
                part.page_range[0], part.page_range[1]
            ));
        }
    }

    // Gate 5: a title was extracted.
    if input.metadata.title.trim().is_empty() {
        reasons.push("no title was extracted".to_string());
    }

    // Gate 6: part count coherent with the multi-part flag.
    if input.metadata.is_multi_part {
        if input.parsed_parts.len() < 2 {
            reasons.push("metadata says multi-part but fewer than 2 parts exist".to_string());
        }
    } else if input.parsed_parts.len() > 1 {
        reasons.push(format!(
            "metadata says single-part but {} parts exist",
            input.parsed_parts.len()
        ));
    }

    let confidence = input.metadata.confidence_score;
    let final_confidence = match input.segmentation_confidence {
        Some(seg) => confidence.min(0.7 * confidence + 0.3 * seg),
        None => confidence,
    }
    .clamp(0.0, 100.0);

    GateOutcome {
        failed: !reasons.is_empty(),
        reasons,
        final_confidence,
    }
}

fn check_exact_cover(parts: &[ParsedPart], total_pages: usize, reasons: &mut Vec<String>) {
    if parts.is_empty() || total_pages == 0 {
        return;
    }
    let mut counts = vec![0u32; total_pages];
    let mut out_of_bounds = false;
    for part in parts {
        let [start, end] = part.page_range;
        if start < 1 || end > total_pages as i64 || start > end {
            out_of_bounds = true;
            continue;
        }
        for page in start..=end {
            counts[(page - 1) as usize] += 1;
        }
    }
    if out_of_bounds {
        reasons.push("a part's page range falls outside the document".to_string());
    }
    if counts.iter().any(|&c| c == 0) {
        reasons.push("parts leave document pages uncovered".to_string());
    }
    if counts.iter().any(|&c| c > 1) {
        reasons.push("parts overlap on at least one page".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(name: &str, start: i64, end: i64) -> ParsedPart {
        ParsedPart {
            instrument: name.to_string(),
            part_name: name.to_string(),
            section: "Woodwinds".to_string(),
            transposition: "C".to_string(),
            part_number: 1,
            storage_key: format!("smart-upload/s/parts/{}.pdf", name.to_lowercase()),
            filename: format!("{}.pdf", name.to_lowercase()),
            byte_size: 100,
            page_count: (end - start + 1) as u32,
            page_range: [start, end],
        }
    }

    fn metadata(title: &str, multi: bool, confidence: f64) -> ExtractedMetadata {
        ExtractedMetadata {
            title: title.to_string(),
            is_multi_part: multi,
            confidence_score: confidence,
            ..Default::default()
        }
    }

    #[test]
    fn clean_single_part_session_passes() {
        let parts = vec![part("Flute", 1, 2)];
        let meta = metadata("Air for Band", false, 92.0);
        let outcome = evaluate(&QualityInput {
            parsed_parts: &parts,
            metadata: &meta,
            total_pages: 2,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(!outcome.failed, "{:?}", outcome.reasons);
        assert_eq!(outcome.final_confidence, 92.0);
    }

    #[test]
    fn empty_parts_fail() {
        let meta = metadata("Title", false, 90.0);
        let outcome = evaluate(&QualityInput {
            parsed_parts: &[],
            metadata: &meta,
            total_pages: 4,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(outcome.failed);
    }

    #[test]
    fn oversized_parts_fail() {
        let parts = vec![part("Score", 1, 50)];
        let meta = metadata("Title", false, 90.0);
        let outcome = evaluate(&QualityInput {
            parsed_parts: &parts,
            metadata: &meta,
            total_pages: 50,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(outcome.failed);
        assert!(outcome.reasons[0].contains("limit 40"));
    }

    #[test]
    fn gaps_and_overlaps_fail_coverage() {
        let meta = metadata("Title", true, 90.0);

        let gappy = vec![part("A", 1, 3), part("B", 7, 10)];
        let outcome = evaluate(&QualityInput {
            parsed_parts: &gappy,
            metadata: &meta,
            total_pages: 10,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(outcome.reasons.iter().any(|r| r.contains("uncovered")));

        let overlapping = vec![part("A", 1, 5), part("B", 5, 10)];
        let outcome = evaluate(&QualityInput {
            parsed_parts: &overlapping,
            metadata: &meta,
            total_pages: 10,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(outcome.reasons.iter().any(|r| r.contains("overlap")));
    }

    #[test]
    fn forbidden_labels_fail() {
        let parts = vec![part("unknown", 1, 4)];
        let meta = metadata("Title", false, 90.0);
        let outcome = evaluate(&QualityInput {
            parsed_parts: &parts,
            metadata: &meta,
            total_pages: 4,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(outcome.failed);
    }

    #[test]
    fn missing_title_fails() {
        let parts = vec![part("Flute", 1, 4)];
        let meta = metadata("  ", false, 90.0);
        let outcome = evaluate(&QualityInput {
            parsed_parts: &parts,
            metadata: &meta,
            total_pages: 4,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(outcome.failed);
    }

    #[test]
    fn multi_part_flag_must_match_part_count() {
        let one_part = vec![part("Flute", 1, 4)];
        let meta = metadata("Title", true, 90.0);
        let outcome = evaluate(&QualityInput {
            parsed_parts: &one_part,
            metadata: &meta,
            total_pages: 4,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(outcome.failed);

        let two_parts = vec![part("Flute", 1, 2), part("Oboe", 3, 4)];
        let meta = metadata("Title", false, 90.0);
        let outcome = evaluate(&QualityInput {
            parsed_parts: &two_parts,
            metadata: &meta,
            total_pages: 4,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert!(outcome.failed);
    }

    #[test]
    fn segmentation_confidence_blends_downward_only() {
        let parts = vec![part("Flute", 1, 4)];
        let meta = metadata("Title", false, 90.0);

        let low_seg = evaluate(&QualityInput {
            parsed_parts: &parts,
            metadata: &meta,
            total_pages: 4,
            max_pages_per_part: 40,
            segmentation_confidence: Some(50.0),
        });
        // min(90, 0.7*90 + 0.3*50) = min(90, 78) = 78
        assert_eq!(low_seg.final_confidence, 78.0);

        let high_seg = evaluate(&QualityInput {
            parsed_parts: &parts,
            metadata: &meta,
            total_pages: 4,
            max_pages_per_part: 40,
            segmentation_confidence: Some(100.0),
        });
        // min(90, 93) = 90: segmentation never raises above the model score.
        assert_eq!(high_seg.final_confidence, 90.0);
    }

    #[test]
    fn empty_reasons_iff_not_failed() {
        let parts = vec![part("Flute", 1, 4)];
        let meta = metadata("Title", false, 90.0);
        let outcome = evaluate(&QualityInput {
            parsed_parts: &parts,
            metadata: &meta,
            total_pages: 4,
            max_pages_per_part: 40,
            segmentation_confidence: None,
        });
        assert_eq!(outcome.failed, !outcome.reasons.is_empty());
        assert!(outcome.reasons.is_empty());
    }
}
