//! Cutting-instruction validation and normalization.
//!
//! Pure function over whatever the vision model or the segmentation engine
//! produced: normalizes indexing, repairs ranges, sorts, reports overlaps,
//! fills gaps, and rewrites forbidden labels. Overlapping ranges are reported
//! but never merged; each still produces its own part downstream.

use super::instruments::{is_forbidden_label, UNLABELLED};
use super::models::CuttingInstruction;

/// Options for one validation pass.
#[derive(Debug, Clone, Copy)]
pub struct ValidateOptions {
    /// Incoming ranges are 1-indexed (the external convention).
    pub one_indexed: bool,
    /// Synthesize filler instructions for uncovered pages.
    pub detect_gaps: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            one_indexed: true,
            detect_gaps: false,
        }
    }
}

/// Outcome of validation. `instructions` are always emitted 1-indexed.
/// Warnings never invalidate; errors do.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub instructions: Vec<CuttingInstruction>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn validate(
    instructions: &[CuttingInstruction],
    total_pages: usize,
    options: ValidateOptions,
) -> ValidationOutcome {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let last_page = total_pages as i64 - 1;

    // Normalize to 0-indexed, clamp into bounds, drop irreparable entries.
    let mut kept: Vec<CuttingInstruction> = Vec::with_capacity(instructions.len());
    for (index, instruction) in instructions.iter().enumerate() {
        let offset = if options.one_indexed { 1 } else { 0 };
        let raw_start = instruction.start() - offset;
        let raw_end = instruction.end() - offset;

        let start = raw_start.max(0);
        let end = raw_end.min(last_page);
        if start != raw_start || end != raw_end {
            warnings.push(format!(
                "instruction {} ({}) clamped to document bounds",
                index, instruction.instrument
            ));
        }
        if start > end {
            errors.push(format!(
                "instruction {} ({}) has an empty range after clamping and was dropped",
                index, instruction.instrument
            ));
            continue;
        }

        let mut entry = instruction.clone();
        entry.page_range = [start, end];
        sanitize_labels(&mut entry, &mut warnings, index);
        kept.push(entry);
    }

    // Ascending by start, ties by end.
    kept.sort_by_key(|i| (i.start(), i.end()));

    // Overlaps: one error per instruction involved, referencing both sides.
    for i in 0..kept.len() {
        for j in (i + 1)..kept.len() {
            if kept[j].start() > kept[i].end() {
                break;
            }
            errors.push(format!(
                "instruction {} ({}) overlaps instruction {} ({})",
                i, kept[i].instrument, j, kept[j].instrument
            ));
            errors.push(format!(
                "instruction {} ({}) overlaps instruction {} ({})",
                j, kept[j].instrument, i, kept[i].instrument
            ));
        }
    }

    if options.detect_gaps && total_pages > 0 {
        let gaps = uncovered_ranges(&kept, total_pages);
        for (start, end) in gaps {
            warnings.push(format!(
                "pages {}-{} are not covered; filler part added",
                start + 1,
                end + 1
            ));
            kept.push(CuttingInstruction {
                part_name: format!("Unlabelled Pages {}-{}", start + 1, end + 1),
                instrument: UNLABELLED.to_string(),
                section: "Other".to_string(),
                transposition: "C".to_string(),
                part_number: 1,
                page_range: [start, end],
            });
        }
        kept.sort_by_key(|i| (i.start(), i.end()));
    }

    // Back to the 1-indexed external convention.
    for instruction in &mut kept {
        instruction.page_range = [instruction.start() + 1, instruction.end() + 1];
    }

    ValidationOutcome {
        is_valid: errors.is_empty(),
        instructions: kept,
        errors,
        warnings,
    }
}

fn sanitize_labels(
    instruction: &mut CuttingInstruction,
    warnings: &mut Vec<String>,
    index: usize,
) {
    if is_forbidden_label(&instruction.instrument) {
        warnings.push(format!(
            "instruction {} had an uninformative instrument label; rewritten to {}",
            index, UNLABELLED
        ));
        instruction.instrument = UNLABELLED.to_string();
    }
    if instruction.part_name.trim().is_empty() || is_forbidden_label(&instruction.part_name) {
        instruction.part_name = instruction.instrument.clone();
    }
    if instruction.section.trim().is_empty() {
        instruction.section = "Other".to_string();
    }
    if instruction.transposition.trim().is_empty() {
        instruction.transposition = "C".to_string();
    }
    if instruction.part_number == 0 {
        instruction.part_number = 1;
    }
}

/// Complement of the union of (sorted, 0-indexed) ranges within
/// `[0, total_pages - 1]`, as inclusive ranges.
fn uncovered_ranges(sorted: &[CuttingInstruction], total_pages: usize) -> Vec<(i64, i64)> {
    let mut gaps = Vec::new();
    let mut next_uncovered: i64 = 0;
    for instruction in sorted {
        if instruction.start() > next_uncovered {
            gaps.push((next_uncovered, instruction.start() - 1));
        }
        next_uncovered = next_uncovered.max(instruction.end() + 1);
    }
    let last_page = total_pages as i64 - 1;
    if next_uncovered <= last_page {
        gaps.push((next_uncovered, last_page));
    }
    gaps
}
