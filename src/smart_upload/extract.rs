//! Lenient parsing of vision model output.
//!
//! Models wrap JSON in code fences, lead with prose, or emit numbers as
//! strings. Parsing here recovers what it can and falls back to a minimal
//! valid metadata rather than failing the job; a parse failure is a quality
//! problem, not a fatal one.

use super::models::{CuttingInstruction, ExtractedMetadata};
use serde_json::Value;
use tracing::debug;

/// Parse model output into metadata, falling back to a single whole-document
/// instruction at confidence zero when nothing usable is found.
pub fn parse_metadata(raw: &str, total_pages: usize) -> ExtractedMetadata {
    match extract_first_json_object(raw).and_then(|json| coerce_metadata(&json)) {
        Some(metadata) => metadata,
        None => {
            debug!("Vision output had no usable JSON object; using fallback metadata");
            fallback_metadata(total_pages)
        }
    }
}

/// Minimal valid metadata: one Full Score instruction covering every page.
pub fn fallback_metadata(total_pages: usize) -> ExtractedMetadata {
    ExtractedMetadata {
        title: String::new(),
        composer: None,
        arranger: None,
        is_multi_part: false,
        confidence_score: 0.0,
        cutting_instructions: vec![CuttingInstruction {
            part_name: "Full Score".to_string(),
            instrument: "Full Score".to_string(),
            section: "Score".to_string(),
            transposition: "C".to_string(),
            part_number: 1,
            page_range: [1, total_pages.max(1) as i64],
        }],
        notes: None,
    }
}

/// Strip fenced code blocks and extract the first balanced top-level JSON
/// object, string-aware.
pub fn extract_first_json_object(raw: &str) -> Option<Value> {
    let stripped = strip_code_fences(raw);
    let bytes = stripped.as_bytes();
    let start = stripped.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &stripped[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }
    // Keep only content between the first pair of fences when present;
    // otherwise drop fence lines wholesale.
    let mut inside = false;
    let mut kept: Vec<&str> = Vec::new();
    for line in trimmed.lines() {
        if line.trim_start().starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            kept.push(line);
        }
    }
    if kept.is_empty() {
        trimmed.replace("```", "")
    } else {
        kept.join("\n")
    }
}

/// Coerce a JSON value into metadata with per-field type guards. Returns
/// `None` only when the value is not an object at all.
fn coerce_metadata(json: &Value) -> Option<ExtractedMetadata> {
    let obj = json.as_object()?;

    let instructions = obj
        .get("cuttingInstructions")
        .or_else(|| obj.get("cutting_instructions"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(coerce_instruction).collect())
        .unwrap_or_default();

    Some(ExtractedMetadata {
        title: string_field(obj.get("title")).unwrap_or_default(),
        composer: string_field(obj.get("composer")),
        arranger: string_field(obj.get("arranger")),
        is_multi_part: obj
            .get("isMultiPart")
            .or_else(|| obj.get("is_multi_part"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        confidence_score: number_field(
            obj.get("confidenceScore")
                .or_else(|| obj.get("confidence_score")),
        )
        .unwrap_or(0.0)
        .clamp(0.0, 100.0),
        cutting_instructions: instructions,
        notes: string_field(obj.get("notes")),
    })
}

fn coerce_instruction(value: &Value) -> Option<CuttingInstruction> {
    let obj = value.as_object()?;
    let (start, end) = coerce_page_range(
        obj.get("pageRange").or_else(|| obj.get("page_range"))?,
    )?;

    let instrument = string_field(obj.get("instrument")).unwrap_or_default();
    let part_name = string_field(obj.get("partName").or_else(|| obj.get("part_name")))
        .unwrap_or_else(|| instrument.clone());

    Some(CuttingInstruction {
        instrument,
        part_name,
        section: string_field(obj.get("section")).unwrap_or_else(|| "Other".to_string()),
        transposition: string_field(obj.get("transposition")).unwrap_or_else(|| "C".to_string()),
        part_number: number_field(obj.get("partNumber").or_else(|| obj.get("part_number")))
            .map(|n| n.max(1.0) as u32)
            .unwrap_or(1),
        page_range: [start, end],
    })
}

/// Ranges arrive as `[start, end]` or `{"start": .., "end": ..}`.
fn coerce_page_range(value: &Value) -> Option<(i64, i64)> {
    if let Some(pair) = value.as_array() {
        if pair.len() == 2 {
            return Some((
                number_field(pair.first())? as i64,
                number_field(pair.get(1))? as i64,
            ));
        }
        return None;
    }
    let obj = value.as_object()?;
    Some((
        number_field(obj.get("start"))? as i64,
        number_field(obj.get("end"))? as i64,
    ))
}

/// Parse the header-label pass output: `{"pages": [{"page": N, "header":
/// "Flute 1" | null}]}`. Page numbers are 1-indexed as labeled in the
/// request. Unusable entries are dropped.
pub fn parse_header_labels(raw: &str) -> Vec<(usize, Option<String>)> {
    let Some(json) = extract_first_json_object(raw) else {
        return Vec::new();
    };
    let Some(pages) = json.get("pages").and_then(Value::as_array) else {
        return Vec::new();
    };
    pages
        .iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let page = number_field(obj.get("page"))? as i64;
            if page < 1 {
                return None;
            }
            let header = match obj.get("header") {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            };
            Some((page as usize, header))
        })
        .collect()
}

fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Numbers, or numeric strings like "87".
fn number_field(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json_parses() {
        let raw = r#"{"title": "Air", "isMultiPart": false, "confidenceScore": 88,
                      "cuttingInstructions": [{"partName": "Flute", "instrument": "Flute",
                      "section": "Woodwinds", "transposition": "C", "partNumber": 1,
                      "pageRange": [1, 2]}]}"#;
        let metadata = parse_metadata(raw, 2);
        assert_eq!(metadata.title, "Air");
        assert_eq!(metadata.confidence_score, 88.0);
        assert_eq!(metadata.cutting_instructions.len(), 1);
        assert_eq!(metadata.cutting_instructions[0].page_range, [1, 2]);
    }

    #[test]
    fn fenced_json_with_prose_parses() {
        let raw = "Here is the analysis you asked for:\n```json\n{\"title\": \"March\", \"confidenceScore\": \"75\"}\n```\nLet me know!";
        let metadata = parse_metadata(raw, 4);
        assert_eq!(metadata.title, "March");
        assert_eq!(metadata.confidence_score, 75.0);
    }

    #[test]
    fn first_of_multiple_objects_wins() {
        let raw = r#"{"title": "First"} {"title": "Second"}"#;
        let metadata = parse_metadata(raw, 1);
        assert_eq!(metadata.title, "First");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let raw = r#"{"title": "Intro {with braces}", "confidenceScore": 60}"#;
        let metadata = parse_metadata(raw, 1);
        assert_eq!(metadata.title, "Intro {with braces}");
    }

    #[test]
    fn object_page_ranges_are_accepted() {
        let raw = r#"{"title": "T", "cuttingInstructions":
                      [{"instrument": "Oboe", "pageRange": {"start": 3, "end": 5}}]}"#;
        let metadata = parse_metadata(raw, 8);
        assert_eq!(metadata.cutting_instructions[0].page_range, [3, 5]);
        assert_eq!(metadata.cutting_instructions[0].part_name, "Oboe");
    }

    #[test]
    fn garbage_falls_back_to_full_score() {
        let metadata = parse_metadata("I could not read the document, sorry.", 12);
        assert_eq!(metadata.confidence_score, 0.0);
        assert_eq!(metadata.cutting_instructions.len(), 1);
        assert_eq!(metadata.cutting_instructions[0].instrument, "Full Score");
        assert_eq!(metadata.cutting_instructions[0].page_range, [1, 12]);
    }

    #[test]
    fn unusable_instructions_are_skipped_not_fatal() {
        let raw = r#"{"title": "T", "cuttingInstructions":
                      [{"instrument": "Flute"},
                       {"instrument": "Oboe", "pageRange": [1, 4]}]}"#;
        let metadata = parse_metadata(raw, 4);
        assert_eq!(metadata.cutting_instructions.len(), 1);
        assert_eq!(metadata.cutting_instructions[0].instrument, "Oboe");
    }

    #[test]
    fn header_labels_parse_with_nulls() {
        let raw = r#"{"pages": [
            {"page": 1, "header": "Flute 1"},
            {"page": 2, "header": null},
            {"page": 0, "header": "bogus index"},
            {"page": 3, "header": "  "}
        ]}"#;
        let labels = parse_header_labels(raw);
        assert_eq!(
            labels,
            vec![
                (1, Some("Flute 1".to_string())),
                (2, None),
                (3, None),
            ]
        );
    }

    #[test]
    fn header_labels_from_garbage_are_empty() {
        assert!(parse_header_labels("no json here").is_empty());
        assert!(parse_header_labels(r#"{"pages": "wrong type"}"#).is_empty());
    }

    #[test]
    fn confidence_is_clamped() {
        let metadata = parse_metadata(r#"{"title": "T", "confidenceScore": 250}"#, 1);
        assert_eq!(metadata.confidence_score, 100.0);
    }
}
