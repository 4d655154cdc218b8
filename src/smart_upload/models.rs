//! Data model for upload sessions, cutting instructions, and parsed parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal classification of a processed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingDecision {
    #[serde(rename = "auto_parse_auto_approve")]
    AutoParseAutoApprove,
    #[serde(rename = "auto_parse_second_pass")]
    AutoParseSecondPass,
    #[serde(rename = "no_parse_second_pass")]
    NoParseSecondPass,
}

impl RoutingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingDecision::AutoParseAutoApprove => "auto_parse_auto_approve",
            RoutingDecision::AutoParseSecondPass => "auto_parse_second_pass",
            RoutingDecision::NoParseSecondPass => "no_parse_second_pass",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_parse_auto_approve" => Some(RoutingDecision::AutoParseAutoApprove),
            "auto_parse_second_pass" => Some(RoutingDecision::AutoParseSecondPass),
            "no_parse_second_pass" => Some(RoutingDecision::NoParseSecondPass),
            _ => None,
        }
    }

    /// Ordering used by the routing-monotonicity property: auto-approve is
    /// "higher" than second pass, which is higher than no-parse.
    pub fn rank(&self) -> u8 {
        match self {
            RoutingDecision::AutoParseAutoApprove => 2,
            RoutingDecision::AutoParseSecondPass => 1,
            RoutingDecision::NoParseSecondPass => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStatus {
    #[serde(rename = "NOT_PARSED")]
    NotParsed,
    #[serde(rename = "PARSED")]
    Parsed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::NotParsed => "NOT_PARSED",
            ParseStatus::Parsed => "PARSED",
            ParseStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_PARSED" => Some(ParseStatus::NotParsed),
            "PARSED" => Some(ParseStatus::Parsed),
            "FAILED" => Some(ParseStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondPassStatus {
    #[serde(rename = "NOT_NEEDED")]
    NotNeeded,
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "FAILED")]
    Failed,
}

impl SecondPassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecondPassStatus::NotNeeded => "NOT_NEEDED",
            SecondPassStatus::Queued => "QUEUED",
            SecondPassStatus::Complete => "COMPLETE",
            SecondPassStatus::Failed => "FAILED",
        }
    }

    /// NULL in the database reads as `NotNeeded`; rows written by older
    /// builds stored the absence of a second pass that way.
    pub fn parse(s: Option<&str>) -> Option<Self> {
        match s {
            None => Some(SecondPassStatus::NotNeeded),
            Some("NOT_NEEDED") => Some(SecondPassStatus::NotNeeded),
            Some("QUEUED") => Some(SecondPassStatus::Queued),
            Some("COMPLETE") => Some(SecondPassStatus::Complete),
            Some("FAILED") => Some(SecondPassStatus::Failed),
            Some(_) => None,
        }
    }
}

/// Directive to extract one contiguous page range into a single output part.
///
/// `page_range` is inclusive. At the external boundary (persisted sessions,
/// LLM traffic) ranges are 1-indexed; segmentation and splitting work
/// 0-indexed internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuttingInstruction {
    pub part_name: String,
    pub instrument: String,
    pub section: String,
    pub transposition: String,
    pub part_number: u32,
    pub page_range: [i64; 2],
}

impl CuttingInstruction {
    pub fn start(&self) -> i64 {
        self.page_range[0]
    }

    pub fn end(&self) -> i64 {
        self.page_range[1]
    }

    /// Display name used for filenames and storage keys.
    pub fn display_name(&self) -> String {
        if self.part_number > 1 || self.part_name.trim().is_empty() {
            format!("{} {}", self.instrument, self.part_number)
        } else {
            self.part_name.clone()
        }
    }
}

/// A materialized output part: the split PDF plus its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPart {
    pub instrument: String,
    pub part_name: String,
    pub section: String,
    pub transposition: String,
    pub part_number: u32,
    pub storage_key: String,
    pub filename: String,
    pub byte_size: u64,
    pub page_count: u32,
    /// Final 1-indexed inclusive page range within the original document.
    pub page_range: [i64; 2],
}

/// Metadata extracted by the vision pass, after lenient parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub composer: Option<String>,
    #[serde(default)]
    pub arranger: Option<String>,
    #[serde(default)]
    pub is_multi_part: bool,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub cutting_instructions: Vec<CuttingInstruction>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// LLM provenance recorded with a processed session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmProvenance {
    pub provider: Option<String>,
    pub vision_model: Option<String>,
    pub verification_model: Option<String>,
    pub model_params: Option<serde_json::Value>,
    pub prompt_version: Option<String>,
}

/// One upload session. Created on upload, mutated only by the processor, and
/// terminated by auto-commit or explicit human action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: String,
    pub original_filename: String,
    pub byte_size: u64,
    pub mime_type: String,
    pub storage_key: String,
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub extracted_metadata: Option<ExtractedMetadata>,
    pub confidence_score: f64,
    pub final_confidence: f64,
    pub routing_decision: Option<RoutingDecision>,
    pub parse_status: ParseStatus,
    pub second_pass_status: SecondPassStatus,
    pub auto_approved: bool,
    pub requires_human_review: bool,
    pub parsed_parts: Vec<ParsedPart>,
    pub cutting_instructions: Vec<CuttingInstruction>,
    pub temp_files: Vec<String>,
    pub first_pass_raw: Option<String>,
    pub notes: Option<String>,
    pub provenance: LlmProvenance,
}

impl UploadSession {
    pub fn new(
        id: String,
        original_filename: String,
        byte_size: u64,
        mime_type: String,
        storage_key: String,
        uploaded_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_filename,
            byte_size,
            mime_type,
            storage_key,
            uploaded_by,
            created_at: now,
            updated_at: now,
            extracted_metadata: None,
            confidence_score: 0.0,
            final_confidence: 0.0,
            routing_decision: None,
            parse_status: ParseStatus::NotParsed,
            second_pass_status: SecondPassStatus::NotNeeded,
            auto_approved: false,
            requires_human_review: false,
            parsed_parts: Vec::new(),
            cutting_instructions: Vec::new(),
            temp_files: Vec::new(),
            first_pass_raw: None,
            notes: None,
            provenance: LlmProvenance::default(),
        }
    }
}

/// Progress step names as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressStep {
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "rendering")]
    Rendering,
    #[serde(rename = "analyzing")]
    Analyzing,
    #[serde(rename = "validating")]
    Validating,
    #[serde(rename = "splitting")]
    Splitting,
    #[serde(rename = "saving")]
    Saving,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "queued_for_second_pass")]
    QueuedForSecondPass,
}

impl ProgressStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStep::Starting => "starting",
            ProgressStep::Downloading => "downloading",
            ProgressStep::Rendering => "rendering",
            ProgressStep::Analyzing => "analyzing",
            ProgressStep::Validating => "validating",
            ProgressStep::Splitting => "splitting",
            ProgressStep::Saving => "saving",
            ProgressStep::Complete => "complete",
            ProgressStep::QueuedForSecondPass => "queued_for_second_pass",
        }
    }
}

/// Progress event emitted at every phase boundary of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    pub step: ProgressStep,
    pub percent: u8,
    pub message: String,
}

/// Cap on the stored first-pass raw content, for audit purposes.
pub const FIRST_PASS_RAW_CAP: usize = 64 * 1024;

/// Truncate the raw first-pass content at the audit cap, on a char boundary.
pub fn truncate_first_pass_raw(raw: &str) -> String {
    if raw.len() <= FIRST_PASS_RAW_CAP {
        return raw.to_string();
    }
    let mut end = FIRST_PASS_RAW_CAP;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

/// Storage key of the original uploaded PDF.
pub fn original_storage_key(session_id: &str, extension: &str) -> String {
    format!("smart-upload/{}/original{}", session_id, extension)
}

/// Storage key of one split part.
pub fn part_storage_key(session_id: &str, slug: &str) -> String {
    format!("smart-upload/{}/parts/{}.pdf", session_id, slug)
}

/// Lowercase the display name and collapse runs of non-alphanumerics to
/// single hyphens. Deterministic: identical names produce identical slugs.
pub fn slugify(display_name: &str) -> String {
    let mut slug = String::with_capacity(display_name.len());
    let mut last_was_hyphen = true;
    for c in display_name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("part");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_non_alphanumerics() {
        assert_eq!(slugify("Bb Clarinet 2"), "bb-clarinet-2");
        assert_eq!(slugify("Horn in F  (1st)"), "horn-in-f-1st");
        assert_eq!(slugify("---"), "part");
    }

    #[test]
    fn slugify_is_deterministic_and_distinct() {
        assert_eq!(slugify("Flute 1"), slugify("Flute 1"));
        assert_ne!(slugify("Flute 1"), slugify("Flute 2"));
    }

    #[test]
    fn storage_keys_are_namespaced_by_session() {
        assert_eq!(
            part_storage_key("abc", "flute-1"),
            "smart-upload/abc/parts/flute-1.pdf"
        );
        assert_eq!(
            original_storage_key("abc", ".pdf"),
            "smart-upload/abc/original.pdf"
        );
    }

    #[test]
    fn second_pass_status_null_reads_as_not_needed() {
        assert_eq!(
            SecondPassStatus::parse(None),
            Some(SecondPassStatus::NotNeeded)
        );
        assert_eq!(
            SecondPassStatus::parse(Some("QUEUED")),
            Some(SecondPassStatus::Queued)
        );
        assert_eq!(SecondPassStatus::parse(Some("bogus")), None);
    }

    #[test]
    fn first_pass_raw_is_capped() {
        let raw = "x".repeat(FIRST_PASS_RAW_CAP + 10);
        assert_eq!(truncate_first_pass_raw(&raw).len(), FIRST_PASS_RAW_CAP);
        assert_eq!(truncate_first_pass_raw("short"), "short");
    }

    #[test]
    fn routing_rank_orders_decisions() {
        assert!(
            RoutingDecision::AutoParseAutoApprove.rank()
                > RoutingDecision::AutoParseSecondPass.rank()
        );
        assert!(
            RoutingDecision::AutoParseSecondPass.rank()
                > RoutingDecision::NoParseSecondPass.rank()
        );
    }

    #[test]
    fn cutting_instruction_serializes_camel_case() {
        let instruction = CuttingInstruction {
            part_name: "Flute 1".to_string(),
            instrument: "Flute".to_string(),
            section: "Woodwinds".to_string(),
            transposition: "C".to_string(),
            part_number: 1,
            page_range: [1, 3],
        };
        let json = serde_json::to_value(&instruction).unwrap();
        assert_eq!(json["partName"], "Flute 1");
        assert_eq!(json["pageRange"][0], 1);
    }
}
