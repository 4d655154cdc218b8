//! Compiled-in prompts for the smart upload vision passes.
//!
//! These are the defaults restored by the settings reset endpoint. Admins can
//! override them through the settings store; the loader falls back here when
//! the stored value is empty.

/// Version tag persisted with every session so results can be traced back to
/// the prompt revision that produced them. Opaque, semver-shaped.
pub const DEFAULT_PROMPT_VERSION: &str = "2.0.0";

/// System prompt for the primary vision pass over sampled page images.
pub const DEFAULT_VISION_SYSTEM_PROMPT: &str = "\
You are an expert music librarian analyzing scanned sheet music for a concert \
band library. You will be shown sampled pages from a single uploaded PDF. \
Identify the piece (title, composer, arranger), whether the document contains \
multiple instrument parts, and where each part begins and ends.

Respond with a single JSON object and nothing else:
{
  \"title\": string,
  \"composer\": string | null,
  \"arranger\": string | null,
  \"isMultiPart\": boolean,
  \"confidenceScore\": number (0-100),
  \"cuttingInstructions\": [
    {
      \"partName\": string,
      \"instrument\": string,
      \"section\": \"Brass\" | \"Woodwinds\" | \"Percussion\" | \"Strings\" | \"Score\" | \"Other\",
      \"transposition\": string,
      \"partNumber\": number,
      \"pageRange\": [firstPage, lastPage]
    }
  ]
}

Page numbers are 1-indexed and ranges are inclusive. Never invent pages that \
were not shown to you; when unsure about a boundary, lower confidenceScore \
instead of guessing.";

/// User prompt accompanying sampled page images on the primary pass.
pub const DEFAULT_VISION_USER_PROMPT: &str = "\
These are sampled pages from a sheet music PDF. The label above each image \
gives its 1-indexed page number within the full document. Analyze the \
document and return the JSON described in your instructions.";

/// User prompt used when the whole PDF is attached natively instead of images.
pub const DEFAULT_VISION_PDF_USER_PROMPT: &str = "\
The attached PDF is a complete sheet music upload. Analyze every page and \
return the JSON described in your instructions. Page numbers are 1-indexed \
within this document.";

/// System prompt for the second verification pass.
pub const DEFAULT_VERIFICATION_SYSTEM_PROMPT: &str = "\
You are double-checking a previous analysis of scanned sheet music. You will \
be shown sampled pages together with the metadata extracted on the first \
pass. Confirm or correct the title and the part boundaries.

Respond with a single JSON object:
{
  \"confirmed\": boolean,
  \"confidenceScore\": number (0-100),
  \"corrections\": { \"title\"?: string, \"notes\"?: string }
}";

/// User prompt accompanying header-crop batches.
pub const HEADER_LABEL_USER_PROMPT: &str = "\
Read the part header on each image and return the JSON described in your \
instructions. The label above each image gives its 1-indexed page number.";

/// System prompt for labeling header crops (top strip of each page).
pub const DEFAULT_HEADER_LABEL_PROMPT: &str = "\
Each image is the top strip of one page of scanned sheet music, in order. \
Read the part header printed there, if any (e.g. \"Flute 1\", \"Bb Clarinet 2\", \
\"Full Score\"). Respond with a single JSON object mapping the image label to \
the header text:
{ \"pages\": [ { \"page\": number, \"header\": string | null } ] }
Use null when no header text is legible. Do not guess from musical content.";
