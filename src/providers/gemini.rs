//! Gemini `generateContent` dialect.

use super::types::{
    ProviderError, ResponseFormat, TokenUsage, VisionCallOptions, VisionImage, VisionResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
enum Part {
    #[serde(rename = "inline_data")]
    InlineData(InlineData),
    #[serde(rename = "text")]
    Text(String),
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

pub(super) fn build_body(
    images: &[VisionImage],
    user_prompt: &str,
    opts: &VisionCallOptions,
) -> Result<serde_json::Value, ProviderError> {
    let mut parts: Vec<Part> = Vec::with_capacity(images.len() * 2 + 2);

    // Native PDFs ride as inline_data like any other blob.
    for doc in &opts.documents {
        parts.push(Part::InlineData(InlineData {
            mime_type: "application/pdf".to_string(),
            data: doc.base64_data.clone(),
        }));
    }
    for image in images {
        if let Some(label) = &image.label {
            parts.push(Part::Text(label.clone()));
        }
        parts.push(Part::InlineData(InlineData {
            mime_type: image.mime_type.clone(),
            data: image.base64_data.clone(),
        }));
    }
    parts.push(Part::Text(user_prompt.to_string()));

    let request = GenerateRequest {
        contents: vec![Content { parts }],
        system_instruction: opts.system.as_ref().map(|s| Content {
            parts: vec![Part::Text(s.clone())],
        }),
        generation_config: GenerationConfig {
            temperature: opts.temperature,
            max_output_tokens: opts.max_tokens,
            response_mime_type: match opts.response_format {
                ResponseFormat::Json => Some("application/json"),
                ResponseFormat::Text => None,
            },
        },
    };

    serde_json::to_value(&request).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

/// The reply content is the concatenation of the first candidate's text parts.
pub(super) fn parse_response(body: &[u8]) -> Result<VisionResponse, ProviderError> {
    let response: GenerateResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::Malformed(format!("not a Gemini response: {}", e)))?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("no candidates in response".to_string()))?;

    let content: String = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(VisionResponse {
        content,
        usage: response
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default(),
    })
}
