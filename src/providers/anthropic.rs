//! Anthropic `/v1/messages` dialect.

use super::types::{
    PdfAttachment, ProviderError, TokenUsage, VisionCallOptions, VisionImage, VisionResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "image")]
    Image { source: Base64Source },
    #[serde(rename = "document")]
    Document { source: Base64Source },
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct Base64Source {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

impl From<&VisionImage> for ContentBlock {
    fn from(image: &VisionImage) -> Self {
        ContentBlock::Image {
            source: Base64Source {
                source_type: "base64",
                media_type: image.mime_type.clone(),
                data: image.base64_data.clone(),
            },
        }
    }
}

impl From<&PdfAttachment> for ContentBlock {
    fn from(doc: &PdfAttachment) -> Self {
        ContentBlock::Document {
            source: Base64Source {
                source_type: "base64",
                media_type: "application/pdf".to_string(),
                data: doc.base64_data.clone(),
            },
        }
    }
}

pub(super) fn build_body(
    model: &str,
    images: &[VisionImage],
    user_prompt: &str,
    opts: &VisionCallOptions,
) -> Result<serde_json::Value, ProviderError> {
    let mut content: Vec<ContentBlock> = Vec::with_capacity(images.len() * 2 + 2);
    for doc in &opts.documents {
        content.push(doc.into());
    }
    for image in images {
        if let Some(label) = &image.label {
            content.push(ContentBlock::Text {
                text: label.clone(),
            });
        }
        content.push(image.into());
    }
    content.push(ContentBlock::Text {
        text: user_prompt.to_string(),
    });

    let request = MessagesRequest {
        model: model.to_string(),
        system: opts.system.clone(),
        messages: vec![Message {
            role: "user",
            content,
        }],
        max_tokens: opts.max_tokens,
        temperature: opts.temperature,
    };

    serde_json::to_value(&request).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

/// The reply content is the concatenation of all text blocks.
pub(super) fn parse_response(body: &[u8]) -> Result<VisionResponse, ProviderError> {
    let response: MessagesResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::Malformed(format!("not an Anthropic messages response: {}", e)))?;

    let content: String = response
        .content
        .iter()
        .filter(|block| block.block_type == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();

    if content.is_empty() && response.content.is_empty() {
        return Err(ProviderError::Malformed(
            "no content blocks in response".to_string(),
        ));
    }

    Ok(VisionResponse {
        content,
        usage: response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default(),
    })
}
