//! Self-hosted Ollama `/api/chat` dialect.
//!
//! Images are inlined per message as raw base64 strings; structured output is
//! requested through the top-level `format` field rather than a prompt hint.

use super::types::{
    ProviderError, ResponseFormat, TokenUsage, VisionCallOptions, VisionImage, VisionResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: Options,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    num_predict: i32,
}

pub(super) fn build_body(
    model: &str,
    images: &[VisionImage],
    user_prompt: &str,
    opts: &VisionCallOptions,
) -> Result<serde_json::Value, ProviderError> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &opts.system {
        messages.push(ChatMessage {
            role: "system",
            content: system.clone(),
            images: None,
        });
    }

    // Ollama has no per-image text slot, so labels are folded into the user
    // text ahead of the prompt, in image order.
    let mut content = String::new();
    for image in images {
        if let Some(label) = &image.label {
            content.push_str(label);
            content.push('\n');
        }
    }
    content.push_str(user_prompt);

    messages.push(ChatMessage {
        role: "user",
        content,
        images: if images.is_empty() {
            None
        } else {
            Some(images.iter().map(|i| i.base64_data.clone()).collect())
        },
    });

    let request = ChatRequest {
        model: model.to_string(),
        messages,
        stream: false,
        format: match opts.response_format {
            ResponseFormat::Json => Some("json"),
            ResponseFormat::Text => None,
        },
        options: Options {
            temperature: opts.temperature,
            num_predict: opts.max_tokens as i32,
        },
    };

    serde_json::to_value(&request).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

pub(super) fn parse_response(body: &[u8]) -> Result<VisionResponse, ProviderError> {
    let response: ChatResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::Malformed(format!("not an Ollama chat response: {}", e)))?;

    Ok(VisionResponse {
        content: response.message.content,
        usage: TokenUsage {
            input_tokens: response.prompt_eval_count,
            output_tokens: response.eval_count,
        },
    })
}
