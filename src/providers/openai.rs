//! OpenAI-compatible chat completions dialect.
//!
//! Spoken by OpenAI itself and by OpenRouter, Mistral, Groq, Ollama's cloud
//! `/v1` surface, and user-supplied compatible servers.

use super::types::{
    ProviderError, ResponseFormat, TokenUsage, VisionCallOptions, VisionImage, VisionResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatSpec>,
}

#[derive(Debug, Serialize)]
struct ResponseFormatSpec {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

impl From<&VisionImage> for ContentPart {
    fn from(image: &VisionImage) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", image.mime_type, image.base64_data),
            },
        }
    }
}

/// Build the request body. `model_params` from the options is merged into the
/// top level afterwards, overriding on key collision.
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
            content: MessageContent::Text(system.clone()),
        });
    }

    let mut parts: Vec<ContentPart> = Vec::with_capacity(images.len() * 2 + 1);
    for image in images {
        if let Some(label) = &image.label {
            parts.push(ContentPart::Text {
                text: label.clone(),
            });
        }
        parts.push(image.into());
    }
    parts.push(ContentPart::Text {
        text: user_prompt.to_string(),
    });
    messages.push(ChatMessage {
        role: "user",
        content: MessageContent::Parts(parts),
    });

    let request = ChatRequest {
        model: model.to_string(),
        messages,
        stream: false,
        max_tokens: opts.max_tokens,
        temperature: opts.temperature,
        response_format: match opts.response_format {
            ResponseFormat::Json => Some(ResponseFormatSpec {
                format_type: "json_object",
            }),
            ResponseFormat::Text => None,
        },
    };

    serde_json::to_value(&request).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

pub(super) fn parse_response(body: &[u8]) -> Result<VisionResponse, ProviderError> {
    let response: ChatResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::Malformed(format!("not an OpenAI chat response: {}", e)))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("no choices in response".to_string()))?;

    Ok(VisionResponse {
        content: choice.message.content.unwrap_or_default(),
        usage: response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image() -> VisionImage {
        VisionImage {
            mime_type: "image/png".to_string(),
            base64_data: "AAAA".to_string(),
            label: Some("page 1".to_string()),
        }
    }

    #[test]
    fn body_has_data_url_images_and_trailing_text() {
        let opts = VisionCallOptions {
            system: Some("be precise".to_string()),
            response_format: ResponseFormat::Json,
            ..Default::default()
        };
        let body = build_body("gpt-4o", &[test_image()], "analyze", &opts).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], false);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");

        let parts = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "page 1");
        assert_eq!(
            parts[1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
        assert_eq!(parts.last().unwrap()["text"], "analyze");
    }

    #[test]
    fn text_format_omits_response_format() {
        let body = build_body("m", &[], "p", &VisionCallOptions::default()).unwrap();
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn parse_extracts_first_choice_and_usage() {
        let raw = br#"{
            "choices": [{"message": {"content": "{\"title\":\"x\"}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30}
        }"#;
        let response = parse_response(raw).unwrap();
        assert_eq!(response.content, "{\"title\":\"x\"}");
        assert_eq!(response.usage.input_tokens, Some(120));
        assert_eq!(response.usage.output_tokens, Some(30));
    }

    #[test]
    fn parse_rejects_empty_choices() {
        let err = parse_response(br#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
