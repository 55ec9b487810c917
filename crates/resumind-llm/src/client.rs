use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use resumind_core::config::ModelConfig;
use resumind_core::failure::{Failure, FailureKind, ModelCause};
use resumind_core::traits::{CapabilityResult, Generator};
use resumind_core::types::{Attachment, GenerationRequest, OutputFormat};

use crate::presets::{completions_url, get_preset};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Gemini's OpenAI endpoint,
/// Ollama, vLLM, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    url: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(url: &str, api_key: Option<&str>, max_tokens: u32) -> Self {
        Self {
            http: Client::new(),
            url: url.to_string(),
            api_key: api_key.map(String::from),
            max_tokens,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let url = match &config.base_url {
            Some(base) => completions_url(base),
            None => get_preset(&config.provider)
                .map(|p| p.default_base_url.to_string())
                .unwrap_or_else(|| OPENAI_API_URL.to_string()),
        };
        if config.api_key.is_none() && get_preset(&config.provider).map_or(true, |p| p.needs_api_key) {
            warn!(provider = %config.provider, "No API key configured for model provider");
        }
        Self::new(&url, config.api_key.as_deref(), config.max_tokens)
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Encode an attachment as a content part.
fn attachment_part(attachment: &Attachment) -> serde_json::Value {
    let data_url = format!(
        "data:{};base64,{}",
        attachment.mime_type,
        BASE64.encode(&attachment.data)
    );
    if attachment.mime_type.starts_with("image/") {
        serde_json::json!({
            "type": "image_url",
            "image_url": { "url": data_url }
        })
    } else {
        serde_json::json!({
            "type": "file",
            "file": { "filename": "document.pdf", "file_data": data_url }
        })
    }
}

fn build_messages(request: &GenerationRequest) -> Vec<OaiMessage> {
    let mut messages = Vec::with_capacity(2);
    if !request.system.is_empty() {
        messages.push(OaiMessage {
            role: "system",
            content: serde_json::Value::String(request.system.clone()),
        });
    }

    let content = match &request.attachment {
        Some(attachment) => serde_json::json!([
            { "type": "text", "text": request.prompt },
            attachment_part(attachment),
        ]),
        None => serde_json::Value::String(request.prompt.clone()),
    };
    messages.push(OaiMessage {
        role: "user",
        content,
    });
    messages
}

/// Classify a transport error.
fn transport_failure(e: reqwest::Error) -> Failure {
    let cause = if e.is_timeout() {
        ModelCause::Timeout
    } else if let Some(status) = e.status() {
        ModelCause::from_status(status.as_u16())
    } else {
        ModelCause::Unknown
    };
    Failure::new(FailureKind::Generation(cause), e.to_string())
}

impl Generator for OpenAiClient {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, CapabilityResult<String>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: request.model.clone(),
                messages: build_messages(&request),
                max_tokens: self.max_tokens,
                temperature: request.temperature,
                response_format: match request.format {
                    OutputFormat::Json => Some(ResponseFormat {
                        r#type: "json_object",
                    }),
                    OutputFormat::Text => None,
                },
            };

            let mut req = self.http.post(&self.url).json(&body);
            if let Some(api_key) = &self.api_key {
                req = req.bearer_auth(api_key);
            }

            debug!(model = %request.model, url = %self.url, "Sending generation request");
            let response = req.send().await.map_err(transport_failure)?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(Failure::new(
                    FailureKind::Generation(ModelCause::from_status(status.as_u16())),
                    format!("HTTP {}: {}", status, body),
                ));
            }

            let parsed: ChatResponse = response.json().await.map_err(|e| {
                Failure::new(
                    FailureKind::Generation(ModelCause::Validation),
                    format!("unreadable completion response: {}", e),
                )
            })?;

            let choice = parsed.choices.into_iter().next().ok_or_else(|| {
                Failure::new(
                    FailureKind::Generation(ModelCause::Validation),
                    "completion response has no choices",
                )
            })?;

            if choice.finish_reason.as_deref() == Some("length") {
                warn!(model = %request.model, "Completion truncated at max_tokens");
            }

            match choice.message.content {
                Some(text) if !text.trim().is_empty() => Ok(text),
                _ => Err(Failure::new(
                    FailureKind::Generation(ModelCause::Validation),
                    "model returned empty content",
                )),
            }
        })
    }
}
