//! HTTP inference client
//!
//! Speaks two wire formats:
//! - Ollama native: `POST {base}/api/chat`, `format: "json"` for structured output
//! - OpenAI-compatible: `POST {base}/chat/completions`,
//!   `response_format: {"type": "json_object"}` for structured output
//!
//! Errors are returned as-is; the fail-soft policy lives in `Inference`.

use super::{ChatMessage, CompletionRequest, InferenceClient};
use crate::{InferenceConfig, MemoriaError, Result, WireApi};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_ERROR_DETAIL_CHARS: usize = 500;

// ─── Ollama API types ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

// ─── Chat Completions API types ─────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

// ─── Client ─────────────────────────────────────────────────────────

/// Inference client backed by a local or remote HTTP model server
pub struct HttpInferenceClient {
    client: Client,
    wire_api: WireApi,
    base_url: String,
    model: String,
    api_key_env: Option<String>,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("memoria/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        info!(
            "inference client: wire={:?}, model={}, base_url={}",
            config.wire_api, config.model, config.base_url
        );

        Self {
            client,
            wire_api: config.wire_api,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
        }
    }

    async fn send_ollama_request(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest {
            model: &self.model,
            messages: &request.messages,
            stream: false,
            format: request.want_json.then_some("json"),
        };

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let response = Self::check_response_status(response).await?;

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| MemoriaError::Inference(e.to_string()))?;

        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }

    async fn send_chat_completions_request(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: 0.1,
            stream: false,
            response_format: request
                .want_json
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        let mut req_builder = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .header("Content-Type", "application/json");

        if let Some(key) = self
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
        {
            req_builder = req_builder.bearer_auth(key);
        }

        let response = req_builder
            .json(&body)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let response = Self::check_response_status(response).await?;

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| MemoriaError::Inference(e.to_string()))?;

        Ok(chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = extract_error_detail(&body);
        let detail = truncate_error_detail(&detail, MAX_ERROR_DETAIL_CHARS);
        if detail.is_empty() {
            return Err(MemoriaError::Inference(format!("API error {status}")));
        }
        Err(MemoriaError::Inference(format!("API error {status}: {detail}")))
    }

    fn map_reqwest_error(e: reqwest::Error) -> MemoriaError {
        if e.is_timeout() {
            MemoriaError::Inference(format!("timeout: {e}"))
        } else if e.is_connect() {
            MemoriaError::Inference(format!("network: {e}"))
        } else {
            MemoriaError::Inference(e.to_string())
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        debug!(
            "sending {:?} request ({} messages, json={})",
            self.wire_api,
            request.messages.len(),
            request.want_json
        );
        match self.wire_api {
            WireApi::Ollama => self.send_ollama_request(request).await,
            WireApi::Chat => self.send_chat_completions_request(request).await,
        }
    }
}

/// Pull a human-readable message out of an error body.
fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        // Ollama: {"error": "model 'x' not found"}
        if let Some(msg) = value.get("error").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    trimmed.to_string()
}

fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
    if detail.chars().count() <= max_chars {
        return detail.to_string();
    }

    let mut truncated = detail.chars().take(max_chars).collect::<String>();
    truncated.push_str("... [truncated]");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_error_detail_shapes() {
        assert_eq!(
            extract_error_detail(r#"{"error": {"message": "bad key"}}"#),
            "bad key"
        );
        assert_eq!(
            extract_error_detail(r#"{"error": "model 'llama3.1:8b' not found"}"#),
            "model 'llama3.1:8b' not found"
        );
        assert_eq!(extract_error_detail("  plain text  "), "plain text");
        assert_eq!(extract_error_detail(""), "");
    }

    #[test]
    fn test_truncate_error_detail() {
        assert_eq!(truncate_error_detail("short", 10), "short");
        assert_eq!(truncate_error_detail("abcdef", 3), "abc... [truncated]");
    }

    #[test]
    fn test_ollama_body_requests_json_mode() {
        let messages = vec![ChatMessage::user("hi")];
        let body = OllamaChatRequest {
            model: "llama3.1:8b",
            messages: &messages,
            stream: false,
            format: Some("json"),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0], json!({"role": "user", "content": "hi"}));

        let text_body = OllamaChatRequest {
            format: None,
            ..body
        };
        assert!(serde_json::to_value(&text_body).unwrap().get("format").is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = InferenceConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..InferenceConfig::default()
        };
        let client = HttpInferenceClient::new(&config);
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
