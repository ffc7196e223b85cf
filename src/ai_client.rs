//! Completion client for keyword extraction and summaries
//!
//! The pipeline only sees the `CompletionClient` trait. The reqwest-backed
//! OpenAI and Anthropic clients below are the default transports.

use crate::error::CompletionError;
use crate::settings::Settings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Chat message in the common system/user role format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".to_string(), content: content.into() }
    }
}

/// One structured prompt plus the model to run it on
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    /// Standard two-message prompt: fixed system role, then `user_prompt`
    pub fn new(model: &str, user_prompt: String) -> Self {
        CompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)],
        }
    }

    /// Content of the last user message
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// External text-completion capability. Calls are independent and idempotent,
/// so callers may retry them freely.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

// ==================== OpenAI ====================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageContent,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessageContent {
    content: Option<String>,
}

/// OpenAI-compatible chat completions endpoint
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>) -> Self {
        OpenAiClient {
            http: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingApiKey("OPENAI_API_KEY"))?;

        let body = OpenAiRequest {
            model: &request.model,
            messages: &request.messages,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let api_response: OpenAiResponse = response.json().await?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .ok_or(CompletionError::EmptyResponse)
    }
}

// ==================== Anthropic ====================

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<&'a ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Anthropic messages endpoint. The system message travels in the top-level
/// `system` field rather than in the message list.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl AnthropicClient {
    pub fn new(api_key: Option<String>) -> Self {
        AnthropicClient {
            http: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingApiKey("ANTHROPIC_API_KEY"))?;

        let system = request
            .messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str());

        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: 1024,
            system,
            messages: request.messages.iter().filter(|m| m.role != "system").collect(),
        };

        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let api_response: AnthropicResponse = response.json().await?;

        let text = api_response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(text.trim().to_string())
    }
}

/// Build the client selected by `settings.llm_backend`
pub fn client_from_settings(settings: &Settings) -> Arc<dyn CompletionClient> {
    match settings.llm_backend.as_str() {
        "anthropic" => Arc::new(AnthropicClient::new(settings.anthropic_api_key())),
        other => {
            if other != "openai" {
                tracing::warn!("[AI] Unknown llm_backend '{}', using openai", other);
            }
            Arc::new(OpenAiClient::new(settings.openai_api_key()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let req = CompletionRequest::new("gpt-4", "summarize this".to_string());
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(req.user_prompt(), "summarize this");
    }

    #[test]
    fn test_openai_body_serialization() {
        let req = CompletionRequest::new("gpt-4", "hi".to_string());
        let body = OpenAiRequest { model: &req.model, messages: &req.messages };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_anthropic_body_moves_system_prompt() {
        let req = CompletionRequest::new("claude-haiku-4-5-20251001", "hi".to_string());
        let body = AnthropicRequest {
            model: &req.model,
            max_tokens: 1024,
            system: Some(SYSTEM_PROMPT),
            messages: req.messages.iter().filter(|m| m.role != "system").collect(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["system"], SYSTEM_PROMPT);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_openai_response() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"  TOPIC: x  "}}]}"#;
        let parsed: OpenAiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("  TOPIC: x  "));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let client = OpenAiClient::new(None);
        let err = client
            .complete(&CompletionRequest::new("gpt-4", "hi".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::MissingApiKey("OPENAI_API_KEY")));
    }
}
