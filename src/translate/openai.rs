use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{Result, TranslationError};
use super::common::{build_translation_prompt, check_status, http_client, transport_error};
use super::{TranslationBackend, TranslationRequest};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// OpenAI chat-completions backend.
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(config: &ApiConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TranslationBackend for OpenAiBackend {
    async fn translate(&self, request: &TranslationRequest) -> std::result::Result<String, TranslationError> {
        let prompt = build_translation_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a professional software localization translator.",
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.3,
        };

        debug!(model = %self.model, target = %request.target_lang, "Sending chat completion request");
        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let parsed: ChatResponse = response.json().await.map_err(|e| TranslationError::ServerError {
            status: None,
            message: format!("Failed to parse response: {}", e),
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(TranslationError::ServerError {
                status: None,
                message: "Empty translation received".to_string(),
            });
        }
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
