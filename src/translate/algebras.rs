use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{Result, TranslationError};
use super::common::{check_status, http_client, transport_error};
use super::{TranslationBackend, TranslationRequest};

const TRANSLATE_PATH: &str = "/api/v1/translation/translate";

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: Option<String>,
}

/// Algebras platform translation endpoint.
pub struct AlgebrasBackend {
    client: Client,
    api_key: String,
    url: String,
}

impl AlgebrasBackend {
    pub fn new(config: &ApiConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            url: format!("{}{}", config.endpoint.trim_end_matches('/'), TRANSLATE_PATH),
        })
    }

    fn form(request: &TranslationRequest) -> Form {
        let mut form = Form::new()
            .text("sourceLanguage", request.source_lang.clone())
            .text("targetLanguage", request.target_lang.clone())
            .text("textContent", request.text.clone())
            .text("uiSafe", request.ui_safe.to_string());
        if let Some(glossary_id) = &request.glossary_id {
            form = form.text("glossaryId", glossary_id.clone());
        }
        if let Some(prompt) = &request.prompt {
            form = form.text("prompt", prompt.clone());
        }
        form
    }
}

#[async_trait]
impl TranslationBackend for AlgebrasBackend {
    async fn translate(&self, request: &TranslationRequest) -> std::result::Result<String, TranslationError> {
        debug!(url = %self.url, target = %request.target_lang, "Sending translation request");
        let response = self
            .client
            .post(&self.url)
            .header("X-Api-Key", &self.api_key)
            .header("accept", "application/json")
            .multipart(Self::form(request))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let parsed: TranslateResponse = response.json().await.map_err(|e| TranslationError::ServerError {
            status: None,
            message: format!("Failed to parse response: {}", e),
        })?;

        match parsed.data {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(TranslationError::ServerError {
                status: None,
                message: "Empty translation received".to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "algebras-ai"
    }
}
