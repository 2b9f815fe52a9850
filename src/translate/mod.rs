// Translation pipeline
//
// Remote backends sit behind the TranslationBackend trait and are chosen by a factory:
// - OpenAi: chat completions with a localization prompt
// - AlgebrasAi: the Algebras translation endpoint
//
// Around every remote call the batcher applies the fingerprint cache, the shared
// rate limiter and the retry coordinator.

pub mod algebras;
pub mod batcher;
pub mod common;
pub mod openai;
pub mod rate_limit;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use batcher::{BatchReport, Batcher, FailedUnit};
pub use common::normalize_translation;
pub use rate_limit::RateLimiter;
pub use retry::{RetryCoordinator, RetryPolicy};

use crate::config::{ApiConfig, Provider};
use crate::error::{AlgebrasError, Result, TranslationError};

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ALGEBRAS_API_KEY_ENV: &str = "ALGEBRAS_API_KEY";

/// One string to translate, with every option that influences the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub ui_safe: bool,
    pub prompt: Option<String>,
    pub glossary_id: Option<String>,
}

/// Request options shared by every unit of one (file, language) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub source_lang: String,
    pub target_lang: String,
    pub ui_safe: bool,
    pub prompt: Option<String>,
    pub glossary_id: Option<String>,
}

impl RequestContext {
    pub fn new(api: &ApiConfig, source_lang: &str, target_lang: &str) -> Self {
        Self {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            ui_safe: api.ui_safe,
            prompt: api.prompt.clone(),
            glossary_id: api.glossary_id.clone(),
        }
    }

    pub fn request(&self, text: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            ui_safe: self.ui_safe,
            prompt: self.prompt.clone(),
            glossary_id: self.glossary_id.clone(),
        }
    }
}

/// A remote service that turns one request into one translated string.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate(&self, request: &TranslationRequest) -> std::result::Result<String, TranslationError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Factory for translation backends
pub struct BackendFactory;

impl BackendFactory {
    /// Create the configured backend; a missing API key is fatal.
    pub fn create(config: &ApiConfig) -> Result<Box<dyn TranslationBackend>> {
        match config.provider {
            Provider::Openai => {
                let api_key = Self::api_key(OPENAI_API_KEY_ENV)?;
                Ok(Box::new(openai::OpenAiBackend::new(config, api_key)?))
            }
            Provider::AlgebrasAi => {
                let api_key = Self::api_key(ALGEBRAS_API_KEY_ENV)?;
                Ok(Box::new(algebras::AlgebrasBackend::new(config, api_key)?))
            }
        }
    }

    fn api_key(variable: &str) -> Result<String> {
        match std::env::var(variable) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(AlgebrasError::MissingCredentials(format!(
                "set the {} environment variable",
                variable
            ))),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builds_complete_requests() {
        let mut api = ApiConfig::default();
        api.ui_safe = true;
        api.glossary_id = Some("g-1".to_string());

        let context = RequestContext::new(&api, "en", "fr");
        let request = context.request("Save");
        assert_eq!(request.text, "Save");
        assert_eq!(request.target_lang, "fr");
        assert!(request.ui_safe);
        assert_eq!(request.glossary_id.as_deref(), Some("g-1"));
    }
}
