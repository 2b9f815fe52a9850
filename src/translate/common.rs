use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use crate::error::{AlgebrasError, Result, TranslationError};
use super::TranslationRequest;

/// Per-request HTTP timeout for translation backends
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared HTTP client configuration for all backends.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(AlgebrasError::Http)
}

/// Map a transport-level failure into the retry taxonomy.
pub fn transport_error(e: reqwest::Error) -> TranslationError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        TranslationError::ServerError {
            status: None,
            message: e.to_string(),
        }
    } else {
        TranslationError::ClientError {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Pass successful responses through; classify the rest by status code.
pub async fn check_status(response: Response) -> std::result::Result<Response, TranslationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "Translation backend returned an error: {}", body);

    Err(TranslationError::from_status(status.as_u16(), retry_after, body))
}

/// `Retry-After` in its delay-seconds form.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().filter(|s| *s >= 0.0).map(Duration::from_secs_f64)
}

/// Instructions sent to chat-style backends.
pub fn build_translation_prompt(request: &TranslationRequest) -> String {
    let source_name = language_code_to_name(&request.source_lang);
    let target_name = language_code_to_name(&request.target_lang);

    let mut prompt = format!(
        "Translate the following user interface string from {} to {} (language code: {}).\n\
         Preserve all formatting, variables and placeholders such as %s, %1$d, {{name}} and HTML tags.\n\
         Return ONLY the translated text, without quotes or explanations.\n",
        source_name, target_name, request.target_lang
    );

    if request.ui_safe {
        prompt.push_str(
            "The translation is shown in a constrained UI element: keep it no longer than the original where possible.\n",
        );
    }
    if let Some(glossary_id) = &request.glossary_id {
        prompt.push_str(&format!("Apply the terminology of glossary '{}'.\n", glossary_id));
    }
    if let Some(custom) = request.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        prompt.push_str(&format!("Additional instructions: {}\n", custom));
    }

    prompt.push_str(&format!("\n[Text to translate]\n{}\n", request.text));
    prompt
}

/// Convert language code to full language name for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    let primary = code.split(['-', '_']).next().unwrap_or(code).to_lowercase();
    let name = match primary.as_str() {
        "ar" => "Arabic",
        "bg" => "Bulgarian",
        "bn" => "Bengali",
        "ca" => "Catalan",
        "cs" => "Czech",
        "da" => "Danish",
        "de" => "German",
        "el" => "Greek",
        "en" => "English",
        "es" => "Spanish",
        "et" => "Estonian",
        "fa" => "Persian",
        "fi" => "Finnish",
        "fr" => "French",
        "he" | "iw" => "Hebrew",
        "hi" => "Hindi",
        "hr" => "Croatian",
        "hu" => "Hungarian",
        "id" | "in" => "Indonesian",
        "it" => "Italian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "lt" => "Lithuanian",
        "lv" => "Latvian",
        "ms" => "Malay",
        "nl" => "Dutch",
        "no" | "nb" => "Norwegian",
        "pl" => "Polish",
        "pt" => "Portuguese",
        "ro" => "Romanian",
        "ru" => "Russian",
        "sk" => "Slovak",
        "sl" => "Slovenian",
        "sr" => "Serbian",
        "sv" => "Swedish",
        "th" => "Thai",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "vi" => "Vietnamese",
        "zh" => "Chinese",
        _ => return code.to_string(),
    };
    name.to_string()
}

/// Undo escape sequences a model added to its answer, keeping those already present in the source.
pub fn normalize_translation(source: &str, translated: &str) -> String {
    const ESCAPES: &[(&str, &str)] = &[
        ("\\'", "'"),
        ("\\\"", "\""),
        ("\\n", "\n"),
        ("\\t", "\t"),
    ];

    let mut normalized = translated.to_string();
    for (escaped, plain) in ESCAPES {
        if !source.contains(escaped) {
            normalized = normalized.replace(escaped, plain);
        }
    }
    if !source.contains("\\\\") {
        normalized = normalized.replace("\\\\", "\\");
    }
    normalized
}
