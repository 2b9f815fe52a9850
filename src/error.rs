use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlgebrasError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed {format} document {path}: {message}")]
    Format {
        format: &'static str,
        path: String,
        message: String,
    },

    #[error("Cache file is corrupt: {0}")]
    CacheCorrupt(String),
}

impl AlgebrasError {
    pub fn format(format: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            format,
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AlgebrasError>;

/// Failure classes of a single remote translation call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("rate limited by translation backend")]
    RateLimited { retry_after: Option<Duration> },

    #[error("translation backend server error ({}): {message}", status_label(.status))]
    ServerError { status: Option<u16>, message: String },

    #[error("translation request rejected ({}): {message}", status_label(.status))]
    ClientError { status: Option<u16>, message: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TranslationError>,
    },

    #[error("translation cancelled")]
    Cancelled,
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no status".to_string(),
    }
}

impl TranslationError {
    /// Only throttling and server-side failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ServerError { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::ClientError {
            status: None,
            message: message.into(),
        }
    }

    /// Map an HTTP status from a backend into the taxonomy.
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::ServerError {
                status: Some(status),
                message: message.into(),
            },
            _ => Self::ClientError {
                status: Some(status),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(TranslationError::from_status(429, None, "").is_rate_limited());
        assert!(TranslationError::from_status(503, None, "down").is_retryable());
        assert!(!TranslationError::from_status(401, None, "bad key").is_retryable());
        assert!(!TranslationError::from_status(400, None, "bad request").is_retryable());
    }

    #[test]
    fn test_exhausted_is_terminal() {
        let err = TranslationError::RetriesExhausted {
            attempts: 5,
            last: Box::new(TranslationError::RateLimited { retry_after: None }),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("5 attempts"));
    }
}
