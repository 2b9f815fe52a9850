use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, AlgebrasError};

/// Placeholder substituted with the target language code in destination paths.
pub const LANG_PLACEHOLDER: &str = "%lang%";

/// Default configuration file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "algebras.toml";

// Default values for optional sections
fn default_provider() -> Provider {
    Provider::AlgebrasAi
}

fn default_endpoint() -> String {
    "https://platform.algebras.ai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    20
}

fn default_max_parallel_batches() -> usize {
    5
}

fn default_max_requests() -> usize {
    30
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.3
}

fn default_cluster_window_ms() -> u64 {
    5_000
}

fn default_cache_max_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project: ProjectConfig,
    #[serde(default)]
    pub files: Vec<FileMapping>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Language the source documents are written in
    pub source_language: String,
    /// Languages to translate into
    pub languages: Vec<String>,
}

/// One source document (or directory of documents) and where its translations live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMapping {
    /// Source file or directory, relative to the project root
    pub source: PathBuf,
    /// Destination pattern containing `%lang%`
    pub destination: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Algebras AI translation API
    AlgebrasAi,
    /// OpenAI-compatible chat completions
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    /// Base URL of the translation API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name (OpenAI provider only)
    #[serde(default = "default_model")]
    pub model: String,
    /// Keep translations no longer than their source
    #[serde(default)]
    pub ui_safe: bool,
    /// Provider-side glossary to bias vocabulary
    #[serde(default)]
    pub glossary_id: Option<String>,
    /// Extra instructions sent with every request
    #[serde(default)]
    pub prompt: Option<String>,
    /// Unescape quotes/newlines the backend escaped on its own
    #[serde(default = "default_true")]
    pub normalize_strings: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_parallel_batches")]
    pub max_parallel_batches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Relative jitter applied to each delay, 0.3 means ±30%
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Rate-limit responses closer together than this escalate the shared backoff
    #[serde(default = "default_cluster_window_ms")]
    pub cluster_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cache file; defaults to the per-user cache directory
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_cache_max_bytes")]
    pub max_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Rebuild target files instead of patching them in place
    #[serde(default)]
    pub regenerate_from_scratch: bool,
    /// Only translate keys absent from the target
    #[serde(default)]
    pub only_missing: bool,
    /// Keep an existing translation when its source string was emptied
    #[serde(default = "default_true")]
    pub preserve_on_empty_source: bool,
    /// Consult git history to detect outdated keys
    #[serde(default)]
    pub use_git_history: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: default_model(),
            ui_safe: false,
            glossary_id: None,
            prompt: None,
            normalize_strings: true,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_parallel_batches: default_max_parallel_batches(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            cluster_window_ms: default_cluster_window_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            regenerate_from_scratch: false,
            only_missing: false,
            preserve_on_empty_source: true,
            use_git_history: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            max_size_bytes: default_cache_max_bytes(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                source_language: "en".to_string(),
                languages: vec!["fr".to_string(), "de".to_string()],
            },
            files: vec![FileMapping {
                source: PathBuf::from("locales/en.json"),
                destination: format!("locales/{}.json", LANG_PLACEHOLDER),
            }],
            api: ApiConfig::default(),
            batch: BatchConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AlgebrasError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| AlgebrasError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AlgebrasError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| AlgebrasError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject configurations the translation engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.project.source_language.trim().is_empty() {
            return Err(AlgebrasError::Config("project.source_language must not be empty".to_string()));
        }
        if self.project.languages.is_empty() {
            return Err(AlgebrasError::Config("project.languages must list at least one target language".to_string()));
        }
        if self.project.languages.contains(&self.project.source_language) {
            return Err(AlgebrasError::Config(format!(
                "source language '{}' must not be listed as a target language",
                self.project.source_language
            )));
        }
        for mapping in &self.files {
            if !mapping.destination.contains(LANG_PLACEHOLDER) {
                return Err(AlgebrasError::Config(format!(
                    "destination '{}' must contain the {} placeholder",
                    mapping.destination, LANG_PLACEHOLDER
                )));
            }
        }
        if self.batch.batch_size == 0 {
            return Err(AlgebrasError::Config("batch.batch_size must be at least 1".to_string()));
        }
        if self.batch.max_parallel_batches == 0 {
            return Err(AlgebrasError::Config("batch.max_parallel_batches must be at least 1".to_string()));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(AlgebrasError::Config("rate_limit values must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AlgebrasError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(AlgebrasError::Config("retry.jitter must be within [0, 1)".to_string()));
        }
        Ok(())
    }

    /// Languages to process: all configured targets, or the single requested one.
    pub fn target_languages(&self, only: Option<&str>) -> Result<Vec<String>> {
        match only {
            Some(lang) if self.project.languages.iter().any(|l| l == lang) => Ok(vec![lang.to_string()]),
            Some(lang) => Err(AlgebrasError::Config(format!(
                "Language '{}' is not configured in this project",
                lang
            ))),
            None => Ok(self.project.languages.clone()),
        }
    }

    /// Add a target language. Returns `false` when it is already configured.
    pub fn add_language(&mut self, code: &str) -> Result<bool> {
        let code = code.trim();
        if code.len() < 2 {
            return Err(AlgebrasError::Config(format!(
                "Invalid language code '{}'; use an ISO code such as 'fr'",
                code
            )));
        }
        if code == self.project.source_language {
            return Err(AlgebrasError::Config(format!(
                "'{}' is the source language and cannot be a target",
                code
            )));
        }
        if self.project.languages.iter().any(|l| l == code) {
            return Ok(false);
        }
        self.project.languages.push(code.to_string());
        Ok(true)
    }

    /// Fingerprint cache location, falling back to the per-user cache directory.
    pub fn cache_path(&self) -> PathBuf {
        match &self.cache.path {
            Some(path) => path.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".algebras"))
                .join("algebras")
                .join("translation_cache.json"),
        }
    }

    /// Cache location with relative paths taken from the project root.
    pub fn resolved_cache_path(&self, root: &Path) -> PathBuf {
        let path = self.cache_path();
        if path.is_relative() {
            root.join(path)
        } else {
            path
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn cluster_window(&self) -> Duration {
        Duration::from_millis(self.cluster_window_ms)
    }
}
