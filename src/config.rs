//! Process-wide configuration.
//!
//! Built once at startup and handed to each component constructor. Layering,
//! lowest priority first: built-in defaults, an optional config file, then
//! `REALTY_`-prefixed environment variables (`REALTY_SERVER__PORT=8000`),
//! then explicit command-line flags. API keys are kept apart in [`ApiKeys`]
//! so they never end up in a serialized or logged config.

use crate::error::{ExtractError, Result};
use crate::llm::ProviderKind;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags of the HTTP server.
#[derive(Parser, Debug)]
#[command(author, version, about = "Document field extraction API", long_about = None)]
pub struct ServerCli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Directory holding the `<doc_type>.json` templates
    #[arg(long, env = "TEMPLATES_DIR")]
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub templates: TemplatesConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub mistral: MistralConfig,
    pub gemini: GeminiConfig,
    pub extraction: ExtractionConfig,
    pub ocr_cache: OcrCacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Overall budget for one request, provider calls included.
    pub request_timeout_secs: u64,
    pub body_limit_mb: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TemplatesConfig {
    pub dir: PathBuf,
}

/// Outbound HTTP settings shared by both providers.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub requests_per_second: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Total attempts, first call included.
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MistralConfig {
    pub base_url: String,
    pub model: String,
    pub ocr_model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    /// Text model; auto-selected from the model listing when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Vision model used for OCR; falls back to the text model.
    #[serde(default)]
    pub vision_model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    pub max_pages: usize,
    /// Budget for the paginated text placed in one prompt.
    pub max_chars: usize,
    /// PDF pages whose text layer is shorter than this are OCR'd.
    pub min_text_chars: usize,
    pub ocr_all: bool,
    #[serde(default)]
    pub chunk_pages: Option<usize>,
    pub parallel_calls: usize,
    pub second_pass: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OcrCacheConfig {
    /// Directory persisting OCR results across runs; memory only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load the server configuration from the process arguments.
    pub fn load_server() -> std::result::Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> std::result::Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = ServerCli::try_parse_from(args)
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Self::layered(cli.config.as_deref())?;

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(dir) = cli.templates_dir {
            builder = builder.set_override("templates.dir", dir.display().to_string())?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load defaults, the given (or discovered) config file and environment.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, config::ConfigError> {
        let cfg: Self = Self::layered(path)?.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn layered(
        path: Option<&Path>,
    ) -> std::result::Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError>
    {
        let mut builder = Config::builder()
            .set_default("server.port", 8000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 600)?
            .set_default("server.body_limit_mb", 50)?
            .set_default("templates.dir", "templates")?
            .set_default("http.timeout_secs", 120)?
            .set_default("http.requests_per_second", 5)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.min_delay_ms", 500)?
            .set_default("retry.max_delay_ms", 8000)?
            .set_default("mistral.base_url", "https://api.mistral.ai")?
            .set_default("mistral.model", "mistral-large-latest")?
            .set_default("mistral.ocr_model", "pixtral-large-latest")?
            .set_default(
                "gemini.base_url",
                "https://generativelanguage.googleapis.com",
            )?
            .set_default("extraction.max_pages", 12)?
            .set_default("extraction.max_chars", 32_000)?
            .set_default("extraction.min_text_chars", 80)?
            .set_default("extraction.ocr_all", false)?
            .set_default("extraction.parallel_calls", 2)?
            .set_default("extraction.second_pass", false)?;

        // Explicit file first, then ./config.{yaml,toml,json} if one exists.
        builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("REALTY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Legacy model variables of the Gemini tooling.
        if let Ok(val) = env::var("GEMINI_TEXT_MODEL") {
            if !val.trim().is_empty() {
                builder = builder.set_override("gemini.model", val)?;
            }
        }
        if let Ok(val) = env::var("GEMINI_VISION_MODEL") {
            if !val.trim().is_empty() {
                builder = builder.set_override("gemini.vision_model", val)?;
            }
        }

        Ok(builder)
    }

    fn validate(&self) -> std::result::Result<(), config::ConfigError> {
        let checks = [
            (self.retry.max_attempts, "retry.max_attempts"),
            (self.extraction.max_pages, "extraction.max_pages"),
            (self.extraction.max_chars, "extraction.max_chars"),
            (self.extraction.parallel_calls, "extraction.parallel_calls"),
            (self.server.body_limit_mb, "server.body_limit_mb"),
        ];
        for (value, key) in checks {
            if value == 0 {
                return Err(config::ConfigError::Message(format!(
                    "{key} must be greater than 0"
                )));
            }
        }
        if self.extraction.chunk_pages == Some(0) {
            return Err(config::ConfigError::Message(
                "extraction.chunk_pages must be greater than 0".to_string(),
            ));
        }
        if self.http.requests_per_second == 0 {
            return Err(config::ConfigError::Message(
                "http.requests_per_second must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

/// Provider credentials, read once from the environment.
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub mistral: Option<String>,
    pub gemini: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("mistral", &self.mistral.as_ref().map(|_| "<redacted>"))
            .field("gemini", &self.gemini.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ApiKeys {
    /// Read `MISTRAL_API_KEY` and `GEMINI_API_KEY`; blank values count as unset.
    pub fn from_env() -> Self {
        let read = |name: &str| env::var(name).ok().filter(|s| !s.trim().is_empty());
        Self {
            mistral: read("MISTRAL_API_KEY"),
            gemini: read("GEMINI_API_KEY"),
        }
    }

    pub fn get(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::Mistral => self.mistral.as_deref(),
            ProviderKind::Gemini => self.gemini.as_deref(),
        }
    }

    /// The key for `provider`, or a configuration error naming the variable.
    pub fn require(&self, provider: ProviderKind) -> Result<&str> {
        self.get(provider).ok_or_else(|| {
            ExtractError::Config(format!(
                "{} is not set (environment or .env)",
                provider.api_key_var()
            ))
        })
    }

    /// The key of the provider serving `model`.
    pub fn require_for_model(&self, model: &str) -> Result<&str> {
        self.require(ProviderKind::detect_from_model(model))
    }
}
