//! Provider clients for structured extraction and OCR.
//!
//! The [`ProviderClient`] trait is the seam between the extraction pipeline
//! and a concrete vendor API. Each client also implements [`OcrService`] so
//! the same credentials, limiter and retry policy serve transcription calls.
//!
//! # Clients
//!
//! - [`MistralClient`]: `POST /v1/chat/completions` (and `/v1/ocr` for
//!   `mistral-ocr-*` models)
//! - [`GeminiClient`]: `POST /v1beta/models/{model}:generateContent`
//!
//! # Example
//!
//! ```rust,ignore
//! use realty_extract::llm::{MistralClient, ProviderClient, ProviderPayload};
//!
//! let client = MistralClient::from_config(&config, api_key)?;
//! let payload = ProviderPayload::text("system", "user");
//! let raw = client.send(&payload, "mistral-large-latest").await?;
//! ```

pub mod gemini;
pub mod mistral;
pub mod provider;
pub mod transport;

pub use gemini::GeminiClient;
pub use mistral::MistralClient;
pub use provider::ProviderKind;
pub use transport::{HttpTransport, RetryPolicy};

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::{ExtractError, Result};

/// Instruction given to vision models when transcribing a page image.
pub const OCR_PROMPT: &str = "Transcris le texte lisible de cette image.";

/// A raw file handed to the provider instead of extracted text.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Arc<[u8]>,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    #[must_use]
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// `data:<mime>;base64,<payload>` form accepted by chat-style APIs.
    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }

    #[must_use]
    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }
}

/// Everything a provider needs for one extraction call.
#[derive(Debug, Clone)]
pub struct ProviderPayload {
    pub system: String,
    pub user: String,
    pub attachment: Option<Attachment>,
}

impl ProviderPayload {
    #[must_use]
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            attachment: None,
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Unparsed model output.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub provider: ProviderKind,
    pub model: String,
    pub text: String,
}

/// A message in a chat-completions conversation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(flatten)]
    pub content: MessageContent,
}

impl Message {
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::text(text),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Message content: plain text or multimodal parts.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text { content: String },
    Parts { content: Vec<ContentPart> },
}

impl MessageContent {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text { content: s.into() }
    }

    #[must_use]
    pub fn parts(parts: Vec<ContentPart>) -> Self {
        Self::Parts { content: parts }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

/// A content part for multimodal messages.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    /// PDF passed as a data URL (Mistral document understanding).
    DocumentUrl { document_url: String },
}

impl ContentPart {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text { text: s.into() }
    }

    #[must_use]
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }

    #[must_use]
    pub fn document_url(url: impl Into<String>) -> Self {
        Self::DocumentUrl {
            document_url: url.into(),
        }
    }

    /// The part carrying `attachment`, image or document depending on its type.
    #[must_use]
    pub fn for_attachment(attachment: &Attachment) -> Self {
        if attachment.is_pdf() {
            Self::document_url(attachment.data_url())
        } else {
            Self::image_url(attachment.data_url())
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

/// A vendor endpoint that turns a prompt into model output.
#[async_trait]
pub trait ProviderClient: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ProviderKind;

    /// Send one extraction request.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ProviderCall`] once the retry budget is spent,
    /// or immediately for non-transient failures.
    async fn send(&self, payload: &ProviderPayload, model: &str) -> Result<RawResponse>;
}

/// A vendor endpoint that transcribes page images or single-page PDFs.
#[async_trait]
pub trait OcrService: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ProviderKind;

    fn supports_mime_type(&self, mime_type: &str) -> bool {
        matches!(
            mime_type,
            "application/pdf"
                | "image/png"
                | "image/jpeg"
                | "image/gif"
                | "image/webp"
                | "image/tiff"
        )
    }

    async fn transcribe(&self, image: &[u8], mime_type: &str, model: &str) -> Result<String>;
}

/// Provider clients available to this process, keyed by vendor.
#[derive(Debug, Clone, Default)]
pub struct Providers {
    pub mistral: Option<Arc<dyn ProviderClient>>,
    pub gemini: Option<Arc<dyn ProviderClient>>,
    pub mistral_ocr: Option<Arc<dyn OcrService>>,
    pub gemini_ocr: Option<Arc<dyn OcrService>>,
}

impl Providers {
    /// Build the real HTTP clients for every provider with a configured key.
    pub fn from_config(
        config: &crate::config::AppConfig,
        keys: &crate::config::ApiKeys,
    ) -> Result<Self> {
        let mut providers = Self::default();
        if let Some(key) = keys.get(ProviderKind::Mistral) {
            let client = Arc::new(MistralClient::from_config(config, key)?);
            providers.mistral = Some(Arc::clone(&client) as Arc<dyn ProviderClient>);
            providers.mistral_ocr = Some(client);
        }
        if let Some(key) = keys.get(ProviderKind::Gemini) {
            let client = Arc::new(GeminiClient::from_config(config, key)?);
            providers.gemini = Some(Arc::clone(&client) as Arc<dyn ProviderClient>);
            providers.gemini_ocr = Some(client);
        }
        Ok(providers)
    }

    /// Extraction client serving `model`.
    pub fn client_for(&self, model: &str) -> Result<Arc<dyn ProviderClient>> {
        let kind = ProviderKind::detect_from_model(model);
        let client = match kind {
            ProviderKind::Mistral => self.mistral.as_ref(),
            ProviderKind::Gemini => self.gemini.as_ref(),
        };
        client.map(Arc::clone).ok_or_else(|| missing_key(kind))
    }

    /// OCR service serving `model`.
    pub fn ocr_for(&self, model: &str) -> Result<Arc<dyn OcrService>> {
        let kind = ProviderKind::detect_from_model(model);
        let service = match kind {
            ProviderKind::Mistral => self.mistral_ocr.as_ref(),
            ProviderKind::Gemini => self.gemini_ocr.as_ref(),
        };
        service.map(Arc::clone).ok_or_else(|| missing_key(kind))
    }
}

fn missing_key(kind: ProviderKind) -> ExtractError {
    ExtractError::Config(format!(
        "{} is not set, {kind} models are unavailable",
        kind.api_key_var()
    ))
}
