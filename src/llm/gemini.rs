//! Google Gemini client over the `generativelanguage` REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::transport::{Auth, HttpTransport};
use super::{
    Attachment, OCR_PROMPT, OcrService, ProviderClient, ProviderKind, ProviderPayload,
    RawResponse,
};
use crate::config::AppConfig;
use crate::error::{ExtractError, Result};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    transport: HttpTransport,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "inlineData")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn inline(attachment: &Attachment) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: attachment.mime_type.clone(),
                data: attachment.base64(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct InlineData {
    #[serde(alias = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        transport: HttpTransport,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            transport,
        }
    }

    pub fn from_config(config: &AppConfig, api_key: &str) -> Result<Self> {
        let transport = HttpTransport::from_config(ProviderKind::Gemini, config)?;
        Ok(Self::new(config.gemini.base_url.clone(), api_key, transport))
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Header(API_KEY_HEADER, &self.api_key)
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<String> {
        let model = model.strip_prefix("models/").unwrap_or(model);
        let url = format!("{}/v1beta/models/{model}:generateContent", self.base_url);

        let response: GenerateResponse = self.transport.post_json(&url, self.auth(), request).await?;

        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            ExtractError::InvalidResponseFormat("gemini returned no candidates".to_string())
        })?;
        Ok(candidate
            .content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<String>())
    }

    /// List the models this key can call, following pagination.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{}/v1beta/models?pageToken={token}", self.base_url),
                None => format!("{}/v1beta/models", self.base_url),
            };
            let page: ModelList = self.transport.get_json(&url, self.auth()).await?;
            models.extend(page.models);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(models)
    }

    /// The configured model, or the best one the key can reach.
    pub async fn resolve_model(&self, configured: Option<&str>) -> Result<String> {
        if let Some(model) = configured.filter(|m| !m.trim().is_empty()) {
            return Ok(model.to_string());
        }
        let models = self.list_models().await?;
        let chosen = select_model(&models, true).ok_or_else(|| {
            ExtractError::Config(
                "no Gemini model supporting generateContent is available".to_string(),
            )
        })?;
        info!(model = %chosen, "Auto-selected Gemini model");
        Ok(chosen)
    }
}

/// Pick a `generateContent` model: the first `pro` one when preferred,
/// otherwise the first `flash` one.
pub fn select_model(models: &[ModelInfo], prefer_pro: bool) -> Option<String> {
    let usable = || {
        models.iter().filter(|m| {
            m.supported_generation_methods
                .iter()
                .any(|a| a == "generateContent")
        })
    };

    let pick = |m: &ModelInfo| {
        m.name
            .strip_prefix("models/")
            .unwrap_or(&m.name)
            .to_string()
    };

    if prefer_pro {
        if let Some(m) = usable().find(|m| m.name.contains("pro")) {
            return Some(pick(m));
        }
    }
    usable().find(|m| m.name.contains("flash")).map(pick)
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    #[instrument(skip(self, payload), fields(provider = "gemini"))]
    async fn send(&self, payload: &ProviderPayload, model: &str) -> Result<RawResponse> {
        let mut parts = vec![Part::text(payload.user.clone())];
        if let Some(attachment) = &payload.attachment {
            parts.push(Part::inline(attachment));
        }

        let request = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(payload.system.clone())],
            }),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: Some("application/json"),
            },
        };

        let text = self.generate(model, &request).await?;
        debug!(model, chars = text.len(), "Gemini extraction answered");

        Ok(RawResponse {
            provider: ProviderKind::Gemini,
            model: model.to_string(),
            text,
        })
    }
}

#[async_trait]
impl OcrService for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    #[instrument(skip(self, image), fields(provider = "gemini", bytes = image.len()))]
    async fn transcribe(&self, image: &[u8], mime_type: &str, model: &str) -> Result<String> {
        let attachment = Attachment::new(mime_type, image.to_vec());
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(OCR_PROMPT), Part::inline(&attachment)],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: None,
            },
        };
        self.generate(model, &request).await
    }
}
