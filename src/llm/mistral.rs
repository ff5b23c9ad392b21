//! Mistral AI client.
//!
//! Extraction and vision OCR go through `/v1/chat/completions` at
//! temperature 0. Models named `mistral-ocr-*` use the dedicated `/v1/ocr`
//! document endpoint instead, whose per-page markdown is joined.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::transport::{Auth, HttpTransport};
use super::{
    Attachment, ContentPart, Message, MessageContent, OCR_PROMPT, OcrService, ProviderClient,
    ProviderKind, ProviderPayload, RawResponse,
};
use crate::config::AppConfig;
use crate::error::{ExtractError, Result};

#[derive(Debug, Clone)]
pub struct MistralClient {
    base_url: String,
    api_key: String,
    transport: HttpTransport,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

#[derive(Deserialize)]
struct OcrPage {
    #[serde(default)]
    markdown: String,
}

impl MistralClient {
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
        let transport = HttpTransport::from_config(ProviderKind::Mistral, config)?;
        Ok(Self::new(config.mistral.base_url.clone(), api_key, transport))
    }

    fn is_ocr_model(model: &str) -> bool {
        model.starts_with("mistral-ocr")
    }

    async fn chat(&self, model: &str, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model,
            messages,
            temperature: 0.0,
        };

        let response: ChatResponse = self
            .transport
            .post_json(&url, Auth::Bearer(&self.api_key), &body)
            .await?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ExtractError::InvalidResponseFormat("mistral returned no choices".to_string())
        })?;
        Ok(content_text(&choice.message.content))
    }

    async fn ocr_endpoint(&self, attachment: &Attachment, model: &str) -> Result<String> {
        let url = format!("{}/v1/ocr", self.base_url);
        let document = if attachment.is_pdf() {
            serde_json::json!({ "type": "document_url", "document_url": attachment.data_url() })
        } else {
            serde_json::json!({ "type": "image_url", "image_url": attachment.data_url() })
        };
        let body = serde_json::json!({ "model": model, "document": document });

        let response: OcrResponse = self
            .transport
            .post_json(&url, Auth::Bearer(&self.api_key), &body)
            .await?;

        Ok(response
            .pages
            .into_iter()
            .map(|p| p.markdown)
            .filter(|m| !m.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

/// Chat content is either a string or a list of typed chunks.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(chunks) => chunks
            .iter()
            .filter_map(|c| c.get("text").and_then(Value::as_str))
            .collect::<String>(),
        _ => String::new(),
    }
}

#[async_trait]
impl ProviderClient for MistralClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    #[instrument(skip(self, payload), fields(provider = "mistral"))]
    async fn send(&self, payload: &ProviderPayload, model: &str) -> Result<RawResponse> {
        let user = match &payload.attachment {
            Some(attachment) => MessageContent::parts(vec![
                ContentPart::text(payload.user.clone()),
                ContentPart::for_attachment(attachment),
            ]),
            None => MessageContent::text(payload.user.clone()),
        };
        let messages = vec![Message::system(payload.system.clone()), Message::user(user)];

        let text = self.chat(model, messages).await?;
        debug!(model, chars = text.len(), "Mistral extraction answered");

        Ok(RawResponse {
            provider: ProviderKind::Mistral,
            model: model.to_string(),
            text,
        })
    }
}

#[async_trait]
impl OcrService for MistralClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    #[instrument(skip(self, image), fields(provider = "mistral", bytes = image.len()))]
    async fn transcribe(&self, image: &[u8], mime_type: &str, model: &str) -> Result<String> {
        let attachment = Attachment::new(mime_type, image.to_vec());
        if Self::is_ocr_model(model) {
            return self.ocr_endpoint(&attachment, model).await;
        }

        let messages = vec![Message::user(MessageContent::parts(vec![
            ContentPart::text(OCR_PROMPT),
            ContentPart::for_attachment(&attachment),
        ]))];
        self.chat(model, messages).await
    }
}
