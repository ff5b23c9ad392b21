//! OCR adapter: page images in, text out, through the shared cache.

pub mod cache;

pub use cache::{CacheKey, OcrCache, fingerprint};

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ExtractError, Result};
use crate::llm::OcrService;

/// Transcribes images with one OCR service, consulting the cache first.
#[derive(Debug, Clone)]
pub struct OcrAdapter {
    service: Arc<dyn OcrService>,
    cache: OcrCache,
}

impl OcrAdapter {
    pub fn new(service: Arc<dyn OcrService>, cache: OcrCache) -> Self {
        Self { service, cache }
    }

    pub fn cache(&self) -> &OcrCache {
        &self.cache
    }

    /// Text of `image` as read by `ocr_model`.
    ///
    /// Identical bytes and model never reach the service twice.
    ///
    /// # Errors
    ///
    /// [`ExtractError::OcrService`] when the service fails after its retries
    /// or does not accept `mime_type`.
    pub async fn extract_text(
        &self,
        image: &[u8],
        mime_type: &str,
        ocr_model: &str,
    ) -> Result<Arc<str>> {
        let key = CacheKey::new(image, ocr_model);
        if let Some(text) = self.cache.get(&key).await {
            debug!(fingerprint = %key.fingerprint, model = ocr_model, "OCR cache hit");
            return Ok(text);
        }

        let provider = self.service.kind();
        if !self.service.supports_mime_type(mime_type) {
            return Err(ExtractError::OcrService {
                provider,
                message: format!("{mime_type} images are not supported"),
            });
        }

        let text = self
            .service
            .transcribe(image, mime_type, ocr_model)
            .await
            .map_err(|e| match e {
                ExtractError::OcrService { .. } => e,
                other => ExtractError::OcrService {
                    provider,
                    message: other.to_string(),
                },
            })?;

        info!(
            name: "ocr.transcribed",
            provider = %provider,
            model = ocr_model,
            fingerprint = %key.fingerprint,
            chars = text.len(),
            "Image transcribed"
        );
        Ok(self.cache.insert(key, text).await)
    }
}
