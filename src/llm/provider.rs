//! Provider identification.
//!
//! The extraction model name decides which provider serves a request:
//! `gemini-*` models go to Google, everything else to Mistral.

use serde::{Deserialize, Serialize};

/// Supported extraction providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Mistral AI (`api.mistral.ai`)
    Mistral,
    /// Google Gemini (`generativelanguage.googleapis.com`)
    Gemini,
}

impl ProviderKind {
    /// Detect the provider from a model identifier.
    ///
    /// # Example
    ///
    /// ```rust
    /// use realty_extract::llm::ProviderKind;
    ///
    /// assert_eq!(ProviderKind::detect_from_model("gemini-1.5-pro"), ProviderKind::Gemini);
    /// assert_eq!(ProviderKind::detect_from_model("mistral-large-latest"), ProviderKind::Mistral);
    /// ```
    #[must_use]
    pub fn detect_from_model(model: &str) -> Self {
        let lower = model.trim().to_lowercase();
        let bare = lower.strip_prefix("models/").unwrap_or(&lower);

        if bare.starts_with("gemini") || bare.starts_with("learnlm") {
            Self::Gemini
        } else {
            Self::Mistral
        }
    }

    /// Environment variable carrying this provider's API key.
    #[must_use]
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::Mistral => "MISTRAL_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mistral => "mistral",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
