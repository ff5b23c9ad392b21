//! Error taxonomy shared by every extraction stage.
//!
//! Each variant maps to a stable kind string (see [`ExtractError::kind`]) that
//! the HTTP layer puts in its error bodies and the CLIs print on stderr.

use std::path::PathBuf;

use crate::llm::ProviderKind;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Errors produced while loading templates, reading documents, calling
/// providers, validating their output or rendering spreadsheets.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// No template file exists for the requested document type.
    #[error("no template found for document type '{doc_type}'")]
    TemplateNotFound { doc_type: String },

    /// The template file exists but cannot be used.
    #[error("invalid template {path}: {reason}")]
    InvalidTemplate { path: PathBuf, reason: String },

    /// The document is neither a PDF, an image nor plain text.
    #[error("unsupported document '{file_name}' ({mime_type})")]
    UnsupportedDocument { file_name: String, mime_type: String },

    /// The OCR service failed after the retry budget was spent.
    #[error("OCR service error ({provider}): {message}")]
    OcrService {
        provider: ProviderKind,
        message: String,
    },

    /// The extraction provider failed after the retry budget was spent.
    #[error("{provider} call failed{}: {message}", status_suffix(.status))]
    ProviderCall {
        provider: ProviderKind,
        /// Last HTTP status observed, if the server answered at all.
        status: Option<u16>,
        /// Whether the last attempt hit the client timeout.
        timed_out: bool,
        message: String,
    },

    /// The provider answered, but not with a usable JSON object.
    #[error("invalid response format: {0}")]
    InvalidResponseFormat(String),

    /// The spreadsheet converter received unusable input.
    #[error("render error: {0}")]
    Render(String),

    /// Missing or inconsistent configuration (API keys, limits).
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was interrupted before it completed.
    #[error("operation cancelled")]
    Cancelled,

    #[error("file operation failed for {path}: {source}")]
    FileOperation {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl ExtractError {
    /// Stable, machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TemplateNotFound { .. } => "TemplateNotFound",
            Self::InvalidTemplate { .. } => "InvalidTemplate",
            Self::UnsupportedDocument { .. } => "UnsupportedDocument",
            Self::OcrService { .. } => "OcrServiceError",
            Self::ProviderCall { .. } => "ProviderCallError",
            Self::InvalidResponseFormat(_) => "InvalidResponseFormat",
            Self::Render(_) => "RenderError",
            Self::Config(_) => "ConfigError",
            Self::Cancelled => "Cancelled",
            Self::FileOperation { .. } | Self::Io(_) => "IoError",
        }
    }

    /// Whether the failure is worth another attempt: rate limiting, server
    /// errors, timeouts and connection failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProviderCall {
                status, timed_out, ..
            } => {
                let retryable_status = match status {
                    Some(code) => *code == 429 || (500..=599).contains(code),
                    None => true,
                };
                retryable_status || *timed_out
            }
            _ => false,
        }
    }

    /// Wrap an IO error with the path it concerns.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileOperation {
            path: path.into(),
            source,
        }
    }
}
