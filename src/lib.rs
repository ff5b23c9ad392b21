//! Field extraction from French real-estate documents.
//!
//! A document (PDF, scan or text) is turned into paginated text, sent with a
//! per-document-type template to an LLM provider (Mistral or Gemini), and the
//! model's answer is validated and written back into the template.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP API (`POST /extract`)
//! - **CLIs**: single-document Mistral extraction, batch Gemini extraction and
//!   JSON to spreadsheet conversion
//! - **Providers**: one [`llm::ProviderClient`] trait, two HTTP clients with
//!   retry and rate limiting
//!
//! # Modules
//!
//! - [`template`]: per-doc-type field templates
//! - [`document`]: document classification and PDF text/OCR pagination
//! - [`ocr`]: OCR adapter and its content-addressed cache
//! - [`prompt`]: provider payload construction
//! - [`llm`]: provider clients and transport
//! - [`extraction`]: the orchestrator, response validation and template fill
//! - [`excel`]: styled spreadsheet rendering
//! - [`batch`]: concurrent multi-document runs

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod batch;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod excel;
pub mod extraction;
pub mod llm;
pub mod ocr;
pub mod prompt;
pub mod server;
pub mod telemetry;
pub mod template;

pub use error::{ExtractError, Result};

use crate::config::AppConfig;
use crate::extraction::Orchestrator;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Extraction pipeline, shared by every request.
    pub orchestrator: Arc<Orchestrator>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}
