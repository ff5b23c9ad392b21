//! Document extraction HTTP server.
//!
//! Entry point for `POST /extract`.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;

use realty_extract::config::{AppConfig, ApiKeys};
use realty_extract::extraction::{OcrDefaults, Orchestrator};
use realty_extract::llm::Providers;
use realty_extract::ocr::OcrCache;
use realty_extract::template::TemplateStore;
use realty_extract::{server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before anything reads the environment.
    let _ = dotenv();
    telemetry::init();

    let config = AppConfig::load_server().context("loading configuration")?;
    let keys = ApiKeys::from_env();
    // The default model must be usable without any per-request override.
    keys.require_for_model(&config.mistral.model)?;

    info!(
        name: "config.loaded",
        mistral = keys.mistral.is_some(),
        gemini = keys.gemini.is_some(),
        default_model = %config.mistral.model,
        templates = %config.templates.dir.display(),
        "Configuration loaded"
    );

    let providers = Providers::from_config(&config, &keys)?;
    let orchestrator = Orchestrator::new(
        TemplateStore::new(config.templates.dir.clone()),
        providers,
        OcrCache::from_dir(config.ocr_cache.dir.as_deref()),
        OcrDefaults::from_config(&config),
    );

    server::start_server(Arc::new(config), Arc::new(orchestrator)).await
}
