//! Plumbing shared by the command-line binaries.

use std::process::ExitCode;

use crate::config::AppConfig;
use crate::error::ExtractError;
use crate::extraction::{OcrDefaults, Orchestrator};
use crate::llm::Providers;
use crate::ocr::OcrCache;
use crate::telemetry;
use crate::template::TemplateStore;

/// Load `.env` (if present) and install logging.
pub fn init() {
    let _ = dotenvy::dotenv();
    telemetry::init();
}

/// Kind printed after `error[` for a failed run.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ExtractError>())
        .map_or("Error", ExtractError::kind)
}

/// Map a run result to the process exit code, reporting failures on stderr
/// as `error[<Kind>]: <message>`.
pub fn finish(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {err:#}", error_kind(&err));
            ExitCode::FAILURE
        }
    }
}

/// An orchestrator over `providers` using the configured templates and
/// OCR defaults, with OCR results cached in `ocr_cache`.
pub fn orchestrator(config: &AppConfig, providers: Providers, ocr_cache: OcrCache) -> Orchestrator {
    Orchestrator::new(
        TemplateStore::new(config.templates.dir.clone()),
        providers,
        ocr_cache,
        OcrDefaults::from_config(config),
    )
}
