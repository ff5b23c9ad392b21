//! Extract the template fields of one or more documents with Gemini.
//!
//! Documents run concurrently (`--jobs`) and share one OCR cache. Each result
//! is written as soon as its document completes; Ctrl-C abandons the rest.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::Parser;

use realty_extract::batch::{BatchItem, BatchRunner, BatchSettings, cancel_on_ctrl_c, fill_output_path};
use realty_extract::cli;
use realty_extract::config::{AppConfig, ApiKeys};
use realty_extract::error::ExtractError;
use realty_extract::extraction::ExtractionOptions;
use realty_extract::llm::{
    GeminiClient, MistralClient, OcrService, ProviderClient, ProviderKind, Providers,
};
use realty_extract::ocr::OcrCache;
use realty_extract::template::TemplateStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract document fields with Gemini (text + OCR)", long_about = None)]
struct Cli {
    /// Document type: carnet, reglement, dta, crep, ct, occupants, devis
    doc_type: String,

    /// Documents to analyse (PDF, image or text)
    #[arg(required = true)]
    documents: Vec<PathBuf>,

    /// Output JSON path; only with a single document
    #[arg(short, long, conflicts_with = "output_dir")]
    output: Option<PathBuf>,

    /// Directory receiving `<document>_fill.json` files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Text model (auto-selected when unset)
    #[arg(long)]
    model: Option<String>,

    /// Vision/OCR model (defaults to the text model)
    #[arg(long)]
    vision_model: Option<String>,

    /// Maximum number of PDF pages read
    #[arg(long)]
    max_pages: Option<usize>,

    /// OCR every page, even those with a text layer
    #[arg(long)]
    ocr_all: bool,

    /// OCR cache directory (default: `ocr_cache.dir`, else `.ocr_cache`);
    /// empty to keep the cache in memory only
    #[arg(long)]
    ocr_cache_dir: Option<PathBuf>,

    /// Pages per provider call
    #[arg(long, default_value_t = 8)]
    chunk_pages: usize,

    /// Provider calls in flight per document
    #[arg(long, default_value_t = 2)]
    parallel_api: usize,

    /// Re-ask for missing fields using the pages that mention them
    #[arg(long)]
    second_pass: bool,

    /// Documents processed at once
    #[arg(long, default_value_t = default_jobs())]
    jobs: usize,

    /// Template file overriding `<templates dir>/<doc_type>.json`
    #[arg(long)]
    template: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

fn default_jobs() -> usize {
    num_cpus::get().clamp(1, 4)
}

const DEFAULT_CACHE_DIR: &str = ".ocr_cache";

/// Directory of the OCR cache; an empty `--ocr-cache-dir` disables it.
fn cache_dir(flag: Option<&Path>, configured: Option<&Path>) -> Option<PathBuf> {
    match flag {
        Some(dir) if dir.as_os_str().is_empty() => None,
        Some(dir) => Some(dir.to_path_buf()),
        None => Some(configured.map_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR), Path::to_path_buf)),
    }
}

/// Gemini serves extraction; OCR goes to Mistral only when the vision model
/// is a Mistral one.
fn batch_providers(
    config: &AppConfig,
    keys: &ApiKeys,
    gemini: Arc<GeminiClient>,
    vision_model: &str,
) -> Result<Providers, ExtractError> {
    let mut providers = Providers {
        gemini: Some(Arc::clone(&gemini) as Arc<dyn ProviderClient>),
        gemini_ocr: Some(gemini as Arc<dyn OcrService>),
        ..Providers::default()
    };
    if ProviderKind::detect_from_model(vision_model) == ProviderKind::Mistral {
        let key = keys.require(ProviderKind::Mistral)?;
        providers.mistral_ocr = Some(Arc::new(MistralClient::from_config(config, key)?));
    }
    Ok(providers)
}

#[tokio::main]
async fn main() -> ExitCode {
    cli::init();
    cli::finish(run(Cli::parse()).await)
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let started = Instant::now();

    if args.output.is_some() && args.documents.len() > 1 {
        bail!(ExtractError::Config(
            "--output takes a single document, use --output-dir".to_string()
        ));
    }
    if args.chunk_pages == 0 || args.parallel_api == 0 || args.jobs == 0 {
        bail!(ExtractError::Config(
            "--chunk-pages, --parallel-api and --jobs must be greater than 0".to_string()
        ));
    }

    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    let keys = ApiKeys::from_env();
    let key = keys.require(ProviderKind::Gemini)?;

    let gemini = Arc::new(GeminiClient::from_config(&config, key)?);
    let model = gemini
        .resolve_model(args.model.as_deref().or(config.gemini.model.as_deref()))
        .await?;
    let vision_model = args
        .vision_model
        .clone()
        .or_else(|| config.gemini.vision_model.clone())
        .unwrap_or_else(|| model.clone());

    let providers = batch_providers(&config, &keys, gemini, &vision_model)?;
    let ocr_cache_dir = cache_dir(args.ocr_cache_dir.as_deref(), config.ocr_cache.dir.as_deref());
    let orchestrator = Arc::new(cli::orchestrator(
        &config,
        providers,
        OcrCache::from_dir(ocr_cache_dir.as_deref()),
    ));

    let mut options = ExtractionOptions::from_config(&config);
    if let Some(max_pages) = args.max_pages {
        options.max_pages = max_pages;
    }
    options.ocr_all |= args.ocr_all;
    options.chunk_pages = Some(args.chunk_pages);
    options.parallel_calls = args.parallel_api;
    options.second_pass |= args.second_pass;

    let template = match &args.template {
        Some(path) => Some(Arc::new(TemplateStore::load_path(path).await?)),
        None => None,
    };
    let settings = BatchSettings {
        doc_type: args.doc_type.clone(),
        model,
        ocr_model: Some(vision_model),
        options,
        template,
    };

    let items: Vec<BatchItem> = args
        .documents
        .iter()
        .map(|document| BatchItem {
            output: args
                .output
                .clone()
                .unwrap_or_else(|| fill_output_path(document, args.output_dir.as_deref())),
            document: document.clone(),
        })
        .collect();

    let single = items.len() == 1;
    let runner = BatchRunner::new(orchestrator, args.jobs);
    cancel_on_ctrl_c(runner.cancellation_token());
    let outcomes = runner.run(items, &settings).await;

    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(()) => println!("Écrit : {}", outcome.item.output.display()),
            Err(e) => {
                if !single {
                    eprintln!(
                        "error[{}]: {}: {e}",
                        e.kind(),
                        outcome.item.document.display()
                    );
                }
                failures.push(e);
            }
        }
    }
    println!(
        "Temps d'execution: {:.2}s",
        started.elapsed().as_secs_f64()
    );

    match failures.pop() {
        None => Ok(()),
        Some(e) if single => Err(e.into()),
        Some(_) => bail!("{} documents failed", failures.len() + 1),
    }
}
