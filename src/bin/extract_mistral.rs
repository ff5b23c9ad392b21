//! Extract the template fields of one document with a Mistral model.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use realty_extract::batch::{fill_output_path, write_json};
use realty_extract::cli;
use realty_extract::config::{AppConfig, ApiKeys};
use realty_extract::document::Document;
use realty_extract::extraction::{ExtractionOptions, ExtractionRequest};
use realty_extract::llm::Providers;
use realty_extract::ocr::OcrCache;
use realty_extract::template::TemplateStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract document fields with Mistral (text + OCR)", long_about = None)]
struct Cli {
    /// Document type: carnet, reglement, dta, crep, ct, occupants, devis
    doc_type: String,

    /// Document to analyse (PDF, image or text)
    document: PathBuf,

    /// Output JSON path (default: `<document>_fill.json`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Text model (default: `mistral.model` from the configuration)
    #[arg(long)]
    model: Option<String>,

    /// Vision/OCR model
    #[arg(long)]
    ocr_model: Option<String>,

    /// Maximum number of PDF pages read
    #[arg(long)]
    max_pages: Option<usize>,

    /// OCR every page, even those with a text layer
    #[arg(long)]
    ocr_all: bool,

    /// Send the file itself to the model instead of its text
    #[arg(long)]
    raw_document: bool,

    /// Template file overriding `<templates dir>/<doc_type>.json`
    #[arg(long)]
    template: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    cli::init();
    cli::finish(run(Cli::parse()).await)
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    let keys = ApiKeys::from_env();
    let model = args
        .model
        .clone()
        .unwrap_or_else(|| config.mistral.model.clone());
    keys.require_for_model(&model)?;

    let providers = Providers::from_config(&config, &keys)?;
    let orchestrator = cli::orchestrator(
        &config,
        providers,
        OcrCache::from_dir(config.ocr_cache.dir.as_deref()),
    );

    let document = Document::read(&args.document).await?;

    let mut options = ExtractionOptions::from_config(&config);
    if let Some(max_pages) = args.max_pages {
        options.max_pages = max_pages;
    }
    options.ocr_all |= args.ocr_all;
    options.raw_document = args.raw_document;

    let request = ExtractionRequest {
        doc_type: args.doc_type.clone(),
        document,
        model,
        ocr_model: args.ocr_model.clone(),
        options,
    };

    let outcome = match &args.template {
        Some(path) => {
            let template = TemplateStore::load_path(path).await?;
            orchestrator.extract_with_template(&template, request).await?
        }
        None => orchestrator.extract(request).await?,
    };

    let output = args
        .output
        .unwrap_or_else(|| fill_output_path(&args.document, None));
    write_json(&output, &outcome.result).await?;
    println!("Écrit : {}", output.display());
    Ok(())
}
