//! Convert a filled extraction result into a styled spreadsheet.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use realty_extract::cli;
use realty_extract::config::AppConfig;
use realty_extract::error::ExtractError;
use realty_extract::excel;
use realty_extract::template::TemplateStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert an extraction JSON into a styled .xlsx", long_about = None)]
struct Cli {
    /// Filled JSON produced by an extraction
    input: PathBuf,

    /// Output workbook (default: `<input>_styled.xlsx`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Order and label columns after this document type's template
    #[arg(long)]
    doc_type: Option<String>,

    /// Config file path (locates the templates directory)
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    cli::init();
    cli::finish(run(Cli::parse()).await)
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let json = tokio::fs::read_to_string(&args.input)
        .await
        .map_err(|e| ExtractError::file(&args.input, e))?;

    let template = match &args.doc_type {
        Some(doc_type) => {
            let config =
                AppConfig::load(args.config.as_deref()).context("loading configuration")?;
            Some(
                TemplateStore::new(config.templates.dir.clone())
                    .load(doc_type)
                    .await?,
            )
        }
        None => None,
    };

    let bytes = excel::render_str(&json, template.as_ref())?;
    let output = args.output.unwrap_or_else(|| styled_output_path(&args.input));
    tokio::fs::write(&output, bytes)
        .await
        .map_err(|e| ExtractError::file(&output, e))?;

    println!("Écrit : {}", output.display());
    Ok(())
}

fn styled_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string());
    input.with_file_name(format!("{stem}_styled.xlsx"))
}
