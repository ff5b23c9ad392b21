//! Concurrent extraction of several documents.
//!
//! Each document is one task; at most `jobs` run at once and only the OCR
//! cache (inside the shared [`Orchestrator`]) is common to them. Results are
//! written as soon as their document completes, so a cancelled batch keeps
//! the outputs it already produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, stream};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::document::Document;
use crate::error::{ExtractError, Result};
use crate::extraction::{ExtractionOptions, ExtractionRequest, Orchestrator};
use crate::template::Template;

/// One document to process and where its result goes.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub document: PathBuf,
    pub output: PathBuf,
}

/// Settings shared by every document of a batch.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub doc_type: String,
    pub model: String,
    pub ocr_model: Option<String>,
    pub options: ExtractionOptions,
    /// Used instead of the store's template for `doc_type` when set.
    pub template: Option<Arc<Template>>,
}

/// What happened to one [`BatchItem`].
#[derive(Debug)]
pub struct BatchOutcome {
    pub item: BatchItem,
    pub result: Result<()>,
}

impl BatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
    jobs: usize,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, jobs: usize) -> Self {
        Self {
            orchestrator,
            jobs: jobs.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the batch; tasks not finished yet report `Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process `items`, returning one outcome per item in completion order.
    pub async fn run(&self, items: Vec<BatchItem>, settings: &BatchSettings) -> Vec<BatchOutcome> {
        info!(
            name: "batch.started",
            documents = items.len(),
            jobs = self.jobs,
            doc_type = %settings.doc_type,
            "Batch started"
        );

        let outcomes: Vec<BatchOutcome> = stream::iter(items)
            .map(|item| async move {
                let result = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Err(ExtractError::Cancelled),
                    result = self.process(&item, settings) => result,
                };
                match &result {
                    Ok(()) => info!(
                        name: "batch.document.written",
                        document = %item.document.display(),
                        output = %item.output.display(),
                        "Document extracted"
                    ),
                    Err(ExtractError::Cancelled) => {}
                    Err(e) => error!(
                        document = %item.document.display(),
                        kind = e.kind(),
                        error = %e,
                        "Document failed"
                    ),
                }
                BatchOutcome { item, result }
            })
            .buffer_unordered(self.jobs)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(
            name: "batch.finished",
            succeeded = outcomes.len() - failed,
            failed,
            "Batch finished"
        );
        outcomes
    }

    async fn process(&self, item: &BatchItem, settings: &BatchSettings) -> Result<()> {
        let document = Document::read(&item.document).await?;
        let request = ExtractionRequest {
            doc_type: settings.doc_type.clone(),
            document,
            model: settings.model.clone(),
            ocr_model: settings.ocr_model.clone(),
            options: settings.options.clone(),
        };

        let outcome = match &settings.template {
            Some(template) => {
                self.orchestrator
                    .extract_with_template(template, request)
                    .await?
            }
            None => self.orchestrator.extract(request).await?,
        };
        write_json(&item.output, &outcome.result).await
    }
}

/// Cancel `token` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning unfinished documents");
            token.cancel();
        }
    });
}

/// `<stem>_fill.json`, beside the document or inside `dir`.
pub fn fill_output_path(document: &Path, dir: Option<&Path>) -> PathBuf {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let name = format!("{stem}_fill.json");
    match dir {
        Some(dir) => dir.join(name),
        None => document.with_file_name(name),
    }
}

/// Pretty-print `value` to `path`, creating parent directories.
pub async fn write_json(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExtractError::file(parent, e))?;
    }
    let mut text = serde_json::to_string_pretty(value)
        .map_err(|e| ExtractError::Render(e.to_string()))?;
    text.push('\n');
    tokio::fs::write(path, text)
        .await
        .map_err(|e| ExtractError::file(path, e))
}
