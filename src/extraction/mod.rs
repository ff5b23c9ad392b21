//! Extraction pipeline: template, pages, prompt, provider, validation, fill.
//!
//! One [`Orchestrator`] serves every request of the process. Each call walks
//! the [`Stage`]s in order; any error stops the walk and surfaces unchanged.
//!
//! Long documents can be split into page chunks, each sent as its own
//! provider call (bounded by `parallel_calls`), and the chunk results are
//! merged with found values winning. An optional second pass re-asks for the
//! fields still missing, using only pages that mention them.

pub mod fill;
pub mod response;

pub use fill::{ResultMeta, fill_template, set_path};
pub use response::{ExtractedField, Extraction, NOT_FOUND, is_found, parse_json_content, validate};

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::document::{Document, DocumentLoader, LoadOptions, Page, flatten_pages};
use crate::error::Result;
use crate::llm::{ProviderClient, ProviderKind, Providers};
use crate::ocr::{OcrAdapter, OcrCache};
use crate::prompt::{PromptInput, build_request};
use crate::template::{FieldSpec, Template, TemplateStore};

/// Pipeline position of one extraction, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    TemplateLoaded,
    TextReady,
    PromptBuilt,
    ProviderResponded,
    Validated,
}

#[derive(Debug)]
struct StageTracker {
    doc_type: String,
    stage: Stage,
}

impl StageTracker {
    fn new(doc_type: &str) -> Self {
        Self {
            doc_type: doc_type.to_string(),
            stage: Stage::Idle,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!(
            name: "extraction.stage",
            doc_type = %self.doc_type,
            from = ?self.stage,
            to = ?next,
            "Extraction stage"
        );
        self.stage = next;
    }
}

/// Per-request knobs.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub max_pages: usize,
    pub max_chars: usize,
    pub min_text_chars: usize,
    pub ocr_all: bool,
    /// Pages per provider call; the whole document when unset.
    pub chunk_pages: Option<usize>,
    pub parallel_calls: usize,
    pub second_pass: bool,
    /// Send the file itself to the provider instead of extracted text.
    pub raw_document: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            max_pages: 12,
            max_chars: 32_000,
            min_text_chars: 80,
            ocr_all: false,
            chunk_pages: None,
            parallel_calls: 2,
            second_pass: false,
            raw_document: false,
        }
    }
}

impl ExtractionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let cfg = &config.extraction;
        Self {
            max_pages: cfg.max_pages,
            max_chars: cfg.max_chars,
            min_text_chars: cfg.min_text_chars,
            ocr_all: cfg.ocr_all,
            chunk_pages: cfg.chunk_pages,
            parallel_calls: cfg.parallel_calls,
            second_pass: cfg.second_pass,
            raw_document: false,
        }
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            max_pages: self.max_pages,
            min_text_chars: self.min_text_chars,
            ocr_all: self.ocr_all,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub doc_type: String,
    pub document: Document,
    pub model: String,
    pub ocr_model: Option<String>,
    pub options: ExtractionOptions,
}

/// Result of one extraction: the recognized fields and the filled template.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub extraction: Extraction,
    pub result: Value,
}

/// OCR models used when a request does not name one.
#[derive(Debug, Clone)]
pub struct OcrDefaults {
    pub mistral: String,
    /// Falls back to the extraction model when unset.
    pub gemini: Option<String>,
}

impl OcrDefaults {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mistral: config.mistral.ocr_model.clone(),
            gemini: config.gemini.vision_model.clone(),
        }
    }

    fn resolve(&self, requested: Option<&str>, extraction_model: &str) -> String {
        if let Some(model) = requested.filter(|m| !m.trim().is_empty()) {
            return model.to_string();
        }
        match ProviderKind::detect_from_model(extraction_model) {
            ProviderKind::Mistral => self.mistral.clone(),
            ProviderKind::Gemini => self
                .gemini
                .clone()
                .unwrap_or_else(|| extraction_model.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    templates: TemplateStore,
    providers: Providers,
    ocr_cache: OcrCache,
    ocr_defaults: OcrDefaults,
}

impl Orchestrator {
    pub fn new(
        templates: TemplateStore,
        providers: Providers,
        ocr_cache: OcrCache,
        ocr_defaults: OcrDefaults,
    ) -> Self {
        Self {
            templates,
            providers,
            ocr_cache,
            ocr_defaults,
        }
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Run the whole pipeline for `request`, loading its template by doc type.
    pub async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionOutcome> {
        let mut tracker = StageTracker::new(&request.doc_type);
        let template = self.templates.load(&request.doc_type).await?;
        tracker.advance(Stage::TemplateLoaded);
        self.run(&template, &request, &mut tracker).await
    }

    /// Run the pipeline against an already loaded template.
    pub async fn extract_with_template(
        &self,
        template: &Template,
        request: ExtractionRequest,
    ) -> Result<ExtractionOutcome> {
        let mut tracker = StageTracker::new(template.doc_type());
        tracker.advance(Stage::TemplateLoaded);
        self.run(template, &request, &mut tracker).await
    }

    async fn run(
        &self,
        template: &Template,
        request: &ExtractionRequest,
        tracker: &mut StageTracker,
    ) -> Result<ExtractionOutcome> {
        let client = self.providers.client_for(&request.model)?;
        let options = &request.options;
        let document = &request.document;

        let extraction = if options.raw_document {
            tracker.advance(Stage::TextReady);
            let payload = build_request(
                template.fields(),
                PromptInput::Document(document),
                template.doc_type(),
            );
            tracker.advance(Stage::PromptBuilt);
            let raw = client.send(&payload, &request.model).await?;
            tracker.advance(Stage::ProviderResponded);
            validate(&raw.text, template)?
        } else {
            let pages = self.load_pages(request).await?;
            tracker.advance(Stage::TextReady);
            let mut extraction = self
                .extract_chunks(&client, template, &pages, request, tracker)
                .await?;
            if options.second_pass {
                self.second_pass(&client, template, &pages, request, &mut extraction)
                    .await?;
            }
            extraction
        };
        tracker.advance(Stage::Validated);

        info!(
            name: "extraction.validated",
            doc_type = template.doc_type(),
            file = %document.file_name,
            model = %request.model,
            recognized = extraction.len(),
            declared = template.field_count(),
            "Extraction validated"
        );

        let meta = ResultMeta {
            file_name: document.file_name.clone(),
            file_type: document.file_type(),
            doc_type: template.doc_type().to_string(),
            model: request.model.clone(),
        };
        let result = fill_template(template, &extraction, &meta);
        Ok(ExtractionOutcome { extraction, result })
    }

    async fn load_pages(&self, request: &ExtractionRequest) -> Result<Vec<Page>> {
        let ocr_model = self
            .ocr_defaults
            .resolve(request.ocr_model.as_deref(), &request.model);

        // A missing OCR key only matters once a page actually needs OCR.
        let ocr = match self.providers.ocr_for(&ocr_model) {
            Ok(service) => Some(OcrAdapter::new(service, self.ocr_cache.clone())),
            Err(e) => {
                debug!(model = %ocr_model, error = %e, "No OCR service available");
                None
            }
        };

        DocumentLoader::new(ocr, ocr_model, request.options.load_options())
            .load_pages(&request.document)
            .await
    }

    async fn extract_chunks(
        &self,
        client: &Arc<dyn ProviderClient>,
        template: &Template,
        pages: &[Page],
        request: &ExtractionRequest,
        tracker: &mut StageTracker,
    ) -> Result<Extraction> {
        let options = &request.options;
        let chunk_size = options.chunk_pages.unwrap_or(usize::MAX).max(1);
        let chunks: Vec<&[Page]> = if pages.is_empty() {
            vec![pages]
        } else {
            pages.chunks(chunk_size).collect()
        };

        let fields: Vec<&FieldSpec> = template.fields().collect();
        let payloads: Vec<_> = chunks
            .iter()
            .map(|chunk| {
                let text = flatten_pages(chunk, options.max_chars);
                build_request(
                    fields.iter().copied(),
                    PromptInput::Text(&text),
                    template.doc_type(),
                )
            })
            .collect();
        tracker.advance(Stage::PromptBuilt);

        if payloads.len() > 1 {
            info!(
                chunks = payloads.len(),
                parallel = options.parallel_calls,
                "Document split into page chunks"
            );
        }

        // Ordered buffering keeps the merge deterministic.
        let extractions: Vec<Extraction> = stream::iter(payloads)
            .map(|payload| async move {
                let raw = client.send(&payload, &request.model).await?;
                validate(&raw.text, template)
            })
            .buffered(options.parallel_calls.max(1))
            .try_collect()
            .await?;
        tracker.advance(Stage::ProviderResponded);

        let mut merged = Extraction::default();
        for extraction in extractions {
            merged.merge(extraction);
        }
        Ok(merged)
    }

    async fn second_pass(
        &self,
        client: &Arc<dyn ProviderClient>,
        template: &Template,
        pages: &[Page],
        request: &ExtractionRequest,
        extraction: &mut Extraction,
    ) -> Result<()> {
        let missing: Vec<&FieldSpec> = template
            .fields()
            .filter(|f| !extraction.is_found(&f.path))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let relevant = find_relevant_pages(pages, &missing);
        if relevant.is_empty() {
            debug!(missing = missing.len(), "Second pass skipped, no page mentions a missing field");
            return Ok(());
        }

        info!(
            name: "extraction.second_pass",
            missing = missing.len(),
            pages = relevant.len(),
            "Re-asking for missing fields"
        );
        let text = flatten_pages(&relevant, request.options.max_chars);
        let payload = build_request(
            missing.iter().copied(),
            PromptInput::Text(&text),
            template.doc_type(),
        );
        let raw = client.send(&payload, &request.model).await?;
        match validate(&raw.text, template) {
            Ok(update) => extraction.merge(update),
            Err(e) => warn!(error = %e, "Second pass answer ignored"),
        }
        Ok(())
    }
}

/// Pages whose text contains a keyword (longer than three characters) taken
/// from the labels of `fields`.
pub fn find_relevant_pages(pages: &[Page], fields: &[&FieldSpec]) -> Vec<Page> {
    let tokens: BTreeSet<String> = fields
        .iter()
        .flat_map(|f| {
            f.label
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| t.chars().count() > 3)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();

    pages
        .iter()
        .filter(|page| {
            let text = page.text.to_lowercase();
            tokens.iter().any(|t| text.contains(t.as_str()))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ProviderPayload, RawResponse};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with queued responses and records the prompts it saw.
    #[derive(Debug, Default)]
    struct ScriptedProvider {
        answers: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(answers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().rev().map(ToString::to_string).collect()),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Mistral
        }

        async fn send(&self, payload: &ProviderPayload, model: &str) -> Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(payload.user.clone());
            let text = self.answers.lock().unwrap().pop().unwrap_or_default();
            Ok(RawResponse {
                provider: ProviderKind::Mistral,
                model: model.to_string(),
                text,
            })
        }
    }

    fn template_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let template = json!({
            "meta": { "file_name": { "expected_type": "string" } },
            "immeuble": {
                "adresse": { "expected_type": "string", "label": "Adresse immeuble" },
                "ascenseur": { "expected_type": "boolean", "label": "Presence ascenseur" }
            },
            "syndic": { "nom": { "expected_type": "string", "label": "Nom du syndic" } }
        });
        std::fs::write(dir.path().join("carnet.json"), template.to_string()).unwrap();
        dir
    }

    fn orchestrator(dir: &tempfile::TempDir, provider: Arc<ScriptedProvider>) -> Orchestrator {
        let providers = Providers {
            mistral: Some(provider as Arc<dyn ProviderClient>),
            ..Providers::default()
        };
        Orchestrator::new(
            TemplateStore::new(dir.path()),
            providers,
            OcrCache::new(),
            OcrDefaults {
                mistral: "pixtral-large-latest".into(),
                gemini: None,
            },
        )
    }

    fn request(text: &str, options: ExtractionOptions) -> ExtractionRequest {
        ExtractionRequest {
            doc_type: "carnet".into(),
            document: Document::from_bytes("carnet.txt", text.as_bytes().to_vec(), None).unwrap(),
            model: "mistral-large-latest".into(),
            ocr_model: None,
            options,
        }
    }

    #[tokio::test]
    async fn test_single_call_fills_every_field() {
        let dir = template_dir();
        let provider = ScriptedProvider::new(&[
            r#"{"immeuble.adresse": {"value": "3 place Bellecour", "page": 1, "excerpt": "3 place Bellecour"}}"#,
        ]);
        let orch = orchestrator(&dir, Arc::clone(&provider));

        let outcome = orch
            .extract(request("Immeuble 3 place Bellecour", ExtractionOptions::default()))
            .await
            .unwrap();

        assert_eq!(outcome.extraction.keys().collect::<Vec<_>>(), vec!["immeuble.adresse"]);
        assert_eq!(outcome.result["immeuble"]["adresse"]["value"], json!("3 place Bellecour"));
        assert_eq!(outcome.result["immeuble"]["ascenseur"]["value"], json!("not found"));
        assert_eq!(outcome.result["meta"]["file_name"]["value"], json!("carnet.txt"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let prompt = &provider.prompts.lock().unwrap()[0];
        assert!(prompt.contains("[page 1]\nImmeuble 3 place Bellecour"));
    }

    #[tokio::test]
    async fn test_invalid_response_is_not_retried() {
        let dir = template_dir();
        let provider = ScriptedProvider::new(&["Je ne peux pas répondre."]);
        let orch = orchestrator(&dir, Arc::clone(&provider));

        let err = orch
            .extract(request("texte", ExtractionOptions::default()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "InvalidResponseFormat");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_doc_type() {
        let dir = template_dir();
        let provider = ScriptedProvider::new(&[]);
        let orch = orchestrator(&dir, Arc::clone(&provider));

        let mut req = request("texte", ExtractionOptions::default());
        req.doc_type = "bogus".into();
        let err = orch.extract(req).await.unwrap_err();

        assert_eq!(err.kind(), "TemplateNotFound");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_provider_key() {
        let dir = template_dir();
        let orch = orchestrator(&dir, ScriptedProvider::new(&[]));
        let mut req = request("texte", ExtractionOptions::default());
        req.model = "gemini-2.5-pro".into();

        let err = orch.extract(req).await.unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[tokio::test]
    async fn test_raw_document_skips_page_loading() {
        let dir = template_dir();
        let provider = ScriptedProvider::new(&[r#"{"syndic.nom": "Foncia"}"#]);
        let orch = orchestrator(&dir, Arc::clone(&provider));

        let options = ExtractionOptions {
            raw_document: true,
            ..ExtractionOptions::default()
        };
        let outcome = orch.extract(request("Syndic Foncia", options)).await.unwrap();

        assert_eq!(outcome.result["syndic"]["nom"]["value"], json!("Foncia"));
        let prompt = &provider.prompts.lock().unwrap()[0];
        assert!(!prompt.contains("[page 1]"));
    }

    fn pdf_request(lines: &[&str], options: ExtractionOptions) -> ExtractionRequest {
        let bytes = crate::document::tests::pdf_with_pages(lines);
        ExtractionRequest {
            document: Document::from_bytes("carnet.pdf", bytes, None).unwrap(),
            ..request("", options)
        }
    }

    #[tokio::test]
    async fn test_chunks_are_sent_separately_and_merged() {
        let dir = template_dir();
        let provider = ScriptedProvider::new(&[
            r#"{"immeuble.adresse": {"value": "12 rue des Lilas", "page": 1, "excerpt": "12 rue des Lilas"},
                "syndic.nom": {"value": "not found", "page": null, "excerpt": ""}}"#,
            r#"{"immeuble.adresse": "not found", "syndic.nom": {"value": "Foncia", "page": 2, "excerpt": "Foncia"}}"#,
            r#"{"immeuble.ascenseur": {"value": true, "page": 3, "excerpt": "ascenseur OTIS"}}"#,
        ]);
        let orch = orchestrator(&dir, Arc::clone(&provider));

        let options = ExtractionOptions {
            chunk_pages: Some(1),
            parallel_calls: 2,
            min_text_chars: 1,
            ..ExtractionOptions::default()
        };
        let outcome = orch
            .extract(pdf_request(
                &["Immeuble 12 rue des Lilas", "Syndic Foncia", "Un ascenseur OTIS"],
                options,
            ))
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let prompts = provider.prompts.lock().unwrap();
        for (idx, prompt) in prompts.iter().enumerate() {
            for page in 1..=3 {
                let marker = format!("[page {page}]");
                assert_eq!(prompt.contains(&marker), page == idx + 1, "chunk {idx}, {marker}");
            }
        }

        assert_eq!(outcome.result["immeuble"]["adresse"]["value"], json!("12 rue des Lilas"));
        assert_eq!(outcome.result["syndic"]["nom"]["value"], json!("Foncia"));
        assert_eq!(outcome.result["syndic"]["nom"]["source"]["page"], json!(2));
        assert_eq!(outcome.result["immeuble"]["ascenseur"]["value"], json!(true));
    }

    #[tokio::test]
    async fn test_second_pass_asks_only_for_missing_fields() {
        let dir = template_dir();
        let provider = ScriptedProvider::new(&[
            r#"{"immeuble.adresse": {"value": "12 rue des Lilas", "page": 1, "excerpt": "12 rue des Lilas"}}"#,
            r#"{"syndic.nom": {"value": "Foncia", "page": 2, "excerpt": "Le syndic Foncia"}}"#,
        ]);
        let orch = orchestrator(&dir, Arc::clone(&provider));

        let options = ExtractionOptions {
            second_pass: true,
            min_text_chars: 1,
            ..ExtractionOptions::default()
        };
        let outcome = orch
            .extract(pdf_request(
                &["Immeuble 12 rue des Lilas", "Le syndic Foncia", "Table des pieces"],
                options,
            ))
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        let prompts = provider.prompts.lock().unwrap();
        let retry = &prompts[1];
        assert!(retry.contains("- immeuble.ascenseur |"));
        assert!(retry.contains("- syndic.nom |"));
        assert!(!retry.contains("- immeuble.adresse |"));
        // Only the page naming the syndic is resent.
        assert!(retry.contains("[page 2]"));
        assert!(!retry.contains("[page 1]"));
        assert!(!retry.contains("[page 3]"));

        assert_eq!(outcome.result["immeuble"]["adresse"]["value"], json!("12 rue des Lilas"));
        assert_eq!(outcome.result["syndic"]["nom"]["value"], json!("Foncia"));
        assert_eq!(outcome.result["immeuble"]["ascenseur"]["value"], json!("not found"));
    }

    #[test]
    fn test_find_relevant_pages() {
        let label = |l: &str| FieldSpec {
            path: "x".into(),
            label: l.into(),
            expected_type: "string".into(),
            description: None,
        };
        let fields = [label("Nom du syndic"), label("Date CT")];
        let refs: Vec<&FieldSpec> = fields.iter().collect();
        let pages = vec![
            Page::new(1, "Table des matières"),
            Page::new(2, "Le SYNDIC de copropriété est ..."),
            Page::new(3, "Date du contrôle"),
        ];

        let relevant = find_relevant_pages(&pages, &refs);
        // "date" is only four letters and qualifies; "du", "ct" and "nom" do not.
        assert_eq!(
            relevant.iter().map(|p| p.number).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn test_ocr_defaults() {
        let defaults = OcrDefaults {
            mistral: "pixtral-large-latest".into(),
            gemini: None,
        };
        assert_eq!(
            defaults.resolve(None, "mistral-large-latest"),
            "pixtral-large-latest"
        );
        assert_eq!(defaults.resolve(None, "gemini-2.5-pro"), "gemini-2.5-pro");
        assert_eq!(
            defaults.resolve(Some("mistral-ocr-latest"), "gemini-2.5-pro"),
            "mistral-ocr-latest"
        );
    }
}
