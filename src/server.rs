use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Request, State, multipart::MultipartError},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::AppState;
use crate::config::AppConfig;
use crate::document::Document;
use crate::error::ExtractError;
use crate::extraction::{ExtractionOptions, ExtractionRequest, Orchestrator};

const DEFAULT_DOC_TYPE: &str = "carnet";

/// Start the Axum server with the provided configuration.
pub async fn start_server(
    config: Arc<AppConfig>,
    orchestrator: Arc<Orchestrator>,
) -> anyhow::Result<()> {
    let state = AppState {
        orchestrator,
        config: Arc::clone(&config),
    };
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        templates = %config.templates.dir.display(),
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Routes and middleware; exposed for in-process tests.
pub fn router(state: AppState) -> Router {
    let timeout = state.config.request_timeout();
    let body_limit = state.config.server.body_limit_mb * 1024 * 1024;

    Router::new()
        .route("/extract", post(extract))
        .route("/health", get(health))
        .route("/templates", get(templates))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => ApiError::Timeout(timeout).into_response(),
                }
            },
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of one API request, rendered as `{"error": kind, "detail": msg}`.
#[derive(Debug)]
pub enum ApiError {
    Extract(ExtractError),
    BadRequest(String),
    Multipart(MultipartError),
    Timeout(Duration),
}

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        Self::Extract(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::Multipart(e)
    }
}

/// HTTP status for a pipeline error.
pub fn status_for(error: &ExtractError) -> StatusCode {
    match error {
        ExtractError::TemplateNotFound { .. } => StatusCode::BAD_REQUEST,
        ExtractError::UnsupportedDocument { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ExtractError::InvalidResponseFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ExtractError::ProviderCall {
            timed_out: true, ..
        } => StatusCode::GATEWAY_TIMEOUT,
        ExtractError::ProviderCall { .. } | ExtractError::OcrService { .. } => {
            StatusCode::BAD_GATEWAY
        }
        ExtractError::InvalidTemplate { .. }
        | ExtractError::Render(_)
        | ExtractError::Config(_)
        | ExtractError::Cancelled
        | ExtractError::FileOperation { .. }
        | ExtractError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match self {
            Self::Extract(e) => (status_for(&e), e.kind(), e.to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BadRequest", msg),
            Self::Multipart(e) => (e.status(), "BadRequest", e.body_text()),
            Self::Timeout(limit) => (
                StatusCode::GATEWAY_TIMEOUT,
                "Timeout",
                format!("request exceeded {}s", limit.as_secs()),
            ),
        };

        if status.is_server_error() {
            warn!(status = status.as_u16(), kind, detail = %detail, "Request failed");
        } else {
            info!(status = status.as_u16(), kind, detail = %detail, "Request rejected");
        }
        (status, Json(json!({ "error": kind, "detail": detail }))).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Fields of the `/extract` multipart form.
#[derive(Debug, Default)]
struct ExtractForm {
    file: Option<Upload>,
    doc_type: Option<String>,
    model: Option<String>,
    ocr_model: Option<String>,
    max_pages: Option<usize>,
    ocr_all: Option<bool>,
    chunk_pages: Option<usize>,
    second_pass: Option<bool>,
    raw_document: Option<bool>,
}

#[derive(Debug)]
struct Upload {
    file_name: String,
    content_type: Option<String>,
    bytes: Bytes,
}

impl ExtractForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("upload")
                    .to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                form.file = Some(Upload {
                    file_name,
                    content_type,
                    bytes,
                });
                continue;
            }

            let text = field.text().await?;
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match name.as_str() {
                "doc_type" => form.doc_type = Some(text.to_string()),
                "model" => form.model = Some(text.to_string()),
                "ocr_model" => form.ocr_model = Some(text.to_string()),
                "max_pages" => form.max_pages = Some(parse_count(&name, text)?),
                "chunk_pages" => form.chunk_pages = Some(parse_count(&name, text)?),
                "ocr_all" => form.ocr_all = Some(parse_flag(&name, text)?),
                "second_pass" => form.second_pass = Some(parse_flag(&name, text)?),
                "raw_document" => form.raw_document = Some(parse_flag(&name, text)?),
                other => warn!(field = other, "Ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    fn apply(&self, options: &mut ExtractionOptions) {
        if let Some(v) = self.max_pages {
            options.max_pages = v;
        }
        if let Some(v) = self.chunk_pages {
            options.chunk_pages = Some(v);
        }
        if let Some(v) = self.ocr_all {
            options.ocr_all = v;
        }
        if let Some(v) = self.second_pass {
            options.second_pass = v;
        }
        if let Some(v) = self.raw_document {
            options.raw_document = v;
        }
    }
}

fn parse_count(name: &str, text: &str) -> Result<usize, ApiError> {
    match text.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ApiError::BadRequest(format!(
            "'{name}' must be a positive integer, got '{text}'"
        ))),
    }
}

fn parse_flag(name: &str, text: &str) -> Result<bool, ApiError> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ApiError::BadRequest(format!(
            "'{name}' must be a boolean, got '{text}'"
        ))),
    }
}

/// POST /extract - Extract the template fields of an uploaded document.
async fn extract(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = ExtractForm::read(multipart).await?;
    let Some(upload) = &form.file else {
        return Err(ApiError::BadRequest("missing 'file' field".to_string()));
    };
    if upload.bytes.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "uploaded file '{}' is empty",
            upload.file_name
        )));
    }

    let document = Document::from_bytes(
        upload.file_name.clone(),
        upload.bytes.to_vec(),
        upload.content_type.as_deref(),
    )?;

    let mut options = ExtractionOptions::from_config(&state.config);
    form.apply(&mut options);

    let request = ExtractionRequest {
        doc_type: form
            .doc_type
            .clone()
            .unwrap_or_else(|| DEFAULT_DOC_TYPE.to_string()),
        document,
        model: form
            .model
            .clone()
            .unwrap_or_else(|| state.config.mistral.model.clone()),
        ocr_model: form.ocr_model.clone(),
        options,
    };

    let request_id = Uuid::new_v4();
    info!(
        name: "extract.received",
        %request_id,
        file = %request.document.file_name,
        mime = %request.document.mime_type,
        bytes = request.document.bytes.len(),
        doc_type = %request.doc_type,
        model = %request.model,
        "Extraction requested"
    );

    let outcome = state
        .orchestrator
        .extract(request)
        .instrument(info_span!("extract", %request_id))
        .await?;
    Ok(Json(outcome.result))
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /templates - Document types with a template on disk.
async fn templates(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let doc_types = state.orchestrator.templates().available().await?;
    Ok(Json(json!({ "doc_types": doc_types })))
}
