//! Field templates, one JSON file per document type.
//!
//! A template is a JSON object whose leaves are objects carrying an
//! `expected_type` key. Nesting yields dot paths (`syndic.contact`); the
//! top-level `meta` section holds document metadata and is never extracted.
//!
//! ```json
//! {
//!   "meta": { "file_name": { "expected_type": "string" } },
//!   "immeuble": {
//!     "adresse": { "expected_type": "string", "label": "Adresse de l'immeuble" }
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ExtractError, Result};

/// Section of the template that is filled from document metadata.
pub const META_SECTION: &str = "meta";

/// Metadata of one extractable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    /// Dot path inside the template, e.g. `syndic.contact`.
    pub path: String,
    /// Human label; the path when the template gives none.
    pub label: String,
    pub expected_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A loaded template. Immutable once built.
#[derive(Debug, Clone)]
pub struct Template {
    doc_type: String,
    skeleton: Map<String, Value>,
    fields: IndexMap<String, FieldSpec>,
}

impl Template {
    /// Build a template from parsed JSON. `origin` is only used in errors.
    pub fn from_value(doc_type: impl Into<String>, value: Value, origin: &Path) -> Result<Self> {
        let Value::Object(skeleton) = value else {
            return Err(ExtractError::InvalidTemplate {
                path: origin.to_path_buf(),
                reason: "top level is not a JSON object".to_string(),
            });
        };

        let mut fields = IndexMap::new();
        collect_fields(&skeleton, "", &mut fields);
        if fields.is_empty() {
            return Err(ExtractError::InvalidTemplate {
                path: origin.to_path_buf(),
                reason: "no field declares an expected_type".to_string(),
            });
        }

        Ok(Self {
            doc_type: doc_type.into(),
            skeleton,
            fields,
        })
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Extractable fields in declared order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = &FieldSpec> {
        self.fields.values()
    }

    pub fn field(&self, path: &str) -> Option<&FieldSpec> {
        self.fields.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// The untouched template document.
    pub fn skeleton(&self) -> &Map<String, Value> {
        &self.skeleton
    }
}

fn collect_fields(obj: &Map<String, Value>, prefix: &str, out: &mut IndexMap<String, FieldSpec>) {
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if path == META_SECTION || path.starts_with("meta.") {
            continue;
        }
        let Value::Object(inner) = value else {
            continue;
        };

        if let Some(expected) = inner.get("expected_type") {
            let text = |k: &str| inner.get(k).and_then(Value::as_str).map(str::to_string);
            let spec = FieldSpec {
                label: text("label").unwrap_or_else(|| path.clone()),
                expected_type: expected.as_str().map_or_else(|| expected.to_string(), str::to_string),
                description: text("description"),
                path: path.clone(),
            };
            out.insert(path, spec);
        } else {
            collect_fields(inner, &path, out);
        }
    }
}

/// Whether `doc_type` can safely name a file in the templates directory.
fn is_valid_doc_type(doc_type: &str) -> bool {
    !doc_type.is_empty()
        && doc_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Read-only access to the templates directory.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load `<dir>/<doc_type>.json`.
    ///
    /// # Errors
    ///
    /// [`ExtractError::TemplateNotFound`] for unknown or malformed doc types,
    /// [`ExtractError::InvalidTemplate`] when the file cannot be used.
    pub async fn load(&self, doc_type: &str) -> Result<Template> {
        if !is_valid_doc_type(doc_type) {
            return Err(ExtractError::TemplateNotFound {
                doc_type: doc_type.to_string(),
            });
        }

        let path = self.dir.join(format!("{doc_type}.json"));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractError::TemplateNotFound {
                    doc_type: doc_type.to_string(),
                });
            }
            Err(e) => return Err(ExtractError::file(&path, e)),
        };

        let template = parse(doc_type, &raw, &path)?;
        debug!(
            doc_type,
            fields = template.field_count(),
            path = %path.display(),
            "Template loaded"
        );
        Ok(template)
    }

    /// Load an explicit template file; its stem becomes the doc type.
    pub async fn load_path(path: &Path) -> Result<Template> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ExtractError::file(path, e))?;
        let doc_type = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        parse(&doc_type, &raw, path)
    }

    /// Doc types with a template file, sorted.
    pub async fn available(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| ExtractError::file(&self.dir, e))?;

        let mut doc_types = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExtractError::file(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_doc_type(stem) {
                    doc_types.push(stem.to_string());
                }
            }
        }
        doc_types.sort();
        Ok(doc_types)
    }
}

fn parse(doc_type: &str, raw: &str, path: &Path) -> Result<Template> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ExtractError::InvalidTemplate {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Template::from_value(doc_type, value, path)
}
