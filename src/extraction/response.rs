//! Validation of raw model output against a template.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::template::Template;

/// Placeholder the model returns, and the fill uses, for absent fields.
pub const NOT_FOUND: &str = "not found";

/// One field as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedField {
    pub value: Value,
    pub page: Option<u32>,
    pub excerpt: String,
}

impl ExtractedField {
    fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::Object(obj) if obj.contains_key("value") => Self {
                value: obj.get("value").cloned().unwrap_or(Value::Null),
                page: obj.get("page").and_then(page_number),
                excerpt: match obj.get("excerpt") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
            },
            bare => Self {
                value: bare.clone(),
                page: None,
                excerpt: String::new(),
            },
        }
    }

    pub fn is_found(&self) -> bool {
        is_found(&self.value)
    }
}

fn page_number(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether `value` carries information: not null, not `"not found"`, not an
/// empty string or list, and not an object whose entries are all empty.
pub fn is_found(value: &Value) -> bool {
    fn blank(s: &str) -> bool {
        let s = s.trim();
        s.is_empty() || s.eq_ignore_ascii_case(NOT_FOUND)
    }

    match value {
        Value::Null => false,
        Value::String(s) => !blank(s),
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => obj.values().any(|v| match v {
            Value::String(s) => !blank(s),
            Value::Null => false,
            other => !blank(&other.to_string()),
        }),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Fields recognized in one provider answer, in answer order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Extraction {
    fields: IndexMap<String, ExtractedField>,
}

impl Extraction {
    pub fn get(&self, path: &str) -> Option<&ExtractedField> {
        self.fields.get(path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn insert(&mut self, path: impl Into<String>, field: ExtractedField) {
        self.fields.insert(path.into(), field);
    }

    pub fn is_found(&self, path: &str) -> bool {
        self.fields.get(path).is_some_and(ExtractedField::is_found)
    }

    /// Fold `update` in: found values replace whatever is there, missing
    /// ones only fill keys not seen yet.
    pub fn merge(&mut self, update: Self) {
        for (path, field) in update.fields {
            if field.is_found() || !self.fields.contains_key(&path) {
                self.fields.insert(path, field);
            }
        }
    }
}

/// Parse model output as JSON, falling back to the outermost `{...}` when
/// the object is wrapped in prose or code fences.
pub fn parse_json_content(content: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(content.trim()) {
        return Some(value);
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

/// Validate raw model output: it must be a JSON object with at least one key
/// naming a template field. Unknown keys are dropped.
///
/// # Errors
///
/// [`ExtractError::InvalidResponseFormat`]; never worth a retry.
pub fn validate(raw: &str, template: &Template) -> Result<Extraction> {
    let value = parse_json_content(raw).ok_or_else(|| {
        ExtractError::InvalidResponseFormat(format!(
            "response is not JSON: {}",
            preview(raw)
        ))
    })?;
    let Value::Object(obj) = value else {
        return Err(ExtractError::InvalidResponseFormat(
            "response is not a JSON object".to_string(),
        ));
    };

    let mut extraction = Extraction::default();
    let mut unknown = Vec::new();
    collect(&obj, "", template, &mut extraction, &mut unknown);

    if !unknown.is_empty() {
        warn!(
            doc_type = template.doc_type(),
            unknown = ?unknown,
            "Dropping keys that are not template fields"
        );
    }
    if extraction.is_empty() {
        return Err(ExtractError::InvalidResponseFormat(format!(
            "no {} template field in response",
            template.doc_type()
        )));
    }

    debug!(
        recognized = extraction.len(),
        dropped = unknown.len(),
        "Response validated"
    );
    Ok(extraction)
}

/// Accept dot-path keys, and nested objects whose path leads to fields.
fn collect(
    obj: &Map<String, Value>,
    prefix: &str,
    template: &Template,
    out: &mut Extraction,
    unknown: &mut Vec<String>,
) {
    for (key, payload) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if template.contains(&path) {
            out.insert(path, ExtractedField::from_payload(payload));
            continue;
        }

        let section = format!("{path}.");
        match payload {
            Value::Object(inner) if template.fields().any(|f| f.path.starts_with(&section)) => {
                collect(inner, &path, template, out, unknown);
            }
            _ => unknown.push(path),
        }
    }
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(120) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
