#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use realty_extract::extraction::{OcrDefaults, Orchestrator};
use realty_extract::llm::{ProviderClient, ProviderKind, ProviderPayload, Providers, RawResponse};
use realty_extract::ocr::OcrCache;
use realty_extract::template::TemplateStore;
use realty_extract::Result;
use serde_json::{Map, Value, json};

pub fn templates_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
}

/// Answers every field listed in the prompt: known ones from `answers`,
/// the rest with `"not found"`.
#[derive(Debug, Default)]
pub struct FieldEchoProvider {
    answers: HashMap<String, Value>,
    pub calls: AtomicUsize,
    pub models: Mutex<Vec<String>>,
}

impl FieldEchoProvider {
    pub fn new(answers: &[(&str, Value)]) -> Arc<Self> {
        Arc::new(Self {
            answers: answers
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for FieldEchoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    async fn send(&self, payload: &ProviderPayload, model: &str) -> Result<RawResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().unwrap().push(model.to_string());

        let mut out = Map::new();
        for line in payload.user.lines() {
            let Some(rest) = line.strip_prefix("- ") else {
                continue;
            };
            let Some((path, _)) = rest.split_once(" | ") else {
                continue;
            };
            let answer = match self.answers.get(path) {
                Some(value) => json!({ "value": value, "page": 1, "excerpt": value.to_string() }),
                None => json!({ "value": "not found", "page": null, "excerpt": "" }),
            };
            out.insert(path.to_string(), answer);
        }

        Ok(RawResponse {
            provider: ProviderKind::Mistral,
            model: model.to_string(),
            text: Value::Object(out).to_string(),
        })
    }
}

pub fn orchestrator(provider: Arc<FieldEchoProvider>) -> Orchestrator {
    let providers = Providers {
        mistral: Some(provider as Arc<dyn ProviderClient>),
        ..Providers::default()
    };
    Orchestrator::new(
        TemplateStore::new(templates_dir()),
        providers,
        OcrCache::new(),
        OcrDefaults {
            mistral: "pixtral-large-latest".into(),
            gemini: None,
        },
    )
}

/// Dot paths of every leaf carrying a `value`, outside `meta`.
pub fn value_paths(value: &Value) -> Vec<String> {
    fn walk(obj: &Map<String, Value>, prefix: &str, out: &mut Vec<String>) {
        for (key, value) in obj {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if path == "meta" {
                continue;
            }
            if let Value::Object(inner) = value {
                if inner.contains_key("value") {
                    out.push(path);
                } else {
                    walk(inner, &path, out);
                }
            }
        }
    }

    let mut out = Vec::new();
    if let Value::Object(obj) = value {
        walk(obj, "", &mut out);
    }
    out
}
