//! Writing an extraction back into the template skeleton.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use super::response::{Extraction, NOT_FOUND};
use crate::template::Template;

/// Document metadata recorded under `meta`.
#[derive(Debug, Clone)]
pub struct ResultMeta {
    pub file_name: String,
    pub file_type: String,
    pub doc_type: String,
    pub model: String,
}

/// The template with every declared field set to
/// `{"value", "source": {"page", "excerpt"}}`; absent fields read `"not found"`.
pub fn fill_template(template: &Template, extraction: &Extraction, meta: &ResultMeta) -> Value {
    let mut root = Value::Object(template.skeleton().clone());

    let extracted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    for (key, value) in [
        ("file_name", meta.file_name.as_str()),
        ("file_type", meta.file_type.as_str()),
        ("doc_type", meta.doc_type.as_str()),
        ("model", meta.model.as_str()),
        ("extracted_at", extracted_at.as_str()),
    ] {
        set_path(&mut root, &format!("meta.{key}"), json!(value), None, "");
    }

    for field in template.fields() {
        match extraction.get(&field.path) {
            Some(found) => set_path(
                &mut root,
                &field.path,
                found.value.clone(),
                found.page,
                &found.excerpt,
            ),
            None => set_path(&mut root, &field.path, json!(NOT_FOUND), None, ""),
        }
    }
    root
}

/// Set the leaf at dot `path`, creating intermediate objects. An existing
/// leaf object keeps its other keys (`expected_type`, `label`, ...).
pub fn set_path(root: &mut Value, path: &str, value: Value, page: Option<u32>, excerpt: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut cursor = root;
    for part in parts {
        let Some(map) = ensure_object(cursor) else {
            return;
        };
        cursor = map
            .entry(part)
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let source = json!({ "page": page, "excerpt": excerpt });
    let Some(parent) = ensure_object(cursor) else {
        return;
    };
    match parent.get_mut(last) {
        Some(Value::Object(leaf)) => {
            leaf.insert("value".to_string(), value);
            match leaf.get_mut("source") {
                Some(Value::Object(src)) => {
                    src.insert("page".to_string(), json!(page));
                    src.insert("excerpt".to_string(), json!(excerpt));
                }
                _ => {
                    leaf.insert("source".to_string(), source);
                }
            }
        }
        _ => {
            parent.insert(
                last.to_string(),
                json!({ "value": value, "source": source }),
            );
        }
    }
}

/// Replace a non-object `value` with `{}` and hand out its map.
fn ensure_object(value: &mut Value) -> Option<&mut Map<String, Value>> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::response::validate;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn template() -> Template {
        Template::from_value(
            "ct",
            json!({
                "meta": { "file_name": { "expected_type": "string", "value": null } },
                "ascenseur": {
                    "numero_serie": { "expected_type": "string", "label": "N° de série", "value": null,
                                      "source": { "page": null, "excerpt": "", "note": "keep" } },
                    "date_controle": { "expected_type": "date" }
                }
            }),
            Path::new("ct.json"),
        )
        .unwrap()
    }

    fn meta() -> ResultMeta {
        ResultMeta {
            file_name: "ct.pdf".into(),
            file_type: "pdf".into(),
            doc_type: "ct".into(),
            model: "mistral-large-latest".into(),
        }
    }

    #[test]
    fn test_fill_found_and_missing() {
        let t = template();
        let extraction = validate(
            r#"{"ascenseur.numero_serie": {"value": "AS-1234", "page": 2, "excerpt": "N° AS-1234"}}"#,
            &t,
        )
        .unwrap();
        let filled = fill_template(&t, &extraction, &meta());

        let serie = &filled["ascenseur"]["numero_serie"];
        assert_eq!(serie["value"], json!("AS-1234"));
        assert_eq!(serie["expected_type"], json!("string"));
        assert_eq!(serie["label"], json!("N° de série"));
        assert_eq!(
            serie["source"],
            json!({"page": 2, "excerpt": "N° AS-1234", "note": "keep"})
        );

        let date = &filled["ascenseur"]["date_controle"];
        assert_eq!(date["value"], json!("not found"));
        assert_eq!(date["source"], json!({"page": null, "excerpt": ""}));
    }

    #[test]
    fn test_fill_meta() {
        let t = template();
        let filled = fill_template(&t, &Extraction::default(), &meta());
        assert_eq!(filled["meta"]["file_name"]["value"], json!("ct.pdf"));
        assert_eq!(filled["meta"]["file_name"]["expected_type"], json!("string"));
        assert_eq!(filled["meta"]["doc_type"]["value"], json!("ct"));
        assert_eq!(filled["meta"]["model"]["value"], json!("mistral-large-latest"));
        assert!(filled["meta"]["extracted_at"]["value"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_set_path_replaces_scalars() {
        let mut root = json!({"a": 5});
        set_path(&mut root, "a.b", json!(true), Some(1), "x");
        assert_eq!(
            root,
            json!({"a": {"b": {"value": true, "source": {"page": 1, "excerpt": "x"}}}})
        );

        let mut root = Value::Null;
        set_path(&mut root, "x", json!("y"), None, "");
        assert_eq!(root, json!({"x": {"value": "y", "source": {"page": null, "excerpt": ""}}}));
    }
}
