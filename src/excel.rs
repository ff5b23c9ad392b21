//! Spreadsheet rendering of a filled extraction result.
//!
//! One column per field and four rows: label, value, source page, source
//! excerpt. Columns alternate between a light green and a white fill.

use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::template::{META_SECTION, Template};

const FILL_ODD: u32 = 0x00E2_EFDA;
const FILL_EVEN: u32 = 0x00FF_FFFF;
const MAX_COLUMN_WIDTH: usize = 80;
const ROW_HEIGHTS: [f64; 4] = [30.0, 30.0, 22.0, 60.0];

/// A cell value before styling.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn width(&self) -> usize {
        match self {
            Self::Text(s) => s.chars().count(),
            Self::Number(n) => n.to_string().len(),
            Self::Empty => 0,
        }
    }
}

/// One spreadsheet column.
#[derive(Debug, Clone, PartialEq)]
struct Column {
    label: String,
    value: Cell,
    page: Cell,
    excerpt: Cell,
}

/// Render a JSON document given as text.
///
/// # Errors
///
/// [`ExtractError::Render`] when the text is not JSON, is not an object or
/// holds no field.
pub fn render_str(json: &str, template: Option<&Template>) -> Result<Vec<u8>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ExtractError::Render(format!("input is not valid JSON: {e}")))?;
    render(&value, template)
}

/// Render a filled result. Column order follows `template` when given,
/// otherwise the document order of leaves carrying a `value`.
pub fn render(result: &Value, template: Option<&Template>) -> Result<Vec<u8>> {
    let Value::Object(root) = result else {
        return Err(ExtractError::Render("input is not a JSON object".to_string()));
    };

    let columns: Vec<Column> = match template {
        Some(template) => {
            if !template.fields().any(|spec| find(root, &spec.path).is_some()) {
                return Err(ExtractError::Render(format!(
                    "no {} field found in the input",
                    template.doc_type()
                )));
            }
            template
                .fields()
                .map(|spec| {
                    let label = if spec.label == spec.path {
                        humanize(&spec.path)
                    } else {
                        spec.label.clone()
                    };
                    column(root, &spec.path, label)
                })
                .collect()
        }
        None => {
            let mut paths = Vec::new();
            value_paths(root, "", &mut paths);
            paths
                .into_iter()
                .map(|path| {
                    let label = humanize(&path);
                    column(root, &path, label)
                })
                .collect()
        }
    };

    if columns.is_empty() {
        return Err(ExtractError::Render("no field to render".to_string()));
    }
    if columns.len() > usize::from(u16::MAX) {
        return Err(ExtractError::Render(format!(
            "{} fields exceed the column limit",
            columns.len()
        )));
    }

    let bytes = write_workbook(&columns).map_err(|e| ExtractError::Render(e.to_string()))?;
    debug!(columns = columns.len(), bytes = bytes.len(), "Workbook rendered");
    Ok(bytes)
}

fn write_workbook(columns: &[Column]) -> std::result::Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    let base = Format::new()
        .set_text_wrap()
        .set_align(FormatAlign::Top)
        .set_border(FormatBorder::Thin)
        .set_border_color(Color::Black);
    let odd = base.clone().set_background_color(Color::RGB(FILL_ODD));
    let even = base.set_background_color(Color::RGB(FILL_EVEN));

    for (idx, column) in columns.iter().enumerate() {
        let col = u16::try_from(idx).unwrap_or(u16::MAX);
        // Spreadsheet columns are 1-based: the first one is "odd".
        let format = if idx % 2 == 0 { &odd } else { &even };

        let label = Cell::Text(column.label.clone());
        let cells = [&label, &column.value, &column.page, &column.excerpt];
        for (row, cell) in (0u32..).zip(cells) {
            write_cell(sheet, row, col, cell, format)?;
        }

        let widest = cells.iter().map(|c| c.width()).max().unwrap_or(0);
        let width = (widest + 4).min(MAX_COLUMN_WIDTH);
        sheet.set_column_width(col, u32::try_from(width).unwrap_or(80))?;
    }

    for (row, height) in (0u32..).zip(ROW_HEIGHTS) {
        sheet.set_row_height(row, height)?;
    }

    workbook.save_to_buffer()
}

fn write_cell(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &Cell,
    format: &Format,
) -> std::result::Result<(), XlsxError> {
    match cell {
        Cell::Text(text) => sheet.write_string_with_format(row, col, text, format)?,
        Cell::Number(n) => sheet.write_number_with_format(row, col, *n, format)?,
        Cell::Empty => sheet.write_blank(row, col, format)?,
    };
    Ok(())
}

fn column(root: &Map<String, Value>, path: &str, label: String) -> Column {
    let (value, page, excerpt) = lookup(root, path);
    Column {
        label,
        value: to_cell(value),
        page: to_cell(page),
        excerpt: to_cell(excerpt),
    }
}

/// `(value, source.page, source.excerpt)` of the field at `path`.
fn lookup<'a>(
    root: &'a Map<String, Value>,
    path: &str,
) -> (Option<&'a Value>, Option<&'a Value>, Option<&'a Value>) {
    match find(root, path) {
        Some(Value::Object(leaf)) => {
            let source = leaf.get("source").filter(|s| s.is_object());
            (
                leaf.get("value"),
                source.and_then(|s| s.get("page")),
                source.and_then(|s| s.get("excerpt")),
            )
        }
        other => (other, None, None),
    }
}

fn find<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut cursor = root.get(parts.next()?);
    for part in parts {
        cursor = cursor?.get(part);
    }
    cursor
}

fn value_paths(obj: &Map<String, Value>, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if path == META_SECTION || path.starts_with("meta.") {
            continue;
        }
        if let Value::Object(inner) = value {
            if inner.contains_key("value") {
                out.push(path);
            } else {
                value_paths(inner, &path, out);
            }
        }
    }
}

/// `syndic.date_fin_mandat` → `date fin mandat`.
fn humanize(path: &str) -> String {
    path.rsplit('.').next().unwrap_or(path).replace('_', " ")
}

fn to_cell(value: Option<&Value>) -> Cell {
    match value {
        None | Some(Value::Null) => Cell::Empty,
        Some(Value::Number(n)) => n.as_f64().map_or_else(|| Cell::Text(n.to_string()), Cell::Number),
        Some(other) => Cell::Text(display(other)),
    }
}

/// Flat text of a value: `Oui`/`Non`, lists joined by `, `, objects as `k: v`.
fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "Oui".to_string(),
        Value::Bool(false) => "Non".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(", "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", display(v)))
            .collect::<Vec<_>>()
            .join(", "),
    }
}
