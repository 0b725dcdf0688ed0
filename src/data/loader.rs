use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value as JsonValue;

use super::model::{Dataset, MetadataValue, Record};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load traces from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.json` – `[{ "x": [...], "y": [...], ...meta }, ...]` or a single object
/// * `.csv`  – columns `x` and `y`; either one trace per row with
///   semicolon-separated floats, or one point per row (a single trace)
pub fn load_file(path: &Path) -> Result<Dataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "json" => load_json(path),
        "csv" | "txt" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;

    log::info!(
        "Loaded {} trace(s) from {} ({} metadata column(s))",
        dataset.len(),
        path.display(),
        dataset.column_names.len()
    );
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON:
///
/// ```json
/// [
///   {
///     "x": [10.0, 10.01, ...],
///     "y": [0.002, 0.003, ...],
///     "sample": "PS-12k",
///     "injection": 2
///   },
///   ...
/// ]
/// ```
pub fn load_json(path: &Path) -> Result<Dataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    parse_json(&text)
}

pub fn parse_json(text: &str) -> Result<Dataset> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;

    let records = match &root {
        JsonValue::Array(items) => items.as_slice(),
        JsonValue::Object(_) => std::slice::from_ref(&root),
        _ => bail!("Expected a JSON array of records or a single record object"),
    };

    let mut out = Vec::with_capacity(records.len());

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let x = json_array_to_f64(obj.get("x"), i, "x")?;
        let y = json_array_to_f64(obj.get("y"), i, "y")?;

        if x.len() != y.len() {
            bail!("Row {i}: x has {} values but y has {}", x.len(), y.len());
        }

        let metadata = obj
            .iter()
            .filter(|(key, _)| *key != "x" && *key != "y")
            .map(|(key, val)| (key.clone(), json_to_metadata(val)))
            .collect();

        out.push(Record { x, y, metadata });
    }

    Ok(Dataset::from_records(out))
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, `x` and `y` required.
///
/// When any `x` cell holds semicolon-separated floats
/// (`"10.0;10.01;10.02"`) every row is its own trace and the remaining
/// columns are metadata. Otherwise each row is one point of a single trace.
pub fn load_csv(path: &Path) -> Result<Dataset> {
    let reader = csv::Reader::from_path(path).context("opening CSV")?;
    read_csv(reader)
}

fn read_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Dataset> {
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let x_idx = headers
        .iter()
        .position(|h| h == "x")
        .context("CSV missing 'x' column")?;
    let y_idx = headers
        .iter()
        .position(|h| h == "y")
        .context("CSV missing 'y' column")?;

    let rows = reader
        .records()
        .enumerate()
        .map(|(row_no, r)| r.with_context(|| format!("CSV row {row_no}")))
        .collect::<Result<Vec<_>>>()?;

    let packed = rows
        .iter()
        .any(|r| r.get(x_idx).is_some_and(|cell| cell.contains(';')));

    if packed {
        packed_rows(&headers, &rows, x_idx, y_idx)
    } else {
        point_rows(&rows, x_idx, y_idx)
    }
}

fn packed_rows(
    headers: &[String],
    rows: &[csv::StringRecord],
    x_idx: usize,
    y_idx: usize,
) -> Result<Dataset> {
    let mut out = Vec::with_capacity(rows.len());

    for (row_no, record) in rows.iter().enumerate() {
        let x = parse_semicolon_floats(record.get(x_idx).unwrap_or(""), row_no, "x")?;
        let y = parse_semicolon_floats(record.get(y_idx).unwrap_or(""), row_no, "y")?;

        if x.len() != y.len() {
            bail!(
                "CSV row {row_no}: x has {} values but y has {}",
                x.len(),
                y.len()
            );
        }

        let mut metadata = BTreeMap::new();
        for (col_idx, value) in record.iter().enumerate() {
            if col_idx == x_idx || col_idx == y_idx {
                continue;
            }
            if let Some(name) = headers.get(col_idx) {
                metadata.insert(name.clone(), guess_metadata_type(value.trim()));
            }
        }

        out.push(Record { x, y, metadata });
    }

    Ok(Dataset::from_records(out))
}

fn point_rows(rows: &[csv::StringRecord], x_idx: usize, y_idx: usize) -> Result<Dataset> {
    if rows.is_empty() {
        return Ok(Dataset::default());
    }
    let mut x = Vec::with_capacity(rows.len());
    let mut y = Vec::with_capacity(rows.len());
    for (row_no, record) in rows.iter().enumerate() {
        x.push(parse_float(record.get(x_idx).unwrap_or(""), row_no, "x")?);
        y.push(parse_float(record.get(y_idx).unwrap_or(""), row_no, "y")?);
    }
    Ok(Dataset::from_records(vec![Record {
        x,
        y,
        metadata: BTreeMap::new(),
    }]))
}

fn parse_float(tok: &str, row: usize, col: &str) -> Result<f64> {
    tok.trim()
        .parse::<f64>()
        .with_context(|| format!("Row {row}, {col}: '{tok}' is not a number"))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    if s == "true" || s == "false" {
        return MetadataValue::Bool(s == "true");
    }
    MetadataValue::String(s.to_string())
}
