use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// MetadataValue – a single non-trace column of a record
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value carried alongside a trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Record – one acquired trace
// ---------------------------------------------------------------------------

/// One trace as read from disk.
#[derive(Debug, Clone)]
pub struct Record {
    /// Coordinate axis (time, volume, wavenumber).
    pub x: Vec<f64>,
    /// Detector response, same length as `x`.
    pub y: Vec<f64>,
    /// Every other column: column_name → value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Record {
    /// Display name: the `name` or `sample` column when present.
    pub fn label(&self, index: usize) -> String {
        ["name", "sample"]
            .iter()
            .find_map(|key| match self.metadata.get(*key) {
                Some(MetadataValue::Null) | None => None,
                Some(v) => Some(v.to_string()),
            })
            .unwrap_or_else(|| format!("signal_{index}"))
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete loaded file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub records: Vec<Record>,
    /// Sorted metadata column names (excludes x, y).
    pub column_names: Vec<String>,
}

impl Dataset {
    pub fn from_records(records: Vec<Record>) -> Self {
        let column_names: BTreeSet<String> = records
            .iter()
            .flat_map(|r| r.metadata.keys().cloned())
            .collect();
        Dataset {
            records,
            column_names: column_names.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
