/// Ingestion layer: trace files into records the analysis can consume.
///
/// Architecture:
/// ```text
///  .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Dataset  │  Vec<Record { x, y, metadata }>
///   └──────────┘
///        │
///        ▼
///   Analyzer::signal(id, x, y)
/// ```

pub mod loader;
pub mod model;

pub use loader::load_file;
pub use model::{Dataset, MetadataValue, Record};
