use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;

use chromapeak::data::{self, MetadataValue, Record};
use chromapeak::{AnalysisConfig, Analyzer, PeakReport};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "chromapeak")]
#[command(about = "Peak picking, boundary detection and peak statistics for 1-D traces")]
#[command(version)]
struct Cli {
    /// Trace file (.json records or .csv)
    input: PathBuf,

    /// Analysis configuration (JSON). Defaults apply when omitted.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Write results here instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Output layout
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Json)]
    format: Format,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// One object per record with nested peak reports
    Json,
    /// One row per peak with flat statistics
    Csv,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Serialize)]
struct RecordResult<'a> {
    index: usize,
    label: String,
    metadata: &'a BTreeMap<String, MetadataValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    peaks: Vec<PeakReport>,
}

fn analyze_record<'a>(analyzer: &Analyzer, index: usize, record: &'a Record) -> RecordResult<'a> {
    let label = record.label(index);
    let outcome = analyzer
        .signal(index, record.x.clone(), record.y.clone())
        .map(|signal| signal.with_name(label.clone()))
        .and_then(|mut signal| analyzer.analyze(&mut signal));

    let (peaks, error) = match outcome {
        Ok(peaks) => {
            log::debug!("{label}: {} peak(s)", peaks.len());
            (peaks, None)
        }
        Err(e) => {
            log::error!("{label}: {e}");
            (Vec::new(), Some(e.to_string()))
        }
    };
    RecordResult {
        index,
        label,
        metadata: &record.metadata,
        error,
        peaks,
    }
}

fn write_csv<W: Write>(out: W, results: &[RecordResult<'_>]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let mut header_written = false;
    for result in results {
        for report in &result.peaks {
            let entries = report.stats.entries();
            if !header_written {
                let mut header = vec!["record", "label", "peak", "low_bound_index", "high_bound_index", "max_index"];
                header.extend(entries.iter().map(|(k, _)| *k));
                writer.write_record(&header).context("writing CSV header")?;
                header_written = true;
            }
            let mut row = vec![
                result.index.to_string(),
                result.label.clone(),
                report.id.to_string(),
                report.low_bound_index.to_string(),
                report.high_bound_index.to_string(),
                report.max_index.to_string(),
            ];
            row.extend(entries.iter().map(|(_, v)| v.to_string()));
            writer.write_record(&row).context("writing CSV row")?;
        }
    }
    writer.flush().context("flushing CSV output")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            AnalysisConfig::from_json_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => AnalysisConfig::default(),
    };
    let analyzer = config.build().context("building analysis")?;

    let dataset = data::load_file(&cli.input)?;
    if dataset.is_empty() {
        log::warn!("{} holds no traces", cli.input.display());
    }

    let results: Vec<RecordResult<'_>> = dataset
        .records
        .par_iter()
        .enumerate()
        .map(|(i, record)| analyze_record(&analyzer, i, record))
        .collect();

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    let peaks: usize = results.iter().map(|r| r.peaks.len()).sum();
    log::info!(
        "Analyzed {} trace(s): {peaks} peak(s), {failed} failure(s)",
        results.len()
    );

    let out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };

    match cli.format {
        Format::Json => {
            let mut out = out;
            serde_json::to_writer_pretty(&mut out, &results).context("writing JSON output")?;
            writeln!(out).context("writing JSON output")?;
        }
        Format::Csv => write_csv(out, &results)?,
    }
    Ok(())
}
