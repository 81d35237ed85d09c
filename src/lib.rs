use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use indicatif::ProgressBar;
use prettytable::{row, Table};
use serde_json::Value;
use tracing::{info, warn};

pub mod config;
pub mod quality;
pub mod record;
pub mod report;
pub mod stats;
pub mod util;

use crate::config::{Command, Config};

/// Per-document outcome shown in the closing summary table.
#[derive(Clone, Debug, Default)]
struct RunSummary {
    source: String,
    encoded_rows: usize,
    decoded_rows: usize,
    gpu_rows: usize,
    average_bitrate: f64,
}

pub fn run(config: &Config) -> anyhow::Result<()> {
    match &config.command {
        Command::Stats { files } => run_stats(files),
        Command::Quality {
            tests,
            output,
            header,
        } => run_quality(tests, output, *header),
    }
}

#[allow(clippy::as_conversions)]
fn run_stats(files: &[PathBuf]) -> anyhow::Result<()> {
    let progress_bar = ProgressBar::new(files.len() as u64);

    progress_bar.set_style(
        util::create_progress_style(
            "{spinner:.green} [{elapsed_precise}] Reshaping telemetry...     [{wide_bar:.cyan/blue}] {percent:>3}% {human_pos:>8}/{human_len:>8} ({smooth_per_sec:>6} docs/s, ETA: {smooth_eta:>3})"
        ).context("Unable to create progress bar style")?
    );

    let mut summaries = Vec::with_capacity(files.len());

    for file in files {
        match process_run_document(file) {
            Ok(summary) => summaries.push(summary),
            Err(error) => warn!("Skipping {file:?}: {error:#}"),
        }

        progress_bar.inc(1);
    }

    progress_bar.finish();
    print_summary(&summaries);

    Ok(())
}

// The three sections are parsed and written independently so one malformed
// section never costs the others their tables.
fn process_run_document(file: &Path) -> anyhow::Result<RunSummary> {
    let reader =
        BufReader::new(File::open(file).with_context(|| format!("Unable to open {file:?}"))?);
    let document: Value = serde_json::from_reader(reader)
        .with_context(|| format!("Unable to parse {file:?} as JSON"))?;

    let source = file.display().to_string();
    let mut summary = RunSummary {
        source: source.clone(),
        ..RunSummary::default()
    };

    match encode_section(file, &document, &source) {
        Ok((rows, average_bitrate)) => {
            summary.encoded_rows = rows;
            summary.average_bitrate = average_bitrate;
        }
        Err(error) => warn!("No encoding table for {source}: {error:#}"),
    }

    match decode_section(file, &document, &source) {
        Ok(rows) => summary.decoded_rows = rows,
        Err(error) => warn!("No decode table for {source}: {error:#}"),
    }

    match gpu_section(file, &document, &source) {
        Ok(rows) => summary.gpu_rows = rows,
        Err(error) => warn!("No GPU table for {source}: {error:#}"),
    }

    info!(
        "Processed {source}: {} encoded, {} decoded, {} GPU rows",
        summary.encoded_rows, summary.decoded_rows, summary.gpu_rows
    );

    Ok(summary)
}

fn encode_section(file: &Path, document: &Value, source: &str) -> anyhow::Result<(usize, f64)> {
    let report = stats::reshape_encoding(document, source)?;

    if report.frames.is_empty() {
        return Ok((0, 0.0));
    }

    report::write_table(&report::table_path(file, "encoding_data"), &report.frames)?;

    for record in &report.concurrency {
        if record.conc > 0 {
            warn!(
                "Run {} overlapped {} other run(s) on the device timeline",
                record.source, record.conc
            );
        }
    }

    let average_bitrate = report
        .frames
        .first()
        .map_or(0.0, |row| row.average_bitrate);

    Ok((report.frames.len(), average_bitrate))
}

fn decode_section(file: &Path, document: &Value, source: &str) -> anyhow::Result<usize> {
    let Some(rows) = stats::reshape_decoding(document, source)? else {
        return Ok(0);
    };

    report::write_table(&report::table_path(file, "decoded_data"), &rows)?;

    Ok(rows.len())
}

fn gpu_section(file: &Path, document: &Value, source: &str) -> anyhow::Result<usize> {
    let Some(rows) = stats::reshape_gpu(document, source)? else {
        return Ok(0);
    };

    report::write_table(&report::table_path(file, "gpu_data"), &rows)?;

    Ok(rows.len())
}

fn run_quality(tests: &[PathBuf], output: &Path, header: bool) -> anyhow::Result<()> {
    let mut rows = Vec::with_capacity(tests.len());

    for test in tests {
        match quality::quality_record(test) {
            Ok(record) => rows.push(record),
            Err(error) => warn!("Skipping {test:?}: {error:#}"),
        }
    }

    report::append_quality_rows(output, &rows, header)
        .with_context(|| format!("Unable to write quality summary {output:?}"))?;

    info!("Wrote {} quality row(s) to {output:?}", rows.len());

    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_summary(summaries: &[RunSummary]) {
    if summaries.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.add_row(row![
        "Source",
        "Encoded",
        "Decoded",
        "GPU",
        "Average Bitrate"
    ]);

    for summary in summaries {
        table.add_row(row![
            summary.source,
            summary.encoded_rows.to_string(),
            summary.decoded_rows.to_string(),
            summary.gpu_rows.to_string(),
            util::format_bitrate(summary.average_bitrate),
        ]);
    }

    table.printstd();
}
