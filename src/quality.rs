use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::record::{BitrateSpec, RunSettings};
use crate::util::round2;

const VMAF_PATTERN: &str = r#"aggregateVMAF="([0-9.]*)"#;
const SSIM_PATTERN: &str = r"SSIM Y:([0-9.]*)";
const PSNR_PATTERN: &str = r"average:([0-9.]*)";

/// Scores extracted from the media tool's log files. A metric whose log is
/// missing or never matches is reported as -1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityScores {
    pub vmaf: i64,
    pub ssim: f64,
    pub psnr: f64,
}

/// One summary row per run document, in output column order.
#[derive(Clone, Debug, Serialize)]
pub struct QualityRecord {
    pub media: String,
    pub codec: String,
    pub gop: i64,
    pub fps: i64,
    pub width: i64,
    pub height: i64,
    pub bitrate: String,
    pub real_bitrate: String,
    pub size: u64,
    pub vmaf: i64,
    pub ssim: f64,
    pub psnr: f64,
    pub file: String,
}

#[derive(Debug, Deserialize)]
struct QualityRun {
    encodedfile: String,
    settings: RunSettings,
}

/// Extracts VMAF, SSIM and PSNR from the given log files. Each score comes
/// from the first line whose capture parses as a number.
#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
pub fn parse_quality(
    vmaf_log: &Path,
    ssim_log: &Path,
    psnr_log: &Path,
) -> anyhow::Result<QualityScores> {
    let vmaf_regex = Regex::new(VMAF_PATTERN).context("Unable to compile the VMAF pattern")?;
    let ssim_regex = Regex::new(SSIM_PATTERN).context("Unable to compile the SSIM pattern")?;
    let psnr_regex = Regex::new(PSNR_PATTERN).context("Unable to compile the PSNR pattern")?;

    Ok(QualityScores {
        vmaf: extract_first(vmaf_log, &vmaf_regex).map_or(-1, |value| value.round() as i64),
        ssim: extract_first(ssim_log, &ssim_regex).map_or(-1.0, round2),
        psnr: extract_first(psnr_log, &psnr_regex).map_or(-1.0, round2),
    })
}

/// Builds the quality summary row for one run document, locating the
/// encoded output and its metric logs next to the document itself.
pub fn quality_record(test_path: &Path) -> anyhow::Result<QualityRecord> {
    let file = File::open(test_path)
        .with_context(|| format!("Unable to open run document {test_path:?}"))?;
    let run: QualityRun = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Unable to parse run document {test_path:?}"))?;

    let directory = test_path.parent().unwrap_or_else(|| Path::new(""));
    let encoded = directory.join(&run.encodedfile);

    let scores = parse_quality(
        &metric_log(&encoded, "vmaf"),
        &metric_log(&encoded, "ssim"),
        &metric_log(&encoded, "psnr"),
    )?;

    let size = std::fs::metadata(&encoded)
        .with_context(|| format!("Unable to stat encoded file {encoded:?}"))?
        .len();

    Ok(QualityRecord {
        media: encoded.display().to_string(),
        codec: run.settings.codec,
        gop: run.settings.gop,
        fps: run.settings.fps,
        width: run.settings.width,
        height: run.settings.height,
        bitrate: run.settings.bitrate.to_string(),
        real_bitrate: run
            .settings
            .meanbitrate
            .as_ref()
            .map_or_else(String::new, BitrateSpec::to_string),
        size,
        vmaf: scores.vmaf,
        ssim: scores.ssim,
        psnr: scores.psnr,
        file: test_path.display().to_string(),
    })
}

// Metric logs sit next to the encoded file, named by appending the metric
// to the full file name.
fn metric_log(encoded: &Path, metric: &str) -> PathBuf {
    PathBuf::from(format!("{}.{metric}", encoded.display()))
}

fn extract_first(path: &Path, regex: &Regex) -> Option<f64> {
    let Ok(file) = File::open(path) else {
        return None;
    };

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            break;
        };

        if let Some(value) = regex
            .captures(&line)
            .and_then(|captures| captures.get(1))
            .and_then(|group| group.as_str().parse::<f64>().ok())
        {
            return Some(value);
        }
    }

    None
}
