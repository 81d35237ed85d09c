use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;
use csv::WriterBuilder;
use serde::Serialize;

use crate::quality::QualityRecord;
use crate::util::verify_filename;

/// Output file for one derived table, named after the input document so a
/// directory of runs keeps its tables side by side.
#[must_use]
pub fn table_path(input: &Path, table: &str) -> PathBuf {
    PathBuf::from(format!("{}_{table}.csv", input.display()))
}

/// Writes one derived table with a header row.
pub fn write_table<Row: Serialize>(path: &Path, rows: &[Row]) -> anyhow::Result<()> {
    verify_filename(path).with_context(|| format!("Unable to prepare output path {path:?}"))?;

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Unable to create {path:?}"))?;

    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Unable to write row to {path:?}"))?;
    }

    writer
        .flush()
        .with_context(|| format!("Unable to flush {path:?}"))?;

    Ok(())
}

/// Appends quality summary rows, optionally preceded by the column header.
/// Appending lets successive invocations grow one aggregate file.
pub fn append_quality_rows(
    path: &Path,
    rows: &[QualityRecord],
    header: bool,
) -> anyhow::Result<()> {
    verify_filename(path).with_context(|| format!("Unable to prepare output path {path:?}"))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Unable to open {path:?} for appending"))?;

    let mut writer = WriterBuilder::new().has_headers(header).from_writer(file);

    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Unable to write row to {path:?}"))?;
    }

    writer
        .flush()
        .with_context(|| format!("Unable to flush {path:?}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(vmaf: i64) -> QualityRecord {
        QualityRecord {
            media: "out.mp4".to_owned(),
            codec: "video/hevc".to_owned(),
            gop: 10,
            fps: 30,
            width: 1280,
            height: 720,
            bitrate: "2000k".to_owned(),
            real_bitrate: "1905177".to_owned(),
            size: 2048,
            vmaf,
            ssim: 0.97,
            psnr: 34.5,
            file: "run.json".to_owned(),
        }
    }

    #[test]
    fn table_paths_append_the_table_name() {
        let path = table_path(Path::new("device/run.json"), "encoding_data");
        assert_eq!(path, Path::new("device/run.json_encoding_data.csv"));
    }

    #[test]
    fn tables_are_written_with_headers() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("rows.csv");

        write_table(&path, &[record(87), record(91)]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "media,codec,gop,fps,width,height,bitrate,real_bitrate,size,vmaf,ssim,psnr,file"
        );
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn quality_rows_accumulate_across_invocations() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("quality.csv");

        append_quality_rows(&path, &[record(87)], true).unwrap();
        append_quality_rows(&path, &[record(91)], false).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.starts_with("media,codec"));
        assert!(content.lines().last().unwrap().contains(",91,"));
    }
}
