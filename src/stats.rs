use anyhow::{anyhow, Context};
use serde::Serialize;
use serde_json::Value;

use crate::record::{DecodingRun, EncodingRun, GpuSection};
use crate::util::round2;

/// Sentinel emitted wherever a rate's millisecond denominator is exactly
/// zero, neutralized rows included.
pub const RATE_UNDEFINED: f64 = 0.0;

/// Decode logs carry no target frame rate, so their smoothing window is a
/// fixed row count instead.
const DECODE_RATE_WINDOW: usize = 30;

const MICROS_PER_MS: f64 = 1000.0;
const NANOS_PER_MS: f64 = 1_000_000.0;

/// One fully annotated encode event, in output column order.
#[derive(Clone, Debug, Serialize)]
pub struct EncodedFrameStats {
    pub frame: i64,
    pub iframe: i64,
    pub size: i64,
    pub pts: i64,
    pub starttime: i64,
    pub stoptime: i64,
    pub proctime: i64,
    pub source: String,
    pub codec: String,
    pub description: String,
    pub camera: bool,
    pub test: String,
    pub bitrate: i64,
    pub height: i64,
    pub fps: f64,
    pub duration_ms: f64,
    pub bitrate_per_frame_bps: f64,
    pub average_bitrate: f64,
    #[serde(rename = "stop-stop_ms")]
    pub stop_stop_ms: f64,
    pub proc_fps: f64,
    pub rel_start_ms: f64,
    pub rel_stop_ms: f64,
    pub start_pts_diff_ms: f64,
    pub av_fps: f64,
    pub av_proc_fps: f64,
    pub inflight: usize,
}

impl EncodedFrameStats {
    /// Zeroes every numeric column, raw fields and constants included. The
    /// textual identity columns keep their values so the row stays
    /// attributable to its run, and the row itself stays in place for
    /// consumers that index by position.
    fn neutralize(&mut self) {
        self.frame = 0;
        self.iframe = 0;
        self.size = 0;
        self.pts = 0;
        self.starttime = 0;
        self.stoptime = 0;
        self.proctime = 0;
        self.camera = false;
        self.bitrate = 0;
        self.height = 0;
        self.fps = 0.0;
        self.duration_ms = 0.0;
        self.bitrate_per_frame_bps = 0.0;
        self.average_bitrate = 0.0;
        self.stop_stop_ms = 0.0;
    }
}

/// One fully annotated decode event. `height` is textual because devices
/// that never report a media format get a fallback label instead.
#[derive(Clone, Debug, Serialize)]
pub struct DecodedFrameStats {
    pub frame: i64,
    pub iframe: i64,
    pub size: i64,
    pub pts: i64,
    pub starttime: i64,
    pub stoptime: i64,
    pub proctime: i64,
    pub source: String,
    pub codec: String,
    pub height: String,
    pub duration_ms: f64,
    pub fps: f64,
    #[serde(rename = "stop-stop_ms")]
    pub stop_stop_ms: f64,
    pub proc_fps: f64,
    pub rel_start_ms: f64,
    pub rel_stop_ms: f64,
    pub start_pts_diff_ms: f64,
    pub av_fps: f64,
    pub av_proc_fps: f64,
    pub inflight: usize,
}

impl DecodedFrameStats {
    fn neutralize(&mut self) {
        self.frame = 0;
        self.iframe = 0;
        self.size = 0;
        self.pts = 0;
        self.starttime = 0;
        self.stoptime = 0;
        self.proctime = 0;
        self.duration_ms = 0.0;
        self.fps = 0.0;
        self.stop_stop_ms = 0.0;
    }
}

/// One joined GPU sample, in output column order.
#[derive(Clone, Debug, Serialize)]
pub struct GpuStats {
    pub time_sec: f64,
    pub load: f64,
    pub clock_perc: f64,
    #[serde(rename = "clock_MHz")]
    pub clock_mhz: f64,
    pub source: String,
    pub gpu_max_clock: i64,
    pub gpu_model: String,
}

/// Aggregate processing interval of one source run, offset-normalized, with
/// `conc` counting the other runs it overlapped on the device timeline.
#[derive(Clone, Debug, Serialize)]
pub struct ConcurrencyRecord {
    pub source: String,
    pub starttime: i64,
    pub stoptime: i64,
    pub conc: usize,
}

/// One frame's processing interval, tagged with its originating run.
#[derive(Clone, Debug)]
pub struct FrameSpan<'a> {
    pub source: &'a str,
    pub start: i64,
    pub stop: i64,
}

/// Everything derived from one run document's encode section.
#[derive(Clone, Debug, Default)]
pub struct EncodingReport {
    pub frames: Vec<EncodedFrameStats>,
    pub concurrency: Vec<ConcurrencyRecord>,
}

pub fn reshape_encoding(document: &Value, source: &str) -> anyhow::Result<EncodingReport> {
    let run: EncodingRun = serde_json::from_value(document.clone())
        .context("Run document is missing required encoding fields")?;

    if run.frames.is_empty() {
        return Ok(EncodingReport::default());
    }

    let bitrate = run
        .settings
        .bitrate
        .to_bps()
        .context("Unable to normalize the configured bitrate")?;
    let camera = run.camera();

    let pts: Vec<i64> = run.frames.iter().map(|frame| frame.pts).collect();
    let stoptimes: Vec<i64> = run.frames.iter().map(|frame| frame.stoptime).collect();
    let durations = forward_diff_ms(&pts, MICROS_PER_MS);
    let stop_deltas = forward_diff_ms(&stoptimes, NANOS_PER_MS);

    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    let mut rows: Vec<EncodedFrameStats> = run
        .frames
        .iter()
        .zip(durations.iter().zip(&stop_deltas))
        .map(|(frame, (&duration_ms, &stop_stop_ms))| EncodedFrameStats {
            frame: frame.frame,
            iframe: frame.iframe,
            size: frame.size,
            pts: frame.pts,
            starttime: frame.starttime,
            stoptime: frame.stoptime,
            proctime: frame.proctime,
            source: source.to_owned(),
            codec: run.settings.codec.clone(),
            description: run.description.clone(),
            camera,
            test: run.test.clone(),
            bitrate,
            height: run.settings.height,
            fps: run.settings.fps as f64,
            duration_ms,
            bitrate_per_frame_bps: frame_bitrate(frame.size, duration_ms),
            average_bitrate: 0.0,
            stop_stop_ms,
            proc_fps: 0.0,
            rel_start_ms: 0.0,
            rel_stop_ms: 0.0,
            start_pts_diff_ms: 0.0,
            av_fps: 0.0,
            av_proc_fps: 0.0,
            inflight: 0,
        })
        .collect();

    // The run average is taken before any row is neutralized or dropped, so
    // the final frame's fill-value artifact is part of it.
    let per_frame: Vec<f64> = rows.iter().map(|row| row.bitrate_per_frame_bps).collect();
    let average_bitrate = mean(&per_frame);
    for row in &mut rows {
        row.average_bitrate = average_bitrate;
    }

    for row in &mut rows {
        if row.proctime < 0 || row.duration_ms < 0.0 {
            row.neutralize();
        }
    }

    for row in &mut rows {
        row.fps = rate_per_second(row.duration_ms);
        row.proc_fps = rate_per_second(row.stop_stop_ms);
    }

    // The final frame's forward differences ran against a zero fill and are
    // not reportable.
    rows.pop();
    if rows.first().is_some_and(|row| row.starttime <= 0) {
        rows.remove(0);
    }

    if rows.is_empty() {
        return Ok(EncodingReport::default());
    }

    let start_reference = rows.first().map_or(0, |row| row.starttime);
    let stop_reference = rows.first().map_or(0, |row| row.stoptime);
    annotate_encoded_offsets(&mut rows, start_reference, stop_reference);

    let window = usize::try_from(run.settings.fps).unwrap_or(0);
    let fps_values: Vec<f64> = rows.iter().map(|row| row.fps).collect();
    let proc_values: Vec<f64> = rows.iter().map(|row| row.proc_fps).collect();
    let av_fps = rolling_mean(&fps_values, window);
    let av_proc_fps = rolling_mean(&proc_values, window);

    for (row, (average, proc_average)) in rows.iter_mut().zip(av_fps.into_iter().zip(av_proc_fps))
    {
        row.av_fps = average;
        row.av_proc_fps = proc_average;
    }

    let (inflight, concurrency) = {
        let spans: Vec<FrameSpan<'_>> = rows
            .iter()
            .map(|row| FrameSpan {
                source: &row.source,
                start: row.starttime,
                stop: row.stoptime,
            })
            .collect();

        compute_inflight(&spans, start_reference)
    };

    for (row, count) in rows.iter_mut().zip(inflight) {
        row.inflight = count;
    }

    Ok(EncodingReport {
        frames: rows,
        concurrency,
    })
}

pub fn reshape_decoding(document: &Value, source: &str) -> anyhow::Result<Option<Vec<DecodedFrameStats>>> {
    let run: DecodingRun = serde_json::from_value(document.clone())
        .context("Run document has a malformed decode section")?;

    if run.decoded_frames.is_empty() {
        return Ok(None);
    }

    let codec = run.codec();
    let height = run.height();

    let pts: Vec<i64> = run.decoded_frames.iter().map(|frame| frame.pts).collect();
    let stoptimes: Vec<i64> = run
        .decoded_frames
        .iter()
        .map(|frame| frame.stoptime)
        .collect();
    let durations = forward_diff_ms(&pts, MICROS_PER_MS);
    let stop_deltas = forward_diff_ms(&stoptimes, NANOS_PER_MS);

    let mut rows: Vec<DecodedFrameStats> = run
        .decoded_frames
        .iter()
        .zip(durations.iter().zip(&stop_deltas))
        .map(|(frame, (&duration_ms, &stop_stop_ms))| DecodedFrameStats {
            frame: frame.frame,
            iframe: frame.iframe,
            size: frame.size,
            pts: frame.pts,
            starttime: frame.starttime,
            stoptime: frame.stoptime,
            proctime: frame.proctime,
            source: source.to_owned(),
            codec: codec.clone(),
            height: height.clone(),
            duration_ms,
            fps: 0.0,
            stop_stop_ms,
            proc_fps: 0.0,
            rel_start_ms: 0.0,
            rel_stop_ms: 0.0,
            start_pts_diff_ms: 0.0,
            av_fps: 0.0,
            av_proc_fps: 0.0,
            inflight: 0,
        })
        .collect();

    for row in &mut rows {
        if row.proctime < 0 || row.duration_ms < 0.0 {
            row.neutralize();
        }
    }

    for row in &mut rows {
        row.fps = rate_per_second(row.duration_ms);
        row.proc_fps = rate_per_second(row.stop_stop_ms);
    }

    rows.pop();
    if rows.first().is_some_and(|row| row.starttime <= 0) {
        rows.remove(0);
    }

    if rows.is_empty() {
        return Ok(None);
    }

    let start_reference = rows.first().map_or(0, |row| row.starttime);
    let stop_reference = rows.first().map_or(0, |row| row.stoptime);
    annotate_decoded_offsets(&mut rows, start_reference, stop_reference);

    let fps_values: Vec<f64> = rows.iter().map(|row| row.fps).collect();
    let proc_values: Vec<f64> = rows.iter().map(|row| row.proc_fps).collect();
    let av_fps = rolling_mean(&fps_values, DECODE_RATE_WINDOW);
    let av_proc_fps = rolling_mean(&proc_values, DECODE_RATE_WINDOW);

    for (row, (average, proc_average)) in rows.iter_mut().zip(av_fps.into_iter().zip(av_proc_fps))
    {
        row.av_fps = average;
        row.av_proc_fps = proc_average;
    }

    let (inflight, _concurrency) = {
        let spans: Vec<FrameSpan<'_>> = rows
            .iter()
            .map(|row| FrameSpan {
                source: &row.source,
                start: row.starttime,
                stop: row.stoptime,
            })
            .collect();

        compute_inflight(&spans, start_reference)
    };

    for (row, count) in rows.iter_mut().zip(inflight) {
        row.inflight = count;
    }

    Ok(Some(rows))
}

pub fn reshape_gpu(document: &Value, source: &str) -> anyhow::Result<Option<Vec<GpuStats>>> {
    let section: GpuSection = serde_json::from_value(document.clone())
        .context("Run document has a malformed GPU section")?;

    let Some(gpu) = section.gpu_data else {
        return Ok(None);
    };

    if gpu.gpu_load_percentage.is_empty() {
        return Ok(None);
    }

    if gpu.gpu_load_percentage.len() != gpu.gpu_clock_freq.len() {
        return Err(anyhow!(
            "GPU load and clock series differ in length ({} vs {})",
            gpu.gpu_load_percentage.len(),
            gpu.gpu_clock_freq.len()
        ));
    }

    let max_clock = gpu
        .max_clock()
        .context("Unable to read the GPU maximum clock")?;

    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    let rows = gpu
        .gpu_load_percentage
        .iter()
        .zip(&gpu.gpu_clock_freq)
        .map(|(sample, clock)| GpuStats {
            time_sec: sample.time_sec,
            load: sample.load,
            clock_perc: if max_clock == 0 {
                RATE_UNDEFINED
            } else {
                100.0 * clock.clock_mhz / max_clock as f64
            },
            clock_mhz: clock.clock_mhz,
            source: source.to_owned(),
            gpu_max_clock: max_clock,
            gpu_model: gpu.gpu_model.clone(),
        })
        .collect();

    Ok(Some(rows))
}

/// Counts, for every frame interval, how many other frames from the same
/// source were in processing at an overlapping time. Overlap is strict on
/// both ends: a frame starting exactly when another stops does not overlap
/// it. Also aggregates one interval per source, offset by `time_reference`,
/// and counts pairwise overlap across sources the same way.
#[must_use]
pub fn compute_inflight(
    spans: &[FrameSpan<'_>],
    time_reference: i64,
) -> (Vec<usize>, Vec<ConcurrencyRecord>) {
    let mut sources: Vec<&str> = Vec::new();

    for span in spans {
        if !sources.contains(&span.source) {
            sources.push(span.source);
        }
    }

    let mut inflight = vec![0_usize; spans.len()];
    let mut concurrency: Vec<ConcurrencyRecord> = Vec::with_capacity(sources.len());

    for current in &sources {
        let members: Vec<usize> = spans
            .iter()
            .enumerate()
            .filter(|(_, span)| span.source == *current)
            .map(|(index, _)| index)
            .collect();

        let start = members
            .iter()
            .map(|&index| spans[index].start)
            .min()
            .unwrap_or(0);
        let stop = members
            .iter()
            .map(|&index| spans[index].stop)
            .max()
            .unwrap_or(0);

        concurrency.push(ConcurrencyRecord {
            source: (*current).to_owned(),
            starttime: start - time_reference,
            stoptime: stop - time_reference,
            conc: 0,
        });

        for &index in &members {
            let span = &spans[index];
            inflight[index] = members
                .iter()
                .filter(|&&other| {
                    other != index
                        && spans[other].stop > span.start
                        && spans[other].start < span.stop
                })
                .count();
        }
    }

    let conc_counts: Vec<usize> = (0..concurrency.len())
        .map(|index| {
            concurrency
                .iter()
                .enumerate()
                .filter(|&(other, record)| {
                    other != index
                        && record.stoptime > concurrency[index].starttime
                        && record.starttime < concurrency[index].stoptime
                })
                .count()
        })
        .collect();

    for (record, conc) in concurrency.iter_mut().zip(conc_counts) {
        record.conc = conc;
    }

    (inflight, concurrency)
}

#[allow(clippy::as_conversions, clippy::cast_precision_loss)]
fn annotate_encoded_offsets(rows: &mut [EncodedFrameStats], start_reference: i64, stop_reference: i64) {
    for row in rows {
        row.rel_start_ms = round2((row.starttime - start_reference) as f64 / NANOS_PER_MS);
        row.rel_stop_ms = round2((row.stoptime - stop_reference) as f64 / NANOS_PER_MS);
        row.start_pts_diff_ms = round2(row.rel_start_ms - row.pts as f64 / MICROS_PER_MS);
    }
}

#[allow(clippy::as_conversions, clippy::cast_precision_loss)]
fn annotate_decoded_offsets(rows: &mut [DecodedFrameStats], start_reference: i64, stop_reference: i64) {
    for row in rows {
        row.rel_start_ms = round2((row.starttime - start_reference) as f64 / NANOS_PER_MS);
        row.rel_stop_ms = round2((row.stoptime - stop_reference) as f64 / NANOS_PER_MS);
        row.start_pts_diff_ms = round2(row.rel_start_ms - row.pts as f64 / MICROS_PER_MS);
    }
}

/// Forward difference of a timestamp column in milliseconds, 2-decimal
/// rounded. The final element diffs against a zero fill.
#[allow(clippy::as_conversions, clippy::cast_precision_loss)]
fn forward_diff_ms(timestamps: &[i64], ticks_per_ms: f64) -> Vec<f64> {
    timestamps
        .iter()
        .enumerate()
        .map(|(index, &current)| {
            let next = timestamps.get(index + 1).copied().unwrap_or(0);
            round2((next - current) as f64 / ticks_per_ms)
        })
        .collect()
}

/// Trailing mean that requires a complete window; positions without one
/// fall back to the instantaneous value.
#[allow(clippy::as_conversions, clippy::cast_precision_loss)]
fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(index, &instant)| {
            if window > 0 && index + 1 >= window {
                let slice = values.get(index + 1 - window..=index).unwrap_or_default();
                slice.iter().sum::<f64>() / window as f64
            } else {
                instant
            }
        })
        .collect()
}

#[allow(clippy::float_cmp)]
fn rate_per_second(interval_ms: f64) -> f64 {
    if interval_ms == 0.0 {
        RATE_UNDEFINED
    } else {
        round2(1000.0 / interval_ms)
    }
}

#[allow(clippy::as_conversions, clippy::cast_precision_loss, clippy::float_cmp)]
fn frame_bitrate(size: i64, duration_ms: f64) -> f64 {
    if duration_ms == 0.0 {
        RATE_UNDEFINED
    } else {
        size as f64 * 8.0 / (duration_ms / 1000.0)
    }
}

#[allow(clippy::as_conversions, clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.iter().sum::<f64>() / values.len() as f64
}
