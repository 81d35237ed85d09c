use anyhow::{anyhow, Context};
use serde::Deserialize;
use serde_json::Value;

/// Marker substring a camera-input run embeds in its test definition dump.
const CAMERA_MARKER: &str = "filepath: \"camera\"";

/// Fallback labels for runs whose decoder never reported a media format.
pub const UNKNOWN_CODEC: &str = "unknown codec";
pub const UNKNOWN_HEIGHT: &str = "unknown height";

/// One raw frame event as the device logger emits it. `pts` is in
/// microseconds; the clock fields are monotonic nanoseconds.
#[derive(Clone, Debug, Deserialize)]
pub struct FrameRecord {
    pub frame: i64,
    pub iframe: i64,
    pub size: i64,
    pub pts: i64,
    pub starttime: i64,
    pub stoptime: i64,
    pub proctime: i64,
}

/// Bitrate as the device reports it, either a raw bits-per-second count or
/// a magnitude string such as "2000k" or "2 Mbps".
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BitrateSpec {
    Count(i64),
    Magnitude(String),
}

impl BitrateSpec {
    /// Normalizes to bits per second. Magnitude strings take an optional
    /// trailing "bps" and a `k` or `M` multiplier.
    pub fn to_bps(&self) -> anyhow::Result<i64> {
        match self {
            Self::Count(bps) => Ok(*bps),
            Self::Magnitude(text) => {
                let head = match text.find("bps") {
                    Some(offset) if offset > 0 => text.get(..offset).unwrap_or(text),
                    _ => text.as_str(),
                };
                let head = head.trim();

                if let Some(number) = head.strip_suffix('k') {
                    let number = number
                        .trim()
                        .parse::<i64>()
                        .with_context(|| format!("Unable to parse bitrate '{text}'"))?;
                    Ok(number * 1000)
                } else if let Some(number) = head.strip_suffix('M') {
                    let number = number
                        .trim()
                        .parse::<i64>()
                        .with_context(|| format!("Unable to parse bitrate '{text}'"))?;
                    Ok(number * 1_000_000)
                } else if head.is_empty() {
                    Ok(0)
                } else {
                    head.parse::<i64>()
                        .with_context(|| format!("Unable to parse bitrate '{text}'"))
                }
            }
        }
    }
}

impl std::fmt::Display for BitrateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(bps) => write!(f, "{bps}"),
            Self::Magnitude(text) => write!(f, "{text}"),
        }
    }
}

/// Per-run device configuration, attached as constant columns to every
/// derived row.
#[derive(Clone, Debug, Deserialize)]
pub struct RunSettings {
    pub codec: String,
    #[serde(default)]
    pub gop: i64,
    pub fps: i64,
    pub bitrate: BitrateSpec,
    #[serde(default)]
    pub meanbitrate: Option<BitrateSpec>,
    #[serde(default)]
    pub width: i64,
    pub height: i64,
}

/// The encode section of one run document.
#[derive(Clone, Debug, Deserialize)]
pub struct EncodingRun {
    pub description: String,
    pub test: String,
    pub testdefinition: String,
    pub settings: RunSettings,
    pub frames: Vec<FrameRecord>,
}

impl EncodingRun {
    /// True when the test definition names the camera as its input. A
    /// marker at offset zero is not honored.
    #[must_use]
    pub fn camera(&self) -> bool {
        self.testdefinition
            .find(CAMERA_MARKER)
            .is_some_and(|offset| offset > 0)
    }
}

/// The decode section of one run document. Both fields are optional in the
/// wire format.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DecodingRun {
    #[serde(default)]
    pub decoded_frames: Vec<FrameRecord>,
    #[serde(default)]
    pub decoder_media_format: Option<Value>,
}

impl DecodingRun {
    // Surface-mode runs report the media format as a plain string, which
    // carries no fields at all.
    fn media_format_field(&self, key: &str) -> Option<&Value> {
        self.decoder_media_format
            .as_ref()
            .and_then(|format| format.get(key))
    }

    #[must_use]
    pub fn codec(&self) -> String {
        self.media_format_field("mime")
            .map_or_else(|| UNKNOWN_CODEC.to_owned(), scalar_to_string)
    }

    #[must_use]
    pub fn height(&self) -> String {
        self.media_format_field("height")
            .map_or_else(|| UNKNOWN_HEIGHT.to_owned(), scalar_to_string)
    }
}

/// The GPU sampling section of one run document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GpuSection {
    #[serde(default)]
    pub gpu_data: Option<GpuData>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GpuData {
    #[serde(default)]
    pub gpu_load_percentage: Vec<GpuLoadSample>,
    #[serde(default)]
    pub gpu_clock_freq: Vec<GpuClockSample>,
    pub gpu_max_clock: Value,
    pub gpu_model: String,
}

impl GpuData {
    /// The maximum clock arrives as either a bare number or a numeric
    /// string.
    pub fn max_clock(&self) -> anyhow::Result<i64> {
        match &self.gpu_max_clock {
            Value::Number(number) => number
                .as_i64()
                .ok_or_else(|| anyhow!("gpu_max_clock {number} is not an integer")),
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .with_context(|| format!("Unable to parse gpu_max_clock '{text}'")),
            other => Err(anyhow!("gpu_max_clock has unsupported type: {other}")),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GpuLoadSample {
    #[serde(default)]
    pub time_sec: f64,
    pub load: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GpuClockSample {
    #[serde(rename = "clock_MHz")]
    pub clock_mhz: f64,
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bitrate_counts_pass_through() {
        assert_eq!(BitrateSpec::Count(2_000_000).to_bps().unwrap(), 2_000_000);
    }

    #[test]
    fn bitrate_magnitudes_scale() {
        let cases = [
            ("2000k", 2_000_000),
            ("2M", 2_000_000),
            ("500kbps", 500_000),
            ("2 Mbps", 2_000_000),
            ("250000", 250_000),
            ("", 0),
        ];

        for (text, expected) in cases {
            let spec = BitrateSpec::Magnitude(text.to_owned());
            assert_eq!(spec.to_bps().unwrap(), expected, "case '{text}'");
        }
    }

    #[test]
    fn bitrate_garbage_is_rejected() {
        assert!(BitrateSpec::Magnitude("fast".to_owned()).to_bps().is_err());
    }

    #[test]
    fn camera_marker_at_offset_zero_is_ignored() {
        let run: EncodingRun = serde_json::from_value(json!({
            "description": "d",
            "test": "t",
            "testdefinition": "filepath: \"camera\" input {}",
            "settings": {
                "codec": "video/avc", "fps": 30, "bitrate": 500_000, "height": 720
            },
            "frames": []
        }))
        .unwrap();
        assert!(!run.camera());

        let run = EncodingRun {
            testdefinition: "input { filepath: \"camera\" }".to_owned(),
            ..run
        };
        assert!(run.camera());
    }

    #[test]
    fn decoder_media_format_fields() {
        let run: DecodingRun = serde_json::from_value(json!({
            "decoded_frames": [],
            "decoder_media_format": {"mime": "video/hevc", "height": 720}
        }))
        .unwrap();
        assert_eq!(run.codec(), "video/hevc");
        assert_eq!(run.height(), "720");
    }

    #[test]
    fn decoder_media_format_string_falls_back() {
        let run: DecodingRun = serde_json::from_value(json!({
            "decoded_frames": [],
            "decoder_media_format": "{mime=video/hevc}"
        }))
        .unwrap();
        assert_eq!(run.codec(), UNKNOWN_CODEC);
        assert_eq!(run.height(), UNKNOWN_HEIGHT);
    }

    #[test]
    fn decoder_media_format_absent_falls_back() {
        let run = DecodingRun::default();
        assert_eq!(run.codec(), UNKNOWN_CODEC);
        assert_eq!(run.height(), UNKNOWN_HEIGHT);
    }

    #[test]
    fn gpu_max_clock_accepts_number_or_string() {
        let gpu: GpuData = serde_json::from_value(json!({
            "gpu_max_clock": "585", "gpu_model": "Adreno640"
        }))
        .unwrap();
        assert_eq!(gpu.max_clock().unwrap(), 585);

        let gpu: GpuData = serde_json::from_value(json!({
            "gpu_max_clock": 585, "gpu_model": "Adreno640"
        }))
        .unwrap();
        assert_eq!(gpu.max_clock().unwrap(), 585);

        let gpu: GpuData = serde_json::from_value(json!({
            "gpu_max_clock": [], "gpu_model": "Adreno640"
        }))
        .unwrap();
        assert!(gpu.max_clock().is_err());
    }
}
