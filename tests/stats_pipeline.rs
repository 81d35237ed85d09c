use serde_json::{json, Value};

use video_benchmark_stats::config::{Command, Config};
use video_benchmark_stats::run;

fn frame(index: i64, pts: i64, starttime: i64, stoptime: i64) -> Value {
    json!({
        "frame": index,
        "iframe": i64::from(index == 0),
        "size": 12_500,
        "pts": pts,
        "starttime": starttime,
        "stoptime": stoptime,
        "proctime": 20_000_000,
    })
}

fn run_document(with_gpu: bool) -> Value {
    let frames: Vec<Value> = (0..32)
        .map(|index| {
            frame(
                index,
                (index + 1) * 33_333,
                1_000_000 + index * 33_333_000,
                1_000_000 + index * 33_333_000 + 20_000_000,
            )
        })
        .collect();

    let mut document = json!({
        "description": "surface encoder",
        "test": "qcif baseline",
        "testdefinition": "input { filepath: \"normal.yuv\" }",
        "settings": {
            "codec": "video/hevc",
            "gop": 10,
            "fps": 30,
            "bitrate": 2_000_000,
            "meanbitrate": 1_905_177,
            "width": 1280,
            "height": 720,
        },
        "frames": frames.clone(),
        "decoded_frames": frames,
        "decoder_media_format": {"mime": "video/hevc", "height": 720},
    });

    if with_gpu {
        document["gpu_data"] = json!({
            "gpu_load_percentage": [
                {"time_sec": 0.5, "load": 25.0},
                {"time_sec": 1.0, "load": 75.0},
            ],
            "gpu_clock_freq": [
                {"clock_MHz": 292.5},
                {"clock_MHz": 585.0},
            ],
            "gpu_max_clock": "585",
            "gpu_model": "Adreno640",
        });
    }

    document
}

#[test]
fn stats_command_writes_csv_tables() {
    let directory = tempfile::tempdir().unwrap();

    let with_gpu = directory.path().join("device_a.json");
    std::fs::write(&with_gpu, run_document(true).to_string()).unwrap();

    let without_gpu = directory.path().join("device_b.json");
    std::fs::write(&without_gpu, run_document(false).to_string()).unwrap();

    let config = Config {
        command: Command::Stats {
            files: vec![with_gpu, without_gpu],
        },
    };

    run(&config).unwrap();

    let encoding = std::fs::read_to_string(
        directory.path().join("device_a.json_encoding_data.csv"),
    )
    .unwrap();

    // Header plus 31 rows; the final frame's fill-value diff is dropped.
    assert_eq!(encoding.lines().count(), 32);

    let header = encoding.lines().next().unwrap();
    assert!(header.starts_with("frame,iframe,size,pts,starttime,stoptime,proctime,source,"));
    assert!(header.contains("stop-stop_ms"));
    assert!(header.ends_with("inflight"));

    let decoded = std::fs::read_to_string(
        directory.path().join("device_a.json_decoded_data.csv"),
    )
    .unwrap();
    assert_eq!(decoded.lines().count(), 32);

    let gpu = std::fs::read_to_string(directory.path().join("device_a.json_gpu_data.csv")).unwrap();
    assert_eq!(gpu.lines().count(), 3);

    assert!(directory
        .path()
        .join("device_b.json_encoding_data.csv")
        .exists());
    assert!(!directory.path().join("device_b.json_gpu_data.csv").exists());
}

#[test]
fn malformed_documents_do_not_abort_the_batch() {
    let directory = tempfile::tempdir().unwrap();

    let broken = directory.path().join("broken.json");
    std::fs::write(&broken, "not json at all").unwrap();

    let good = directory.path().join("good.json");
    std::fs::write(&good, run_document(false).to_string()).unwrap();

    let config = Config {
        command: Command::Stats {
            files: vec![broken, good],
        },
    };

    run(&config).unwrap();

    assert!(directory.path().join("good.json_encoding_data.csv").exists());
    assert!(!directory
        .path()
        .join("broken.json_encoding_data.csv")
        .exists());
}

#[test]
fn quality_command_appends_summary_rows() {
    let directory = tempfile::tempdir().unwrap();

    let encoded = directory.path().join("out.mp4");
    std::fs::write(&encoded, vec![0_u8; 4096]).unwrap();
    std::fs::write(
        directory.path().join("out.mp4.vmaf"),
        "aggregateVMAF=\"87.2\"\n",
    )
    .unwrap();
    std::fs::write(directory.path().join("out.mp4.ssim"), "SSIM Y:0.97\n").unwrap();
    std::fs::write(directory.path().join("out.mp4.psnr"), "average:34.5\n").unwrap();

    let test_path = directory.path().join("run.json");
    std::fs::write(
        &test_path,
        json!({
            "encodedfile": "out.mp4",
            "settings": {
                "codec": "video/hevc",
                "gop": 10,
                "fps": 30,
                "bitrate": "2000k",
                "meanbitrate": 1_905_177,
                "width": 1280,
                "height": 720,
            }
        })
        .to_string(),
    )
    .unwrap();

    let output = directory.path().join("quality.csv");
    let config = Config {
        command: Command::Quality {
            tests: vec![test_path],
            output: output.clone(),
            header: true,
        },
    };

    run(&config).unwrap();

    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content
        .lines()
        .next()
        .unwrap()
        .starts_with("media,codec,gop,fps"));
    assert!(content.lines().nth(1).unwrap().contains(",87,"));
}
