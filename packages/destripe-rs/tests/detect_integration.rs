use destripe_rs::{
    detect_bad_channels, meta_path_for, ChannelLabel, DetectReport, DetectionThresholds,
    FlatRecording, RawRecording, RecordingMeta,
};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const FS: f64 = 30_000.0;
const NS: usize = 12_000;
const NC: usize = 13;
const CONVERSION: f32 = 2.34e-6;

/// 13-channel session: a strong common 2 kHz component everywhere, channel 4
/// frozen at a constant value, channel 9 carrying heavy 13 kHz noise.
fn write_session(dir: &Path) -> PathBuf {
    let bin = dir.join("probe.bin");
    let mut file = File::create(&bin).unwrap();
    for t in 0..NS {
        for c in 0..NC {
            let volts = if c == 4 {
                1e-4
            } else {
                let common =
                    1e-4 * (2.0 * std::f64::consts::PI * 2000.0 * t as f64 / FS).sin() as f32;
                let jitter =
                    (((c + 1) * 7919 + t * 104_729) % 1000) as f32 / 1000.0 - 0.5;
                let hf = if c == 9 {
                    4e-5 * (2.0 * std::f64::consts::PI * 13_000.0 * t as f64 / FS).sin() as f32
                } else {
                    0.0
                };
                common + jitter * 2e-6 + hf
            };
            let counts = (volts / CONVERSION).round() as i16;
            file.write_all(&counts.to_le_bytes()).unwrap();
        }
    }
    let meta = RecordingMeta {
        n_channels: NC,
        n_sync_channels: 0,
        sample_rate: FS,
        conversion_factors: vec![CONVERSION],
    };
    meta.save(meta_path_for(&bin)).unwrap();
    bin
}

#[test]
fn test_detect_on_recording_window() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    let recording = FlatRecording::open(&bin).unwrap();

    // representative window from the middle of the recording
    let mid = recording.n_samples() / 2;
    let block = recording.read_volts(mid - 3000, mid + 3000).unwrap();

    let thresholds = DetectionThresholds::default();
    let (labels, features) = detect_bad_channels(&block, FS, &thresholds).unwrap();

    assert_eq!(labels.len(), NC);
    assert_eq!(labels[4], ChannelLabel::Noisy, "constant channel");
    assert_eq!(labels[9], ChannelLabel::Noisy, "high-frequency channel");
    assert_eq!(labels[0], ChannelLabel::Good);
    assert_eq!(labels[12], ChannelLabel::Good);

    for v in features
        .xcor_hf
        .iter()
        .chain(features.xcor_lf.iter())
        .chain(features.psd_hf.iter())
        .chain(features.rms_raw.iter())
    {
        assert!(v.is_finite());
    }
}

#[test]
fn test_detect_report_round_trips_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    let recording = FlatRecording::open(&bin).unwrap();
    let block = recording.read_volts(0, 6000).unwrap();

    let thresholds = DetectionThresholds::default();
    let (labels, features) = detect_bad_channels(&block, FS, &thresholds).unwrap();
    let report = DetectReport::new(
        bin.display().to_string(),
        labels.clone(),
        features,
        thresholds,
    );

    let path = dir.path().join("labels.json");
    std::fs::write(&path, serde_json::to_string_pretty(&report).unwrap()).unwrap();
    let back: DetectReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(back.labels, labels);
    assert_eq!(back.features.ind.len(), NC);
    assert!(!back.id.is_empty());
}
