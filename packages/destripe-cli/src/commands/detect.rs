use crate::cli::DetectArgs;
use crate::exit_codes;
use crate::params;
use crate::report::{self, ReportFormat};
use destripe_rs::{
    detect_bad_channels, ChannelLabel, DetectReport, FlatRecording, RawRecording,
};

pub fn execute(args: DetectArgs) -> i32 {
    if let Err(msg) = params::validate_file(&args.file) {
        eprintln!("Error: {}", msg);
        return exit_codes::INPUT_ERROR;
    }
    let thresholds = match params::load_thresholds(args.thresholds.as_deref()) {
        Ok(t) => t,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let recording = match FlatRecording::open(&args.file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error opening recording: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let fs = recording.sample_rate();
    let ns = recording.n_samples();
    let window = ((args.duration * fs) as usize).min(ns).max(1);
    let start = match args.start {
        Some(s) => ((s * fs) as usize).min(ns - window),
        None => (ns - window) / 2,
    };

    if !args.quiet {
        eprintln!(
            "Classifying {} channels from samples [{}, {})...",
            recording.n_analog_channels(),
            start,
            start + window
        );
    }

    let block = match recording.read_volts(start, start + window) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error reading window: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };
    // detection runs on the analog subset only
    let ncv = recording.n_analog_channels();
    let analog = block.slice(ndarray::s![..ncv, ..]).to_owned();

    let (labels, features) = match detect_bad_channels(&analog, fs, &thresholds) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Detection failed: {}", e);
            return params::exit_code_for(&e);
        }
    };

    if !args.quiet {
        let count = |l: ChannelLabel| labels.iter().filter(|&&v| v == l).count();
        eprintln!(
            "  good {}, dead {}, noisy {}, outside brain {}",
            count(ChannelLabel::Good),
            count(ChannelLabel::Dead),
            count(ChannelLabel::Noisy),
            count(ChannelLabel::OutsideBrain)
        );
    }

    let labels_report = DetectReport::new(args.file.clone(), labels, features, thresholds);
    let format = ReportFormat {
        path: args.output.as_deref(),
        compact: args.compact,
    };
    if let Err(e) = report::emit_detect_report(&labels_report, format) {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }
    if !args.quiet {
        if let Some(ref path) = args.output {
            eprintln!("Labels written to {}", path);
        }
    }
    exit_codes::SUCCESS
}
