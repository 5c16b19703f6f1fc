use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::params;
use crate::report;
use destripe_rs::{FlatRecording, RawRecording};
use serde::Serialize;

#[derive(Serialize)]
struct InfoOutput {
    cli_version: String,
    file: String,
    n_channels: usize,
    n_analog_channels: usize,
    n_sync_channels: usize,
    n_samples: usize,
    sample_rate: f64,
    duration_s: f64,
    size_bytes: u64,
}

pub fn execute(args: InfoArgs) -> i32 {
    if let Err(msg) = params::validate_file(&args.file) {
        eprintln!("Error: {}", msg);
        return exit_codes::INPUT_ERROR;
    }
    let recording = match FlatRecording::open(&args.file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error opening recording: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let size_bytes = std::fs::metadata(&args.file).map(|m| m.len()).unwrap_or(0);
    let info = InfoOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        file: args.file.clone(),
        n_channels: recording.n_channels(),
        n_analog_channels: recording.n_analog_channels(),
        n_sync_channels: recording.n_sync_channels(),
        n_samples: recording.n_samples(),
        sample_rate: recording.sample_rate(),
        duration_s: recording.n_samples() as f64 / recording.sample_rate(),
        size_bytes,
    };

    if args.json {
        if let Err(e) = report::emit_summary(&info) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        println!("destripe CLI v{}", info.cli_version);
        println!("Recording: {}", info.file);
        println!(
            "Channels: {} ({} analog + {} sync)",
            info.n_channels, info.n_analog_channels, info.n_sync_channels
        );
        println!(
            "Samples: {} ({:.2} s at {} Hz)",
            info.n_samples, info.duration_s, info.sample_rate
        );
        println!("Size: {} bytes", info.size_bytes);
    }

    exit_codes::SUCCESS
}
