use crate::cli::RunArgs;
use crate::exit_codes;
use crate::params;
use crate::report::{self, ReportFormat};
use destripe_rs::{decompress_destripe, FlatRecording, PipelineRequest, RawRecording};
use std::path::PathBuf;

pub fn execute(args: RunArgs) -> i32 {
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
    let n_analog = recording.n_analog_channels();

    let spec = match params::load_spec(args.spec.as_deref()) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    let geometry = match params::load_geometry(args.geometry.as_deref(), n_analog, args.probe_version)
    {
        Ok(g) => g,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    let labels = match params::load_labels(args.labels.as_deref()) {
        Ok(l) => l,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    let whiten = match params::load_whiten(args.whiten.as_deref(), n_analog) {
        Ok(w) => w,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    let config = match params::build_config(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let output_file = args
        .output
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| params::default_output_for(&args.file));
    if output_file == PathBuf::from(&args.file) {
        eprintln!("Error: output file would overwrite the input recording");
        return exit_codes::INPUT_ERROR;
    }

    let mut request = PipelineRequest::new(output_file, &spec, &geometry);
    request.rms_file = args.rms_output.as_ref().map(PathBuf::from);
    request.config = config;
    request.labels = labels;
    request.whiten = whiten;

    if !args.quiet {
        eprintln!("Destriping {}...", args.file);
        eprintln!(
            "  {} channels ({} analog), {} samples at {} Hz",
            recording.n_channels(),
            n_analog,
            recording.n_samples(),
            recording.sample_rate()
        );
        eprintln!(
            "  Batch: {} samples, taper {}, workers {}",
            args.batch_size,
            args.taper,
            if args.workers == 0 { "auto".to_string() } else { args.workers.to_string() }
        );
    }

    match decompress_destripe(&recording, &request) {
        Ok(report) => {
            let format = ReportFormat {
                path: args.report.as_deref(),
                compact: args.compact,
            };
            if let Err(e) = report::emit_pipeline_report(&report, format) {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
            if !args.quiet {
                eprintln!(
                    "Wrote {} samples to {}",
                    report.samples_written,
                    report.output_file.display()
                );
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Destriping failed: {}", e);
            params::exit_code_for(&e)
        }
    }
}
