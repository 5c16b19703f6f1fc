use crate::cli::ValidateArgs;
use crate::exit_codes;
use crate::params;
use crate::report;
use destripe_rs::{meta_path_for, FlatRecording, RawRecording};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ValidateOutput {
    file: String,
    exists: bool,
    readable: bool,
    meta_found: bool,
    valid: bool,
    n_channels: Option<usize>,
    n_samples: Option<usize>,
    sample_rate: Option<f64>,
    /// Sample format assumed for the append target
    output_dtype: String,
    /// Whether the append target ends on a whole output row
    resume_aligned: Option<bool>,
    error: Option<String>,
}

pub fn execute(args: ValidateArgs) -> i32 {
    let dtype = match params::parse_dtype(&args.dtype) {
        Ok(d) => d,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let path = Path::new(&args.file);
    let exists = path.exists();
    let readable = path.is_file() && std::fs::File::open(path).is_ok();
    let meta_found = meta_path_for(path).exists();

    let mut error = if !exists {
        Some(format!("File not found: {}", args.file))
    } else if !readable {
        Some(format!("File is not readable: {}", args.file))
    } else if !meta_found {
        Some(format!(
            "Metadata sidecar not found: {}",
            meta_path_for(path).display()
        ))
    } else {
        None
    };

    let recording = if error.is_none() {
        match FlatRecording::open(path) {
            Ok(r) => Some(r),
            Err(e) => {
                error = Some(e.to_string());
                None
            }
        }
    } else {
        None
    };

    // rows in the append target are nc samples of the output dtype, which is
    // wider than the int16 input when --dtype int32 was used for the run
    let resume_aligned = match (&recording, &args.output) {
        (Some(recording), Some(output)) => {
            let row_bytes = (recording.n_channels() * dtype.sample_bytes()) as u64;
            std::fs::metadata(output)
                .ok()
                .map(|m| m.len() % row_bytes == 0)
        }
        _ => None,
    };

    let result = ValidateOutput {
        file: args.file.clone(),
        exists,
        readable,
        meta_found,
        valid: recording.is_some(),
        n_channels: recording.as_ref().map(|r| r.n_channels()),
        n_samples: recording.as_ref().map(|r| r.n_samples()),
        sample_rate: recording.as_ref().map(|r| r.sample_rate()),
        output_dtype: args.dtype.clone(),
        resume_aligned,
        error: error.clone(),
    };

    if args.json {
        if let Err(e) = report::emit_summary(&result) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else if let Some(ref err) = error {
        eprintln!("Error: {}", err);
    } else if let Some(ref recording) = recording {
        println!(
            "Recording '{}' is valid ({} channels, {} samples at {} Hz)",
            args.file,
            recording.n_channels(),
            recording.n_samples(),
            recording.sample_rate()
        );
        if let Some(aligned) = resume_aligned {
            println!(
                "Append target ({}): {}",
                args.dtype,
                if aligned {
                    "aligned to whole rows"
                } else {
                    "NOT aligned to whole rows"
                }
            );
        }
    }

    if error.is_some() {
        exit_codes::INPUT_ERROR
    } else {
        exit_codes::SUCCESS
    }
}
