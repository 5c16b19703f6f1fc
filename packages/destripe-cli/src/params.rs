//! Argument validation and request assembly, kept out of the command bodies.

use destripe_rs::{
    ChannelLabel, DetectReport, DetectionThresholds, DestripeError, FilterSpec, OutputDtype,
    PipelineConfig, ProbeGeometry,
};
use ndarray::Array2;
use std::path::{Path, PathBuf};

use crate::cli::RunArgs;
use crate::exit_codes;

pub fn validate_file(path: &str) -> Result<(), String> {
    let p = Path::new(path);
    if !p.exists() {
        return Err(format!("File not found: {}", path));
    }
    if !p.is_file() {
        return Err(format!("Not a regular file: {}", path));
    }
    Ok(())
}

/// Default output path: `session.bin` -> `session.destriped.bin`.
pub fn default_output_for(file: &str) -> PathBuf {
    Path::new(file).with_extension("destriped.bin")
}

pub fn load_spec(path: Option<&str>) -> Result<FilterSpec, String> {
    match path {
        None => Ok(FilterSpec::default()),
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read spec file '{}': {}", path, e))?;
            serde_json::from_str(&content)
                .map_err(|e| format!("Invalid filter spec '{}': {}", path, e))
        }
    }
}

pub fn load_thresholds(path: Option<&str>) -> Result<DetectionThresholds, String> {
    match path {
        None => Ok(DetectionThresholds::default()),
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read thresholds file '{}': {}", path, e))?;
            serde_json::from_str(&content)
                .map_err(|e| format!("Invalid thresholds '{}': {}", path, e))
        }
    }
}

pub fn load_geometry(
    path: Option<&str>,
    n_analog: usize,
    probe_version: u32,
) -> Result<ProbeGeometry, String> {
    let geometry = match path {
        None => ProbeGeometry::neuropixel(n_analog, probe_version),
        Some(path) => ProbeGeometry::from_json_file(path)
            .map_err(|e| format!("Failed to load geometry '{}': {}", path, e))?,
    };
    geometry
        .validate(n_analog)
        .map_err(|e| format!("Geometry does not match the recording: {}", e))?;
    Ok(geometry)
}

/// Load channel labels from a `detect` report.
pub fn load_labels(path: Option<&str>) -> Result<Option<Vec<ChannelLabel>>, String> {
    match path {
        None => Ok(None),
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read labels file '{}': {}", path, e))?;
            let report: DetectReport = serde_json::from_str(&content)
                .map_err(|e| format!("Invalid label report '{}': {}", path, e))?;
            Ok(Some(report.labels))
        }
    }
}

/// Load a whitening matrix stored as a row-major JSON array of arrays.
pub fn load_whiten(path: Option<&str>, n_analog: usize) -> Result<Option<Array2<f32>>, String> {
    let Some(path) = path else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read whitening matrix '{}': {}", path, e))?;
    let rows: Vec<Vec<f32>> = serde_json::from_str(&content)
        .map_err(|e| format!("Invalid whitening matrix '{}': {}", path, e))?;
    if rows.len() != n_analog || rows.iter().any(|r| r.len() != n_analog) {
        return Err(format!(
            "Whitening matrix in '{}' must be {}x{}",
            path, n_analog, n_analog
        ));
    }
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    let matrix = Array2::from_shape_vec((n_analog, n_analog), flat)
        .map_err(|e| format!("Whitening matrix shape: {}", e))?;
    Ok(Some(matrix))
}

pub fn parse_dtype(dtype: &str) -> Result<OutputDtype, String> {
    match dtype {
        "int16" => Ok(OutputDtype::Int16),
        "int32" => Ok(OutputDtype::Int32),
        other => Err(format!(
            "Unknown output dtype '{}': expected int16 or int32",
            other
        )),
    }
}

pub fn build_config(args: &RunArgs) -> Result<PipelineConfig, String> {
    Ok(PipelineConfig {
        batch_size: args.batch_size,
        taper_samples: args.taper,
        n_workers: args.workers,
        append: args.append,
        pad_samples: args.pad_samples,
        output_dtype: parse_dtype(&args.dtype)?,
    })
}

/// Map engine errors onto process exit codes.
pub fn exit_code_for(error: &DestripeError) -> i32 {
    match error {
        DestripeError::InvalidConfig(_)
        | DestripeError::FileNotFound(_)
        | DestripeError::Metadata(_)
        | DestripeError::DimensionMismatch(_) => exit_codes::INPUT_ERROR,
        DestripeError::ResumeState(_) => exit_codes::RESUME_ERROR,
        DestripeError::WorkerFailed { source, .. } => match source.as_ref() {
            DestripeError::ResumeState(_) => exit_codes::RESUME_ERROR,
            _ => exit_codes::EXECUTION_ERROR,
        },
        DestripeError::IoError(_) => exit_codes::EXECUTION_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_for("/data/session.bin"),
            PathBuf::from("/data/session.destriped.bin")
        );
    }

    #[test]
    fn test_parse_dtype() {
        assert_eq!(parse_dtype("int16").unwrap(), OutputDtype::Int16);
        assert_eq!(parse_dtype("int32").unwrap(), OutputDtype::Int32);
        assert!(parse_dtype("float32").is_err());
    }

    #[test]
    fn test_load_spec_default() {
        let spec = load_spec(None).unwrap();
        assert_eq!(spec.temporal.cutoff_hz, 300.0);
    }

    #[test]
    fn test_load_whiten_rejects_ragged_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.json");
        std::fs::write(&path, "[[1.0, 0.0], [0.0]]").unwrap();
        assert!(load_whiten(path.to_str(), 2).is_err());
    }

    #[test]
    fn test_load_whiten_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.json");
        std::fs::write(&path, "[[1.0, 0.0], [0.0, 1.0]]").unwrap();
        let w = load_whiten(path.to_str(), 2).unwrap().unwrap();
        assert_eq!(w[[0, 0]], 1.0);
        assert_eq!(w[[1, 0]], 0.0);
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(
            exit_code_for(&DestripeError::InvalidConfig("x".into())),
            exit_codes::INPUT_ERROR
        );
        assert_eq!(
            exit_code_for(&DestripeError::ResumeState("x".into())),
            exit_codes::RESUME_ERROR
        );
    }
}
