//! Parallel decompression and destriping of a whole recording.
//!
//! The recording is cut into overlapping batches whose save regions tile the
//! sample range exactly; contiguous runs of batches are handed to independent
//! rayon workers. Workers share nothing mutable: each one opens its own file
//! handles and seek-writes strictly inside the byte range implied by its
//! batch descriptors. Both output files are pre-sized before any worker
//! starts, so there is no growth to race on.

use crate::destripe::Destriper;
use crate::error::{DestripeError, Result};
use crate::profiling::ProfileScope;
use crate::reader::RawRecording;
use crate::types::{
    BatchDescriptor, ChannelLabel, FilterSpec, OutputDtype, PipelineConfig, PipelineReport,
    ProbeGeometry,
};
use ndarray::{s, Array2, Axis};
use rayon::prelude::*;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Everything a single pipeline run needs besides the reader.
pub struct PipelineRequest<'a> {
    pub output_file: PathBuf,
    /// Defaults to the output path with an `rms.bin` extension.
    pub rms_file: Option<PathBuf>,
    pub spec: &'a FilterSpec,
    pub geometry: &'a ProbeGeometry,
    pub config: PipelineConfig,
    /// Optional channel decorrelation matrix applied before quantization.
    pub whiten: Option<Array2<f32>>,
    /// Optional labels confining the spatial filter to GOOD channels.
    pub labels: Option<Vec<ChannelLabel>>,
}

impl<'a> PipelineRequest<'a> {
    pub fn new(output_file: PathBuf, spec: &'a FilterSpec, geometry: &'a ProbeGeometry) -> Self {
        Self {
            output_file,
            rms_file: None,
            spec,
            geometry,
            config: PipelineConfig::default(),
            whiten: None,
            labels: None,
        }
    }

    pub fn rms_path(&self) -> PathBuf {
        self.rms_file
            .clone()
            .unwrap_or_else(|| self.output_file.with_extension("rms.bin"))
    }
}

/// Cut `n_samples` into overlapping batches whose save regions tile
/// `[0, n_samples)` with no overlap and no gap. Every batch is strictly
/// longer than twice the taper, the first batch saves its leading taper and
/// the last batch saves through the end of the recording.
pub fn partition(
    n_samples: usize,
    batch_size: usize,
    taper: usize,
) -> Result<Vec<BatchDescriptor>> {
    if taper == 0 || batch_size <= 2 * taper {
        return Err(DestripeError::InvalidConfig(format!(
            "batch size ({}) must exceed twice the edge taper ({})",
            batch_size, taper
        )));
    }
    if n_samples <= 2 * taper {
        return Err(DestripeError::InvalidConfig(format!(
            "recording of {} samples is shorter than twice the edge taper",
            n_samples
        )));
    }
    let stride = batch_size - 2 * taper;
    let n_batches = if n_samples <= batch_size {
        1
    } else {
        1 + (n_samples - batch_size).div_ceil(stride)
    };

    let mut batches = Vec::with_capacity(n_batches);
    for index in 0..n_batches {
        let first_sample = index * stride;
        let last_sample = (first_sample + batch_size).min(n_samples);
        let is_first = index == 0;
        let is_last = index == n_batches - 1;
        let save_first = if is_first { 0 } else { first_sample + taper };
        let save_last = if is_last {
            n_samples
        } else {
            first_sample + taper + stride
        };
        batches.push(BatchDescriptor {
            index,
            first_sample,
            last_sample,
            save_first,
            save_last,
            is_first,
            is_last,
        });
    }
    Ok(batches)
}

/// Split `n_batches` into at most `n_workers` contiguous, balanced ranges.
pub fn worker_ranges(n_batches: usize, n_workers: usize) -> Vec<std::ops::Range<usize>> {
    if n_batches == 0 {
        return vec![];
    }
    let n_workers = n_workers.max(1).min(n_batches);
    let base = n_batches / n_workers;
    let extra = n_batches % n_workers;
    let mut ranges = Vec::with_capacity(n_workers);
    let mut start = 0;
    for w in 0..n_workers {
        let len = base + usize::from(w < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Run the full pipeline: read, destripe, re-quantize and write the whole
/// recording, along with the per-batch RMS side file.
pub fn decompress_destripe<R: RawRecording>(
    reader: &R,
    request: &PipelineRequest,
) -> Result<PipelineReport> {
    let ns = reader.n_samples();
    let nc_out = reader.n_channels();
    let ncv = reader.n_analog_channels();
    let sample_rate = reader.sample_rate();
    let config = &request.config;

    config.validate(ns)?;
    request.spec.validate(sample_rate)?;
    request.geometry.validate(ncv)?;
    if let Some(ref w) = request.whiten {
        if w.dim() != (ncv, ncv) {
            return Err(DestripeError::InvalidConfig(format!(
                "whitening matrix is {:?}, expected ({}, {})",
                w.dim(),
                ncv,
                ncv
            )));
        }
    }
    if let Some(ref labels) = request.labels {
        if labels.len() != ncv {
            return Err(DestripeError::DimensionMismatch(format!(
                "{} channel labels for {} analog channels",
                labels.len(),
                ncv
            )));
        }
    }

    let batches = partition(ns, config.batch_size, config.taper_samples)?;
    let n_batches = batches.len();
    let sample_bytes = config.output_dtype.sample_bytes();
    let row_bytes = (nc_out * sample_bytes) as u64;
    let rms_row_bytes = (ncv * 4) as u64;

    let output_file = request.output_file.clone();
    let rms_file = request.rms_path();

    let start_batch = if config.append {
        resume_start_batch(&batches, &output_file, &rms_file, row_bytes, rms_row_bytes, ns)?
    } else {
        std::fs::File::create(&output_file)?;
        std::fs::File::create(&rms_file)?;
        0
    };

    if start_batch == n_batches {
        log::info!(
            "{} already covers all {} samples, nothing to append",
            output_file.display(),
            ns
        );
        return Ok(PipelineReport::new(output_file, rms_file, 0, n_batches, 0));
    }

    let total_rows = (ns + config.pad_samples) as u64;
    {
        let out = OpenOptions::new().write(true).open(&output_file)?;
        out.set_len(total_rows * row_bytes)?;
        let rms = OpenOptions::new().write(true).open(&rms_file)?;
        rms.set_len(n_batches as u64 * rms_row_bytes)?;
    }

    let destriper = Destriper::new(request.spec, request.geometry, sample_rate)?;
    let remaining = &batches[start_batch..];
    let requested_workers = if config.n_workers > 0 {
        config.n_workers
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    };
    let ranges = worker_ranges(remaining.len(), requested_workers);
    let n_workers = ranges.len();
    log::info!(
        "destriping {} batches of {} samples across {} workers",
        remaining.len(),
        config.batch_size,
        n_workers
    );

    let results: Vec<Result<()>> = ranges
        .par_iter()
        .enumerate()
        .map(|(worker_id, range)| {
            run_worker(WorkerTask {
                worker_id,
                batches: &remaining[range.clone()],
                reader,
                destriper: &destriper,
                labels: request.labels.as_deref(),
                whiten: request.whiten.as_ref(),
                output_file: &output_file,
                rms_file: &rms_file,
                dtype: config.output_dtype,
                taper: config.taper_samples,
                pad_samples: config.pad_samples,
            })
        })
        .collect();
    for result in results {
        result?;
    }

    let samples_written = (ns - batches[start_batch].save_first + config.pad_samples) as u64;
    Ok(PipelineReport::new(
        output_file,
        rms_file,
        samples_written,
        n_batches,
        n_workers,
    ))
}

/// Locate the batch a clean append run must restart from, or `batches.len()`
/// when the output is already complete. Never repairs a malformed file.
fn resume_start_batch(
    batches: &[BatchDescriptor],
    output_file: &Path,
    rms_file: &Path,
    row_bytes: u64,
    rms_row_bytes: u64,
    n_samples: usize,
) -> Result<usize> {
    let out_size = std::fs::metadata(output_file)
        .map_err(|_| {
            DestripeError::ResumeState(format!(
                "append requested but {} does not exist",
                output_file.display()
            ))
        })?
        .len();
    let rms_size = std::fs::metadata(rms_file)
        .map_err(|_| {
            DestripeError::ResumeState(format!(
                "append requested but {} does not exist",
                rms_file.display()
            ))
        })?
        .len();

    if out_size % row_bytes != 0 {
        return Err(DestripeError::ResumeState(format!(
            "{} is {} bytes, not a whole number of {}-byte rows",
            output_file.display(),
            out_size,
            row_bytes
        )));
    }
    let rows_written = (out_size / row_bytes) as usize;
    if rows_written >= n_samples {
        return Ok(batches.len());
    }
    let start = batches
        .iter()
        .position(|b| b.save_first == rows_written)
        .ok_or_else(|| {
            DestripeError::ResumeState(format!(
                "existing {} rows do not land on a batch boundary",
                rows_written
            ))
        })?;
    let expected_rms = batches[start].index as u64 * rms_row_bytes;
    if rms_size != expected_rms {
        return Err(DestripeError::ResumeState(format!(
            "{} is {} bytes, expected {} for {} completed batches",
            rms_file.display(),
            rms_size,
            expected_rms,
            batches[start].index
        )));
    }
    Ok(start)
}

struct WorkerTask<'a, R: RawRecording> {
    worker_id: usize,
    batches: &'a [BatchDescriptor],
    reader: &'a R,
    destriper: &'a Destriper<'a>,
    labels: Option<&'a [ChannelLabel]>,
    whiten: Option<&'a Array2<f32>>,
    output_file: &'a Path,
    rms_file: &'a Path,
    dtype: OutputDtype,
    taper: usize,
    pad_samples: usize,
}

fn run_worker<R: RawRecording>(task: WorkerTask<R>) -> Result<()> {
    let first_offset = task
        .batches
        .first()
        .map(|b| b.save_first as u64)
        .unwrap_or(0);
    let wrap = |e: DestripeError, byte_offset: u64| DestripeError::WorkerFailed {
        worker_id: task.worker_id,
        byte_offset,
        source: Box::new(e),
    };

    let _scope = ProfileScope::new(format!("worker {}", task.worker_id));
    let mut out = OpenOptions::new()
        .write(true)
        .open(task.output_file)
        .map_err(|e| wrap(e.into(), first_offset))?;
    let mut rms = OpenOptions::new()
        .write(true)
        .open(task.rms_file)
        .map_err(|e| wrap(e.into(), first_offset))?;

    let sample_bytes = task.dtype.sample_bytes();
    let row_bytes = (task.reader.n_channels() * sample_bytes) as u64;
    let (taper_up, taper_down) = edge_tapers(task.taper);
    let inv_conversion: Vec<f32> = task
        .reader
        .conversion_factors()
        .iter()
        .map(|&f| 1.0 / f)
        .collect();

    for desc in task.batches {
        let byte_offset = desc.save_first as u64 * row_bytes;
        process_batch(
            &task,
            desc,
            &taper_up,
            &taper_down,
            &inv_conversion,
            &mut out,
            &mut rms,
        )
        .map_err(|e| wrap(e, byte_offset))?;
    }
    Ok(())
}

fn process_batch<R: RawRecording>(
    task: &WorkerTask<R>,
    desc: &BatchDescriptor,
    taper_up: &[f32],
    taper_down: &[f32],
    inv_conversion: &[f32],
    out: &mut std::fs::File,
    rms: &mut std::fs::File,
) -> Result<()> {
    let nc_out = task.reader.n_channels();
    let ncv = task.reader.n_analog_channels();
    let n_t = desc.n_samples();

    let block = task.reader.read_volts(desc.first_sample, desc.last_sample)?;
    let mut analog = block.slice(s![..ncv, ..]).to_owned();

    // channel noise of the raw batch, before any filtering
    let mut rms_bytes = Vec::with_capacity(ncv * 4);
    for row in analog.axis_iter(Axis(0)) {
        let mean = row.sum() / n_t as f32;
        let power = row
            .iter()
            .map(|&v| {
                let d = (v - mean) as f64;
                d * d
            })
            .sum::<f64>()
            / n_t as f64;
        rms_bytes.extend_from_slice(&(power.sqrt() as f32).to_le_bytes());
    }
    rms.seek(SeekFrom::Start(desc.index as u64 * (ncv * 4) as u64))?;
    rms.write_all(&rms_bytes)?;

    // edge tapers against FFT boundary ringing
    let t = taper_up.len();
    for mut row in analog.axis_iter_mut(Axis(0)) {
        for (i, &w) in taper_up.iter().enumerate() {
            row[i] *= w;
        }
        for (i, &w) in taper_down.iter().enumerate() {
            row[n_t - t + i] *= w;
        }
    }

    task.destriper.process(&mut analog, task.labels)?;

    let s0 = desc.save_first - desc.first_sample;
    let s1 = desc.save_last - desc.first_sample;

    // back to integer counts
    for (i, mut row) in analog.axis_iter_mut(Axis(0)).enumerate() {
        let g = inv_conversion[i];
        row.mapv_inplace(|v| v * g);
    }
    let save = if let Some(w) = task.whiten {
        w.t().dot(&analog.slice(s![.., s0..s1]))
    } else {
        analog.slice(s![.., s0..s1]).to_owned()
    };

    let n_save = s1 - s0;
    let sample_bytes = task.dtype.sample_bytes();
    let mut buf: Vec<u8> = Vec::with_capacity(n_save * nc_out * sample_bytes);
    let mut last_row: Vec<u8> = Vec::new();
    for tcol in 0..n_save {
        let row_start = buf.len();
        for c in 0..ncv {
            write_sample(&mut buf, save[[c, tcol]], task.dtype);
        }
        for c in ncv..nc_out {
            write_sample(&mut buf, block[[c, s0 + tcol]], task.dtype);
        }
        if desc.is_last && task.pad_samples > 0 && tcol == n_save - 1 {
            last_row = buf[row_start..].to_vec();
        }
    }
    out.seek(SeekFrom::Start(
        desc.save_first as u64 * (nc_out * sample_bytes) as u64,
    ))?;
    out.write_all(&buf)?;

    // replicate the final row so the file length hits a downstream batch multiple
    if desc.is_last && task.pad_samples > 0 {
        let mut pad = Vec::with_capacity(task.pad_samples * last_row.len());
        for _ in 0..task.pad_samples {
            pad.extend_from_slice(&last_row);
        }
        out.write_all(&pad)?;
    }
    Ok(())
}

fn write_sample(buf: &mut Vec<u8>, value: f32, dtype: OutputDtype) {
    match dtype {
        OutputDtype::Int16 => {
            let q = value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            buf.extend_from_slice(&q.to_le_bytes());
        }
        OutputDtype::Int32 => {
            let q = (value as f64)
                .round()
                .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            buf.extend_from_slice(&q.to_le_bytes());
        }
    }
}

/// Raised-cosine edge tapers: zero at the outermost sample, rising to one at
/// the batch interior, mirrored for the trailing edge.
fn edge_tapers(taper: usize) -> (Vec<f32>, Vec<f32>) {
    let m = 2 * (taper - 1);
    let mut full = Vec::with_capacity(2 * taper);
    full.push(0.0_f32);
    for k in 0..m {
        full.push((std::f64::consts::PI * (k as f64 + 0.5) / m as f64).sin() as f32);
    }
    full.push(0.0);
    (full[..taper].to_vec(), full[taper..].to_vec())
}
