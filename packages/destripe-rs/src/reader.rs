//! Raw recording access.
//!
//! The pipeline consumes any `RawRecording` implementation; the in-repo
//! `FlatRecording` memory-maps an int16 interleaved flat binary file with a
//! JSON metadata sidecar describing channel counts, sample rate and the
//! per-channel analog conversion factors.

use crate::error::{DestripeError, Result};
use memmap2::Mmap;
use ndarray::{s, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Random-access source of raw samples, shared read-only across workers.
pub trait RawRecording: Sync {
    /// Total channel count, auxiliary/sync channels included.
    fn n_channels(&self) -> usize;
    /// Auxiliary/sync channels occupying the last rows.
    fn n_sync_channels(&self) -> usize;
    fn n_samples(&self) -> usize;
    fn sample_rate(&self) -> f64;
    /// Volts per count, one entry per analog channel.
    fn conversion_factors(&self) -> &[f32];
    /// Raw counts as `[n_channels, last - first]`.
    fn read(&self, first: usize, last: usize) -> Result<Array2<f32>>;

    fn n_analog_channels(&self) -> usize {
        self.n_channels() - self.n_sync_channels()
    }

    /// Like `read`, with analog rows scaled to volts. Sync rows keep their
    /// raw counts.
    fn read_volts(&self, first: usize, last: usize) -> Result<Array2<f32>> {
        let mut block = self.read(first, last)?;
        let ncv = self.n_analog_channels();
        let factors = self.conversion_factors();
        for (i, mut row) in block
            .slice_mut(s![..ncv, ..])
            .axis_iter_mut(Axis(0))
            .enumerate()
        {
            let factor = factors[i];
            row.mapv_inplace(|v| v * factor);
        }
        Ok(block)
    }
}

/// JSON sidecar describing a flat binary recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMeta {
    pub n_channels: usize,
    #[serde(default)]
    pub n_sync_channels: usize,
    pub sample_rate: f64,
    /// Volts per count; a single entry broadcasts to every analog channel.
    pub conversion_factors: Vec<f32>,
}

impl RecordingMeta {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DestripeError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let meta: RecordingMeta = serde_json::from_str(&content)
            .map_err(|e| DestripeError::Metadata(format!("invalid metadata file: {}", e)))?;
        meta.validate()?;
        Ok(meta)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DestripeError::Metadata(format!("metadata serialization: {}", e)))?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn n_analog_channels(&self) -> usize {
        self.n_channels - self.n_sync_channels
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_channels == 0 {
            return Err(DestripeError::Metadata("zero channels".into()));
        }
        if self.n_sync_channels >= self.n_channels {
            return Err(DestripeError::Metadata(format!(
                "{} sync channels leave no analog channels out of {}",
                self.n_sync_channels, self.n_channels
            )));
        }
        if self.sample_rate <= 0.0 {
            return Err(DestripeError::Metadata(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        let ncv = self.n_analog_channels();
        if self.conversion_factors.len() != ncv && self.conversion_factors.len() != 1 {
            return Err(DestripeError::Metadata(format!(
                "{} conversion factors for {} analog channels",
                self.conversion_factors.len(),
                ncv
            )));
        }
        if self.conversion_factors.iter().any(|&f| f <= 0.0) {
            return Err(DestripeError::Metadata(
                "conversion factors must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Sidecar path convention: `session.bin` -> `session.meta.json`.
pub fn meta_path_for<P: AsRef<Path>>(bin_path: P) -> PathBuf {
    bin_path.as_ref().with_extension("meta.json")
}

/// Open a file and map it into memory (read-only).
fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(DestripeError::IoError)?;
    let mmap = unsafe { Mmap::map(&file).map_err(DestripeError::IoError)? };
    Ok(mmap)
}

/// Memory-mapped int16 interleaved flat binary recording.
pub struct FlatRecording {
    mmap: Mmap,
    meta: RecordingMeta,
    conversion: Vec<f32>,
    n_samples: usize,
    path: PathBuf,
}

impl FlatRecording {
    /// Open `session.bin` next to its `session.meta.json` sidecar.
    pub fn open<P: AsRef<Path>>(bin_path: P) -> Result<Self> {
        let meta = RecordingMeta::load(meta_path_for(&bin_path))?;
        Self::open_with_meta(bin_path, meta)
    }

    pub fn open_with_meta<P: AsRef<Path>>(bin_path: P, meta: RecordingMeta) -> Result<Self> {
        let path = bin_path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(DestripeError::FileNotFound(path.display().to_string()));
        }
        meta.validate()?;
        let mmap = mmap_file(&path)?;

        let row_bytes = meta.n_channels * 2;
        let n_samples = mmap.len() / row_bytes;
        if mmap.len() % row_bytes != 0 {
            log::warn!(
                "{}: {} trailing bytes do not form a whole sample row, truncating to {} samples",
                path.display(),
                mmap.len() % row_bytes,
                n_samples
            );
        }

        let ncv = meta.n_analog_channels();
        let conversion = if meta.conversion_factors.len() == 1 {
            vec![meta.conversion_factors[0]; ncv]
        } else {
            meta.conversion_factors.clone()
        };

        Ok(Self {
            mmap,
            meta,
            conversion,
            n_samples,
            path,
        })
    }

    pub fn meta(&self) -> &RecordingMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RawRecording for FlatRecording {
    fn n_channels(&self) -> usize {
        self.meta.n_channels
    }

    fn n_sync_channels(&self) -> usize {
        self.meta.n_sync_channels
    }

    fn n_samples(&self) -> usize {
        self.n_samples
    }

    fn sample_rate(&self) -> f64 {
        self.meta.sample_rate
    }

    fn conversion_factors(&self) -> &[f32] {
        &self.conversion
    }

    fn read(&self, first: usize, last: usize) -> Result<Array2<f32>> {
        if first > last || last > self.n_samples {
            return Err(DestripeError::DimensionMismatch(format!(
                "read range [{}, {}) outside recording of {} samples",
                first, last, self.n_samples
            )));
        }
        let nc = self.meta.n_channels;
        let len = last - first;
        let bytes = &self.mmap[..];
        let mut out = Array2::<f32>::zeros((nc, len));
        for t in 0..len {
            let row_offset = (first + t) * nc * 2;
            for c in 0..nc {
                let o = row_offset + c * 2;
                let value = i16::from_le_bytes([bytes[o], bytes[o + 1]]);
                out[[c, t]] = value as f32;
            }
        }
        Ok(out)
    }
}
