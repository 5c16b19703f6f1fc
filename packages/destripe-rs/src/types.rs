use crate::error::{DestripeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Native Neuropixels acquisition rate used as the reference for ADC shift scaling.
pub const NATIVE_SAMPLE_RATE: f64 = 30_000.0;

/// Decimation ratio above which ADC sample shifts are rescaled to the recording rate.
pub const SHIFT_SCALE_RATIO: f64 = 10.0;

/// Zero-phase temporal highpass applied along the time axis of every analog channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalFilterSpec {
    /// Butterworth order
    #[serde(default = "default_temporal_order")]
    pub order: usize,
    /// Cutoff frequency in Hz
    #[serde(default = "default_temporal_cutoff")]
    pub cutoff_hz: f64,
}

fn default_temporal_order() -> usize {
    3
}
fn default_temporal_cutoff() -> f64 {
    300.0
}

impl Default for TemporalFilterSpec {
    fn default() -> Self {
        Self {
            order: default_temporal_order(),
            cutoff_hz: default_temporal_cutoff(),
        }
    }
}

/// Zero-phase Butterworth highpass applied along the channel axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialFilterSpec {
    #[serde(default = "default_spatial_order")]
    pub order: usize,
    /// Cutoff as a fraction of the spatial Nyquist (cycles per channel pitch)
    #[serde(default = "default_spatial_cutoff")]
    pub cutoff: f64,
    /// Mirrored channels added to each spatial edge before filtering
    #[serde(default = "default_pad_channels")]
    pub pad_channels: usize,
    /// Raised-cosine apodization width at each spatial edge
    #[serde(default)]
    pub taper_channels: usize,
    /// Time-domain AGC window in samples; 0 disables the AGC
    #[serde(default = "default_spatial_agc_window")]
    pub agc_window_samples: usize,
}

fn default_spatial_order() -> usize {
    3
}
fn default_spatial_cutoff() -> f64 {
    0.01
}
fn default_pad_channels() -> usize {
    60
}
fn default_spatial_agc_window() -> usize {
    3000
}

impl Default for SpatialFilterSpec {
    fn default() -> Self {
        Self {
            order: default_spatial_order(),
            cutoff: default_spatial_cutoff(),
            pad_channels: default_pad_channels(),
            taper_channels: 0,
            agc_window_samples: default_spatial_agc_window(),
        }
    }
}

/// Pass-band selection for velocity and wavenumber masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandMode {
    Highpass,
    Lowpass,
}

/// Optional wavenumber-only mask composed with the FK velocity mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavenumberFilterSpec {
    /// Raised-cosine band edges in cycles per meter
    pub bounds: [f64; 2],
    pub mode: BandMode,
}

/// Frequency-wavenumber filter over the (channel, time) plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FkFilterSpec {
    /// Apparent-velocity band edges in m/s; cosine ramp between the two
    pub velocity_bounds: [f64; 2],
    #[serde(default = "default_fk_mode")]
    pub mode: BandMode,
    #[serde(default)]
    pub pad_channels: usize,
    /// Apodization width; defaults to `pad_channels` when absent
    #[serde(default)]
    pub taper_channels: Option<usize>,
    /// Time-domain AGC window in seconds; 0 disables the AGC
    #[serde(default = "default_fk_agc_window")]
    pub agc_window_s: f64,
    /// Spatial sampling interval in meters
    #[serde(default = "default_spatial_interval")]
    pub spatial_interval: f64,
    #[serde(default)]
    pub kfilt: Option<WavenumberFilterSpec>,
}

fn default_fk_mode() -> BandMode {
    BandMode::Highpass
}
fn default_fk_agc_window() -> f64 {
    0.5
}
fn default_spatial_interval() -> f64 {
    1.0
}

/// Complete filtering configuration, built once and shared read-only by all workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub temporal: TemporalFilterSpec,
    #[serde(default)]
    pub spatial: SpatialFilterSpec,
    /// When set, the spatial stage uses the FK velocity filter instead of the
    /// Butterworth channel highpass.
    #[serde(default)]
    pub fk: Option<FkFilterSpec>,
    #[serde(default = "default_agc_epsilon")]
    pub agc_epsilon: f64,
}

fn default_agc_epsilon() -> f64 {
    1e-8
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            temporal: TemporalFilterSpec::default(),
            spatial: SpatialFilterSpec::default(),
            fk: None,
            agc_epsilon: default_agc_epsilon(),
        }
    }
}

impl FilterSpec {
    /// Check every parameter against the recording rate before any work starts.
    pub fn validate(&self, sample_rate: f64) -> Result<()> {
        let nyquist = sample_rate / 2.0;
        if self.temporal.order == 0 {
            return Err(DestripeError::InvalidConfig(
                "temporal filter order must be at least 1".into(),
            ));
        }
        if self.temporal.cutoff_hz <= 0.0 || self.temporal.cutoff_hz >= nyquist {
            return Err(DestripeError::InvalidConfig(format!(
                "temporal cutoff ({} Hz) must lie in (0, {} Hz)",
                self.temporal.cutoff_hz, nyquist
            )));
        }
        if self.spatial.order == 0 {
            return Err(DestripeError::InvalidConfig(
                "spatial filter order must be at least 1".into(),
            ));
        }
        if self.spatial.cutoff <= 0.0 || self.spatial.cutoff >= 1.0 {
            return Err(DestripeError::InvalidConfig(format!(
                "spatial cutoff ({}) must lie in (0, 1)",
                self.spatial.cutoff
            )));
        }
        if self.agc_epsilon <= 0.0 {
            return Err(DestripeError::InvalidConfig(
                "agc epsilon must be positive".into(),
            ));
        }
        if let Some(ref fk) = self.fk {
            if fk.velocity_bounds[0] >= fk.velocity_bounds[1] || fk.velocity_bounds[0] < 0.0 {
                return Err(DestripeError::InvalidConfig(format!(
                    "velocity bounds {:?} must be increasing and non-negative",
                    fk.velocity_bounds
                )));
            }
            if fk.spatial_interval <= 0.0 {
                return Err(DestripeError::InvalidConfig(
                    "spatial interval must be positive".into(),
                ));
            }
            if fk.agc_window_s < 0.0 {
                return Err(DestripeError::InvalidConfig(
                    "agc window must be non-negative".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Immutable per-recording probe description shared by all workers.
///
/// `sample_shift` holds the fractional ADC multiplexing delay of each channel
/// in samples at the native acquisition rate. `collection` optionally groups
/// channels (e.g. by shank) so spatial filtering never mixes groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeGeometry {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub sample_shift: Vec<f64>,
    #[serde(default)]
    pub collection: Option<Vec<u32>>,
}

impl ProbeGeometry {
    /// Default Neuropixels layout: staggered four-column site grid and the
    /// ADC multiplexing cycle of the given probe version (12 for 1.0, 16 for 2.0).
    pub fn neuropixel(n_channels: usize, version: u32) -> Self {
        let cycle = if version >= 2 { 16 } else { 12 };
        let x_pattern: [f32; 4] = [16.0, 48.0, 0.0, 32.0];
        let mut x = Vec::with_capacity(n_channels);
        let mut y = Vec::with_capacity(n_channels);
        let mut sample_shift = Vec::with_capacity(n_channels);
        for i in 0..n_channels {
            x.push(x_pattern[i % 4]);
            y.push((i / 2) as f32 * 20.0);
            sample_shift.push((i % cycle) as f64 / cycle as f64);
        }
        Self {
            x,
            y,
            sample_shift,
            collection: None,
        }
    }

    pub fn len(&self) -> usize {
        self.sample_shift.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_shift.is_empty()
    }

    pub fn validate(&self, n_channels: usize) -> Result<()> {
        if self.x.len() != n_channels
            || self.y.len() != n_channels
            || self.sample_shift.len() != n_channels
        {
            return Err(DestripeError::DimensionMismatch(format!(
                "geometry describes {} channels, recording has {}",
                self.sample_shift.len(),
                n_channels
            )));
        }
        if let Some(ref collection) = self.collection {
            if collection.len() != n_channels {
                return Err(DestripeError::DimensionMismatch(format!(
                    "collection vector length {} does not match {} channels",
                    collection.len(),
                    n_channels
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| DestripeError::Metadata(format!("invalid geometry file: {}", e)))
    }
}

/// Per-channel quality label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLabel {
    Good,
    Dead,
    Noisy,
    OutsideBrain,
}

impl ChannelLabel {
    /// Stable integer code used by downstream sorters.
    pub fn code(self) -> u8 {
        match self {
            ChannelLabel::Good => 0,
            ChannelLabel::Dead => 1,
            ChannelLabel::Noisy => 2,
            ChannelLabel::OutsideBrain => 3,
        }
    }
}

/// Thresholds of the bad-channel labeling rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionThresholds {
    /// A channel is dead below this detrended similarity
    #[serde(default = "default_dead_similarity")]
    pub dead_similarity: f64,
    /// A channel is noisy above this detrended similarity
    #[serde(default = "default_noisy_similarity")]
    pub noisy_similarity: f64,
    /// A channel is noisy above this high-frequency power (uV^2/Hz)
    #[serde(default = "default_psd_hf")]
    pub psd_hf: f64,
    /// Channels in a tail-adjacent run below this trend similarity are outside the brain
    #[serde(default = "default_outside_similarity")]
    pub outside_similarity: f64,
    /// Lower edge of the band-power feature in Hz
    #[serde(default = "default_psd_band")]
    pub psd_band_hz: f64,
    /// Highpass cutoff in Hz for the high-frequency similarity pass
    #[serde(default = "default_detect_highpass")]
    pub highpass_hz: f64,
    /// Median filter length for similarity detrending (odd)
    #[serde(default = "default_detrend_window")]
    pub detrend_window: usize,
}

fn default_dead_similarity() -> f64 {
    -0.5
}
fn default_noisy_similarity() -> f64 {
    1.0
}
fn default_psd_hf() -> f64 {
    0.02
}
fn default_outside_similarity() -> f64 {
    -0.75
}
fn default_psd_band() -> f64 {
    12_000.0
}
fn default_detect_highpass() -> f64 {
    1000.0
}
fn default_detrend_window() -> usize {
    11
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            dead_similarity: default_dead_similarity(),
            noisy_similarity: default_noisy_similarity(),
            psd_hf: default_psd_hf(),
            outside_similarity: default_outside_similarity(),
            psd_band_hz: default_psd_band(),
            highpass_hz: default_detect_highpass(),
            detrend_window: default_detrend_window(),
        }
    }
}

impl DetectionThresholds {
    pub fn validate(&self, sample_rate: f64) -> Result<()> {
        if self.detrend_window % 2 == 0 || self.detrend_window == 0 {
            return Err(DestripeError::InvalidConfig(
                "detrend window must be odd".into(),
            ));
        }
        if self.highpass_hz <= 0.0 || self.highpass_hz >= sample_rate / 2.0 {
            return Err(DestripeError::InvalidConfig(format!(
                "detection highpass ({} Hz) must lie below Nyquist",
                self.highpass_hz
            )));
        }
        Ok(())
    }
}

/// Per-channel feature table computed by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFeatures {
    pub ind: Vec<usize>,
    /// RMS of the DC-removed raw trace, in volts
    pub rms_raw: Vec<f64>,
    /// Detrended zero-lag similarity to the median trace
    pub xcor_hf: Vec<f64>,
    /// Low-frequency similarity trend deviation, for boundary detection
    pub xcor_lf: Vec<f64>,
    /// Mean power density above the high-frequency band edge, in uV^2/Hz
    pub psd_hf: Vec<f64>,
}

/// Persisted bad-channel detection artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectReport {
    pub id: String,
    pub file_path: String,
    pub labels: Vec<ChannelLabel>,
    pub features: ChannelFeatures,
    pub thresholds: DetectionThresholds,
    pub created_at: String,
}

impl DetectReport {
    pub fn new(
        file_path: String,
        labels: Vec<ChannelLabel>,
        features: ChannelFeatures,
        thresholds: DetectionThresholds,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path,
            labels,
            features,
            thresholds,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Output sample format of the main binary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputDtype {
    Int16,
    Int32,
}

impl Default for OutputDtype {
    fn default() -> Self {
        OutputDtype::Int16
    }
}

impl OutputDtype {
    pub fn sample_bytes(self) -> usize {
        match self {
            OutputDtype::Int16 => 2,
            OutputDtype::Int32 => 4,
        }
    }
}

/// Batch pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Raised-cosine edge taper width in samples
    #[serde(default = "default_taper_samples")]
    pub taper_samples: usize,
    /// Worker count; 0 selects the available parallelism
    #[serde(default)]
    pub n_workers: usize,
    /// Resume a partially written output instead of starting over
    #[serde(default)]
    pub append: bool,
    /// Replicated trailing rows after the last real sample
    #[serde(default)]
    pub pad_samples: usize,
    #[serde(default)]
    pub output_dtype: OutputDtype,
}

fn default_batch_size() -> usize {
    65_536
}
fn default_taper_samples() -> usize {
    128
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            taper_samples: default_taper_samples(),
            n_workers: 0,
            append: false,
            pad_samples: 0,
            output_dtype: OutputDtype::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self, n_samples: usize) -> Result<()> {
        if self.taper_samples == 0 {
            return Err(DestripeError::InvalidConfig(
                "edge taper must be at least 1 sample".into(),
            ));
        }
        if self.batch_size <= 2 * self.taper_samples {
            return Err(DestripeError::InvalidConfig(format!(
                "batch size ({}) must exceed twice the edge taper ({})",
                self.batch_size, self.taper_samples
            )));
        }
        if n_samples <= 2 * self.taper_samples {
            return Err(DestripeError::InvalidConfig(format!(
                "recording of {} samples is shorter than twice the edge taper",
                n_samples
            )));
        }
        Ok(())
    }
}

/// One batch of the partition plan. Save regions of consecutive descriptors
/// tile the recording exactly; the read range extends one taper width past
/// the save region on each interior side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub index: usize,
    pub first_sample: usize,
    pub last_sample: usize,
    pub save_first: usize,
    pub save_last: usize,
    pub is_first: bool,
    pub is_last: bool,
}

impl BatchDescriptor {
    pub fn n_samples(&self) -> usize {
        self.last_sample - self.first_sample
    }

    pub fn save_len(&self) -> usize {
        self.save_last - self.save_first
    }
}

/// Summary returned by a completed pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub id: String,
    pub output_file: PathBuf,
    pub rms_file: PathBuf,
    /// Rows written by this run, including end padding
    pub samples_written: u64,
    pub n_batches: usize,
    pub n_workers: usize,
    pub created_at: String,
}

impl PipelineReport {
    pub fn new(
        output_file: PathBuf,
        rms_file: PathBuf,
        samples_written: u64,
        n_batches: usize,
        n_workers: usize,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            output_file,
            rms_file,
            samples_written,
            n_batches,
            n_workers,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
