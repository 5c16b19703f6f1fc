pub mod destripe;
pub mod detect;
pub mod error;
pub mod filters;
pub mod fourier;
pub mod profiling;
pub mod reader;
pub mod runner;
pub mod spatial;
pub mod types;

pub use destripe::{destripe, Destriper};
pub use detect::{detect_bad_channels, label_channels, rcoeff, reject_channels};
pub use error::{DestripeError, Result};
pub use reader::{meta_path_for, FlatRecording, RawRecording, RecordingMeta};
pub use runner::{decompress_destripe, partition, worker_ranges, PipelineRequest};
pub use spatial::{agc, fk_velocity_filter, spatial_highpass};
pub use types::*;
