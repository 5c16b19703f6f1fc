use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "destripe",
    version,
    about = "Extracellular voltage destriping command-line tool",
    long_about = "Destripe raw Neuropixels-style recordings: temporal highpass, ADC \n\
                  realignment and spatial filtering, written back as flat int16 plus a \n\
                  per-batch RMS side file. Recordings are int16 flat binaries with a \n\
                  .meta.json sidecar."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Destripe a whole recording into a flat binary output
    Run(RunArgs),
    /// Classify bad channels from a representative window
    Detect(DetectArgs),
    /// Show recording metadata
    Info(InfoArgs),
    /// Validate a recording (and optionally an append target)
    Validate(ValidateArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Input recording (.bin with .meta.json sidecar)
    #[arg(long)]
    pub file: String,

    /// Output file (default: <input>.destriped.bin)
    #[arg(short, long)]
    pub output: Option<String>,

    /// RMS side file (default: <output> with .rms.bin extension)
    #[arg(long)]
    pub rms_output: Option<String>,

    /// Probe geometry JSON (default: built-in Neuropixels layout)
    #[arg(long)]
    pub geometry: Option<String>,

    /// Probe version for the built-in geometry
    #[arg(long, default_value_t = 1)]
    pub probe_version: u32,

    /// Filter specification JSON (default: standard destriping filters)
    #[arg(long)]
    pub spec: Option<String>,

    /// Channel-label report from `detect`, masks the spatial filter
    #[arg(long)]
    pub labels: Option<String>,

    /// Whitening matrix JSON (row-major, analog channels squared)
    #[arg(long)]
    pub whiten: Option<String>,

    /// Samples per batch
    #[arg(long, default_value_t = 65_536)]
    pub batch_size: usize,

    /// Edge taper width in samples
    #[arg(long, default_value_t = 128)]
    pub taper: usize,

    /// Worker count (0 = auto)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Resume a partially written output
    #[arg(long, default_value_t = false)]
    pub append: bool,

    /// Replicated trailing samples after the last real sample
    #[arg(long, default_value_t = 0)]
    pub pad_samples: usize,

    /// Output sample format: int16 or int32
    #[arg(long, default_value = "int16")]
    pub dtype: String,

    /// Output file for the JSON report (default: stdout)
    #[arg(long)]
    pub report: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct DetectArgs {
    /// Input recording (.bin with .meta.json sidecar)
    #[arg(long)]
    pub file: String,

    /// Window start in seconds (default: centered)
    #[arg(long)]
    pub start: Option<f64>,

    /// Window duration in seconds
    #[arg(long, default_value_t = 1.0)]
    pub duration: f64,

    /// Detection thresholds JSON (default: standard thresholds)
    #[arg(long)]
    pub thresholds: Option<String>,

    /// Output file for the JSON report (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Input recording (.bin with .meta.json sidecar)
    #[arg(long)]
    pub file: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Input recording (.bin with .meta.json sidecar)
    #[arg(long)]
    pub file: String,

    /// Append target to check for a clean resume point
    #[arg(long)]
    pub output: Option<String>,

    /// Sample format the append target was written with: int16 or int32
    #[arg(long, default_value = "int16")]
    pub dtype: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
