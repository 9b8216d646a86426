// crates/clipshift-cli/src/cli.rs
//
// Command-line argument structures.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use clipshift_core::{ExportFormat, StillFormat};

#[derive(Parser, Debug)]
#[command(
    name = "clipshift",
    version,
    about = "Trim, crop, grade and convert clips and image sequences",
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Pipeline settings file (TOML). Missing keys keep their defaults.
    #[arg(long, global = true, value_name = "FILE", env = "CLIPSHIFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `clipshift_media=trace`. `RUST_LOG` wins
    /// when set.
    #[arg(long, global = true, default_value = "info", value_name = "FILTER")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every queued job of a job list
    Run(RunArgs),
    /// Convert one file or image sequence right away
    Convert(ConvertArgs),
    /// Find clips and sequences under a folder
    Scan(ScanArgs),
    /// Print what the pipeline learns about a source
    Probe(ProbeArgs),
    /// Save a single still from a source
    Thumb(ThumbArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Job list written by `scan --export` or a previous export
    #[arg(value_name = "JOBS")]
    pub jobs: PathBuf,

    /// Directory for outputs
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Write the job list back with the final statuses
    #[arg(long)]
    pub write_back: bool,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// A video file, or any frame of a numbered image sequence
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// GIF, MP4, WebM, WebP, Sequence or Thumbnail
    #[arg(short, long, default_value = "GIF", value_parser = parse_format)]
    pub format: ExportFormat,

    #[command(flatten)]
    pub edit: EditArgs,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Trim start in seconds (capture time for Thumbnail)
    #[arg(long, default_value_t = 0.0)]
    pub start: f64,

    /// Trim end in seconds; defaults to the end of the source
    #[arg(long)]
    pub end: Option<f64>,

    /// Output width; height follows the aspect ratio
    #[arg(long, default_value = "1280")]
    pub width: String,

    /// Output frame rate, also the sequence rate for image inputs
    #[arg(long, default_value = "24")]
    pub fps: String,

    /// Loop count for GIF and WebP; 0 loops forever
    #[arg(long = "loop", default_value = "0")]
    pub loop_count: String,

    /// Video bitrate in Mbps for MP4 and WebM
    #[arg(long, default_value = "2")]
    pub bitrate: String,

    /// Image format for Sequence and Thumbnail
    #[arg(long, default_value = "png", value_parser = parse_still)]
    pub still: StillFormat,

    /// Normalized crop rectangle x1,y1,x2,y2 in [0, 1]
    #[arg(long, value_delimiter = ',', value_name = "X1,Y1,X2,Y2")]
    pub crop: Option<Vec<f64>>,

    /// Flatten transparency even when the source and format support it
    #[arg(long)]
    pub opaque: bool,

    #[arg(long, allow_hyphen_values = true)]
    pub exposure: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub contrast: Option<f64>,

    #[arg(long)]
    pub gamma: Option<f64>,

    #[arg(long)]
    pub saturation: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub tint: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub temperature: Option<f64>,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[arg(value_name = "FOLDER")]
    pub folder: PathBuf,

    /// Create Thumbnail jobs instead of animated ones
    #[arg(long)]
    pub thumbnails: bool,

    /// Save the discovered jobs as a job list
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Sequence rate used for image inputs
    #[arg(long, default_value_t = 24)]
    pub fps: u32,
}

#[derive(Args, Debug)]
pub struct ThumbArgs {
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Capture time in seconds
    #[arg(long, default_value_t = 0.0)]
    pub at: f64,

    #[arg(long, default_value = "png", value_parser = parse_still)]
    pub still: StillFormat,

    /// Sequence rate used for image inputs
    #[arg(long, default_value_t = 24)]
    pub fps: u32,
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    s.parse()
}

fn parse_still(s: &str) -> Result<StillFormat, String> {
    s.parse()
}
