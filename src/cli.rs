use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DetectorBackend {
    Mock,
    Onnx,
}

#[derive(Debug, Default)]
pub struct CliSources {
    pub detector_from_cli: bool,
    pub model_from_cli: bool,
    pub target_fps_from_cli: bool,
    pub width_from_cli: bool,
    pub height_from_cli: bool,
}

impl CliSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            detector_from_cli: value_from_cli(matches, "detector"),
            model_from_cli: value_from_cli(matches, "model"),
            target_fps_from_cli: value_from_cli(matches, "target_fps"),
            width_from_cli: value_from_cli(matches, "width"),
            height_from_cli: value_from_cli(matches, "height"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let command = CliArgs::command();
    let matches = command.get_matches();
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

#[derive(Debug, Parser)]
#[command(
    name = "screenveil",
    about = "Sample a rendered surface and detect restricted content regions",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Detection backend to run inference with
    #[arg(long = "detector", value_enum, default_value_t = DetectorBackend::Mock)]
    pub detector: DetectorBackend,

    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Path to the ONNX model used by the onnx detector
    #[arg(long = "model", id = "model", value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Target sampling rate the scheduler adapts toward
    #[arg(
        long = "target-fps",
        id = "target_fps",
        default_value_t = 10.0,
        value_parser = parse_positive_f64
    )]
    pub target_fps: f64,

    /// Override a per-class confidence threshold (repeatable)
    #[arg(long = "threshold", value_name = "CLASS=VALUE")]
    pub thresholds: Vec<String>,

    /// Scroll distance applied to the synthetic surface after every update,
    /// in pixels
    #[arg(long = "scroll-step", value_name = "PIXELS")]
    pub scroll_step: Option<f32>,

    /// Number of detection updates to consume before exiting
    #[arg(long = "cycles", default_value_t = 50)]
    pub cycles: u32,

    /// Emit each detection update as a JSON line instead of progress output
    #[arg(long = "json")]
    pub json: bool,

    /// Viewport width of the synthetic surface, in pixels
    #[arg(long = "width", default_value_t = 1280)]
    pub width: u32,

    /// Viewport height of the synthetic surface, in pixels
    #[arg(long = "height", default_value_t = 720)]
    pub height: u32,
}

fn parse_positive_f64(value: &str) -> Result<f64, String> {
    let parsed: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if parsed > 0.0 && parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(format!("'{value}' must be a positive number"))
    }
}
