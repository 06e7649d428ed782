use crate::algorithm::{INTERPOLATORS, UPSCALERS};
use crate::logging::{LogLevel, LOG_LEVEL_ENV};
use crate::transform::{InterpolateSettings, ProcessingSettings, UpscaleSettings};

use std::path::{Path, PathBuf};
use clap::builder::PossibleValuesParser;
use clap::error::ErrorKind;
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};

/// Command-line arguments for video2x.
#[derive(Parser, Debug)]
#[command(name = "video2x")]
#[command(version)]
#[command(about = "Machine learning video upscaling and frame interpolation")]
pub struct Cli {
    /// Input video file path
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output video file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of worker processes
    #[arg(short, long, default_value_t = 1, value_parser = parse_processes)]
    pub processes: usize,

    /// Log verbosity
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info, env = LOG_LEVEL_ENV)]
    pub loglevel: LogLevel,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Upscale a video to a target resolution
    #[command(disable_help_flag = true)]
    Upscale(UpscaleArgs),

    /// Double the frame rate of a video
    Interpolate(InterpolateArgs),

    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct UpscaleArgs {
    /// Output width; derived from the aspect ratio when omitted
    #[arg(short, long)]
    pub width: Option<u32>,

    /// Output height; derived from the aspect ratio when omitted
    #[arg(short, long)]
    pub height: Option<u32>,

    /// Denoise level passed to the algorithm
    #[arg(short, long, default_value_t = 3, allow_negative_numbers = true)]
    pub noise: i32,

    /// Upscaling algorithm
    #[arg(short, long, default_value = "waifu2x", value_parser = PossibleValuesParser::new(UPSCALERS.iter().copied()))]
    pub algorithm: String,

    /// Frames differing from their predecessor by less than this percentage reuse its output
    #[arg(short, long, default_value_t = 0.0, value_parser = parse_threshold)]
    pub threshold: f64,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct InterpolateArgs {
    /// Interpolation algorithm
    #[arg(short, long, default_value = "rife", value_parser = PossibleValuesParser::new(INTERPOLATORS.iter().copied()))]
    pub algorithm: String,

    /// Frames differing from their predecessor by less than this percentage are not interpolated
    #[arg(short, long, default_value_t = 10.0, value_parser = parse_threshold)]
    pub threshold: f64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Upscale,
    Interpolate,
}

/// Processing settings handed to a worker process.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct WorkerArgs {
    #[arg(long, value_enum)]
    pub mode: WorkerMode,

    #[arg(long)]
    pub algorithm: String,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub noise: i32,

    #[arg(long, default_value_t = 0.0)]
    pub threshold: f64,

    #[arg(long, default_value_t = 0)]
    pub input_width: u32,

    #[arg(long, default_value_t = 0)]
    pub input_height: u32,

    #[arg(long, default_value_t = 0)]
    pub output_width: u32,

    #[arg(long, default_value_t = 0)]
    pub output_height: u32,
}

impl Cli {
    /// Input and output paths, which every processing mode requires.
    pub fn paths(&self) -> Result<(&Path, &Path), clap::Error> {
        match (&self.input, &self.output) {
            (Some(input), Some(output)) => Ok((input, output)),
            (None, _) => Err(Self::missing("--input <INPUT>")),
            (_, None) => Err(Self::missing("--output <OUTPUT>")),
        }
    }

    fn missing(argument: &str) -> clap::Error {
        Cli::command().error(
            ErrorKind::MissingRequiredArgument,
            format!("the following required arguments were not provided:\n  {}", argument),
        )
    }
}

impl WorkerArgs {
    pub fn settings(&self) -> ProcessingSettings {
        match self.mode {
            WorkerMode::Upscale => ProcessingSettings::Upscale(UpscaleSettings {
                algorithm: self.algorithm.clone(),
                noise: self.noise,
                threshold: self.threshold,
                input_width: self.input_width,
                input_height: self.input_height,
                output_width: self.output_width,
                output_height: self.output_height,
            }),
            WorkerMode::Interpolate => ProcessingSettings::Interpolate(InterpolateSettings {
                algorithm: self.algorithm.clone(),
                threshold: self.threshold,
            }),
        }
    }

    /// Command line that parses back into these arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mode = match self.mode {
            WorkerMode::Upscale => "upscale",
            WorkerMode::Interpolate => "interpolate",
        };
        vec![
            format!("--mode={}", mode),
            format!("--algorithm={}", self.algorithm),
            format!("--noise={}", self.noise),
            format!("--threshold={}", self.threshold),
            format!("--input-width={}", self.input_width),
            format!("--input-height={}", self.input_height),
            format!("--output-width={}", self.output_width),
            format!("--output-height={}", self.output_height),
        ]
    }
}

impl From<&ProcessingSettings> for WorkerArgs {
    fn from(settings: &ProcessingSettings) -> Self {
        match settings {
            ProcessingSettings::Upscale(upscale) => Self {
                mode: WorkerMode::Upscale,
                algorithm: upscale.algorithm.clone(),
                noise: upscale.noise,
                threshold: upscale.threshold,
                input_width: upscale.input_width,
                input_height: upscale.input_height,
                output_width: upscale.output_width,
                output_height: upscale.output_height,
            },
            ProcessingSettings::Interpolate(interpolate) => Self {
                mode: WorkerMode::Interpolate,
                algorithm: interpolate.algorithm.clone(),
                noise: 0,
                threshold: interpolate.threshold,
                input_width: 0,
                input_height: 0,
                output_width: 0,
                output_height: 0,
            },
        }
    }
}

fn parse_processes(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(count) if count >= 1 => Ok(count),
        _ => Err(format!("expected a positive number of processes, got {}", value)),
    }
}

fn parse_threshold(value: &str) -> Result<f64, String> {
    match value.parse::<f64>() {
        Ok(threshold) if (0.0..=100.0).contains(&threshold) => Ok(threshold),
        _ => Err(format!("expected a percentage between 0 and 100, got {}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("video2x").chain(args.iter().copied()))
    }

    #[test]
    fn upscale_uses_short_height_flag() {
        let cli = parse(&["-i", "in.mp4", "-o", "out.mp4", "-p", "5", "upscale", "-h", "720", "-a", "waifu2x"]).unwrap();
        assert_eq!(cli.processes, 5);
        let Mode::Upscale(args) = cli.mode else { panic!("expected upscale") };
        assert_eq!(args.height, Some(720));
        assert_eq!(args.width, None);
        assert_eq!(args.noise, 3);
        assert_eq!(args.threshold, 0.0);
    }

    #[test]
    fn interpolate_defaults() {
        let cli = parse(&["-i", "in.mp4", "-o", "out.mp4", "interpolate"]).unwrap();
        assert_eq!(cli.loglevel, LogLevel::Info);
        let Mode::Interpolate(args) = cli.mode else { panic!("expected interpolate") };
        assert_eq!(args.algorithm, "rife");
        assert_eq!(args.threshold, 10.0);
    }

    #[test]
    fn rejects_unknown_algorithm_and_out_of_range_threshold() {
        assert!(parse(&["-i", "a", "-o", "b", "upscale", "-w", "640", "-a", "bicubic"]).is_err());
        assert!(parse(&["-i", "a", "-o", "b", "upscale", "-w", "640", "-t", "101"]).is_err());
        assert!(parse(&["-i", "a", "-o", "b", "-p", "0", "interpolate"]).is_err());
    }

    #[test]
    fn accepts_custom_log_levels() {
        let cli = parse(&["-i", "a", "-o", "b", "-l", "success", "interpolate"]).unwrap();
        assert_eq!(cli.loglevel, LogLevel::Success);
    }

    #[test]
    fn paths_are_required_for_processing() {
        let cli = parse(&["-i", "in.mp4", "interpolate"]).unwrap();
        let error = cli.paths().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn worker_arguments_reproduce_the_settings() {
        let settings = ProcessingSettings::Upscale(UpscaleSettings {
            algorithm: "realcugan".into(),
            noise: -1,
            threshold: 2.5,
            input_width: 320,
            input_height: 240,
            output_width: 960,
            output_height: 720,
        });
        let mut args = vec!["video2x".to_string(), "worker".to_string()];
        args.extend(WorkerArgs::from(&settings).to_args());
        let cli = Cli::try_parse_from(args).unwrap();
        let Mode::Worker(worker) = cli.mode else { panic!("expected worker") };
        assert_eq!(worker.settings(), settings);
    }
}
