use crate::error::Error;

use std::fs::File;
use std::sync::Mutex;
use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_ENV: &str = "VIDEO2X_LOGLEVEL";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info | LogLevel::Success => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error | LogLevel::Critical => Level::ERROR,
        }
    }

    /// Value for ffmpeg's `-loglevel`.
    pub fn ffmpeg_level(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info | LogLevel::Success => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "fatal",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::new(format!("video2x={}", self.level()))
    }
}

pub fn init(level: LogLevel) -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(level.filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(already_initialised)
}

/// Logging for worker processes, written to a descriptor saved before the
/// standard streams were redirected.
pub fn init_worker(level: LogLevel, sink: File) -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(level.filter())
        .with_writer(Mutex::new(sink))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(already_initialised)
}

fn already_initialised(error: impl std::fmt::Display) -> Error {
    Error::Invariant(format!("logging already initialised: {}", error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_levels_map_to_tracing_levels() {
        assert_eq!(LogLevel::Success.level(), Level::INFO);
        assert_eq!(LogLevel::Warning.level(), Level::WARN);
        assert_eq!(LogLevel::Critical.level(), Level::ERROR);
    }

    #[test]
    fn critical_maps_to_ffmpeg_fatal() {
        assert_eq!(LogLevel::Critical.ffmpeg_level(), "fatal");
        assert_eq!(LogLevel::Success.ffmpeg_level(), "info");
        assert_eq!(LogLevel::Warning.ffmpeg_level(), "warning");
    }

    #[test]
    fn second_initialisation_is_reported() {
        let _ = init(LogLevel::Error);
        assert!(matches!(init(LogLevel::Debug), Err(Error::Invariant(_))));
    }

    #[test]
    fn names_round_trip_through_clap() {
        for level in LogLevel::value_variants() {
            assert_eq!(LogLevel::from_str(level.name(), false).unwrap(), *level);
        }
    }
}
