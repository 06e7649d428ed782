use crate::error::Error;
use crate::ffmpeg::Tools;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Stream properties reported by ffprobe for the first video stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub frame_count: usize,
}

impl VideoInfo {
    pub fn probe(tools: &Tools, input: &Path) -> Result<Self, Error> {
        let output = Command::new(&tools.ffprobe)
            .args([
                "-hide_banner", "-v", "error",
                "-select_streams", "v:0",
                "-count_frames",
                "-show_entries", "stream=nb_read_frames,r_frame_rate,width,height",
                "-of", "default=noprint_wrappers=1",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::MissingTool(format!("{}: {}", tools.ffprobe.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::InvalidInput(format!(
                "{} could not be probed: {}",
                input.display(),
                stderr.trim()
            )));
        }

        let data = String::from_utf8_lossy(&output.stdout);
        debug!(input = %input.display(), "ffprobe reported {:?}", data.trim());
        Self::parse(&data)
    }

    /// Parses ffprobe's `key=value` output.
    pub fn parse(data: &str) -> Result<Self, Error> {
        let mut width = None;
        let mut height = None;
        let mut frame_rate = None;
        let mut frame_count = None;

        for line in data.lines() {
            if let Some((key, value)) = line.trim().split_once('=') {
                match key {
                    "width" => width = Some(Self::parse_number(key, value)?),
                    "height" => height = Some(Self::parse_number(key, value)?),
                    "nb_read_frames" => frame_count = Some(Self::parse_number(key, value)? as usize),
                    "r_frame_rate" => frame_rate = Some(Self::parse_frame_rate(value)?),
                    _ => {}
                }
            }
        }

        let (Some(width), Some(height)) = (width, height) else {
            return Err(Error::InvalidInput("no video stream found".to_string()));
        };
        let frame_rate = frame_rate.ok_or_else(|| Error::InvalidInput("frame rate is unknown".to_string()))?;
        let frame_count = frame_count.unwrap_or(0);

        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!("invalid video dimensions {}x{}", width, height)));
        }
        if frame_count == 0 {
            return Err(Error::InvalidInput("video stream contains no frames".to_string()));
        }

        Ok(Self { width, height, frame_rate, frame_count })
    }

    fn parse_number(key: &str, value: &str) -> Result<u32, Error> {
        value.parse()
            .map_err(|_| Error::InvalidInput(format!("failed to parse {}: {}", key, value)))
    }

    fn parse_frame_rate(value: &str) -> Result<f64, Error> {
        let invalid = || Error::InvalidInput(format!("invalid frame rate: {}", value));
        let rate = match value.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().map_err(|_| invalid())?;
                let den: f64 = den.parse().map_err(|_| invalid())?;
                if den == 0.0 {
                    return Err(invalid());
                }
                num / den
            }
            None => value.parse().map_err(|_| invalid())?,
        };
        if rate > 0.0 && rate.is_finite() {
            Ok(rate)
        } else {
            Err(invalid())
        }
    }
}

/// Rounds up to the nearest even number, as required by yuv420p.
pub fn round_even(value: u32) -> u32 {
    value + value % 2
}

/// Resolves the requested output size, deriving a missing side from the
/// input aspect ratio.
pub fn output_size(input: (u32, u32), width: Option<u32>, height: Option<u32>) -> Result<(u32, u32), Error> {
    let (input_width, input_height) = input;
    let width = width.filter(|&w| w > 0);
    let height = height.filter(|&h| h > 0);

    let (width, height) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => {
            let h = (input_height as f64 * w as f64 / input_width as f64).ceil() as u32;
            (w, h)
        }
        (None, Some(h)) => {
            let w = (input_width as f64 * h as f64 / input_height as f64).ceil() as u32;
            (w, h)
        }
        (None, None) => {
            return Err(Error::InvalidArgument("either width or height must be specified".to_string()))
        }
    };

    Ok((round_even(width), round_even(height)))
}

/// Immutable facts about one run, fixed once probing is done.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub frame_rate: f64,
    pub output_frame_rate: f64,
    pub source_frames: usize,
    pub total_frames: usize,
}

impl RunContext {
    pub fn upscale(input: &Path, output: &Path, info: &VideoInfo, size: (u32, u32)) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            input_width: info.width,
            input_height: info.height,
            output_width: size.0,
            output_height: size.1,
            frame_rate: info.frame_rate,
            output_frame_rate: info.frame_rate,
            source_frames: info.frame_count,
            total_frames: info.frame_count,
        }
    }

    pub fn interpolate(input: &Path, output: &Path, info: &VideoInfo) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            input_width: info.width,
            input_height: info.height,
            output_width: info.width,
            output_height: info.height,
            frame_rate: info.frame_rate,
            output_frame_rate: info.frame_rate * 2.0,
            source_frames: info.frame_count,
            total_frames: info.frame_count * 2 - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE: &str = "width=320\nheight=240\nr_frame_rate=30000/1001\nnb_read_frames=60\n";

    #[test]
    fn parses_ffprobe_output() {
        let info = VideoInfo::parse(PROBE).unwrap();
        assert_eq!((info.width, info.height, info.frame_count), (320, 240, 60));
        assert!((info.frame_rate - 29.97).abs() < 0.01);
    }

    #[test]
    fn missing_stream_is_invalid_input() {
        assert!(matches!(VideoInfo::parse(""), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn zero_frames_is_invalid_input() {
        let data = "width=320\nheight=240\nr_frame_rate=30/1\nnb_read_frames=0\n";
        assert!(matches!(VideoInfo::parse(data), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn zero_denominator_frame_rate_is_rejected() {
        let data = "width=320\nheight=240\nr_frame_rate=0/0\nnb_read_frames=1\n";
        assert!(matches!(VideoInfo::parse(data), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn derives_width_from_height() {
        assert_eq!(output_size((320, 240), None, Some(720)).unwrap(), (960, 720));
    }

    #[test]
    fn derives_height_from_width_and_rounds_even() {
        assert_eq!(output_size((853, 480), Some(1921), None).unwrap(), (1922, 1082));
    }

    #[test]
    fn explicit_size_is_only_rounded() {
        assert_eq!(output_size((320, 240), Some(641), Some(481)).unwrap(), (642, 482));
    }

    #[test]
    fn size_requires_one_dimension() {
        assert!(output_size((320, 240), None, None).is_err());
        assert!(output_size((320, 240), Some(0), None).is_err());
    }

    #[test]
    fn interpolation_doubles_rate_and_frames() {
        let info = VideoInfo { width: 64, height: 48, frame_rate: 24.0, frame_count: 10 };
        let context = RunContext::interpolate(Path::new("in.mp4"), Path::new("out.mp4"), &info);
        assert_eq!(context.total_frames, 19);
        assert_eq!(context.output_frame_rate, 48.0);
    }
}
