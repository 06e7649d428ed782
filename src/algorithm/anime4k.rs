use super::{Executable, Upscaler, VideoJob};
use crate::error::Error;
use crate::frame::Frame;

use std::ffi::OsString;

/// Anime4KCPP command line processor. Supports any integer zoom factor and
/// can transcode whole videos on its own.
pub struct Anime4k {
    executable: Executable,
    scale: u32,
}

impl Anime4k {
    pub fn new(scale: u32) -> Result<Self, Error> {
        Ok(Self { executable: Executable::new("anime4k", "Anime4KCPP_CLI")?, scale: scale.max(1) })
    }

    fn zoom(width: u32, height: u32, output_width: u32, output_height: u32) -> u32 {
        let scale = f64::max(
            output_width as f64 / width.max(1) as f64,
            output_height as f64 / height.max(1) as f64,
        );
        (scale.ceil() as u32).max(1)
    }
}

impl Upscaler for Anime4k {
    fn process(&mut self, frame: &Frame) -> Result<Frame, Error> {
        let input = self.executable.path("input.png");
        let output = self.executable.path("output.png");
        frame.save_png(&input)?;
        let args: Vec<OsString> = vec![
            "-i".into(), input.into(),
            "-o".into(), output.clone().into(),
            "-z".into(), self.scale.to_string().into(),
        ];
        self.executable.run(&args)?;
        Frame::load_png(&output)
    }

    fn process_video(&mut self, job: &VideoJob) -> Result<(), Error> {
        let zoom = Self::zoom(job.width, job.height, job.output_width, job.output_height);
        let args: Vec<OsString> = vec![
            "-i".into(), job.input.clone().into(),
            "-o".into(), job.output.clone().into(),
            "-v".into(),
            "-z".into(), zoom.to_string().into(),
        ];
        self.executable.run(&args)
    }
}
