use super::{Executable, Interpolator};
use crate::error::Error;
use crate::frame::Frame;

use std::ffi::OsString;

/// RIFE frame interpolation through rife-ncnn-vulkan.
pub struct Rife {
    executable: Executable,
}

impl Rife {
    pub fn new() -> Result<Self, Error> {
        Ok(Self { executable: Executable::new("rife", "rife-ncnn-vulkan")? })
    }
}

impl Interpolator for Rife {
    fn interpolate(&mut self, previous: &Frame, current: &Frame) -> Result<Frame, Error> {
        let first = self.executable.path("0.png");
        let second = self.executable.path("1.png");
        let output = self.executable.path("out.png");
        previous.save_png(&first)?;
        current.save_png(&second)?;

        let args: Vec<OsString> = vec![
            "-0".into(), first.into(),
            "-1".into(), second.into(),
            "-o".into(), output.clone().into(),
        ];
        self.executable.run(&args)?;
        Frame::load_png(&output)
    }
}
