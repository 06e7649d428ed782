use crate::error::Error;
use crate::ffmpeg::{decoder_args, FfmpegProcess, Killer, Tools};
use crate::frame::Frame;
use crate::logging::LogLevel;

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{ChildStdout, Stdio};

/// An ordered stream of decoded frames.
pub trait FrameSource: Send {
    /// The next frame, or `None` once the stream has ended cleanly.
    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;

    fn killer(&self) -> Killer;

    /// Waits for the producer to exit. Safe to call more than once.
    fn join(&mut self) -> Result<(), Error>;
}

/// Reads raw rgb24 frames from an ffmpeg child.
pub struct Decoder {
    process: FfmpegProcess,
    stdout: Option<ChildStdout>,
    width: u32,
    height: u32,
}

impl Decoder {
    pub fn spawn(
        tools: &Tools,
        input: &Path,
        width: u32,
        height: u32,
        frame_rate: f64,
        level: LogLevel,
    ) -> Result<Self, Error> {
        let mut command = tools.command();
        command
            .args(decoder_args(input, frame_rate, level.ffmpeg_level()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        let mut process = FfmpegProcess::spawn("decoder", command)?;
        let stdout = process.take_stdout()?;
        Ok(Self { process, stdout: Some(stdout), width, height })
    }

    fn read_frame(stdout: &mut ChildStdout, buffer: &mut [u8]) -> Result<usize, Error> {
        let mut filled = 0;
        while filled < buffer.len() {
            match stdout.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(size) => filled += size,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl FrameSource for Decoder {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buffer = vec![0u8; Frame::byte_len(self.width, self.height)];
        let filled = match Self::read_frame(stdout, &mut buffer) {
            Ok(filled) => filled,
            Err(e) => {
                self.stdout = None;
                self.process.kill();
                self.process.join()?;
                return Err(e);
            }
        };

        if filled == buffer.len() {
            return Frame::new(self.width, self.height, buffer).map(Some);
        }

        self.stdout = None;
        self.process.join()?;
        if filled == 0 {
            Ok(None)
        } else {
            Err(Error::Invariant(format!(
                "decoder ended inside a frame ({} of {} bytes)",
                filled,
                buffer.len()
            )))
        }
    }

    fn killer(&self) -> Killer {
        self.process.killer()
    }

    fn join(&mut self) -> Result<(), Error> {
        self.stdout = None;
        self.process.join()
    }
}
