use super::control::{Control, State};
use super::progress::Progress;
use super::results::ResultRing;
use crate::error::Error;
use crate::ffmpeg::{encoder_args, FfmpegProcess, Killer, Tools};
use crate::frame::Frame;
use crate::logging::LogLevel;
use crate::transform::Slot;

use std::io::{BufWriter, Write};
use std::path::Path;
use std::process::{ChildStdin, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Consumer of output frames in presentation order.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), Error>;

    fn killer(&self) -> Killer;

    /// Ends the stream and waits for the output to be finalised.
    fn finish(&mut self) -> Result<(), Error>;
}

/// Pipes raw rgb24 frames into an ffmpeg child that encodes and muxes them.
pub struct Encoder {
    process: FfmpegProcess,
    stdin: Option<BufWriter<ChildStdin>>,
    width: u32,
    height: u32,
    notice: Duration,
}

impl Encoder {
    const FINALISE_NOTICE: Duration = Duration::from_secs(10);

    pub fn spawn(
        tools: &Tools,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
        frame_rate: f64,
        level: LogLevel,
    ) -> Result<Self, Error> {
        let mut command = tools.command();
        command
            .args(encoder_args(input, output, width, height, frame_rate, level.ffmpeg_level()))
            .stdin(Stdio::piped())
            .stdout(Stdio::null());
        let mut process = FfmpegProcess::spawn("encoder", command)?;
        let stdin = process.take_stdin()?;
        Ok(Self { process, stdin: Some(BufWriter::new(stdin)), width, height, notice: Self::FINALISE_NOTICE })
    }

    /// How long to wait for ffmpeg to finalise the output before saying so
    /// in the log. The wait itself has no limit.
    pub fn with_notice(mut self, notice: Duration) -> Self {
        self.notice = notice;
        self
    }

    /// Prefers the child's own failure over the broken pipe it caused.
    fn broken(&mut self, error: std::io::Error) -> Error {
        self.stdin = None;
        match self.process.join() {
            Ok(()) => Error::external("encoder", format!("stopped reading frames: {}", error)),
            Err(e) => e,
        }
    }
}

impl FrameSink for Encoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        if frame.width != self.width || frame.height != self.height {
            return Err(Error::Invariant(format!(
                "encoder expects {}x{} frames, got {}x{}",
                self.width, self.height, frame.width, frame.height
            )));
        }
        let stdin = self.stdin.as_mut()
            .ok_or_else(|| Error::Invariant("encoder input already closed".to_string()))?;
        if let Err(e) = stdin.write_all(&frame.data) {
            return Err(self.broken(e));
        }
        Ok(())
    }

    fn killer(&self) -> Killer {
        self.process.killer()
    }

    fn finish(&mut self) -> Result<(), Error> {
        if let Some(mut stdin) = self.stdin.take() {
            let flushed = stdin.flush();
            drop(stdin);
            if let Err(e) = flushed {
                return Err(self.broken(e));
            }
        }
        let started = Instant::now();
        while !self.process.wait_timeout(self.notice)? {
            info!("Encoder is still finalising the output ({}s)", started.elapsed().as_secs());
        }
        self.process.join()
    }
}

/// Frames written and how many of them repeated the previous output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub frames: usize,
    pub reused: usize,
}

pub struct Merge;

impl Merge {

    /// Writes slots `0..total` in order, then finalises the sink.
    ///
    /// A reuse slot repeats the last frame actually written, so runs of
    /// reused slots all resolve to the same frame.
    pub fn execute(
        sink: &mut dyn FrameSink,
        results: &ResultRing,
        total: usize,
        progress: &mut Progress,
        control: &Control,
    ) -> Result<Report, Error> {
        let mut last: Option<Arc<Frame>> = None;
        let mut report = Report::default();

        for index in 0..total {
            let slot = loop {
                if let Some(slot) = results.take(index, control)? {
                    break slot;
                }
                let paused = control.pause.is_paused();
                if paused != progress.is_paused() {
                    control.enter(if paused { State::Paused } else { State::Running });
                    progress.set_paused(paused);
                }
            };
            if progress.is_paused() {
                control.enter(State::Running);
                progress.set_paused(false);
            }

            let frame = match slot {
                Slot::Frame(frame) => frame,
                Slot::Reuse => {
                    report.reused += 1;
                    last.clone().ok_or_else(|| {
                        Error::Invariant(format!("frame {} reuses output that was never written", index))
                    })?
                }
            };
            sink.write_frame(&frame)?;
            last = Some(frame);
            report.frames += 1;
            progress.advance(report.frames, report.reused);
        }

        debug!(frames = report.frames, reused = report.reused, "all frames written, finalising output");
        sink.finish()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Frame>,
        finished: bool,
    }

    impl FrameSink for Recorder {
        fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn killer(&self) -> Killer {
            Killer::default()
        }

        fn finish(&mut self) -> Result<(), Error> {
            self.finished = true;
            Ok(())
        }
    }

    fn frame(value: u8) -> Slot {
        Slot::Frame(Arc::new(Frame::filled(1, 1, [value; 3])))
    }

    #[test]
    fn reuse_slots_repeat_the_last_written_frame() {
        let control = Control::default();
        let results = ResultRing::new(8);
        results.publish(0, frame(1), &control).unwrap();
        results.publish(1, Slot::Reuse, &control).unwrap();
        results.publish(2, Slot::Reuse, &control).unwrap();
        results.publish(3, frame(4), &control).unwrap();

        let mut sink = Recorder::default();
        let report = Merge::execute(&mut sink, &results, 4, &mut Progress::hidden(4), &control).unwrap();

        assert_eq!(report, Report { frames: 4, reused: 2 });
        let values: Vec<u8> = sink.frames.iter().map(|f| f.data[0]).collect();
        assert_eq!(values, [1, 1, 1, 4]);
        assert!(sink.finished);
    }

    #[test]
    fn reuse_without_a_written_frame_is_an_invariant_violation() {
        let control = Control::default();
        let results = ResultRing::new(2);
        results.publish(0, Slot::Reuse, &control).unwrap();
        let mut sink = Recorder::default();
        let outcome = Merge::execute(&mut sink, &results, 1, &mut Progress::hidden(1), &control);
        assert!(matches!(outcome, Err(Error::Invariant(_))));
        assert!(!sink.finished);
    }

    #[test]
    fn cancellation_stops_the_merge() {
        let control = Control::default();
        control.cancel();
        let mut sink = Recorder::default();
        let outcome = Merge::execute(&mut sink, &ResultRing::new(2), 3, &mut Progress::hidden(3), &control);
        assert!(matches!(outcome, Err(Error::Cancelled)));
    }

    #[test]
    fn encoder_streams_raw_bytes_to_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ffmpeg");
        let capture = dir.path().join("capture.raw");
        fs::write(&script, format!("#!/bin/sh\ncat > '{}'\n", capture.display())).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let tools = Tools { ffmpeg: script, ffprobe: PathBuf::from("ffprobe") };

        let mut encoder = Encoder::spawn(&tools, Path::new("in.mp4"), Path::new("out.mp4"), 2, 1, 24.0, LogLevel::Error)
            .unwrap();
        encoder.write_frame(&Frame::filled(2, 1, [1, 2, 3])).unwrap();
        encoder.write_frame(&Frame::filled(2, 1, [4, 5, 6])).unwrap();
        assert!(matches!(encoder.write_frame(&Frame::filled(1, 1, [0; 3])), Err(Error::Invariant(_))));
        encoder.finish().unwrap();

        assert_eq!(fs::read(&capture).unwrap(), [1, 2, 3, 1, 2, 3, 4, 5, 6, 4, 5, 6]);
    }

    #[test]
    fn slow_finalisation_is_waited_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ffmpeg");
        let done = dir.path().join("done");
        fs::write(
            &script,
            format!("#!/bin/sh\ntrap 'exit 255' INT\ncat > /dev/null\nsleep 1\ntouch '{}'\n", done.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let tools = Tools { ffmpeg: script, ffprobe: PathBuf::from("ffprobe") };

        let mut encoder = Encoder::spawn(&tools, Path::new("in.mp4"), Path::new("out.mp4"), 1, 1, 24.0, LogLevel::Error)
            .unwrap()
            .with_notice(Duration::from_millis(100));
        encoder.write_frame(&Frame::filled(1, 1, [9, 9, 9])).unwrap();
        encoder.finish().unwrap();
        assert!(done.exists());
    }
}
