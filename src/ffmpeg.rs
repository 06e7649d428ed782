use crate::error::Error;

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const STDERR_TAIL_LINES: usize = 20;
const PROCESSED_COMMENT: &str = "comment=Processed with Video2X";

/// Locations of the ffmpeg binaries.
#[derive(Clone, Debug)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for Tools {
    fn default() -> Self {
        Self { ffmpeg: PathBuf::from("ffmpeg"), ffprobe: PathBuf::from("ffprobe") }
    }
}

impl Tools {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg: std::env::var_os("VIDEO2X_FFMPEG").map(PathBuf::from).unwrap_or(defaults.ffmpeg),
            ffprobe: std::env::var_os("VIDEO2X_FFPROBE").map(PathBuf::from).unwrap_or(defaults.ffprobe),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let status = Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| Error::MissingTool(format!("{}: {}", self.ffmpeg.display(), e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::MissingTool(format!("{} -version exited with {}", self.ffmpeg.display(), status)))
        }
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command.env("AV_LOG_FORCE_COLOR", "TRUE");
        command
    }
}

/// Arguments that make ffmpeg emit raw rgb24 frames on stdout.
pub fn decoder_args(input: &Path, frame_rate: f64, log_level: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostats", "-nostdin", "-loglevel", log_level, "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(input.into());
    let frame_rate = frame_rate.to_string();
    for arg in ["-r", frame_rate.as_str(), "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"] {
        args.push(arg.into());
    }
    args
}

/// Arguments that read raw rgb24 frames from stdin and mux them with the
/// non-video streams of the original input.
pub fn encoder_args(
    input: &Path,
    output: &Path,
    width: u32,
    height: u32,
    frame_rate: f64,
    log_level: &str,
) -> Vec<OsString> {
    let frame_rate = frame_rate.to_string();
    let size = format!("{}x{}", width, height);
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |values: &[&str]| args.extend(values.iter().map(OsString::from));

    push(&["-hide_banner", "-nostats", "-loglevel", log_level, "-y"]);
    push(&["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", size.as_str(), "-r", frame_rate.as_str(), "-i", "pipe:0"]);
    push(&["-i"]);
    args.push(input.into());

    let mut push = |values: &[&str]| args.extend(values.iter().map(OsString::from));
    push(&["-map", "0:v", "-map", "1:a?", "-map", "1:s?", "-map", "1:d?", "-map", "1:t?"]);
    push(&["-c:a", "copy", "-c:s", "copy", "-c:d", "copy", "-c:t", "copy"]);
    push(&["-vcodec", "libx264", "-pix_fmt", "yuv420p", "-crf", "17", "-preset", "veryslow"]);
    push(&["-vsync", "cfr", "-r", frame_rate.as_str()]);
    push(&["-map_metadata", "1", "-metadata", PROCESSED_COMMENT]);
    args.push(output.into());
    args
}

struct KillerState {
    pid: libc::pid_t,
    exited: AtomicBool,
    killed: AtomicBool,
}

/// Cloneable handle that can stop a child owned by another thread.
#[derive(Clone, Default)]
pub struct Killer(Option<Arc<KillerState>>);

impl Killer {
    pub(crate) fn new(pid: u32) -> Self {
        Killer(Some(Arc::new(KillerState {
            pid: pid as libc::pid_t,
            exited: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        })))
    }

    /// Sends SIGKILL unless the child has already been reaped.
    pub fn kill(&self) {
        let Some(state) = &self.0 else { return };
        if state.exited.load(Ordering::SeqCst) {
            return;
        }
        state.killed.store(true, Ordering::SeqCst);
        unsafe {
            libc::kill(state.pid, libc::SIGKILL);
        }
    }

    pub fn was_killed(&self) -> bool {
        self.0.as_ref().is_some_and(|state| state.killed.load(Ordering::SeqCst))
    }

    pub(crate) fn mark_exited(&self) {
        if let Some(state) = &self.0 {
            state.exited.store(true, Ordering::SeqCst);
        }
    }
}

/// A spawned ffmpeg child whose stderr is continuously drained into the log.
pub struct FfmpegProcess {
    name: &'static str,
    child: Child,
    killer: Killer,
    stderr: Option<JoinHandle<VecDeque<String>>>,
    result: Option<Result<(), String>>,
}

impl FfmpegProcess {
    pub fn spawn(name: &'static str, mut command: Command) -> Result<Self, Error> {
        debug!(process = name, "running {:?}", command);
        let mut child = command
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::MissingTool(format!("{}: {}", name, e)))?;
        let killer = Killer::new(child.id());
        let stderr = child.stderr.take()
            .ok_or_else(|| Error::external(name, "stderr was not captured"))?;
        let stderr = thread::Builder::new()
            .name(format!("{}-stderr", name))
            .spawn(move || Self::drain(name, stderr))?;

        Ok(Self { name, child, killer, stderr: Some(stderr), result: None })
    }

    fn drain(name: &'static str, stderr: impl Read) -> VecDeque<String> {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let reader = BufReader::new(stderr);
        for line in reader.split(b'\n') {
            let Ok(line) = line else { break };
            let line = String::from_utf8_lossy(&line).trim_end().to_string();
            if line.is_empty() {
                continue;
            }
            debug!(process = name, "{}", line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout, Error> {
        self.child.stdout.take().ok_or_else(|| Error::external(self.name, "stdout was not captured"))
    }

    pub fn take_stdin(&mut self) -> Result<ChildStdin, Error> {
        self.child.stdin.take().ok_or_else(|| Error::external(self.name, "stdin was not captured"))
    }

    pub fn killer(&self) -> Killer {
        self.killer.clone()
    }

    pub fn kill(&self) {
        self.killer.kill();
    }

    /// Waits up to `grace` for the child to exit on its own.
    pub fn wait_timeout(&mut self, grace: Duration) -> Result<bool, Error> {
        if self.result.is_some() {
            return Ok(true);
        }
        let start = Instant::now();
        loop {
            if self.child.try_wait()?.is_some() {
                self.killer.mark_exited();
                return Ok(true);
            }
            if start.elapsed() >= grace {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Waits for the child and its stderr drain. Safe to call repeatedly.
    pub fn join(&mut self) -> Result<(), Error> {
        if self.result.is_none() {
            self.child.stdin.take();
            self.child.stdout.take();
            let status = self.child.wait();
            self.killer.mark_exited();
            let tail = self.stderr.take()
                .and_then(|handle| handle.join().ok())
                .unwrap_or_default();
            self.result = Some(Self::check(status, tail));
        }

        match &self.result {
            Some(Ok(())) => Ok(()),
            _ if self.killer.was_killed() => Err(Error::Cancelled),
            Some(Err(reason)) => Err(Error::external(self.name, reason.clone())),
            None => Ok(()),
        }
    }

    fn check(status: std::io::Result<ExitStatus>, tail: VecDeque<String>) -> Result<(), String> {
        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                let details: Vec<String> = tail.into_iter().collect();
                Err(format!("{}: {}", status, details.join(" | ")))
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        if self.result.is_none() {
            warn!(process = self.name, "process dropped while running, killing it");
            self.kill();
            let _ = self.join();
        }
    }
}
