//! Processor workers running as separate processes.
//!
//! The parent re-executes its own binary with the hidden `worker`
//! subcommand. Tasks travel over the child's stdin and replies over a copy
//! of its original stdout; the standard descriptors themselves are pointed
//! at `/dev/null` so plugin output cannot corrupt the stream or the
//! progress bar.

pub mod protocol;

use crate::algorithm::Registry;
use crate::args::WorkerArgs;
use crate::error::Error;
use crate::ffmpeg::Killer;
use crate::logging::{self, LogLevel, LOG_LEVEL_ENV};
use crate::pipeline::pool::Backend;
use crate::signals;
use crate::transform::{FrameTransform, Output, ProcessingSettings, Task};

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, error};

/// Entry point of a worker process.
pub fn serve(settings: ProcessingSettings, level: LogLevel) -> Result<(), Error> {
    signals::ignore_interrupts()?;
    let (data, log) = redirect_standard_streams()?;
    logging::init_worker(level, log)?;
    debug!(pid = std::process::id(), "worker ready");

    let mut transform = FrameTransform::new(settings, Registry::default()).map_err(|e| match e {
        Error::Algorithm(message) => message,
        other => other.to_string(),
    });
    if let Err(message) = &transform {
        error!("{}", message);
    }

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut writer = BufWriter::new(data);
    while let Some(task) = protocol::read_task(&mut reader)? {
        let reply = match &mut transform {
            Ok(transform) => transform.apply(&task),
            Err(message) => Err(Error::Algorithm(message.clone())),
        };
        if let Err(e) = &reply {
            error!(frame = task.index, "{}", e);
        }
        protocol::write_reply(&mut writer, &reply)?;
    }
    debug!("task stream closed");
    Ok(())
}

fn duplicate(fd: RawFd) -> Result<File, Error> {
    let copy = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if copy < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(unsafe { File::from_raw_fd(copy) })
}

/// Returns copies of the original stdout and stderr, then points both at
/// `/dev/null`.
fn redirect_standard_streams() -> Result<(File, File), Error> {
    let data = duplicate(libc::STDOUT_FILENO)?;
    let log = duplicate(libc::STDERR_FILENO)?;
    let null = OpenOptions::new().write(true).open("/dev/null")?;
    for fd in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok((data, log))
}

/// Parent-side handle to one worker process.
pub struct ProcessBackend {
    id: usize,
    child: Child,
    killer: Killer,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: BufReader<ChildStdout>,
}

impl ProcessBackend {
    pub fn spawn(id: usize, settings: &ProcessingSettings, level: LogLevel) -> Result<Self, Error> {
        Self::spawn_with(&std::env::current_exe()?, id, settings, level)
    }

    /// Spawns `program` as a worker. `program` must be this crate's binary.
    pub fn spawn_with(program: &Path, id: usize, settings: &ProcessingSettings, level: LogLevel) -> Result<Self, Error> {
        let mut command = Command::new(program);
        command
            .arg("--loglevel")
            .arg(level.name())
            .arg("worker")
            .args(WorkerArgs::from(settings).to_args())
            .env(LOG_LEVEL_ENV, level.name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        debug!(worker = id, "running {:?}", command);

        let mut child = command
            .spawn()
            .map_err(|e| Error::external(format!("worker {}", id), e.to_string()))?;
        let killer = Killer::new(child.id());
        let stdin = child.stdin.take()
            .ok_or_else(|| Error::external(format!("worker {}", id), "stdin was not captured"))?;
        let stdout = child.stdout.take()
            .ok_or_else(|| Error::external(format!("worker {}", id), "stdout was not captured"))?;

        Ok(Self {
            id,
            child,
            killer,
            stdin: Some(BufWriter::new(stdin)),
            stdout: BufReader::new(stdout),
        })
    }

    /// Process id of the worker.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn name(&self) -> String {
        format!("worker {}", self.id)
    }
}

impl Backend for ProcessBackend {
    fn process(&mut self, task: &Task) -> Result<Vec<Output>, Error> {
        let stdin = self.stdin.as_mut()
            .ok_or_else(|| Error::Invariant(format!("worker {} was already shut down", self.id)))?;
        if let Err(e) = protocol::write_task(stdin, task) {
            if self.killer.was_killed() {
                return Err(Error::Cancelled);
            }
            return Err(Error::external(self.name(), e.to_string()));
        }
        match protocol::read_reply(&mut self.stdout) {
            Err(Error::Io(_)) if self.killer.was_killed() => Err(Error::Cancelled),
            Err(Error::Io(e)) => Err(Error::external(self.name(), format!("reply stream broke: {}", e))),
            other => other,
        }
    }

    fn killer(&self) -> Killer {
        self.killer.clone()
    }

    /// Closes the task stream, which the worker treats as its poison pill,
    /// and waits for it to exit.
    fn shutdown(&mut self) -> Result<(), Error> {
        self.stdin.take();
        let status = self.child.wait()?;
        self.killer.mark_exited();
        if status.success() {
            Ok(())
        } else if self.killer.was_killed() {
            Err(Error::Cancelled)
        } else {
            Err(Error::external(self.name(), format!("exited with {}", status)))
        }
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            self.stdin.take();
            self.killer.kill();
            let _ = self.child.wait();
            self.killer.mark_exited();
        }
    }
}
