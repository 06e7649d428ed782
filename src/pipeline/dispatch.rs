use super::control::Control;
use super::extract::FrameSource;
use crate::error::Error;
use crate::transform::Task;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::debug;

pub struct Dispatch;

impl Dispatch {

    const SEND_TIMEOUT: Duration = Duration::from_millis(100);

    /// Pumps frames from `source` into `tasks` on a new thread. The thread
    /// yields the number of frames dispatched, or `None` after recording a
    /// failure in `control`.
    pub fn start(
        source: Box<dyn FrameSource>,
        tasks: Sender<Option<Task>>,
        control: Control,
        expected: usize,
    ) -> Result<JoinHandle<Option<usize>>, Error> {
        let handle = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || match Self::execute(source, &tasks, &control, expected) {
                Ok(count) => Some(count),
                Err(error) => {
                    control.fail(if control.is_cancelled() { Error::Cancelled } else { error });
                    None
                }
            })?;
        Ok(handle)
    }

    pub fn execute(
        mut source: Box<dyn FrameSource>,
        tasks: &Sender<Option<Task>>,
        control: &Control,
        expected: usize,
    ) -> Result<usize, Error> {
        let mut previous = None;
        let mut index = 0;

        while let Some(frame) = source.next_frame()? {
            if index >= expected {
                source.killer().kill();
                let _ = source.join();
                return Err(Error::Invariant(format!("decoder produced more than the {} probed frames", expected)));
            }
            let current = Arc::new(frame);
            let task = Task { index, previous: previous.replace(current.clone()), current };
            if !Self::send(tasks, task, control)? {
                debug!(frame = index, "dispatch cancelled");
                source.killer().kill();
                let _ = source.join();
                return Err(Error::Cancelled);
            }
            index += 1;
        }

        source.join()?;
        if index != expected {
            return Err(Error::Invariant(format!("decoded {} frames, expected {}", index, expected)));
        }
        debug!(frames = index, "all frames dispatched");
        Ok(index)
    }

    /// Returns `false` if the run was cancelled before the task was queued.
    fn send(tasks: &Sender<Option<Task>>, task: Task, control: &Control) -> Result<bool, Error> {
        let mut message = Some(task);
        loop {
            if control.is_cancelled() {
                return Ok(false);
            }
            match tasks.send_timeout(message, Self::SEND_TIMEOUT) {
                Ok(()) => return Ok(true),
                Err(SendTimeoutError::Timeout(returned)) => message = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(Error::Invariant("task queue closed while dispatching".to_string()))
                }
            }
        }
    }
}
