//! The streaming decode, process, encode pipeline.
//!
//! ```text
//! Decoder -> Dispatch -> task queue -> Pool (N backends) -> ResultRing -> Merge -> Encoder
//! ```
//!
//! The dispatcher and the merge loop run on their own threads while the
//! calling thread supervises them. A failure anywhere cancels the run; the
//! supervisor then kills both ffmpeg children and the workers, poisons the
//! queue and joins everything before reporting the first error.

pub mod control;
pub mod dispatch;
pub mod extract;
pub mod merge;
pub mod pool;
pub mod progress;
pub mod results;

use control::{Control, State, POLL_INTERVAL};
use dispatch::Dispatch;
use extract::FrameSource;
use merge::{FrameSink, Merge, Report};
use pool::{Backend, Pool};
use progress::Progress;
use results::ResultRing;

use crate::error::Error;
use crate::transform::Task;

use std::thread::{self, JoinHandle};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info};

pub struct Pipeline {
    source_frames: usize,
    total_frames: usize,
    progress: Option<Progress>,
}

impl Pipeline {

    /// Tasks queued per worker.
    const QUEUE_DEPTH: usize = 10;

    pub fn new(source_frames: usize, total_frames: usize) -> Self {
        Self { source_frames, total_frames, progress: None }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn run(
        self,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        backends: Vec<Box<dyn Backend>>,
        control: &Control,
    ) -> Result<Report, Error> {
        if backends.is_empty() {
            return Err(Error::InvalidArgument("at least one processor is required".to_string()));
        }
        let workers = backends.len();
        let queue_capacity = Self::QUEUE_DEPTH * workers;
        let (sender, receiver) = bounded(queue_capacity);
        let results = ResultRing::new(2 * (queue_capacity + workers));
        debug!(workers, queue_capacity, ring = results.capacity(), "starting pipeline");

        let source_killer = source.killer();
        let sink_killer = sink.killer();
        let progress = self.progress.unwrap_or_else(|| Progress::hidden(self.total_frames));

        control.enter(State::Running);
        let mut pool = Pool::start(backends, receiver.clone(), results.clone(), control.clone())?;
        let dispatcher = match Dispatch::start(source, sender.clone(), control.clone(), self.source_frames) {
            Ok(handle) => Some(handle),
            Err(error) => {
                control.fail(error);
                None
            }
        };
        let merger = match Self::start_merge(sink, results, self.total_frames, progress, control.clone()) {
            Ok(handle) => Some(handle),
            Err(error) => {
                control.fail(error);
                None
            }
        };

        while !control.is_cancelled() && merger.as_ref().is_some_and(|handle| !handle.is_finished()) {
            thread::sleep(POLL_INTERVAL);
        }

        let report = if control.is_cancelled() {
            control.enter(State::Aborting);
            source_killer.kill();
            sink_killer.kill();
            pool.kill();
            Self::join_thread(dispatcher, control);
            Self::drain(&receiver);
            Self::poison(&sender, workers);
            Self::join_pool(&mut pool, control);
            Self::join_thread(merger, control);
            None
        } else {
            control.enter(State::Draining);
            Self::join_thread(dispatcher, control);
            Self::poison(&sender, workers);
            Self::join_pool(&mut pool, control);
            Self::join_thread(merger, control)
        };

        control.enter(State::Done);
        match (control.take_failure(), report) {
            (Some(error), _) => Err(error),
            (None, Some(report)) if !control.is_cancelled() => {
                info!(frames = report.frames, reused = report.reused, "pipeline finished");
                Ok(report)
            }
            _ => Err(Error::Cancelled),
        }
    }

    fn start_merge(
        mut sink: Box<dyn FrameSink>,
        results: ResultRing,
        total: usize,
        mut progress: Progress,
        control: Control,
    ) -> Result<JoinHandle<Option<Report>>, Error> {
        let handle = thread::Builder::new()
            .name("merge".to_string())
            .spawn(move || {
                match Merge::execute(sink.as_mut(), &results, total, &mut progress, &control) {
                    Ok(report) => {
                        progress.finish();
                        Some(report)
                    }
                    Err(error) => {
                        progress.abandon();
                        control.fail(if control.is_cancelled() { Error::Cancelled } else { error });
                        None
                    }
                }
            })?;
        Ok(handle)
    }

    fn join_pool(pool: &mut Pool, control: &Control) {
        if let Err(error) = pool.join() {
            control.fail(error);
        }
    }

    fn join_thread<T>(handle: Option<JoinHandle<Option<T>>>, control: &Control) -> Option<T> {
        let handle = handle?;
        let name = handle.thread().name().unwrap_or("pipeline").to_string();
        match handle.join() {
            Ok(value) => value,
            Err(_) => {
                control.fail(Error::Invariant(format!("{} thread panicked", name)));
                None
            }
        }
    }

    fn drain(receiver: &Receiver<Option<Task>>) {
        let dropped = receiver.try_iter().flatten().count();
        if dropped > 0 {
            debug!(dropped, "discarded queued tasks");
        }
    }

    /// One `None` per worker. The queue holds at least `workers` slots and
    /// the dispatcher has stopped, so this never blocks for long.
    fn poison(sender: &Sender<Option<Task>>, workers: usize) {
        for _ in 0..workers {
            if sender.send_timeout(None, POLL_INTERVAL * 20).is_err() {
                break;
            }
        }
    }
}
