use super::control::Control;
use super::results::ResultRing;
use crate::error::Error;
use crate::ffmpeg::Killer;
use crate::transform::{FrameTransform, Output, Task};

use std::thread::{self, JoinHandle};
use crossbeam_channel::Receiver;
use tracing::{debug, trace};

/// Something that turns tasks into result slots.
pub trait Backend: Send {
    fn process(&mut self, task: &Task) -> Result<Vec<Output>, Error>;

    /// Handle that stops the backend from another thread while it is busy.
    fn killer(&self) -> Killer {
        Killer::default()
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Runs the transform on the pool thread itself.
pub struct LocalBackend {
    transform: FrameTransform,
}

impl LocalBackend {
    pub fn new(transform: FrameTransform) -> Self {
        Self { transform }
    }
}

impl Backend for LocalBackend {
    fn process(&mut self, task: &Task) -> Result<Vec<Output>, Error> {
        self.transform.apply(task)
    }
}

pub struct Pool {
    workers: Vec<JoinHandle<()>>,
    killers: Vec<Killer>,
}

impl Pool {
    /// Starts one thread per backend. Each thread takes tasks until it
    /// receives `None` or the queue disconnects. Failures are recorded in
    /// `control`, which cancels the run.
    pub fn start(
        backends: Vec<Box<dyn Backend>>,
        tasks: Receiver<Option<Task>>,
        results: ResultRing,
        control: Control,
    ) -> Result<Self, Error> {
        let mut workers = Vec::with_capacity(backends.len());
        let mut killers = Vec::with_capacity(backends.len());
        for (id, backend) in backends.into_iter().enumerate() {
            killers.push(backend.killer());
            let tasks = tasks.clone();
            let results = results.clone();
            let control = control.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || Self::work(id, backend, tasks, results, control))?;
            workers.push(handle);
        }
        Ok(Self { workers, killers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    fn work(
        id: usize,
        mut backend: Box<dyn Backend>,
        tasks: Receiver<Option<Task>>,
        results: ResultRing,
        control: Control,
    ) {
        let outcome = Self::serve(id, backend.as_mut(), &tasks, &results, &control);
        let shutdown = backend.shutdown();
        if let Err(error) = outcome.and(shutdown) {
            // Anything after cancellation is fallout from it.
            control.fail(if control.is_cancelled() { Error::Cancelled } else { error });
        }
        debug!(worker = id, "worker stopped");
    }

    fn serve(
        id: usize,
        backend: &mut dyn Backend,
        tasks: &Receiver<Option<Task>>,
        results: &ResultRing,
        control: &Control,
    ) -> Result<(), Error> {
        while let Ok(Some(task)) = tasks.recv() {
            if !control.wait_while_paused() {
                break;
            }
            trace!(worker = id, frame = task.index, "processing");
            for (index, slot) in backend.process(&task)? {
                results.publish(index, slot, control)?;
            }
        }
        Ok(())
    }

    pub fn kill(&self) {
        for killer in &self.killers {
            killer.kill();
        }
    }

    pub fn join(&mut self) -> Result<(), Error> {
        let mut panicked = false;
        for handle in self.workers.drain(..) {
            panicked |= handle.join().is_err();
        }
        if panicked {
            Err(Error::Invariant("worker thread panicked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::transform::Slot;
    use crossbeam_channel::bounded;
    use std::sync::Arc;

    struct Echo;

    impl Backend for Echo {
        fn process(&mut self, task: &Task) -> Result<Vec<Output>, Error> {
            Ok(vec![(task.index, Slot::Frame(task.current.clone()))])
        }
    }

    struct FailAt(usize);

    impl Backend for FailAt {
        fn process(&mut self, task: &Task) -> Result<Vec<Output>, Error> {
            if task.index == self.0 {
                return Err(Error::Algorithm(format!("frame {} is cursed", task.index)));
            }
            Ok(vec![(task.index, Slot::Reuse)])
        }
    }

    fn task(index: usize) -> Task {
        Task { index, previous: None, current: Arc::new(Frame::filled(1, 1, [index as u8; 3])) }
    }

    #[test]
    fn every_task_is_published_once() {
        let (sender, receiver) = bounded(8);
        let results = ResultRing::new(16);
        let control = Control::default();
        let backends: Vec<Box<dyn Backend>> = vec![Box::new(Echo), Box::new(Echo), Box::new(Echo)];
        let mut pool = Pool::start(backends, receiver, results.clone(), control.clone()).unwrap();
        assert_eq!(pool.size(), 3);

        for index in 0..12 {
            sender.send(Some(task(index))).unwrap();
        }
        for _ in 0..pool.size() {
            sender.send(None).unwrap();
        }
        pool.join().unwrap();

        for index in 0..12 {
            let slot = loop {
                if let Some(slot) = results.take(index, &control).unwrap() {
                    break slot;
                }
            };
            assert_eq!(slot, Slot::Frame(Arc::new(Frame::filled(1, 1, [index as u8; 3]))));
        }
        assert!(control.take_failure().is_none());
    }

    #[test]
    fn backend_failure_cancels_the_run() {
        let (sender, receiver) = bounded(8);
        let control = Control::default();
        let backends: Vec<Box<dyn Backend>> = vec![Box::new(FailAt(2))];
        let mut pool = Pool::start(backends, receiver, ResultRing::new(8), control.clone()).unwrap();

        for index in 0..4 {
            sender.send(Some(task(index))).unwrap();
        }
        drop(sender);
        pool.join().unwrap();

        assert!(control.is_cancelled());
        match control.take_failure() {
            Some(Error::Algorithm(message)) => assert!(message.contains("cursed")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
