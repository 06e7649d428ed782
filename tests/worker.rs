use video2x::error::Error;
use video2x::ffmpeg::Killer;
use video2x::frame::Frame;
use video2x::logging::LogLevel;
use video2x::pipeline::control::{Control, State};
use video2x::pipeline::extract::FrameSource;
use video2x::pipeline::merge::FrameSink;
use video2x::pipeline::pool::Backend;
use video2x::pipeline::Pipeline;
use video2x::transform::{InterpolateSettings, ProcessingSettings, Slot, Task, UpscaleSettings};
use video2x::worker::ProcessBackend;

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

fn spawn(settings: &ProcessingSettings) -> ProcessBackend {
    spawn_numbered(0, settings)
}

fn spawn_numbered(id: usize, settings: &ProcessingSettings) -> ProcessBackend {
    ProcessBackend::spawn_with(Path::new(env!("CARGO_BIN_EXE_video2x")), id, settings, LogLevel::Error).unwrap()
}

fn has_exited(pid: u32) -> bool {
    let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
    !alive && io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}

/// Interpolation that never needs an external program: every midpoint is a
/// pass-through of the previous frame.
fn passthrough() -> ProcessingSettings {
    ProcessingSettings::Interpolate(InterpolateSettings { algorithm: "rife".into(), threshold: 100.0 })
}

fn workers(count: usize) -> (Vec<Box<dyn Backend>>, Vec<u32>) {
    let settings = passthrough();
    let spawned: Vec<ProcessBackend> = (0..count).map(|id| spawn_numbered(id, &settings)).collect();
    let pids = spawned.iter().map(ProcessBackend::pid).collect();
    let backends = spawned.into_iter().map(|worker| Box::new(worker) as Box<dyn Backend>).collect();
    (backends, pids)
}

struct Frames(VecDeque<Frame>);

impl FrameSource for Frames {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        Ok(self.0.pop_front())
    }

    fn killer(&self) -> Killer {
        Killer::default()
    }

    fn join(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Records frames and cancels the run once `cancel_after` have been written.
#[derive(Clone)]
struct Recorder {
    frames: Arc<Mutex<Vec<Frame>>>,
    control: Control,
    cancel_after: Option<usize>,
}

impl Recorder {
    fn new(control: &Control, cancel_after: Option<usize>) -> Self {
        Self { frames: Arc::default(), control: control.clone(), cancel_after }
    }

    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameSink for Recorder {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let mut frames = self.frames.lock().unwrap();
        frames.push(frame.clone());
        if Some(frames.len()) == self.cancel_after {
            self.control.cancel();
        }
        Ok(())
    }

    fn killer(&self) -> Killer {
        Killer::default()
    }

    fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

fn numbered(count: usize) -> Vec<Frame> {
    (0..count).map(|i| Frame::filled(8, 8, [i as u8, (i / 256) as u8, 0])).collect()
}

fn task(index: usize, previous: Option<&Frame>, current: &Frame) -> Task {
    Task { index, previous: previous.cloned().map(Arc::new), current: Arc::new(current.clone()) }
}

#[test]
fn first_interpolation_task_passes_the_frame_through() {
    let settings = ProcessingSettings::Interpolate(InterpolateSettings { algorithm: "rife".into(), threshold: 10.0 });
    let mut worker = spawn(&settings);
    let frame = Frame::filled(3, 2, [9, 8, 7]);

    let outputs = worker.process(&task(0, None, &frame)).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, 0);
    assert!(matches!(&outputs[0].1, Slot::Frame(f) if **f == frame));

    let next = Frame::filled(3, 2, [10, 8, 7]);
    let outputs = worker.process(&task(1, Some(&frame), &next)).unwrap();
    let slots: Vec<usize> = outputs.iter().map(|(slot, _)| *slot).collect();
    assert_eq!(slots, [1, 2]);
    assert!(matches!(&outputs[0].1, Slot::Frame(f) if **f == frame));
    assert!(matches!(&outputs[1].1, Slot::Frame(f) if **f == next));

    worker.shutdown().unwrap();
}

#[test]
fn static_frames_are_reused_across_the_process_boundary() {
    let settings = ProcessingSettings::Upscale(UpscaleSettings {
        algorithm: "waifu2x".into(),
        noise: 3,
        threshold: 100.0,
        input_width: 2,
        input_height: 2,
        output_width: 4,
        output_height: 4,
    });
    let mut worker = spawn(&settings);
    let frame = Frame::filled(2, 2, [1, 2, 3]);

    let outputs = worker.process(&task(5, Some(&frame), &frame)).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, 5);
    assert!(matches!(outputs[0].1, Slot::Reuse));
    worker.shutdown().unwrap();
}

#[test]
fn setup_errors_are_replied_for_every_task() {
    let settings = ProcessingSettings::Interpolate(InterpolateSettings { algorithm: "dain".into(), threshold: 0.0 });
    let mut worker = spawn(&settings);
    let frame = Frame::filled(1, 1, [0, 0, 0]);

    for index in 0..2 {
        match worker.process(&task(index, None, &frame)) {
            Err(Error::Algorithm(message)) => assert!(message.contains("dain"), "{}", message),
            other => panic!("unexpected {:?}", other),
        }
    }
    worker.shutdown().unwrap();
}

#[test]
fn worker_processes_drive_a_whole_run() {
    let originals = numbered(40);
    let (backends, pids) = workers(3);
    let control = Control::default();
    let recorder = Recorder::new(&control, None);

    let report = Pipeline::new(40, passthrough().output_frames(40))
        .run(Box::new(Frames(originals.clone().into())), Box::new(recorder.clone()), backends, &control)
        .unwrap();

    assert_eq!(report.frames, 79);
    let frames = recorder.frames();
    assert_eq!(frames.len(), 79);
    for (index, frame) in frames.iter().enumerate() {
        assert_eq!(frame, &originals[index / 2], "frame {}", index);
    }
    assert_eq!(control.history(), [State::Running, State::Draining, State::Done]);
    assert!(pids.iter().all(|&pid| has_exited(pid)));
}

#[test]
fn cancelled_run_reaps_every_worker() {
    let (backends, pids) = workers(3);
    let control = Control::default();
    let recorder = Recorder::new(&control, Some(5));

    let outcome = Pipeline::new(400, passthrough().output_frames(400)).run(
        Box::new(Frames(numbered(400).into())),
        Box::new(recorder.clone()),
        backends,
        &control,
    );

    assert!(matches!(outcome, Err(Error::Cancelled)), "{:?}", outcome);
    assert!(recorder.frames().len() < 799);
    assert!(control.history().contains(&State::Aborting));
    assert!(pids.iter().all(|&pid| has_exited(pid)));
}
