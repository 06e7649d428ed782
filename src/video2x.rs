use crate::algorithm::{Registry, VideoJob};
use crate::error::Error;
use crate::ffmpeg::Tools;
use crate::logging::LogLevel;
use crate::pipeline::control::{Control, PauseFlag, State};
use crate::pipeline::extract::Decoder;
use crate::pipeline::merge::{Encoder, Report};
use crate::pipeline::pool::{Backend, LocalBackend};
use crate::pipeline::progress::Progress;
use crate::pipeline::Pipeline;
use crate::signals::{self, SignalWatcher};
use crate::transform::{FrameTransform, InterpolateSettings, ProcessingSettings, UpscaleSettings};
use crate::video::{output_size, RunContext, VideoInfo};
use crate::worker::ProcessBackend;

use std::path::Path;
use tracing::info;

/// Where frame processing runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Execution {
    /// One worker process per processor. Workers always use the built-in
    /// algorithms.
    #[default]
    Processes,
    /// One thread per processor, using this controller's registry.
    Threads,
}

/// Runs upscaling and interpolation jobs, one input file at a time.
pub struct Video2X {
    registry: Registry,
    tools: Tools,
    processes: usize,
    level: LogLevel,
    pause: PauseFlag,
    execution: Execution,
    progress: bool,
}

impl Video2X {
    pub fn new(processes: usize, level: LogLevel) -> Self {
        Self {
            registry: Registry::default(),
            tools: Tools::from_env(),
            processes: processes.max(1),
            level,
            pause: PauseFlag::default(),
            execution: Execution::default(),
            progress: true,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_tools(mut self, tools: Tools) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// The pause switch of every run started by this controller.
    pub fn pause_flag(&self) -> PauseFlag {
        self.pause.clone()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upscale(
        &self,
        input: &Path,
        output: &Path,
        width: Option<u32>,
        height: Option<u32>,
        noise: i32,
        algorithm: &str,
        threshold: f64,
    ) -> Result<Report, Error> {
        let control = Control::new(self.pause.clone());
        let result = self.try_upscale(&control, input, output, (width, height), noise, algorithm, threshold);
        Self::settle(&control, result)
    }

    pub fn interpolate(&self, input: &Path, output: &Path, algorithm: &str, threshold: f64) -> Result<Report, Error> {
        let control = Control::new(self.pause.clone());
        let result = self.try_interpolate(&control, input, output, algorithm, threshold);
        Self::settle(&control, result)
    }

    fn settle(control: &Control, result: Result<Report, Error>) -> Result<Report, Error> {
        if result.is_err() {
            control.enter(State::Aborting);
        }
        control.enter(State::Done);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn try_upscale(
        &self,
        control: &Control,
        input: &Path,
        output: &Path,
        size: (Option<u32>, Option<u32>),
        noise: i32,
        algorithm: &str,
        threshold: f64,
    ) -> Result<Report, Error> {
        let info = self.probe(control, input)?;
        let entry = self.registry.upscaler(algorithm)?;
        let (output_width, output_height) = output_size((info.width, info.height), size.0, size.1)?;
        let context = RunContext::upscale(input, output, &info, (output_width, output_height));
        info!(
            "Upscaling {}x{} to {}x{} with {}",
            info.width, info.height, output_width, output_height, algorithm
        );

        if entry.native_video {
            return self.upscale_natively(control, &context, algorithm, noise);
        }

        let settings = ProcessingSettings::Upscale(UpscaleSettings {
            algorithm: algorithm.to_string(),
            noise,
            threshold,
            input_width: info.width,
            input_height: info.height,
            output_width,
            output_height,
        });
        self.stream(control, &context, settings, algorithm)
    }

    fn try_interpolate(
        &self,
        control: &Control,
        input: &Path,
        output: &Path,
        algorithm: &str,
        threshold: f64,
    ) -> Result<Report, Error> {
        let info = self.probe(control, input)?;
        let context = RunContext::interpolate(input, output, &info);
        info!(
            "Interpolating {} frames at {:.3} fps to {} frames at {:.3} fps with {}",
            context.source_frames, context.frame_rate, context.total_frames, context.output_frame_rate, algorithm
        );
        let settings = ProcessingSettings::Interpolate(InterpolateSettings {
            algorithm: algorithm.to_string(),
            threshold,
        });
        self.stream(control, &context, settings, algorithm)
    }

    fn probe(&self, control: &Control, input: &Path) -> Result<VideoInfo, Error> {
        control.enter(State::Probing);
        if !input.is_file() {
            return Err(Error::InvalidInput(format!("{} does not exist or is not a file", input.display())));
        }
        self.tools.validate()?;
        VideoInfo::probe(&self.tools, input)
    }

    fn upscale_natively(&self, control: &Control, context: &RunContext, algorithm: &str, noise: i32) -> Result<Report, Error> {
        let input = (context.input_width, context.input_height);
        let output = (context.output_width, context.output_height);
        let scale = self.registry.plan(algorithm, input, output)?.first().copied().unwrap_or(1);
        let mut upscaler = self.registry.create_upscaler(algorithm, noise, scale)?;

        control.enter(State::Running);
        info!("{} processes the whole video itself", algorithm);
        upscaler.process_video(&VideoJob {
            input: context.input.clone(),
            output: context.output.clone(),
            width: context.input_width,
            height: context.input_height,
            output_width: context.output_width,
            output_height: context.output_height,
        })?;
        control.enter(State::Draining);
        Ok(Report { frames: context.total_frames, reused: 0 })
    }

    fn backends(&self, settings: &ProcessingSettings) -> Result<Vec<Box<dyn Backend>>, Error> {
        (0..self.processes)
            .map(|id| -> Result<Box<dyn Backend>, Error> {
                match self.execution {
                    Execution::Processes => Ok(Box::new(ProcessBackend::spawn(id, settings, self.level)?)),
                    Execution::Threads => {
                        let transform = FrameTransform::new(settings.clone(), self.registry.clone())?;
                        Ok(Box::new(LocalBackend::new(transform)))
                    }
                }
            })
            .collect()
    }

    fn progress(&self, context: &RunContext, algorithm: &str) -> Progress {
        if !self.progress {
            return Progress::hidden(context.total_frames);
        }
        let header = format!(
            "{} -> {}\n[resolution: {}x{} -> {}x{}] [algorithm: {}] [processes: {}]",
            context.input.display(),
            context.output.display(),
            context.input_width,
            context.input_height,
            context.output_width,
            context.output_height,
            algorithm,
            self.processes,
        );
        Progress::new(context.total_frames, &header)
    }

    fn stream(
        &self,
        control: &Control,
        context: &RunContext,
        settings: ProcessingSettings,
        algorithm: &str,
    ) -> Result<Report, Error> {
        signals::install()?;
        let mut watcher = SignalWatcher::start(control.clone())?;

        let decoder = Decoder::spawn(
            &self.tools,
            &context.input,
            context.input_width,
            context.input_height,
            context.frame_rate,
            self.level,
        )?;
        let encoder = Encoder::spawn(
            &self.tools,
            &context.input,
            &context.output,
            context.output_width,
            context.output_height,
            context.output_frame_rate,
            self.level,
        )?;
        let backends = self.backends(&settings)?;

        let result = Pipeline::new(context.source_frames, context.total_frames)
            .with_progress(self.progress(context, algorithm))
            .run(Box::new(decoder), Box::new(encoder), backends, control);

        watcher.stop();
        match result {
            Err(_) if watcher.interrupted() => Err(Error::Cancelled),
            Ok(report) => {
                info!(
                    "Wrote {} frames to {} ({} reused)",
                    report.frames,
                    context.output.display(),
                    report.reused
                );
                Ok(report)
            }
            Err(error) => Err(error),
        }
    }
}
