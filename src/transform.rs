//! What a worker does with one task.
//!
//! Upscaling writes one result slot per task. Interpolation writes two
//! (the midpoint and the current frame), so output indices advance with a
//! stride of two.

use crate::algorithm::{PluginCache, Registry};
use crate::error::Error;
use crate::frame::Frame;

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// One decoded frame paired with its predecessor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub index: usize,
    pub previous: Option<Arc<Frame>>,
    pub current: Arc<Frame>,
}

/// Content of a result slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    /// Emit the most recently written frame again.
    Reuse,
    Frame(Arc<Frame>),
}

pub type Output = (usize, Slot);

#[derive(Clone, Debug, PartialEq)]
pub struct UpscaleSettings {
    pub algorithm: String,
    pub noise: i32,
    pub threshold: f64,
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterpolateSettings {
    pub algorithm: String,
    pub threshold: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProcessingSettings {
    Upscale(UpscaleSettings),
    Interpolate(InterpolateSettings),
}

impl ProcessingSettings {
    /// Output slots produced per decoded frame.
    pub fn stride(&self) -> usize {
        match self {
            ProcessingSettings::Upscale(_) => 1,
            ProcessingSettings::Interpolate(_) => 2,
        }
    }

    /// Number of frames the encoder receives for `source_frames` inputs.
    pub fn output_frames(&self, source_frames: usize) -> usize {
        match self {
            ProcessingSettings::Upscale(_) => source_frames,
            ProcessingSettings::Interpolate(_) => (source_frames * 2).saturating_sub(1),
        }
    }
}

/// Whether `current` is close enough to `previous` to skip processing it.
///
/// A threshold of 0 never skips; 100 always does.
pub fn is_redundant(previous: &Frame, current: &Frame, threshold: f64) -> bool {
    if threshold <= 0.0 {
        return false;
    }
    threshold >= 100.0 || previous.difference_percent(current) < threshold
}

pub enum FrameTransform {
    Upscale(Upscale),
    Interpolate(Interpolate),
}

impl FrameTransform {
    pub fn new(settings: ProcessingSettings, registry: Registry) -> Result<Self, Error> {
        match settings {
            ProcessingSettings::Upscale(settings) => Ok(FrameTransform::Upscale(Upscale::new(settings, registry)?)),
            ProcessingSettings::Interpolate(settings) => Ok(FrameTransform::Interpolate(Interpolate::new(settings, registry)?)),
        }
    }

    pub fn apply(&mut self, task: &Task) -> Result<Vec<Output>, Error> {
        match self {
            FrameTransform::Upscale(upscale) => upscale.apply(task),
            FrameTransform::Interpolate(interpolate) => interpolate.apply(task),
        }
    }
}

pub struct Upscale {
    settings: UpscaleSettings,
    passes: Vec<u32>,
    plugins: PluginCache,
}

impl Upscale {
    pub fn new(settings: UpscaleSettings, registry: Registry) -> Result<Self, Error> {
        let passes = registry.plan(
            &settings.algorithm,
            (settings.input_width, settings.input_height),
            (settings.output_width, settings.output_height),
        )?;
        Ok(Self { settings, passes, plugins: PluginCache::new(registry) })
    }

    pub fn passes(&self) -> &[u32] {
        &self.passes
    }

    pub fn apply(&mut self, task: &Task) -> Result<Vec<Output>, Error> {
        if let Some(previous) = &task.previous {
            if is_redundant(previous, &task.current, self.settings.threshold) {
                trace!(frame = task.index, "reusing previous output");
                return Ok(vec![(task.index, Slot::Reuse)]);
            }
        }

        let mut output: Option<Frame> = None;
        for &ratio in &self.passes {
            let input = output.as_ref().unwrap_or(task.current.as_ref());
            let plugin = self.plugins.upscaler(&self.settings.algorithm, self.settings.noise, ratio)?;
            output = Some(plugin.process(input)?);
        }

        let frame = match output {
            Some(frame) => frame,
            None => task.current.as_ref().clone(),
        };
        let frame = frame.resize(self.settings.output_width, self.settings.output_height)?;
        Ok(vec![(task.index, Slot::Frame(Arc::new(frame)))])
    }
}

pub struct Interpolate {
    settings: InterpolateSettings,
    plugins: PluginCache,
}

impl Interpolate {
    pub fn new(settings: InterpolateSettings, registry: Registry) -> Result<Self, Error> {
        let mut plugins = PluginCache::new(registry);
        plugins.interpolator(&settings.algorithm)?;
        Ok(Self { settings, plugins })
    }

    pub fn apply(&mut self, task: &Task) -> Result<Vec<Output>, Error> {
        let slot = task.index * 2;
        let Some(previous) = &task.previous else {
            return Ok(vec![(slot, Slot::Frame(task.current.clone()))]);
        };

        let midpoint = if is_redundant(previous, &task.current, self.settings.threshold) {
            trace!(frame = task.index, "scene is static, passing previous frame through");
            previous.clone()
        } else {
            let plugin = self.plugins.interpolator(&self.settings.algorithm)?;
            Arc::new(plugin.interpolate(previous, &task.current)?)
        };

        let midpoint_slot = slot.checked_sub(1)
            .ok_or_else(|| Error::Invariant("first frame cannot have a predecessor".to_string()))?;
        Ok(vec![
            (midpoint_slot, Slot::Frame(midpoint)),
            (slot, Slot::Frame(task.current.clone())),
        ])
    }
}
