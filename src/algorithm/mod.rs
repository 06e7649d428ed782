//! Per-frame image processors.
//!
//! Algorithms are looked up by id in a [`Registry`] populated at startup.
//! Each worker keeps its own [`PluginCache`] so a model is loaded once per
//! `(algorithm, scale)` pair.

mod anime4k;
mod ncnn;
mod rife;

pub use anime4k::Anime4k;
pub use ncnn::{NcnnUpscaler, RealEsrganVariant};
pub use rife::Rife;

use crate::error::Error;
use crate::frame::Frame;
use crate::planner::{self, ScaleSupport};

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

pub const PLUGIN_PATH_ENV: &str = "VIDEO2X_PLUGIN_PATH";

pub const UPSCALERS: &[&str] = &[
    "waifu2x",
    "srmd",
    "realsr",
    "realcugan",
    "anime4k",
    "realesr-animevideov3",
    "realesrgan-x4plus-anime",
    "realesrgan-x4plus",
];

pub const INTERPOLATORS: &[&str] = &["rife"];

/// Input and output of a whole-file run handled by the plugin itself.
#[derive(Clone, Debug)]
pub struct VideoJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub output_width: u32,
    pub output_height: u32,
}

pub trait Upscaler: Send {
    /// Scales `frame` by the ratio this plugin was created with.
    fn process(&mut self, frame: &Frame) -> Result<Frame, Error>;

    fn process_video(&mut self, _job: &VideoJob) -> Result<(), Error> {
        Err(Error::Algorithm("this algorithm cannot process whole videos".to_string()))
    }
}

pub trait Interpolator: Send {
    /// Produces the frame halfway between `previous` and `current`.
    fn interpolate(&mut self, previous: &Frame, current: &Frame) -> Result<Frame, Error>;
}

pub type UpscalerFactory = Arc<dyn Fn(i32, u32) -> Result<Box<dyn Upscaler>, Error> + Send + Sync>;
pub type InterpolatorFactory = Arc<dyn Fn() -> Result<Box<dyn Interpolator>, Error> + Send + Sync>;

#[derive(Clone)]
pub struct UpscalerEntry {
    pub support: ScaleSupport,
    pub native_video: bool,
    factory: UpscalerFactory,
}

#[derive(Clone)]
pub struct Registry {
    upscalers: BTreeMap<String, UpscalerEntry>,
    interpolators: BTreeMap<String, InterpolatorFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_upscaler("waifu2x", ScaleSupport::fixed(&[1, 2]), false, |noise, scale| {
            Ok(Box::new(NcnnUpscaler::waifu2x(noise, scale)?) as Box<dyn Upscaler>)
        });
        registry.register_upscaler("srmd", ScaleSupport::fixed(&[2, 3, 4]), false, |noise, scale| {
            Ok(Box::new(NcnnUpscaler::srmd(noise, scale)?) as Box<dyn Upscaler>)
        });
        registry.register_upscaler("realsr", ScaleSupport::fixed(&[4]), false, |_, scale| {
            Ok(Box::new(NcnnUpscaler::realsr(scale)?) as Box<dyn Upscaler>)
        });
        registry.register_upscaler("realcugan", ScaleSupport::fixed(&[1, 2, 3, 4]), false, |noise, scale| {
            Ok(Box::new(NcnnUpscaler::realcugan(noise, scale)?) as Box<dyn Upscaler>)
        });
        registry.register_upscaler("anime4k", ScaleSupport::Arbitrary, true, |_, scale| {
            Ok(Box::new(Anime4k::new(scale)?) as Box<dyn Upscaler>)
        });
        for variant in RealEsrganVariant::ALL {
            registry.register_upscaler(variant.id(), variant.support(), false, move |_, scale| {
                Ok(Box::new(NcnnUpscaler::realesrgan(variant, scale)?) as Box<dyn Upscaler>)
            });
        }
        registry.register_interpolator("rife", || Ok(Box::new(Rife::new()?) as Box<dyn Interpolator>));
        registry
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self { upscalers: BTreeMap::new(), interpolators: BTreeMap::new() }
    }

    pub fn register_upscaler<F>(&mut self, id: &str, support: ScaleSupport, native_video: bool, factory: F)
    where
        F: Fn(i32, u32) -> Result<Box<dyn Upscaler>, Error> + Send + Sync + 'static,
    {
        let entry = UpscalerEntry { support, native_video, factory: Arc::new(factory) };
        self.upscalers.insert(id.to_string(), entry);
    }

    pub fn register_interpolator<F>(&mut self, id: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn Interpolator>, Error> + Send + Sync + 'static,
    {
        self.interpolators.insert(id.to_string(), Arc::new(factory));
    }

    pub fn upscaler(&self, id: &str) -> Result<&UpscalerEntry, Error> {
        self.upscalers.get(id)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown upscaling algorithm: {}", id)))
    }

    pub fn create_upscaler(&self, id: &str, noise: i32, scale: u32) -> Result<Box<dyn Upscaler>, Error> {
        let entry = self.upscaler(id)?;
        if !entry.support.supports(scale) {
            return Err(Error::Algorithm(format!("{} does not support scale {}", id, scale)));
        }
        debug!(algorithm = id, noise, scale, "loading upscaler");
        (entry.factory)(noise, scale)
    }

    pub fn create_interpolator(&self, id: &str) -> Result<Box<dyn Interpolator>, Error> {
        let factory = self.interpolators.get(id)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown interpolation algorithm: {}", id)))?;
        debug!(algorithm = id, "loading interpolator");
        factory()
    }

    /// Single-pass ratios that take `input` to at least `output` with `id`.
    pub fn plan(&self, id: &str, input: (u32, u32), output: (u32, u32)) -> Result<Vec<u32>, Error> {
        Ok(planner::plan(input, output, &self.upscaler(id)?.support))
    }
}

/// Plugins created so far by one worker.
pub struct PluginCache {
    registry: Registry,
    upscalers: HashMap<(String, u32), Box<dyn Upscaler>>,
    interpolators: HashMap<String, Box<dyn Interpolator>>,
}

impl PluginCache {
    pub fn new(registry: Registry) -> Self {
        Self { registry, upscalers: HashMap::new(), interpolators: HashMap::new() }
    }

    pub fn upscaler(&mut self, id: &str, noise: i32, scale: u32) -> Result<&mut Box<dyn Upscaler>, Error> {
        let key = (id.to_string(), scale);
        if !self.upscalers.contains_key(&key) {
            let plugin = self.registry.create_upscaler(id, noise, scale)?;
            self.upscalers.insert(key.clone(), plugin);
        }
        self.upscalers.get_mut(&key)
            .ok_or_else(|| Error::Invariant(format!("{} x{} missing from cache", id, scale)))
    }

    pub fn interpolator(&mut self, id: &str) -> Result<&mut Box<dyn Interpolator>, Error> {
        if !self.interpolators.contains_key(id) {
            let plugin = self.registry.create_interpolator(id)?;
            self.interpolators.insert(id.to_string(), plugin);
        }
        self.interpolators.get_mut(id)
            .ok_or_else(|| Error::Invariant(format!("{} missing from cache", id)))
    }

    pub fn len(&self) -> usize {
        self.upscalers.len() + self.interpolators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A native processor executable driven through PNG files in a private
/// scratch directory.
pub(crate) struct Executable {
    label: &'static str,
    program: PathBuf,
    workdir: TempDir,
}

impl Executable {
    pub(crate) fn new(label: &'static str, program: &str) -> Result<Self, Error> {
        let workdir = tempfile::Builder::new().prefix("video2x-").tempdir()?;
        Ok(Self { label, program: locate(program), workdir })
    }

    pub(crate) fn path(&self, name: &str) -> PathBuf {
        self.workdir.path().join(name)
    }

    /// Runs the executable, leaving its output on the inherited descriptors.
    pub(crate) fn run(&self, args: &[OsString]) -> Result<(), Error> {
        let status = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| Error::MissingTool(format!("{}: {}", self.program.display(), e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Algorithm(format!("{} exited with {}", self.label, status)))
        }
    }
}

fn locate(program: &str) -> PathBuf {
    std::env::var_os(PLUGIN_PATH_ENV)
        .map(|dir| Path::new(&dir).join(program))
        .filter(|path| path.is_file())
        .unwrap_or_else(|| PathBuf::from(program))
}
