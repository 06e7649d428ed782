use super::{Executable, Upscaler};
use crate::error::Error;
use crate::frame::Frame;
use crate::planner::ScaleSupport;

use std::ffi::OsString;

/// Model names understood by realesrgan-ncnn-vulkan, indexed by model id.
const REALESRGAN_MODELS: [(&str, u32); 5] = [
    ("realesr-animevideov3", 2),
    ("realesr-animevideov3", 3),
    ("realesr-animevideov3", 4),
    ("realesrgan-x4plus-anime", 4),
    ("realesrgan-x4plus", 4),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RealEsrganVariant {
    AnimeVideoV3,
    X4PlusAnime,
    X4Plus,
}

impl RealEsrganVariant {
    pub const ALL: [RealEsrganVariant; 3] = [
        RealEsrganVariant::AnimeVideoV3,
        RealEsrganVariant::X4PlusAnime,
        RealEsrganVariant::X4Plus,
    ];

    pub fn id(self) -> &'static str {
        match self {
            RealEsrganVariant::AnimeVideoV3 => "realesr-animevideov3",
            RealEsrganVariant::X4PlusAnime => "realesrgan-x4plus-anime",
            RealEsrganVariant::X4Plus => "realesrgan-x4plus",
        }
    }

    pub fn support(self) -> ScaleSupport {
        match self {
            RealEsrganVariant::AnimeVideoV3 => ScaleSupport::fixed(&[2, 3, 4]),
            RealEsrganVariant::X4PlusAnime | RealEsrganVariant::X4Plus => ScaleSupport::fixed(&[4]),
        }
    }

    fn base(self) -> i32 {
        match self {
            RealEsrganVariant::AnimeVideoV3 => -2,
            RealEsrganVariant::X4PlusAnime => -1,
            RealEsrganVariant::X4Plus => 0,
        }
    }

    pub fn model_id(self, scale: u32) -> i32 {
        self.base() + scale as i32
    }
}

/// Upscaler backed by one of the `*-ncnn-vulkan` executables.
pub struct NcnnUpscaler {
    executable: Executable,
    options: Vec<String>,
}

impl NcnnUpscaler {
    fn new(label: &'static str, program: &str, options: Vec<String>) -> Result<Self, Error> {
        Ok(Self { executable: Executable::new(label, program)?, options })
    }

    pub fn waifu2x(noise: i32, scale: u32) -> Result<Self, Error> {
        let options = vec!["-n".into(), noise.clamp(-1, 3).to_string(), "-s".into(), scale.to_string()];
        Self::new("waifu2x", "waifu2x-ncnn-vulkan", options)
    }

    pub fn srmd(noise: i32, scale: u32) -> Result<Self, Error> {
        let options = vec!["-n".into(), noise.clamp(-1, 10).to_string(), "-s".into(), scale.to_string()];
        Self::new("srmd", "srmd-ncnn-vulkan", options)
    }

    pub fn realsr(scale: u32) -> Result<Self, Error> {
        Self::new("realsr", "realsr-ncnn-vulkan", vec!["-s".into(), scale.to_string()])
    }

    pub fn realcugan(noise: i32, scale: u32) -> Result<Self, Error> {
        let options = vec!["-n".into(), noise.clamp(-1, 3).to_string(), "-s".into(), scale.to_string()];
        Self::new("realcugan", "realcugan-ncnn-vulkan", options)
    }

    pub fn realesrgan(variant: RealEsrganVariant, scale: u32) -> Result<Self, Error> {
        let model_id = variant.model_id(scale);
        let (model, model_scale) = usize::try_from(model_id)
            .ok()
            .and_then(|id| REALESRGAN_MODELS.get(id).copied())
            .filter(|&(_, model_scale)| model_scale == scale)
            .ok_or_else(|| Error::Algorithm(format!("{} has no x{} model", variant.id(), scale)))?;
        let options = vec!["-n".into(), model.to_string(), "-s".into(), model_scale.to_string()];
        Self::new("realesrgan", "realesrgan-ncnn-vulkan", options)
    }

    fn arguments(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(), self.executable.path("input.png").into(),
            "-o".into(), self.executable.path("output.png").into(),
        ];
        args.extend(self.options.iter().map(OsString::from));
        args
    }
}

impl Upscaler for NcnnUpscaler {
    fn process(&mut self, frame: &Frame) -> Result<Frame, Error> {
        frame.save_png(&self.executable.path("input.png"))?;
        self.executable.run(&self.arguments())?;
        Frame::load_png(&self.executable.path("output.png"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(upscaler: &NcnnUpscaler) -> Vec<&str> {
        upscaler.options.iter().map(String::as_str).collect()
    }

    #[test]
    fn realesrgan_model_ids_follow_variant_base() {
        assert_eq!(RealEsrganVariant::AnimeVideoV3.model_id(2), 0);
        assert_eq!(RealEsrganVariant::AnimeVideoV3.model_id(4), 2);
        assert_eq!(RealEsrganVariant::X4PlusAnime.model_id(4), 3);
        assert_eq!(RealEsrganVariant::X4Plus.model_id(4), 4);
    }

    #[test]
    fn realesrgan_selects_model_by_id() {
        let upscaler = NcnnUpscaler::realesrgan(RealEsrganVariant::AnimeVideoV3, 3).unwrap();
        assert_eq!(options(&upscaler), ["-n", "realesr-animevideov3", "-s", "3"]);
        let upscaler = NcnnUpscaler::realesrgan(RealEsrganVariant::X4PlusAnime, 4).unwrap();
        assert_eq!(options(&upscaler), ["-n", "realesrgan-x4plus-anime", "-s", "4"]);
    }

    #[test]
    fn realesrgan_rejects_missing_scale() {
        assert!(NcnnUpscaler::realesrgan(RealEsrganVariant::X4Plus, 2).is_err());
    }

    #[test]
    fn noise_is_clamped_to_model_range() {
        assert_eq!(options(&NcnnUpscaler::waifu2x(7, 2).unwrap()), ["-n", "3", "-s", "2"]);
        assert_eq!(options(&NcnnUpscaler::srmd(7, 3).unwrap()), ["-n", "7", "-s", "3"]);
    }

    #[test]
    fn arguments_point_into_private_workdir() {
        let upscaler = NcnnUpscaler::realsr(4).unwrap();
        let args = upscaler.arguments();
        assert_eq!(args[0], "-i");
        assert!(std::path::Path::new(&args[1]).starts_with(upscaler.executable.workdir.path()));
    }

    #[test]
    fn missing_executable_is_reported() {
        let mut upscaler = NcnnUpscaler::new("absent", "video2x-absent-upscaler", Vec::new()).unwrap();
        let frame = Frame::filled(2, 2, [0, 0, 0]);
        assert!(matches!(upscaler.process(&frame), Err(Error::MissingTool(_))));
    }
}
