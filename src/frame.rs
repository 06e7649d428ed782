use crate::error::Error;

use std::path::Path;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

/// A packed RGB24 picture of known dimensions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, Error> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(Error::Invariant(format!(
                "frame of {}x{} needs {} bytes, got {}",
                width, height, expected, data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb.iter().copied().cycle().take(Self::byte_len(width, height)).collect();
        Self { width, height, data }
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::CHANNELS
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height, data: image.into_raw() }
    }

    pub fn to_image(&self) -> Result<RgbImage, Error> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| Error::Invariant(format!("invalid {}x{} frame buffer", self.width, self.height)))
    }

    pub fn into_image(self) -> Result<RgbImage, Error> {
        let (width, height) = (self.width, self.height);
        RgbImage::from_raw(width, height, self.data)
            .ok_or_else(|| Error::Invariant(format!("invalid {}x{} frame buffer", width, height)))
    }

    pub fn load_png(path: &Path) -> Result<Self, Error> {
        let image = image::open(path)?.to_rgb8();
        Ok(Self::from_image(image))
    }

    pub fn save_png(&self, path: &Path) -> Result<(), Error> {
        self.to_image()?.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }

    /// Resamples to exactly `width`x`height` with a Lanczos filter.
    pub fn resize(self, width: u32, height: u32) -> Result<Self, Error> {
        if self.width == width && self.height == height {
            return Ok(self);
        }
        let resized = imageops::resize(&self.into_image()?, width, height, FilterType::Lanczos3);
        Ok(Self::from_image(resized))
    }

    /// Mean absolute per-channel difference, as a percentage of full scale.
    ///
    /// Frames of different sizes are considered completely different.
    pub fn difference_percent(&self, other: &Frame) -> f64 {
        if self.width != other.width || self.height != other.height {
            return 100.0;
        }
        let pixels = self.width as usize * self.height as usize;
        if pixels == 0 {
            return 0.0;
        }

        let mut sums = [0u64; Self::CHANNELS];
        for (a, b) in self.data.chunks_exact(Self::CHANNELS).zip(other.data.chunks_exact(Self::CHANNELS)) {
            for channel in 0..Self::CHANNELS {
                sums[channel] += a[channel].abs_diff(b[channel]) as u64;
            }
        }

        let means: f64 = sums.iter().map(|&sum| sum as f64 / pixels as f64).sum();
        means / (Self::CHANNELS as f64 * 255.0) * 100.0
    }
}
