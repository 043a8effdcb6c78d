//! Immutable RGB frames and the handful of whole-frame helpers the pipeline
//! needs (fitting to a canvas, PNG encoding for previews).

use std::{io::Cursor, sync::Arc};

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

use crate::{LedCtlError, Result};

/// Width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    pub const fn area(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Resampling filter used when a frame has to be fitted to the device canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFilter {
    Nearest,
    Triangle,
    #[default]
    Lanczos,
}

impl From<ScaleFilter> for imageops::FilterType {
    fn from(value: ScaleFilter) -> Self {
        match value {
            ScaleFilter::Nearest => imageops::FilterType::Nearest,
            ScaleFilter::Triangle => imageops::FilterType::Triangle,
            ScaleFilter::Lanczos => imageops::FilterType::Lanczos3,
        }
    }
}

/// One fully decoded rectangular frame, row-major RGB.
///
/// The pixel buffer is shared, so cloning a frame is cheap and a frame can
/// never change after it has been produced.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    size: Size,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Wraps a raw buffer, checking `len == width * height * 3`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let size = Size::new(width, height);
        if size.area() == 0 {
            return Err(LedCtlError::source_fault(format!(
                "frame must not be empty ({width}x{height})"
            )));
        }
        if pixels.len() != size.area() * 3 {
            return Err(LedCtlError::source_fault(format!(
                "frame buffer holds {} bytes, expected {} for {width}x{height}",
                pixels.len(),
                size.area() * 3
            )));
        }
        Ok(Self {
            size,
            pixels: pixels.into(),
        })
    }

    pub fn solid(size: Size, color: [u8; 3]) -> Self {
        Self::from_fn(size, |_, _| color)
    }

    /// Builds a frame by evaluating `pixel(x, y)` for every position.
    pub fn from_fn(size: Size, mut pixel: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(size.area() * 3);
        for y in 0..size.height {
            for x in 0..size.width {
                pixels.extend_from_slice(&pixel(x, y));
            }
        }
        Self {
            size,
            pixels: pixels.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Color at `(x, y)`. Panics when out of bounds, like slice indexing.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.size.width as usize + x as usize) * 3;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    pub fn from_rgb_image(image: &RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.as_raw().clone())
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        // Dimensions and length agree by construction.
        RgbImage::from_raw(self.size.width, self.size.height, self.pixels.to_vec())
            .unwrap_or_else(|| RgbImage::new(self.size.width, self.size.height))
    }

    /// Returns a frame of exactly `target` size, resampling when needed.
    pub fn fit(&self, target: Size, filter: ScaleFilter) -> Frame {
        if self.size == target {
            return self.clone();
        }
        let resized = imageops::resize(
            &self.to_rgb_image(),
            target.width,
            target.height,
            filter.into(),
        );
        Self {
            size: target,
            pixels: resized.into_raw().into(),
        }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.to_rgb_image()
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.size.width)
            .field("height", &self.size.height)
            .finish()
    }
}
