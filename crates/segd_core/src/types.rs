use std::fmt;

use image::{DynamicImage, RgbImage, RgbaImage};

use crate::{Error, Result};

/// Bytes per pixel of an uploaded rendering.
pub const RGBA_CHANNELS: usize = 4;

/// Axis-aligned box prompt in image pixel coordinates.
///
/// Coverage is half-open: pixel `(x, y)` is inside when
/// `x0 <= x < x1` and `y0 <= y < y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl BoundingBox {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Result<Self> {
        if x1 < x0 {
            return Err(Error::invalid(format!("box x1 ({x1}) is smaller than x0 ({x0})")));
        }
        if y1 < y0 {
            return Err(Error::invalid(format!("box y1 ({y1}) is smaller than y0 ({y0})")));
        }
        Ok(Self { x0, y0, x1, y1 })
    }

    /// Builds a box from client corners and clips it to a `width` x `height`
    /// image.
    ///
    /// Corners may be negative or lie past the image edge, as they do when a
    /// drag leaves the canvas. Only inverted corners are rejected.
    pub fn clipped(x0: i64, y0: i64, x1: i64, y1: i64, width: u32, height: u32) -> Result<Self> {
        if x1 < x0 || y1 < y0 {
            return Err(Error::invalid(format!(
                "box [{x0}, {y0}, {x1}, {y1}] has inverted corners"
            )));
        }
        let clip = |v: i64, max: u32| v.clamp(0, i64::from(max)) as u32;
        Self::new(
            clip(x0, width),
            clip(y0, height),
            clip(x1, width),
            clip(y1, height),
        )
    }

    pub fn x0(&self) -> u32 {
        self.x0
    }

    pub fn y0(&self) -> u32 {
        self.y0
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x0, self.y0, self.x1, self.y1)
    }
}

/// An uploaded RGBA rendering whose size has been checked against its
/// declared dimensions.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    image: RgbaImage,
}

impl ImageBuffer {
    pub fn from_rgba(width: u32, height: u32, bytes: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }
        let expected = expected_len(width, height).ok_or_else(|| {
            Error::invalid(format!("image dimensions {width}x{height} are too large"))
        })?;
        if bytes.len() != expected {
            return Err(Error::invalid(format!(
                "rendering has {} bytes, expected {expected} for a {width}x{height} RGBA image",
                bytes.len()
            )));
        }
        let image = RgbaImage::from_raw(width, height, bytes)
            .ok_or_else(|| Error::invalid("rendering does not match its dimensions"))?;
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Drops the alpha channel.
    pub fn into_rgb(self) -> RgbImage {
        DynamicImage::ImageRgba8(self.image).into_rgb8()
    }
}

/// `width * height * 4`, or `None` when it does not fit in memory.
pub fn expected_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(RGBA_CHANNELS)
}
