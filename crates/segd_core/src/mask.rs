use image::{Rgba, RgbaImage};

use crate::{Error, Result};

/// Overlay color for pixels inside the mask.
pub const MASK_COLOR: Rgba<u8> = Rgba([255, 102, 0, 255]);

/// Per-pixel object membership, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Result<Self> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(Error::Inference(format!(
                "mask has {} elements, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        Self {
            width,
            height,
            data: vec![value; (width as usize) * (height as usize)],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut data = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> Option<bool> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    /// Number of pixels inside the mask.
    pub fn area(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }
}

/// Paints `color` where the mask is set and leaves everything else fully
/// transparent black.
pub fn colorize(mask: &Mask, color: Rgba<u8>) -> RgbaImage {
    let mut out = RgbaImage::new(mask.width, mask.height);
    for (pixel, &inside) in out.pixels_mut().zip(mask.data.iter()) {
        if inside {
            *pixel = color;
        }
    }
    out
}
