use std::fmt;

use image::RgbImage;

use segd_core::{BoundingBox, Error, Mask, Result, SegmentationModel};

/// Weight-free stand-in for a real model: the mask is exactly the box.
///
/// Handy for exercising the service without a checkpoint on disk.
#[derive(Default)]
pub struct BoxModel {
    dimensions: Option<(u32, u32)>,
}

impl fmt::Debug for BoxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxModel").finish()
    }
}

impl BoxModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentationModel for BoxModel {
    fn name(&self) -> &str {
        "Box"
    }

    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        self.dimensions = Some(image.dimensions());
        Ok(())
    }

    fn predict(&mut self, bbox: &BoundingBox) -> Result<Mask> {
        let (width, height) = self
            .dimensions
            .ok_or_else(|| Error::Inference("predict called before set_image".to_string()))?;
        Ok(Mask::from_fn(width, height, |x, y| bbox.contains(x, y)))
    }
}
