use std::fmt;

use async_trait::async_trait;
use image::RgbImage;

use crate::mask::Mask;
use crate::types::BoundingBox;
use crate::Result;

/// A loaded segmentation model.
///
/// Backends follow the set-image-then-predict shape of promptable models:
/// `set_image` computes and keeps the image embedding, `predict` decodes a
/// mask for one box prompt against it. Both take `&mut self`, so whoever holds
/// the model has exclusive use of that state.
pub trait SegmentationModel: Send + fmt::Debug {
    fn name(&self) -> &str;

    fn set_image(&mut self, image: &RgbImage) -> Result<()>;

    /// Predicts a single mask for `bbox`, sized like the last image set.
    fn predict(&mut self, bbox: &BoundingBox) -> Result<Mask>;

    /// Runs `set_image` and `predict` as one unit.
    fn segment(&mut self, image: &RgbImage, bbox: &BoundingBox) -> Result<Mask> {
        self.set_image(image)?;
        self.predict(bbox)
    }
}

#[async_trait]
pub trait MaskPredictor: Send + Sync {
    /// Segment the object inside `bbox`. The returned mask has the image's
    /// dimensions.
    async fn get_mask(&self, image: RgbImage, bbox: BoundingBox) -> Result<Mask>;
}
