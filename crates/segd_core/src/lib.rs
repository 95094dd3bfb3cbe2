pub mod error;
pub mod mask;
pub mod models;
pub mod types;

pub use error::Error;
pub use mask::{colorize, Mask, MASK_COLOR};
pub use models::{MaskPredictor, SegmentationModel};
pub use types::{BoundingBox, ImageBuffer};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{BoundingBox, Error, ImageBuffer, Mask, MaskPredictor, Result, SegmentationModel};
}
