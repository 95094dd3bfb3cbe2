use std::fmt;

use segd_core::{Result, SegmentationModel};
use tracing::info;

use crate::Config;

pub mod box_fill;
pub mod sam;

pub use box_fill::BoxModel;
pub use sam::SamModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModelKind {
    /// SAM2 image encoder + prompt decoder (ONNX).
    #[default]
    Sam2,
    /// Fills the prompt box. Needs no weights.
    Box,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Sam2 => write!(f, "sam2"),
            ModelKind::Box => write!(f, "box"),
        }
    }
}

pub fn create_model(config: &Config) -> Result<Box<dyn SegmentationModel>> {
    match config.model {
        ModelKind::Sam2 => Ok(Box::new(SamModel::load(
            &config.encoder_path,
            &config.decoder_path,
            config.device,
            config.intra_threads,
        )?)),
        ModelKind::Box => Ok(Box::new(BoxModel::new())),
    }
}

/// Builds `config.instances` independent model instances. Any failure aborts.
pub fn create_models(config: &Config) -> Result<Vec<Box<dyn SegmentationModel>>> {
    let count = config.instances.max(1);
    let mut models = Vec::with_capacity(count);
    for index in 0..count {
        let model = create_model(config)?;
        info!(instance = index, model = model.name(), "model instance ready");
        models.push(model);
    }
    Ok(models)
}
