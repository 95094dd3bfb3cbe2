use std::path::PathBuf;

use segd_core::{Error, Result};
use tracing::info;

pub mod device;
pub mod models;
pub mod pool;

pub use device::Device;
pub use models::{create_model, create_models, BoxModel, ModelKind, SamModel};
pub use pool::{PoolConfig, Segmentor};

#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelKind,
    pub encoder_path: PathBuf,
    pub decoder_path: PathBuf,
    pub device: Device,
    /// Independent model instances, each serving one request at a time.
    pub instances: usize,
    pub intra_threads: Option<usize>,
    pub pool: PoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelKind::default(),
            encoder_path: PathBuf::from("models/sam2.1_hiera_large.encoder.onnx"),
            decoder_path: PathBuf::from("models/sam2.1_hiera_large.decoder.onnx"),
            device: Device::default(),
            instances: 1,
            intra_threads: None,
            pool: PoolConfig::default(),
        }
    }
}

/// Loads every model instance off the async runtime and wraps them in a pool.
pub async fn create_segmentor(config: Config) -> Result<Segmentor> {
    let pool = config.pool.clone();
    let models = tokio::task::spawn_blocking(move || create_models(&config))
        .await
        .map_err(|e| Error::Model(format!("model loading task failed: {}", e)))??;
    let segmentor = Segmentor::new(models, pool)?;
    info!(instances = segmentor.size(), "segmentor ready");
    Ok(segmentor)
}

pub mod prelude {
    pub use super::{create_segmentor, Config, Device, ModelKind, PoolConfig, Segmentor};
    pub use segd_core::{BoundingBox, Error, Mask, MaskPredictor, Result};
}
