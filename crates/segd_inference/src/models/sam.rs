//! SAM2 (Segment Anything 2) run through ONNX Runtime.
//!
//! Expects the usual two-file export: an image encoder taking `image`
//! `[1, 3, 1024, 1024]` and producing `image_embed`, `high_res_feats_0` and
//! `high_res_feats_1`, and a prompt decoder taking those three plus
//! `point_coords`, `point_labels`, `mask_input` and `has_mask_input`, and
//! producing `masks` (logits) and `iou_predictions`.

use std::fmt;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use tracing::{debug, info};

use segd_core::{BoundingBox, Error, Mask, Result, SegmentationModel};

use crate::Device;

/// Side of the square encoder input.
const INPUT_SIZE: u32 = 1024;
/// Side of the (unused) low-resolution mask prompt.
const MASK_INPUT_SIZE: usize = 256;
const PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];
const MASK_THRESHOLD: f32 = 0.0;
const LABEL_BOX_TOP_LEFT: f32 = 2.0;
const LABEL_BOX_BOTTOM_RIGHT: f32 = 3.0;

/// A copied-out encoder output.
#[derive(Debug, Clone)]
struct FeatureMap {
    shape: Vec<i64>,
    data: Vec<f32>,
}

impl FeatureMap {
    fn from_value(value: &DynValue) -> Result<Self> {
        let (shape, data) = value.try_extract_tensor::<f32>().map_err(inference_error)?;
        Ok(Self {
            shape: shape.to_vec(),
            data: data.to_vec(),
        })
    }

    fn to_tensor(&self) -> Result<Tensor<f32>> {
        Tensor::from_array((self.shape.clone(), self.data.clone())).map_err(inference_error)
    }
}

struct ImageEmbedding {
    image_embed: FeatureMap,
    high_res_feats_0: FeatureMap,
    high_res_feats_1: FeatureMap,
    width: u32,
    height: u32,
}

pub struct SamModel {
    encoder: Session,
    decoder: Session,
    device: Device,
    embedding: Option<ImageEmbedding>,
}

impl fmt::Debug for SamModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamModel")
            .field("encoder", &"<ort::Session>")
            .field("decoder", &"<ort::Session>")
            .field("device", &self.device)
            .field("image_set", &self.embedding.is_some())
            .finish()
    }
}

impl SamModel {
    pub fn load(
        encoder_path: &Path,
        decoder_path: &Path,
        device: Device,
        intra_threads: Option<usize>,
    ) -> Result<Self> {
        let encoder = build_session(encoder_path, device, intra_threads)?;
        let decoder = build_session(decoder_path, device, intra_threads)?;
        info!(
            encoder = %encoder_path.display(),
            decoder = %decoder_path.display(),
            %device,
            "SAM2 model loaded"
        );

        Ok(Self {
            encoder,
            decoder,
            device,
            embedding: None,
        })
    }
}

impl SegmentationModel for SamModel {
    fn name(&self) -> &str {
        "SAM2"
    }

    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        let (width, height) = image.dimensions();
        let input = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            preprocess(image),
        ))
        .map_err(inference_error)?;

        let embedding = {
            let outputs = self
                .encoder
                .run(ort::inputs!["image" => input])
                .map_err(inference_error)?;
            let feature = |name: &str| -> Result<FeatureMap> {
                let value = outputs
                    .get(name)
                    .ok_or_else(|| Error::Inference(format!("encoder output '{}' is missing", name)))?;
                FeatureMap::from_value(value)
            };
            ImageEmbedding {
                image_embed: feature("image_embed")?,
                high_res_feats_0: feature("high_res_feats_0")?,
                high_res_feats_1: feature("high_res_feats_1")?,
                width,
                height,
            }
        };
        debug!(width, height, "image embedding computed");

        self.embedding = Some(embedding);
        Ok(())
    }

    fn predict(&mut self, bbox: &BoundingBox) -> Result<Mask> {
        let embedding = self
            .embedding
            .as_ref()
            .ok_or_else(|| Error::Inference("predict called before set_image".to_string()))?;
        let (width, height) = (embedding.width, embedding.height);

        let image_embed = embedding.image_embed.to_tensor()?;
        let high_res_feats_0 = embedding.high_res_feats_0.to_tensor()?;
        let high_res_feats_1 = embedding.high_res_feats_1.to_tensor()?;
        let point_coords = Tensor::from_array(([1usize, 2, 2], box_to_points(bbox, width, height).to_vec()))
            .map_err(inference_error)?;
        let point_labels = Tensor::from_array(([1usize, 2], vec![LABEL_BOX_TOP_LEFT, LABEL_BOX_BOTTOM_RIGHT]))
            .map_err(inference_error)?;
        let mask_input = Tensor::from_array((
            [1usize, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE],
            vec![0.0f32; MASK_INPUT_SIZE * MASK_INPUT_SIZE],
        ))
        .map_err(inference_error)?;
        let has_mask_input = Tensor::from_array(([1usize], vec![0.0f32])).map_err(inference_error)?;

        let outputs = self
            .decoder
            .run(ort::inputs![
                "image_embed" => image_embed,
                "high_res_feats_0" => high_res_feats_0,
                "high_res_feats_1" => high_res_feats_1,
                "point_coords" => point_coords,
                "point_labels" => point_labels,
                "mask_input" => mask_input,
                "has_mask_input" => has_mask_input
            ])
            .map_err(inference_error)?;

        let masks = outputs
            .get("masks")
            .ok_or_else(|| Error::Inference("decoder output 'masks' is missing".to_string()))?;
        let (shape, logits) = masks.try_extract_tensor::<f32>().map_err(inference_error)?;
        let (mask_height, mask_width) = match shape[..] {
            [_, count, h, w] if count >= 1 && h > 0 && w > 0 => (h as usize, w as usize),
            _ => {
                return Err(Error::Inference(format!(
                    "unexpected mask shape {:?}",
                    &shape[..]
                )))
            }
        };

        // Single-mask output: the first mask of the first prompt.
        let first = logits
            .get(..mask_width * mask_height)
            .ok_or_else(|| Error::Inference("mask tensor is truncated".to_string()))?;
        let mask = upscale_mask(first, mask_width, mask_height, width, height);
        debug!(%bbox, area = mask.area(), "mask decoded");
        Ok(mask)
    }
}

fn build_session(path: &Path, device: Device, intra_threads: Option<usize>) -> Result<Session> {
    if !path.is_file() {
        return Err(Error::Model(format!("model file {} not found", path.display())));
    }

    let mut builder = Session::builder()
        .map_err(model_error)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(model_error)?
        .with_execution_providers([execution_provider(device)?])
        .map_err(model_error)?;
    if let Some(threads) = intra_threads {
        builder = builder.with_intra_threads(threads).map_err(model_error)?;
    }
    builder.commit_from_file(path).map_err(model_error)
}

fn execution_provider(device: Device) -> Result<ExecutionProviderDispatch> {
    match device {
        Device::Cpu => Ok(CPUExecutionProvider::default().build()),
        #[cfg(feature = "cuda")]
        Device::Cuda(ordinal) => Ok(ort::execution_providers::CUDAExecutionProvider::default()
            .with_device_id(ordinal as i32)
            .build()
            .error_on_failure()),
        #[cfg(not(feature = "cuda"))]
        Device::Cuda(_) => Err(Error::Config(format!(
            "device {} requested but segd was built without the `cuda` feature",
            device
        ))),
    }
}

fn model_error(err: impl fmt::Display) -> Error {
    Error::Model(err.to_string())
}

fn inference_error(err: impl fmt::Display) -> Error {
    Error::Inference(err.to_string())
}

/// Resizes to the square encoder input and normalizes into a CHW buffer.
fn preprocess(image: &RgbImage) -> Vec<f32> {
    let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (pixel[c] as f32 / 255.0 - PIXEL_MEAN[c]) / PIXEL_STD[c];
        }
    }
    data
}

/// Box corners in encoder input space, `[x0, y0, x1, y1]`.
fn box_to_points(bbox: &BoundingBox, width: u32, height: u32) -> [f32; 4] {
    let sx = INPUT_SIZE as f32 / width as f32;
    let sy = INPUT_SIZE as f32 / height as f32;
    [
        bbox.x0() as f32 * sx,
        bbox.y0() as f32 * sy,
        bbox.x1() as f32 * sx,
        bbox.y1() as f32 * sy,
    ]
}

/// Bilinearly resamples mask logits to `width` x `height` (half-pixel
/// centers) and thresholds them.
fn upscale_mask(logits: &[f32], src_width: usize, src_height: usize, width: u32, height: u32) -> Mask {
    let scale_x = src_width as f32 / width as f32;
    let scale_y = src_height as f32 / height as f32;
    let max_x = (src_width - 1) as f32;
    let max_y = (src_height - 1) as f32;
    let at = |x: usize, y: usize| logits[y * src_width + x];

    Mask::from_fn(width, height, |x, y| {
        let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, max_x);
        let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, max_y);
        let (x0, y0) = (fx.floor() as usize, fy.floor() as usize);
        let (x1, y1) = ((x0 + 1).min(src_width - 1), (y0 + 1).min(src_height - 1));
        let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);

        let top = at(x0, y0) * (1.0 - tx) + at(x1, y0) * tx;
        let bottom = at(x0, y1) * (1.0 - tx) + at(x1, y1) * tx;
        top * (1.0 - ty) + bottom * ty > MASK_THRESHOLD
    })
}
