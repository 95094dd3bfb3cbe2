#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use image::RgbImage;
use segd_core::{BoundingBox, Error, Mask, Result, SegmentationModel};
use segd_inference::{PoolConfig, Segmentor};
use segd_web::{create_app, AppState, ServerConfig};

pub const BOUNDARY: &str = "segd-test-boundary";
pub const COLOR: [u8; 4] = [255, 102, 0, 255];

/// Answers every prompt with a constant mask and counts calls.
#[derive(Debug)]
pub struct FilledModel {
    pub value: bool,
    pub calls: Arc<AtomicUsize>,
    dimensions: (u32, u32),
}

impl FilledModel {
    pub fn new(value: bool) -> Self {
        Self {
            value,
            calls: Arc::new(AtomicUsize::new(0)),
            dimensions: (0, 0),
        }
    }
}

impl SegmentationModel for FilledModel {
    fn name(&self) -> &str {
        "Filled"
    }

    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        self.dimensions = image.dimensions();
        Ok(())
    }

    fn predict(&mut self, _bbox: &BoundingBox) -> Result<Mask> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Mask::filled(self.dimensions.0, self.dimensions.1, self.value))
    }
}

/// Keeps the image it was given and, after a pause, turns on the first
/// `red / 16` pixels. A request can thereby tell whose image was used.
#[derive(Debug, Default)]
pub struct RecordingModel {
    pub delay: Duration,
    image: Option<RgbImage>,
}

impl RecordingModel {
    pub fn new(delay: Duration) -> Self {
        Self { delay, image: None }
    }
}

impl SegmentationModel for RecordingModel {
    fn name(&self) -> &str {
        "Recording"
    }

    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        self.image = Some(image.clone());
        Ok(())
    }

    fn predict(&mut self, _bbox: &BoundingBox) -> Result<Mask> {
        std::thread::sleep(self.delay);
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| Error::Inference("no image".to_string()))?;
        let lit = (image.get_pixel(0, 0)[0] / 16) as u32;
        let width = image.width();
        Ok(Mask::from_fn(width, image.height(), |x, y| y * width + x < lit))
    }
}

#[derive(Debug)]
pub struct FailingModel;

impl SegmentationModel for FailingModel {
    fn name(&self) -> &str {
        "Failing"
    }

    fn set_image(&mut self, _image: &RgbImage) -> Result<()> {
        Ok(())
    }

    fn predict(&mut self, _bbox: &BoundingBox) -> Result<Mask> {
        Err(Error::Inference("CUDA out of memory".to_string()))
    }
}

#[derive(Debug)]
pub struct PanickingModel;

impl SegmentationModel for PanickingModel {
    fn name(&self) -> &str {
        "Panicking"
    }

    fn set_image(&mut self, _image: &RgbImage) -> Result<()> {
        Ok(())
    }

    fn predict(&mut self, _bbox: &BoundingBox) -> Result<Mask> {
        panic!("decoder state corrupted");
    }
}

pub fn app_with(models: Vec<Box<dyn SegmentationModel>>, pool: PoolConfig, server: ServerConfig) -> Router {
    let segmentor = Segmentor::new(models, pool).unwrap();
    let state = AppState {
        segmentor: Arc::new(segmentor),
    };
    create_app(state, &server)
}

pub fn app(model: impl SegmentationModel + 'static) -> Router {
    app_with(vec![Box::new(model)], PoolConfig::default(), ServerConfig::default())
}

pub fn fields(x0: i64, y0: i64, x1: i64, y1: i64, width: u32, height: u32) -> Vec<(&'static str, String)> {
    vec![
        ("x0", x0.to_string()),
        ("y0", y0.to_string()),
        ("x1", x1.to_string()),
        ("y1", y1.to_string()),
        ("width", width.to_string()),
        ("height", height.to_string()),
    ]
}

pub fn segment_request(fields: &[(&str, String)], rendering: Option<&[u8]>) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    if let Some(bytes) = rendering {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"rendering\"; filename=\"data.bin\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn greeting_request() -> Request<Body> {
    Request::builder()
        .uri("/")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
