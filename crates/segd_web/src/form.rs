use std::collections::HashMap;

use axum::extract::Multipart;
use segd_core::{BoundingBox, Error, ImageBuffer, Result};
use tracing::debug;

use crate::error::ApiError;

pub const RENDERING_FIELD: &str = "rendering";
const NUMBER_FIELDS: [&str; 6] = ["x0", "y0", "x1", "y1", "width", "height"];

/// A validated `POST /` form.
#[derive(Debug)]
pub struct SegmentForm {
    pub bbox: BoundingBox,
    pub image: ImageBuffer,
}

/// Form fields as received, before any validation.
#[derive(Debug, Default)]
pub struct RawForm {
    numbers: HashMap<&'static str, String>,
    rendering: Option<Vec<u8>>,
}

impl RawForm {
    /// Records a numeric field. Names outside the form are dropped.
    pub fn set_number(&mut self, name: &str, value: impl Into<String>) {
        if let Some(&known) = NUMBER_FIELDS.iter().find(|&&known| known == name) {
            self.numbers.insert(known, value.into());
        }
    }

    pub fn set_rendering(&mut self, bytes: Vec<u8>) {
        self.rendering = Some(bytes);
    }

    fn field(&self, name: &str) -> Result<&str> {
        self.numbers
            .get(name)
            .map(|raw| raw.trim())
            .ok_or_else(|| Error::invalid(format!("missing form field '{}'", name)))
    }

    fn dimension(&self, name: &str) -> Result<u32> {
        let raw = self.field(name)?;
        raw.parse::<u32>().map_err(|_| {
            Error::invalid(format!(
                "form field '{}' must be a non-negative integer, got '{}'",
                name, raw
            ))
        })
    }

    /// Box corners are plain integers; they may be negative.
    fn coordinate(&self, name: &str) -> Result<i64> {
        let raw = self.field(name)?;
        raw.parse::<i64>().map_err(|_| {
            Error::invalid(format!("form field '{}' must be an integer, got '{}'", name, raw))
        })
    }

    pub fn validate(self) -> Result<SegmentForm> {
        let width = self.dimension("width")?;
        let height = self.dimension("height")?;
        let bbox = BoundingBox::clipped(
            self.coordinate("x0")?,
            self.coordinate("y0")?,
            self.coordinate("x1")?,
            self.coordinate("y1")?,
            width,
            height,
        )?;

        let rendering = self
            .rendering
            .ok_or_else(|| Error::invalid(format!("missing file field '{}'", RENDERING_FIELD)))?;
        let image = ImageBuffer::from_rgba(width, height, rendering)?;

        Ok(SegmentForm { bbox, image })
    }
}

impl SegmentForm {
    pub async fn from_multipart(mut multipart: Multipart) -> std::result::Result<Self, ApiError> {
        let mut raw = RawForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == RENDERING_FIELD {
                raw.set_rendering(field.bytes().await?.to_vec());
            } else if NUMBER_FIELDS.contains(&name.as_str()) {
                let text = field.text().await?;
                raw.set_number(&name, text);
            } else {
                debug!(field = %name, "ignoring unknown form field");
            }
        }
        Ok(raw.validate()?)
    }
}
