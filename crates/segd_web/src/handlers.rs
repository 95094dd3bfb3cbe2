use axum::{
    extract::{Multipart, State},
    http::header,
    response::{Html, IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use segd_core::{colorize, MASK_COLOR};
use tracing::info;
use crate::{error::ApiError, form::SegmentForm, AppState};

pub const GREETING: &str = "<p>Hello, world!</p>";

pub async fn greeting() -> Html<&'static str> {
    Html(GREETING)
}

/// Segments the object inside the posted box and answers with the mask as a
/// raw RGBA overlay of the same size as the rendering.
pub async fn segment(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = SegmentForm::from_multipart(multipart).await?;
    let (width, height) = form.image.dimensions();
    info!(width, height, bbox = %form.bbox, "✂️ segment request");

    let started = Instant::now();
    let mask = state
        .segmentor
        .get_mask(form.image.into_rgb(), form.bbox)
        .await?;
    let overlay = colorize(&mask, MASK_COLOR);
    info!(
        area = mask.area(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "mask ready"
    );

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        overlay.into_raw(),
    )
        .into_response())
}
