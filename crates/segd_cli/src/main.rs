use anyhow::Context;
use clap::Parser;
use segd_core::{colorize, BoundingBox, ImageBuffer, MaskPredictor, MASK_COLOR};
use segd_inference::{create_segmentor, PoolConfig};
use segd_web::{create_app, serve, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod args;

use args::{Cli, Commands, ModelArgs, SegmentArgs, ServeArgs};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server(model: &ModelArgs, args: ServeArgs) -> anyhow::Result<()> {
    let config = model.inference_config(args.pool_config());
    info!(
        "🧠 Loading {} model on {} ({} instance(s))",
        config.model, config.device, config.instances
    );
    let segmentor = create_segmentor(config)
        .await
        .context("failed to initialize the segmentation model")?;

    let state = AppState {
        segmentor: Arc::new(segmentor),
    };
    let app = create_app(state, &args.server_config());
    serve(app, args.bind).await?;
    Ok(())
}

async fn run_segment(model: &ModelArgs, args: SegmentArgs) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let image = ImageBuffer::from_rgba(args.width, args.height, bytes)?;
    let [x0, y0, x1, y1] = args.bbox.0;
    let bbox = BoundingBox::clipped(x0, y0, x1, y1, args.width, args.height)?;

    let config = model.inference_config(PoolConfig::default());
    let segmentor = create_segmentor(config)
        .await
        .context("failed to initialize the segmentation model")?;
    let mask = segmentor.get_mask(image.into_rgb(), bbox).await?;
    let overlay = colorize(&mask, MASK_COLOR);

    let is_png = args
        .output
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if is_png {
        overlay
            .save(&args.output)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
    } else {
        tokio::fs::write(&args.output, overlay.into_raw())
            .await
            .with_context(|| format!("failed to write {}", args.output.display()))?;
    }
    info!(
        "✨ Wrote mask ({} of {} pixels) to {}",
        mask.area(),
        mask.as_slice().len(),
        args.output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_server(&cli.model, args).await,
        Commands::Segment(args) => run_segment(&cli.model, args).await,
    }
}
