use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use segd_inference::{Config, Device, ModelKind, PoolConfig};
use segd_web::ServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let too_large = || format!("Duration is too large: {}", s);
        let mut total_seconds = 0u64;
        let mut digits = String::new();
        let mut has_number = false;

        for c in s.chars() {
            let unit = match c {
                '0'..='9' => {
                    digits.push(c);
                    continue;
                }
                's' => 1,
                'm' => 60,
                'h' => 3600,
                c if c.is_whitespace() && digits.is_empty() => continue,
                c => return Err(format!("Invalid duration unit: {}", c)),
            };
            if digits.is_empty() {
                return Err(format!("Duration unit '{}' needs a number", c));
            }
            total_seconds = add_scaled(total_seconds, &digits, unit).ok_or_else(too_large)?;
            digits.clear();
            has_number = true;
        }

        // A bare number means seconds
        if !digits.is_empty() {
            total_seconds = add_scaled(total_seconds, &digits, 1).ok_or_else(too_large)?;
            has_number = true;
        }

        if !has_number {
            return Err("Duration must include a number".to_string());
        }

        Ok(HumanDuration(Duration::from_secs(total_seconds)))
    }
}

/// `total + digits * unit`, or `None` on overflow.
fn add_scaled(total: u64, digits: &str, unit: u64) -> Option<u64> {
    digits.parse::<u64>().ok()?.checked_mul(unit)?.checked_add(total)
}

/// `x0,y0,x1,y1` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxArg(pub [i64; 4]);

impl FromStr for BoxArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format!("Invalid box coordinate: {}", e))?;
        match parts[..] {
            [x0, y0, x1, y1] => Ok(BoxArg([x0, y0, x1, y1])),
            _ => Err(format!("Box needs 4 coordinates (x0,y0,x1,y1), got {}", parts.len())),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Box-prompted image segmentation service", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Segmentation backend
    #[arg(long, env = "SEGD_MODEL", value_enum, default_value_t = ModelKind::Sam2, global = true)]
    pub model: ModelKind,
    /// SAM2 image encoder (ONNX)
    #[arg(long, env = "SEGD_ENCODER", default_value = "models/sam2.1_hiera_large.encoder.onnx", global = true)]
    pub encoder: PathBuf,
    /// SAM2 prompt decoder (ONNX)
    #[arg(long, env = "SEGD_DECODER", default_value = "models/sam2.1_hiera_large.decoder.onnx", global = true)]
    pub decoder: PathBuf,
    /// Compute device: cpu, cuda or cuda:N
    #[arg(long, env = "SEGD_DEVICE", default_value = "cpu", global = true)]
    pub device: Device,
    /// Independent model instances; each serves one request at a time
    #[arg(long, env = "SEGD_INSTANCES", default_value_t = 1, global = true)]
    pub instances: usize,
    /// ONNX Runtime intra-op threads per session
    #[arg(long, env = "SEGD_INTRA_THREADS", global = true)]
    pub intra_threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Segment a raw RGBA file once and write the overlay
    Segment(SegmentArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "SEGD_BIND", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,
    /// Requests allowed to wait once every instance is busy
    #[arg(long, env = "SEGD_QUEUE_DEPTH", default_value_t = 8)]
    pub queue_depth: usize,
    /// Longest wait for a free instance (e.g. 30s, 2m)
    #[arg(long, env = "SEGD_ACQUIRE_TIMEOUT", default_value = "30s")]
    pub acquire_timeout: HumanDuration,
    /// Longest time a whole request may take
    #[arg(long, env = "SEGD_REQUEST_TIMEOUT", default_value = "120s")]
    pub request_timeout: HumanDuration,
    #[arg(long, env = "SEGD_MAX_UPLOAD_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_upload_bytes: usize,
}

#[derive(Args, Debug)]
pub struct SegmentArgs {
    /// Raw RGBA pixels, row-major, width*height*4 bytes
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub width: u32,
    #[arg(long)]
    pub height: u32,
    /// Box prompt as x0,y0,x1,y1, clipped to the image
    #[arg(long = "box", allow_hyphen_values = true)]
    pub bbox: BoxArg,
    /// Output file; `.png` is encoded, anything else gets raw RGBA
    #[arg(long)]
    pub output: PathBuf,
}

impl ModelArgs {
    pub fn inference_config(&self, pool: PoolConfig) -> Config {
        Config {
            model: self.model,
            encoder_path: self.encoder.clone(),
            decoder_path: self.decoder.clone(),
            device: self.device,
            instances: self.instances,
            intra_threads: self.intra_threads,
            pool,
        }
    }
}

impl ServeArgs {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            queue_depth: self.queue_depth,
            acquire_timeout: self.acquire_timeout.0,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_upload_bytes: self.max_upload_bytes,
            request_timeout: self.request_timeout.0,
        }
    }
}
