//! Optical Center Example
//!
//! Tracks one circle in a series of images taken at different
//! magnifications and estimates the optical center they share. The first
//! image is the reference magnification.
//!
//! Usage:
//! ```bash
//! RUST_LOG=info cargo run --example optical_center -- \
//!   samples/dot_x5.png samples/dot_x10.png samples/dot_x20.png \
//!   --model camera_model.yaml
//! ```

use camcalib::camera::{CameraModel, Rect};
use camcalib::optimization::{estimate_optical_center_with_options, OpticalCenterOptions};
use camcalib::{detection, util};
use clap::Parser;
use log::info;
use std::path::PathBuf;

/// Optical center estimation tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Images of the same circle, reference magnification first
    #[arg(required = true, num_args = 2..)]
    images: Vec<PathBuf>,

    /// Search window as x,y,width,height
    #[arg(long, value_parser = parse_roi)]
    roi: Option<Rect>,

    /// Points sampled on each circle
    #[arg(short = 's', long, default_value_t = 10)]
    samples: usize,

    /// Camera model file to update
    #[arg(short = 'm', long)]
    model: Option<PathBuf>,
}

fn parse_roi(value: &str) -> Result<Rect, String> {
    let parts: Vec<u32> = value
        .split(',')
        .map(|p| p.trim().parse::<u32>().map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, width, height] => Ok(Rect::new(*x, *y, *width, *height)),
        _ => Err(format!("expected x,y,width,height, got '{value}'")),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut circles = Vec::with_capacity(cli.images.len());
    for path in &cli.images {
        let path = path.to_str().ok_or("Invalid image path string")?;
        let image = util::load_gray_image(path)?;
        let circle = detection::track_circle(&image, cli.roi)?;
        info!("{}: circle at ({:.3}, {:.3}) r {:.3}", path, circle.x, circle.y, circle.r);
        circles.push(circle);
    }

    let options = OpticalCenterOptions {
        samples: cli.samples,
        ..Default::default()
    };
    let center = estimate_optical_center_with_options(&circles, &options)?;
    println!("Optical center: ({:.4}, {:.4})", center.x, center.y);

    if let Some(model_path) = &cli.model {
        let model_path = model_path.to_str().ok_or("Invalid model path string")?;
        let mut model = CameraModel::new();
        if std::path::Path::new(model_path).exists() {
            model.load_from_yaml(model_path)?;
        }
        model.set_optical_center(center);
        model.save_to_yaml(model_path)?;
        info!("Saved optical center to {}", model_path);
    }

    Ok(())
}
