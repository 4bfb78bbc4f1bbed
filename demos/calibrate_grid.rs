//! Grid Calibration Example
//!
//! Detects a circle grid in an image, calibrates the magnification and
//! optionally stores the result as a named magnification in a camera model
//! file.
//!
//! Usage:
//! ```bash
//! cargo run --example calibrate_grid -- \
//!   --image samples/grid_x10.png \
//!   --rows 5 --cols 7 --step 0.5 \
//!   --name x10 --model camera_model.yaml
//! ```

use camcalib::camera::{CameraModel, GridSpec, Rect, SearchConfig, DEFAULT_EDGE_STRENGTH};
use camcalib::{calibration, util};
use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{error, info};
use std::path::PathBuf;

/// Circle-grid calibration tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Grayscale (or color) image of the calibration target
    #[arg(short = 'i', long)]
    image: PathBuf,

    /// YAML search configuration; overrides the grid and edge arguments
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Number of fiducial rows
    #[arg(long, default_value_t = 5)]
    rows: usize,

    /// Number of fiducial columns
    #[arg(long, default_value_t = 5)]
    cols: usize,

    /// Fiducial spacing in world units
    #[arg(long, default_value_t = 1.0)]
    step: f64,

    /// Upper hysteresis bound of the edge detector
    #[arg(short = 'e', long, default_value_t = DEFAULT_EDGE_STRENGTH)]
    edge_strength: f64,

    /// Region of interest as x,y,width,height
    #[arg(long, value_parser = parse_roi)]
    roi: Option<Rect>,

    /// Magnification name stored in the camera model
    #[arg(short = 'n', long, default_value = "default")]
    name: String,

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

fn search_config(cli: &Cli) -> Result<SearchConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.config {
        let path = path.to_str().ok_or("Invalid config path string")?;
        info!("Loading search configuration from {}", path);
        return Ok(SearchConfig::load_from_yaml(path)?);
    }
    let config = SearchConfig::new(GridSpec::new(cli.rows, cli.cols, cli.step))
        .with_edge_strength(cli.edge_strength)
        .with_roi(cli.roi);
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        // error;warn;info;debug;trace
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    info!("Image: {:?}", cli.image);

    let config = search_config(&cli)?;
    info!("Search configuration: {:?}", config);

    let image_path = cli.image.to_str().ok_or("Invalid image path string")?;
    let image = util::load_gray_image(image_path)?;
    info!("Loaded {}x{} image", image.width(), image.height());

    let report = match calibration::calibrate_image(&image, &config) {
        Ok(report) => report,
        Err(e) => {
            error!("Calibration failed: {}", e);
            return Err(e.into());
        }
    };

    println!("\n=== CALIBRATION RESULTS ===");
    println!("  mx: {:.6} px/unit", report.intrinsic.mx);
    println!("  my: {:.6} px/unit", report.intrinsic.my);
    println!("  alpha: {:.6}", report.intrinsic.alpha);
    let (width, height) = report.intrinsic.pixel_size();
    println!("  pixel size: {:.7} x {:.7} units", width, height);
    println!("  {:?}", report.error);
    println!("===========================");

    if let Some(model_path) = &cli.model {
        let model_path = model_path.to_str().ok_or("Invalid model path string")?;
        let mut model = CameraModel::new();
        if std::path::Path::new(model_path).exists() {
            model.load_from_yaml(model_path)?;
        }
        model.add_magnification(cli.name.as_str(), &report.intrinsic);
        model.save_to_yaml(model_path)?;
        info!("Saved camera model to {}", model_path);
    }

    Ok(())
}
