//! Command-line front end for capturing from V4L2 cameras.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cam_capture::{
    device_name, list_devices, CameraControls, CaptureConfig, ColorMode, Image, PixelLayout,
    Session, Surface,
};
use clap::{Parser, Subcommand};
use tracing::info;

/// Consecutive frame timeouts before `capture` gives up.
const MAX_TIMEOUTS: u32 = 5;

#[derive(Parser)]
#[command(name = "cam-capture")]
#[command(about = "Capture frames from V4L2 cameras")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List video device nodes
    List,

    /// Capture frames and optionally save the last one
    Capture {
        /// Device node to open
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,

        /// JSON settings file; command-line values override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Requested frame width
        #[arg(long)]
        width: Option<u32>,

        /// Requested frame height
        #[arg(long)]
        height: Option<u32>,

        /// Output color space: rgb, yuv or hsv
        #[arg(short, long)]
        mode: Option<ColorMode>,

        /// Number of frames to capture
        #[arg(short, long, default_value = "1")]
        frames: u32,

        /// Write the last frame as a binary PPM
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or change flip and brightness controls
    Controls {
        /// Device node to open
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,

        /// Mirror horizontally
        #[arg(long)]
        hflip: Option<bool>,

        /// Mirror vertically
        #[arg(long)]
        vflip: Option<bool>,

        /// Brightness in device units
        #[arg(long)]
        brightness: Option<i64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=cam_capture=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            list();
            Ok(())
        }
        Commands::Capture {
            device,
            config,
            width,
            height,
            mode,
            frames,
            output,
        } => {
            let mut config = match config {
                Some(path) => CaptureConfig::load(path)?,
                None => CaptureConfig::default(),
            };
            config.width = width.unwrap_or(config.width);
            config.height = height.unwrap_or(config.height);
            config.color_mode = mode.unwrap_or(config.color_mode);
            capture(&device, config, frames, output)
        }
        Commands::Controls {
            device,
            hflip,
            vflip,
            brightness,
        } => controls(&device, hflip, vflip, brightness),
    }
}

fn list() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("No video devices found");
    }
    for path in devices {
        let name = device_name(&path).unwrap_or_else(|| "unknown".to_owned());
        println!("{path}: {name}");
    }
}

fn capture(
    device: &str,
    config: CaptureConfig,
    frames: u32,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::open_with_config(device, config)?;
    let format = session.start()?;
    println!(
        "{device}: {}x{} {} -> {}",
        format.width,
        format.height,
        format.pixel_format,
        session.color_mode()
    );

    let mut image = Image::new(format.width, format.height, PixelLayout::RGB24)?;
    session.capture_frames(&mut image, frames, MAX_TIMEOUTS)?;
    info!(frames, "captured");

    if let Some(path) = output {
        write_ppm(&path, &image)?;
        println!("Wrote {}", path.display());
    }
    session.stop()?;
    Ok(())
}

fn write_ppm(path: &Path, image: &Image) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P6\n{} {}\n255\n", image.width(), image.height())?;
    out.write_all(image.pixels())?;
    out.flush()
}

fn controls(
    device: &str,
    hflip: Option<bool>,
    vflip: Option<bool>,
    brightness: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::open(device)?;
    let current = session.get_controls()?;

    let current = if hflip.is_some() || vflip.is_some() || brightness.is_some() {
        session.set_controls(CameraControls {
            hflip: hflip.unwrap_or(current.hflip),
            vflip: vflip.unwrap_or(current.vflip),
            brightness: brightness.unwrap_or(current.brightness),
        })?
    } else {
        current
    };

    println!("hflip: {}", current.hflip);
    println!("vflip: {}", current.vflip);
    println!("brightness: {}", current.brightness);
    Ok(())
}
