//! Lapse: timelapse recorder writing MJPEG AVI files

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::info;

use lapse::avi::AviSummary;
use lapse::capture::{jpeg, FrameSize, FrameSource, PixelFormat, SyntheticCamera};
use lapse::pipeline::SoftTimer;
use lapse::storage::FsStorage;
use lapse::{Config, Timelapse};

#[derive(Parser, Debug)]
#[command(name = "lapse", about = "Timelapse capture into MJPEG AVI")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LAPSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record from the synthetic camera until the duration elapses or Ctrl-C
    Record {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
        #[arg(long)]
        fps: Option<u32>,
        #[arg(long)]
        frame_delay_ms: Option<u64>,
        #[arg(long, value_enum)]
        frame_size: Option<FrameSize>,
        #[arg(long, value_enum)]
        format: Option<PixelFormat>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Make the camera fail after this many frames
        #[arg(long)]
        fault_after: Option<u64>,
    },

    /// Print the structure of a recorded AVI file
    Inspect { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lapse=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Record {
            seconds,
            fps,
            frame_delay_ms,
            frame_size,
            format,
            output_dir,
            fault_after,
        } => {
            if let Some(fps) = fps {
                config.lapse.video_fps = fps;
            }
            if let Some(delay) = frame_delay_ms {
                config.lapse.frame_delay_ms = delay;
            }
            if let Some(size) = frame_size {
                config.capture.frame_size = size;
            }
            if let Some(format) = format {
                config.capture.format = format;
            }
            if let Some(dir) = output_dir {
                config.lapse.output_dir = dir;
            }
            config.install();
            record(seconds, fault_after).await
        }
        Command::Inspect { file } => inspect(file),
    }
}

async fn record(seconds: Option<u64>, fault_after: Option<u64>) -> Result<()> {
    info!("Lapse launching...");

    let config = Config::current();
    let mut camera = SyntheticCamera::new(config.capture.clone());
    if let Some(frames) = fault_after {
        camera = camera.failing_after(frames);
    }
    let camera = Arc::new(camera);
    let source: Arc<dyn FrameSource> = camera.clone();
    let timer = Box::new(SoftTimer::new(config.timer.base_clock_hz));
    let timelapse = Timelapse::new(&config, source, Arc::new(FsStorage::new()), timer);

    timelapse.request_recording(true).await?;

    match seconds {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                signal = tokio::signal::ctrl_c() => signal?,
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    timelapse.request_recording(false).await?;
    let status = timelapse.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let buffers = camera.stats();
    if buffers.outstanding() != 0 {
        return Err(eyre!("{} frame buffers never returned", buffers.outstanding()));
    }
    info!("Lapse shutting down");
    Ok(())
}

fn inspect(file: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&file)?;
    let summary = AviSummary::parse(&bytes)?;
    let payloads = summary.indexed_payloads(&bytes)?;

    let first_frame = match payloads.first() {
        Some(data) if jpeg::is_jpeg(data) => Some(jpeg::probe(data)?),
        Some(_) => return Err(eyre!("first frame is not a JPEG image")),
        None => None,
    };

    let report = serde_json::json!({
        "file": file,
        "riff_size": summary.riff_size,
        "width": summary.main.width,
        "height": summary.main.height,
        "fps": summary.fps(),
        "total_frames": summary.main.total_frames,
        "has_index": summary.main.has_index(),
        "movi_size": summary.movi_size,
        "movi_chunks": summary.chunks.len(),
        "index_entries": summary.index.as_ref().map(Vec::len),
        "largest_frame": payloads.iter().map(|p| p.len()).max(),
        "first_frame_dimensions": first_frame,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accepts_every_frame_size() {
        for size in FrameSize::ALL {
            let name = serde_json::to_value(size).unwrap();
            let args = Args::try_parse_from([
                "lapse",
                "record",
                "--frame-size",
                name.as_str().unwrap(),
            ])
            .unwrap();
            match args.command {
                Command::Record { frame_size, .. } => assert_eq!(frame_size, Some(size)),
                other => panic!("parsed as {:?}", other),
            }
        }
    }

    #[test]
    fn record_accepts_grayscale() {
        let args =
            Args::try_parse_from(["lapse", "record", "--format", "grayscale", "--seconds", "3"])
                .unwrap();
        match args.command {
            Command::Record {
                format, seconds, ..
            } => {
                assert_eq!(format, Some(PixelFormat::Grayscale));
                assert_eq!(seconds, Some(3));
            }
            other => panic!("parsed as {:?}", other),
        }
    }
}
